/// In-memory [`ChainRpc`] used by unit tests.
use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::{address, keccak256, utils::parse_ether, Address, Bytes, U256};
use async_trait::async_trait;

use super::rpc::{BlockHeader, CallRequest, ChainRpc, RpcTransaction, TransactionReceipt};
use crate::error::{AnchorError, Result};

pub(crate) const MOCK_ACCOUNT: Address = address!("00000000000000000000000000000000000000aa");
pub(crate) const GENESIS_TIME: u64 = 1_700_000_000;

struct MockState {
    chain_id: u64,
    block_number: u64,
    balance: U256,
    gas_price: u128,
    gas_estimate: u64,
    accounts: Vec<Address>,
    estimate_error: Option<String>,
    send_error: Option<String>,
    unreachable: bool,
    mine_on_send: bool,
    revert: bool,
    call_result: Bytes,
    tx_counter: u64,
    sent: Vec<CallRequest>,
    raw: Vec<Bytes>,
    pending: Vec<String>,
    receipts: HashMap<String, TransactionReceipt>,
    transactions: HashMap<String, RpcTransaction>,
}

/// Scriptable chain: every send is mined into its own block by default.
pub(crate) struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                chain_id: 80002,
                block_number: 100,
                balance: parse_ether("1").unwrap(),
                gas_price: 30_000_000_000,
                gas_estimate: 100_000,
                accounts: vec![MOCK_ACCOUNT],
                estimate_error: None,
                send_error: None,
                unreachable: false,
                mine_on_send: true,
                revert: false,
                call_result: Bytes::new(),
                tx_counter: 0,
                sent: Vec::new(),
                raw: Vec::new(),
                pending: Vec::new(),
                receipts: HashMap::new(),
                transactions: HashMap::new(),
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_chain_id(&self, id: u64) {
        self.with(|s| s.chain_id = id);
    }

    pub fn set_balance(&self, wei: U256) {
        self.with(|s| s.balance = wei);
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.with(|s| s.accounts = accounts);
    }

    pub fn set_gas_estimate(&self, gas: u64) {
        self.with(|s| s.gas_estimate = gas);
    }

    pub fn fail_estimate(&self, message: &str) {
        self.with(|s| s.estimate_error = Some(message.to_string()));
    }

    pub fn fail_send(&self, message: &str) {
        self.with(|s| s.send_error = Some(message.to_string()));
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.with(|s| s.unreachable = unreachable);
    }

    pub fn set_mine_on_send(&self, mine: bool) {
        self.with(|s| s.mine_on_send = mine);
    }

    pub fn set_revert(&self, revert: bool) {
        self.with(|s| s.revert = revert);
    }

    pub fn set_call_result(&self, data: Bytes) {
        self.with(|s| s.call_result = data);
    }

    /// Mine pending transactions into the next block.
    pub fn mine(&self) {
        self.with(|s| {
            s.block_number += 1;
            let block = s.block_number;
            let pending = std::mem::take(&mut s.pending);
            for hash in pending {
                include(s, &hash, block);
            }
        });
    }

    pub fn advance_blocks(&self, n: u64) {
        self.with(|s| s.block_number += n);
    }

    pub fn block_height(&self) -> u64 {
        self.with(|s| s.block_number)
    }

    /// Node-signed transactions, in order.
    pub fn sent(&self) -> Vec<CallRequest> {
        self.with(|s| s.sent.clone())
    }

    pub fn raw_submissions(&self) -> usize {
        self.with(|s| s.raw.len())
    }

    fn check_reachable(&self) -> Result<()> {
        if self.with(|s| s.unreachable) {
            return Err(AnchorError::Connectivity("connection refused".into()));
        }
        Ok(())
    }

    fn record(&self, from: Address, to: Option<Address>, input: Bytes) -> Result<String> {
        self.check_reachable()?;
        self.with(|s| {
            if let Some(msg) = &s.send_error {
                return Err(AnchorError::Rpc(msg.clone()));
            }

            s.tx_counter += 1;
            let hash = format!("0x{}", hex::encode(keccak256(s.tx_counter.to_be_bytes())));
            s.transactions.insert(
                hash.clone(),
                RpcTransaction {
                    hash: hash.clone(),
                    from,
                    to,
                    input,
                    block_number: None,
                },
            );

            if s.mine_on_send {
                s.block_number += 1;
                let block = s.block_number;
                include(s, &hash, block);
            } else {
                s.pending.push(hash.clone());
            }

            Ok(hash)
        })
    }
}

fn include(s: &mut MockState, hash: &str, block: u64) {
    let gas_used = s.gas_estimate;
    let status = !s.revert;
    if let Some(tx) = s.transactions.get_mut(hash) {
        tx.block_number = Some(block);
    }
    s.receipts.insert(
        hash.to_string(),
        TransactionReceipt {
            transaction_hash: hash.to_string(),
            block_number: block,
            gas_used,
            status,
        },
    );
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn chain_id(&self) -> Result<u64> {
        self.check_reachable()?;
        Ok(self.with(|s| s.chain_id))
    }

    async fn block_number(&self) -> Result<u64> {
        self.check_reachable()?;
        Ok(self.with(|s| s.block_number))
    }

    async fn balance(&self, _address: Address) -> Result<U256> {
        self.check_reachable()?;
        Ok(self.with(|s| s.balance))
    }

    async fn gas_price(&self) -> Result<u128> {
        self.check_reachable()?;
        Ok(self.with(|s| s.gas_price))
    }

    async fn estimate_gas(&self, _request: &CallRequest) -> Result<u64> {
        self.check_reachable()?;
        self.with(|s| match &s.estimate_error {
            Some(msg) => Err(AnchorError::Rpc(msg.clone())),
            None => Ok(s.gas_estimate),
        })
    }

    async fn call(&self, _request: &CallRequest) -> Result<Bytes> {
        self.check_reachable()?;
        Ok(self.with(|s| s.call_result.clone()))
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        self.check_reachable()?;
        Ok(self.with(|s| s.accounts.clone()))
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64> {
        self.check_reachable()?;
        Ok(self.with(|s| s.raw.len() as u64))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<String> {
        let hash = self.record(Address::ZERO, None, Bytes::new())?;
        self.with(|s| s.raw.push(raw));
        Ok(hash)
    }

    async fn send_transaction(&self, request: &CallRequest) -> Result<String> {
        let from = request.from.unwrap_or(Address::ZERO);
        let hash = self.record(from, Some(request.to), request.data.clone())?;
        self.with(|s| s.sent.push(request.clone()));
        Ok(hash)
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        self.check_reachable()?;
        Ok(self.with(|s| s.receipts.get(tx_hash).cloned()))
    }

    async fn transaction_by_hash(&self, tx_hash: &str) -> Result<Option<RpcTransaction>> {
        self.check_reachable()?;
        Ok(self.with(|s| s.transactions.get(tx_hash).cloned()))
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockHeader>> {
        self.check_reachable()?;
        Ok(self.with(|s| {
            (number <= s.block_number).then(|| BlockHeader {
                number,
                timestamp: GENESIS_TIME + number * 2,
            })
        }))
    }
}
