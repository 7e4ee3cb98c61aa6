/// JSON-RPC access to an EVM node.
///
/// [`ChainRpc`] is the seam between the anchoring logic and the network:
/// [`HttpRpc`] talks to a real node over HTTP, tests substitute a mock.
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{within, AnchorError, Result};

/// A contract call or transaction to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub gas: Option<u64>,
    pub gas_price: Option<u128>,
}

/// The parts of a transaction receipt the anchoring flow uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    /// `true` when the transaction executed without reverting.
    pub status: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockHeader {
    pub number: u64,
    /// Unix seconds.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcTransaction {
    pub hash: String,
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
    pub block_number: Option<u64>,
}

/// Node operations used by the connection and the anchor contract.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    async fn block_number(&self) -> Result<u64>;

    async fn balance(&self, address: Address) -> Result<U256>;

    async fn gas_price(&self) -> Result<u128>;

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64>;

    /// Read-only contract call (`eth_call`).
    async fn call(&self, request: &CallRequest) -> Result<Bytes>;

    /// Accounts the node will sign for, asking for access where required.
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    async fn transaction_count(&self, address: Address) -> Result<u64>;

    /// Broadcast a locally signed transaction. Returns its hash.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<String>;

    /// Have the node sign and broadcast. Returns the transaction hash.
    async fn send_transaction(&self, request: &CallRequest) -> Result<String>;

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>>;

    async fn transaction_by_hash(&self, tx_hash: &str) -> Result<Option<RpcTransaction>>;

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockHeader>>;
}

/// Simplified JSON-RPC response.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    gas_used: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    number: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    input: String,
    block_number: Option<String>,
}

/// JSON-RPC over HTTP with a per-call deadline.
pub struct HttpRpc {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpRpc {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout,
        }
    }

    /// Send a JSON-RPC request; a `null` result is `Ok(None)`.
    async fn rpc_call_optional<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        debug!(method, "RPC call");

        let request = async {
            let resp: JsonRpcResponse<T> = self
                .client
                .post(&self.url)
                .json(&body)
                .send()
                .await
                .map_err(|e| AnchorError::Connectivity(format!("{method}: {e}")))?
                .json()
                .await
                .map_err(|e| {
                    AnchorError::Serialization(format!("RPC response parse error: {e}"))
                })?;

            if let Some(err) = resp.error {
                return Err(AnchorError::Rpc(err.message));
            }

            Ok(resp.result)
        };

        within(method, self.timeout, request).await
    }

    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T> {
        self.rpc_call_optional(method, params)
            .await?
            .ok_or_else(|| AnchorError::Rpc(format!("Empty RPC response for {method}")))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u64> {
        let hex: String = self.rpc_call(method, params).await?;
        parse_u64(&hex)
    }
}

#[async_trait]
impl ChainRpc for HttpRpc {
    async fn chain_id(&self) -> Result<u64> {
        self.quantity("eth_chainId", json!([])).await
    }

    async fn block_number(&self) -> Result<u64> {
        self.quantity("eth_blockNumber", json!([])).await
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        let hex: String = self
            .rpc_call("eth_getBalance", json!([format!("{address:?}"), "latest"]))
            .await?;
        parse_u256(&hex)
    }

    async fn gas_price(&self) -> Result<u128> {
        let hex: String = self.rpc_call("eth_gasPrice", json!([])).await?;
        parse_u128(&hex)
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        self.quantity("eth_estimateGas", json!([call_object(request)]))
            .await
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes> {
        let hex: String = self
            .rpc_call("eth_call", json!([call_object(request), "latest"]))
            .await?;
        parse_bytes(&hex)
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let accounts: Vec<String> = match self.rpc_call("eth_requestAccounts", json!([])).await {
            Ok(accounts) => accounts,
            // Plain nodes don't implement the wallet method.
            Err(AnchorError::Rpc(_)) => self.rpc_call("eth_accounts", json!([])).await?,
            Err(e) => return Err(e),
        };

        accounts.iter().map(|a| parse_address(a)).collect()
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        self.quantity(
            "eth_getTransactionCount",
            json!([format!("{address:?}"), "pending"]),
        )
        .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<String> {
        let raw_hex = format!("0x{}", hex::encode(&raw));
        self.rpc_call("eth_sendRawTransaction", json!([raw_hex]))
            .await
    }

    async fn send_transaction(&self, request: &CallRequest) -> Result<String> {
        self.rpc_call("eth_sendTransaction", json!([call_object(request)]))
            .await
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        let raw: Option<RawReceipt> = self
            .rpc_call_optional("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        // Some nodes return pending receipts without a block number.
        let Some(block_hex) = raw.block_number else {
            return Ok(None);
        };

        Ok(Some(TransactionReceipt {
            transaction_hash: raw.transaction_hash,
            block_number: parse_u64(&block_hex)?,
            gas_used: parse_u64(&raw.gas_used)?,
            status: match raw.status {
                Some(s) => parse_u64(&s)? == 1,
                None => true,
            },
        }))
    }

    async fn transaction_by_hash(&self, tx_hash: &str) -> Result<Option<RpcTransaction>> {
        let raw: Option<RawTransaction> = self
            .rpc_call_optional("eth_getTransactionByHash", json!([tx_hash]))
            .await?;

        raw.map(|tx| -> Result<RpcTransaction> {
            Ok(RpcTransaction {
                hash: tx.hash,
                from: parse_address(&tx.from)?,
                to: tx.to.as_deref().map(parse_address).transpose()?,
                input: parse_bytes(&tx.input)?,
                block_number: tx.block_number.as_deref().map(parse_u64).transpose()?,
            })
        })
        .transpose()
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockHeader>> {
        let raw: Option<RawBlock> = self
            .rpc_call_optional(
                "eth_getBlockByNumber",
                json!([format!("0x{number:x}"), false]),
            )
            .await?;

        raw.map(|b| -> Result<BlockHeader> {
            Ok(BlockHeader {
                number: parse_u64(&b.number)?,
                timestamp: parse_u64(&b.timestamp)?,
            })
        })
        .transpose()
    }
}

/// JSON form of a call/transaction object.
fn call_object(request: &CallRequest) -> Value {
    let mut obj = json!({
        "to": format!("{:?}", request.to),
        "data": format!("0x{}", hex::encode(&request.data)),
    });
    if let Some(from) = request.from {
        obj["from"] = json!(format!("{from:?}"));
    }
    if let Some(gas) = request.gas {
        obj["gas"] = json!(format!("0x{gas:x}"));
    }
    if let Some(price) = request.gas_price {
        obj["gasPrice"] = json!(format!("0x{price:x}"));
    }
    obj
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

pub(crate) fn parse_u64(hex: &str) -> Result<u64> {
    u64::from_str_radix(strip_0x(hex), 16)
        .map_err(|e| AnchorError::Serialization(format!("Invalid quantity {hex}: {e}")))
}

pub(crate) fn parse_u128(hex: &str) -> Result<u128> {
    u128::from_str_radix(strip_0x(hex), 16)
        .map_err(|e| AnchorError::Serialization(format!("Invalid quantity {hex}: {e}")))
}

pub(crate) fn parse_u256(hex: &str) -> Result<U256> {
    U256::from_str_radix(strip_0x(hex), 16)
        .map_err(|e| AnchorError::Serialization(format!("Invalid quantity {hex}: {e}")))
}

pub(crate) fn parse_bytes(hex: &str) -> Result<Bytes> {
    hex::decode(strip_0x(hex))
        .map(Bytes::from)
        .map_err(|e| AnchorError::Serialization(format!("Invalid hex data: {e}")))
}

pub(crate) fn parse_address(s: &str) -> Result<Address> {
    Address::from_str(s)
        .map_err(|e| AnchorError::Serialization(format!("Invalid address {s}: {e}")))
}
