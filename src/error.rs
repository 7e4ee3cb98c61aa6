use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("Audit log retrieval failed: {0}")]
    Retrieval(String),

    #[error("Blockchain connectivity error: {0}")]
    Connectivity(String),

    /// JSON-RPC error returned by the node, message kept verbatim.
    #[error("{0}")]
    Rpc(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// An anchoring attempt was refused or did not complete.
    #[error("{0}")]
    Submission(String),

    #[error("Anchor persistence conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnchorError>;

/// Run `fut` under a deadline, mapping expiry to [`AnchorError::Timeout`].
pub async fn within<T, F>(operation: &str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(AnchorError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}
