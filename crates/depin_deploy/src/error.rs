//! Deployment error types.

use alloy::primitives::TxHash;

/// Errors that can occur while compiling or deploying.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Missing or invalid configuration (config file, environment, CLI).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The Solidity compiler could not be run or reported errors.
    #[error("Compilation failed: {0}")]
    Compile(String),

    /// A compiled artifact is missing or unusable.
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Transport or node-side failure talking to the RPC endpoint.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A transaction was mined but its receipt reports failure.
    #[error("Transaction {tx_hash} reverted ({action})")]
    Reverted { action: String, tx_hash: TxHash },

    /// The RPC endpoint serves a different chain than the network declares.
    #[error("Chain id mismatch: network expects {expected}, RPC endpoint reports {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = DeployError> = std::result::Result<T, E>;
