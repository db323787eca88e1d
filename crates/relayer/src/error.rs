//! Error types for the invoice relayer.

use std::io;

use alloy_primitives::{B256, ChainId};
use thiserror::Error;

/// Errors that can occur in the invoice relayer.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// RPC call to a chain node failed.
    #[error("transport error on chain {chain_id}: {message}")]
    Transport {
        /// Chain the call was made against.
        chain_id: ChainId,
        /// Underlying error.
        message: String,
    },

    /// Call to the attestation service failed.
    #[error("attestor error: {0}")]
    Attestor(#[from] attestor_client::Error),

    /// A `submitProof` transaction was mined but reverted.
    #[error("transaction {tx_hash} reverted on chain {chain_id}")]
    Reverted {
        /// Target chain.
        chain_id: ChainId,
        /// Transaction hash.
        tx_hash: B256,
    },

    /// The node has no receipt for a transaction we saw a log from.
    #[error("no receipt for transaction {tx_hash} on chain {chain_id}")]
    MissingReceipt {
        /// Source chain.
        chain_id: ChainId,
        /// Transaction hash.
        tx_hash: B256,
    },

    /// On-chain data does not look the way the relay protocol expects.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// The attestation service reported a failed proof job.
    #[error("proof job {job_id} failed: {reason}")]
    ProofFailed {
        /// Attestation job id.
        job_id: u64,
        /// Reason reported by the service.
        reason: String,
    },

    /// The proof was not ready after the poll budget was spent.
    #[error("proof job {job_id} not ready after {attempts} polls")]
    ProofTimeout {
        /// Attestation job id.
        job_id: u64,
        /// Number of polls performed.
        attempts: u32,
    },

    /// No chain listener could be started.
    #[error("no chain could be listened to")]
    NoListeners,

    /// Operation is not valid in the current lifecycle state.
    #[error("invalid relayer state: expected {expected}, found {found}")]
    InvalidState {
        /// State the operation requires.
        expected: &'static str,
        /// State the relayer is in.
        found: &'static str,
    },

    /// Metrics exporter could not be installed.
    #[error("metrics error: {0}")]
    Metrics(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml_edit::de::Error),
}

impl Error {
    /// Builds a [`Error::Transport`] from any displayable error.
    pub(crate) fn transport(chain_id: ChainId, error: impl std::fmt::Display) -> Self {
        Self::Transport {
            chain_id,
            message: error.to_string(),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
