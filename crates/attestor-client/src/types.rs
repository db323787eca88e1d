use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

/// Location of a log the attestation service should prove.
///
/// The service addresses logs by position inside their transaction, not by the
/// block-global log index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProofRequest {
    /// Chain the log was emitted on.
    pub src_chain_id: u64,
    /// Block containing the transaction.
    pub src_block_number: u64,
    /// Position of the transaction inside the block.
    pub tx_index: u64,
    /// Position of the log among the logs emitted by the transaction.
    pub local_log_index: u64,
}

impl ProofRequest {
    /// Positional JSON-RPC params in the order the service expects.
    pub(crate) fn params(&self) -> [u64; 4] {
        [
            self.src_chain_id,
            self.src_block_number,
            self.tx_index,
            self.local_log_index,
        ]
    }
}

/// Identifier of a proof generation job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Raw `result` of a proof query.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryProofResult {
    /// Job status, e.g. `pending` or `complete`.
    pub status: String,
    /// Proof bytes, base64 encoded on the wire.
    #[serde_as(as = "Option<Base64>")]
    pub proof: Option<Vec<u8>>,
    /// Reason reported for failed jobs.
    pub failure_reason: Option<String>,
}

/// State of a proof generation job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProofStatus {
    /// The job has not produced a proof yet.
    Pending,
    /// The proof is ready, decoded into raw bytes.
    Ready(Vec<u8>),
    /// The service gave up on the job.
    Failed(String),
}

impl From<QueryProofResult> for ProofStatus {
    fn from(result: QueryProofResult) -> Self {
        match (result.status.as_str(), result.proof) {
            ("complete", Some(proof)) => Self::Ready(proof),
            ("error", _) => Self::Failed(
                result
                    .failure_reason
                    .unwrap_or_else(|| "unknown failure".to_string()),
            ),
            _ => Self::Pending,
        }
    }
}
