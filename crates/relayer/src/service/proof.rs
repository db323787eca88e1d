//! # Proof Acquisition
//!
//! This module provides [`ProofAcquirer`], which turns a [`RawEvent`] into a [`ProofRecord`] by
//! asking the attestation service for a proof job and polling it until the proof is ready.
//!
//! The service addresses a log by `(chain, block, transaction index, local log index)`, where the
//! local index is the position of the log among the logs of its own transaction. That index is
//! resolved from the transaction receipt.
//!
//! Polling is bounded: [`PollPolicy::max_attempts`] queries spaced by [`PollPolicy::interval`]. A
//! failed job or a failed query ends the poll loop at once; nothing is retried beyond it.

use std::{sync::Arc, time::Duration};

use alloy_primitives::Bytes;
use alloy_rpc_types_eth::Log;
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use attestor_client::{AttestorClient, JobId, ProofRequest, ProofStatus};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    chain::{ChainClient, TxReceipt},
    contract::InvoiceBatch,
    error::{Error, Result},
    event::RawEvent,
};

/// The attestation service, as used by the relay.
#[async_trait]
pub trait Attestor: Send + Sync {
    /// Starts a proof job.
    async fn request_proof(&self, request: &ProofRequest) -> Result<JobId>;

    /// Reads the state of a proof job.
    async fn query_proof(&self, job_id: JobId) -> Result<ProofStatus>;
}

#[async_trait]
impl Attestor for AttestorClient {
    async fn request_proof(&self, request: &ProofRequest) -> Result<JobId> {
        Ok(AttestorClient::request_proof(self, request).await?)
    }

    async fn query_proof(&self, job_id: JobId) -> Result<ProofStatus> {
        Ok(AttestorClient::query_proof(self, job_id).await?)
    }
}

/// Proof polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before each poll.
    pub interval: Duration,
    /// Number of polls before giving up.
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    /// 120 polls, 500 ms apart: a one minute budget.
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_attempts: 120,
        }
    }
}

/// A proof ready to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRecord {
    /// Attestation job that produced the proof.
    pub job_id: JobId,
    /// Opaque proof bytes, forwarded verbatim to target chains.
    pub proof: Bytes,
    /// Time from job submission to proof readiness.
    pub elapsed: Duration,
    /// Number of polls it took.
    pub attempts: u32,
}

/// Requests and polls proofs from the attestation service.
#[derive(Clone)]
pub struct ProofAcquirer {
    attestor: Arc<dyn Attestor>,
    policy: PollPolicy,
}

impl std::fmt::Debug for ProofAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofAcquirer")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ProofAcquirer {
    /// Creates a new `ProofAcquirer`.
    pub fn new(attestor: Arc<dyn Attestor>, policy: PollPolicy) -> Self {
        Self { attestor, policy }
    }

    /// Returns the polling schedule.
    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Acquires a proof for `event`, reading its receipt from `source`.
    pub async fn acquire(&self, event: &RawEvent, source: &dyn ChainClient) -> Result<ProofRecord> {
        let receipt = source
            .transaction_receipt(event.transaction_hash)
            .await?
            .ok_or(Error::MissingReceipt {
                chain_id: event.source_chain_id,
                tx_hash: event.transaction_hash,
            })?;

        let contract = source.endpoint().contract_address;
        let local_log_index = local_log_index(&receipt, event, |log| {
            log.inner.address == contract
                && log.inner.data.topics().first() == Some(&InvoiceBatch::SIGNATURE_HASH)
        })?;

        let request = ProofRequest {
            src_chain_id: event.source_chain_id,
            src_block_number: receipt.block_number.unwrap_or(event.block_number),
            tx_index: receipt.transaction_index.unwrap_or(event.position_in_block),
            local_log_index,
        };

        let job_id = self.attestor.request_proof(&request).await?;
        info!(
            chain_id = event.source_chain_id,
            tx_hash = %event.transaction_hash,
            job_id = %job_id,
            block_number = request.src_block_number,
            tx_index = request.tx_index,
            local_log_index,
            "Proof job requested"
        );

        self.poll(job_id).await
    }

    /// Polls `job_id` until the proof is ready, the job fails, or the budget is spent.
    pub async fn poll(&self, job_id: JobId) -> Result<ProofRecord> {
        let started = Instant::now();

        for attempt in 1..=self.policy.max_attempts {
            tokio::time::sleep(self.policy.interval).await;

            match self.attestor.query_proof(job_id).await? {
                ProofStatus::Pending => {
                    debug!(job_id = %job_id, attempt, "Proof not ready");
                }
                ProofStatus::Ready(proof) => {
                    return Ok(ProofRecord {
                        job_id,
                        proof: proof.into(),
                        elapsed: started.elapsed(),
                        attempts: attempt,
                    });
                }
                ProofStatus::Failed(reason) => {
                    return Err(Error::ProofFailed {
                        job_id: job_id.0,
                        reason,
                    });
                }
            }
        }

        Err(Error::ProofTimeout {
            job_id: job_id.0,
            attempts: self.policy.max_attempts,
        })
    }
}

/// Position of the batch log among the logs of its transaction.
///
/// Matches the receipt log carrying the event's block-global log index. Nodes that omit log
/// indices in receipts fall back to the first batch log of the transaction.
fn local_log_index(
    receipt: &TxReceipt,
    event: &RawEvent,
    is_batch: impl Fn(&Log) -> bool,
) -> Result<u64> {
    let position = match receipt
        .logs
        .iter()
        .position(|log| log.log_index == Some(event.log_index))
    {
        Some(position) if is_batch(&receipt.logs[position]) => Some(position),
        Some(_) => None,
        None if receipt.logs.iter().all(|log| log.log_index.is_none()) => {
            receipt.logs.iter().position(is_batch)
        }
        None => None,
    };

    position.map(|position| position as u64).ok_or_else(|| {
        Error::ProtocolMismatch(format!(
            "no InvoiceBatch log at index {} in transaction {} on chain {}",
            event.log_index, event.transaction_hash, event.source_chain_id
        ))
    })
}
