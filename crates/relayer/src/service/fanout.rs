//! # Fan-out Dispatcher
//!
//! This module provides [`Dispatcher`], which delivers one proof to every registered chain except
//! the one it came from.
//!
//! All submissions start together and the dispatch completes once every one of them has settled.
//! A failing target never prevents the other targets from being attempted or reported, and
//! failed submissions are not retried here. Registered chains that could not be connected are
//! still targets and are reported as failures.

use std::{fmt, sync::Arc};

use alloy_primitives::{B256, Bytes, ChainId};
use futures::future::join_all;
use tracing::{info, warn};

use crate::{
    chain::ChainClient,
    error::{Error, Result},
    metrics,
    registry::{ChainEndpoint, ChainRegistry},
};

/// Result of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    /// `submitProof` was mined successfully.
    Success {
        /// Hash of the `submitProof` transaction.
        tx_hash: B256,
    },
    /// The submission failed; the detail names the target and the underlying error.
    Failure(String),
}

/// Outcome of delivering a proof to one target chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Target chain.
    pub chain_id: ChainId,
    /// Submission result.
    pub status: DispatchStatus,
}

impl DispatchOutcome {
    /// Returns `true` if the submission succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.status, DispatchStatus::Success { .. })
    }
}

/// Outcomes of one fan-out, one per target chain, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Per-target outcomes.
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    /// Number of successful submissions.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of failed submissions.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Outcome for `chain_id`, if it was targeted.
    pub fn outcome(&self, chain_id: ChainId) -> Option<&DispatchOutcome> {
        self.outcomes.iter().find(|o| o.chain_id == chain_id)
    }
}

/// Submits proofs to target chains in parallel.
#[derive(Clone)]
pub struct Dispatcher {
    targets: Vec<Target>,
}

#[derive(Clone)]
struct Target {
    endpoint: ChainEndpoint,
    /// `None` if the chain could not be connected.
    client: Option<Arc<dyn ChainClient>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (connected, unconnected): (Vec<_>, Vec<_>) = self
            .targets
            .iter()
            .partition(|target| target.client.is_some());
        f.debug_struct("Dispatcher")
            .field(
                "connected",
                &connected.iter().map(|t| t.endpoint.chain_id).collect::<Vec<_>>(),
            )
            .field(
                "unconnected",
                &unconnected.iter().map(|t| t.endpoint.chain_id).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Dispatcher {
    /// Creates a dispatcher over every chain of `registry`, submitting through `clients`.
    ///
    /// Registry chains without a client stay targets that always fail. Clients for chains outside
    /// the registry are ignored.
    pub fn new(registry: &ChainRegistry, clients: Vec<Arc<dyn ChainClient>>) -> Self {
        let targets = registry
            .iter()
            .map(|endpoint| Target {
                endpoint: endpoint.clone(),
                client: clients
                    .iter()
                    .find(|client| client.endpoint().chain_id == endpoint.chain_id)
                    .cloned(),
            })
            .collect();

        Self { targets }
    }

    /// Delivers `proof` to every chain except `source` and waits for all submissions to settle.
    pub async fn dispatch(&self, proof: &Bytes, source: ChainId) -> DispatchReport {
        let submissions = self
            .targets
            .iter()
            .filter(|target| target.endpoint.chain_id != source)
            .map(|target| submit(target, proof.clone(), source));

        DispatchReport {
            outcomes: join_all(submissions).await,
        }
    }
}

async fn submit_to(target: &Target, proof: Bytes) -> Result<B256> {
    match &target.client {
        Some(client) => client.submit_proof(proof).await,
        None => Err(Error::transport(
            target.endpoint.chain_id,
            "chain not connected",
        )),
    }
}

async fn submit(target: &Target, proof: Bytes, source: ChainId) -> DispatchOutcome {
    let endpoint = &target.endpoint;

    let status = match submit_to(target, proof).await {
        Ok(tx_hash) => {
            info!(
                source,
                target = endpoint.chain_id,
                tx_hash = %tx_hash,
                "Proof submitted"
            );
            DispatchStatus::Success { tx_hash }
        }
        Err(e) => {
            warn!(
                source,
                target = endpoint.chain_id,
                error = %e,
                "Proof submission failed"
            );
            DispatchStatus::Failure(format!(
                "submit to chain {} ({}) failed: {e}",
                endpoint.chain_id, endpoint.name
            ))
        }
    };

    metrics::record_dispatch(endpoint.chain_id, matches!(status, DispatchStatus::Success { .. }));

    DispatchOutcome {
        chain_id: endpoint.chain_id,
        status,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::{MockChain, clients, registry};

    #[tokio::test]
    async fn test_dispatch_skips_source_and_isolates_failures() {
        let chains = [1, 2, 3, 4, 5].map(MockChain::new);
        chains[1].fail_submissions("connection reset");
        chains[3].fail_submissions("execution reverted");

        let dispatcher = Dispatcher::new(&registry(&[1, 2, 3, 4, 5]), clients(&chains));
        let proof = Bytes::from_static(b"proof");

        let report = dispatcher.dispatch(&proof, 1).await;

        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 2);
        assert!(report.outcome(1).is_none());
        assert!(chains[0].submitted().is_empty());

        for chain in &chains[1..] {
            assert_eq!(chain.submitted(), vec![proof.clone()]);
        }

        let DispatchStatus::Failure(detail) = &report.outcome(2).unwrap().status else {
            panic!("chain 2 should have failed");
        };
        assert!(detail.contains("chain 2"));
        assert!(detail.contains("connection reset"));
        assert!(report.outcome(3).unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_runs_submissions_concurrently() {
        let chains = [1, 2, 3].map(MockChain::new);
        for chain in &chains {
            chain.set_submit_delay(Duration::from_secs(10));
        }
        let dispatcher = Dispatcher::new(&registry(&[1, 2, 3]), clients(&chains));

        let started = tokio::time::Instant::now();
        let report = dispatcher.dispatch(&Bytes::from_static(b"p"), 3).await;

        assert_eq!(report.succeeded(), 2);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_unconnected_chain_is_reported_as_failure() {
        let chains = [1, 3].map(MockChain::new);
        let dispatcher = Dispatcher::new(&registry(&[1, 2, 3]), clients(&chains));

        let report = dispatcher.dispatch(&Bytes::from_static(b"proof"), 1).await;

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(
            report.outcomes.iter().map(|o| o.chain_id).collect::<Vec<_>>(),
            vec![2, 3]
        );
        let DispatchStatus::Failure(detail) = &report.outcome(2).unwrap().status else {
            panic!("chain 2 should have failed");
        };
        assert!(detail.contains("chain 2 (chain-2)"));
        assert!(detail.contains("not connected"));
        assert!(report.outcome(3).unwrap().is_success());
        assert_eq!(chains[1].submitted().len(), 1);
    }
}
