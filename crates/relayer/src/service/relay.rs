//! # Relay Orchestrator
//!
//! This module provides [`Relayer`], the top-level state machine, and [`RelayPipeline`], the
//! per-event processing it drives.
//!
//! ## Lifecycle
//!
//! ```text
//!   Relayer::init ──► Initialized ──start──► Running ──stop──► Stopped
//!                          │                                      ▲
//!                          └────────────────stop──────────────────┘
//! ```
//!
//! A relayer only exists once [`Relayer::init`] succeeded, so there is no value for the
//! uninitialized state.
//!
//! ## Event handling
//!
//! [`Relayer::run`] merges the event channels of all listeners and spawns one
//! [`RelayPipeline::process`] task per event. Each task holds the in-flight ticket of its source
//! transaction for its whole lifetime, so a second delivery of the same transaction while the
//! first is still being handled is skipped. Once the task ends the ticket is gone and the same
//! transaction is accepted again.
//!
//! On shutdown the listeners are stopped first. Tasks that are already running are left to finish
//! their poll loop and fan-out. A relayer whose listeners all gave up stops the same way and
//! reports [`Error::NoListeners`].

use std::{collections::HashMap, fmt, sync::Arc};

use alloy_primitives::ChainId;
use futures::StreamExt;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    chain::{ChainClient, ChainConnector},
    config::RelayConfig,
    error::{Error, Result},
    event::RawEvent,
    metrics,
    registry::ChainRegistry,
    service::{
        fanout::{DispatchReport, Dispatcher},
        listener::ChainListener,
        proof::{Attestor, ProofAcquirer, ProofRecord},
        ticket::InFlight,
    },
};

/// Lifecycle state of a [`Relayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Chains connected, listeners built but not started.
    Initialized,
    /// Listeners started.
    Running,
    /// Listeners stopped. Terminal.
    Stopped,
}

impl RelayState {
    /// Lowercase name, for errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of handling one event.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Another attempt for the same source transaction is in flight.
    Skipped,
    /// No proof could be obtained; nothing was dispatched.
    ProofFailed(Error),
    /// The proof was obtained and fanned out. The report may contain failed targets.
    Relayed {
        /// The delivered proof.
        record: ProofRecord,
        /// Per-target outcomes.
        report: DispatchReport,
    },
}

/// Proof acquisition and fan-out for one event, guarded by an in-flight ticket.
#[derive(Debug, Clone)]
pub struct RelayPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    sources: HashMap<ChainId, Arc<dyn ChainClient>>,
    acquirer: ProofAcquirer,
    dispatcher: Dispatcher,
    in_flight: InFlight,
}

impl fmt::Debug for PipelineInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineInner")
            .field("acquirer", &self.acquirer)
            .field("dispatcher", &self.dispatcher)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl RelayPipeline {
    /// Creates a pipeline relaying from the connected `chains` to every chain of `registry`.
    pub fn new(
        registry: &ChainRegistry,
        chains: Vec<Arc<dyn ChainClient>>,
        acquirer: ProofAcquirer,
    ) -> Self {
        let sources = chains
            .iter()
            .map(|client| (client.endpoint().chain_id, client.clone()))
            .collect();

        Self {
            inner: Arc::new(PipelineInner {
                sources,
                acquirer,
                dispatcher: Dispatcher::new(registry, chains),
                in_flight: InFlight::new(),
            }),
        }
    }

    /// Tickets currently held.
    pub fn in_flight(&self) -> &InFlight {
        &self.inner.in_flight
    }

    /// Acquires a proof for `event` and delivers it to every other chain.
    ///
    /// Failures are reported in the outcome, never raised.
    pub async fn process(&self, event: RawEvent) -> ProcessOutcome {
        let key = event.ticket_key();
        let Some(ticket) = self.inner.in_flight.try_acquire(key) else {
            let age_ms = self
                .inner
                .in_flight
                .get(&key)
                .map(|held| held.started_at.elapsed().as_millis());
            debug!(ticket = %key, age_ms = ?age_ms, "Relay already in flight, skipping");
            return ProcessOutcome::Skipped;
        };

        let source_chain_id = event.source_chain_id;
        let Some(source) = self.inner.sources.get(&source_chain_id) else {
            return ProcessOutcome::ProofFailed(Error::ProtocolMismatch(format!(
                "event from unregistered chain {source_chain_id}"
            )));
        };

        let started = tokio::time::Instant::now();
        let record = match self.inner.acquirer.acquire(&event, source.as_ref()).await {
            Ok(record) => record,
            Err(e) => {
                error!(
                    chain_id = source_chain_id,
                    tx_hash = %event.transaction_hash,
                    error = %e,
                    "Proof acquisition failed, dropping event"
                );
                metrics::record_proof(source_chain_id, false, started.elapsed());
                return ProcessOutcome::ProofFailed(e);
            }
        };
        info!(
            chain_id = source_chain_id,
            tx_hash = %event.transaction_hash,
            job_id = %record.job_id,
            elapsed_ms = record.elapsed.as_millis(),
            proof_bytes = record.proof.len(),
            "Proof ready"
        );
        metrics::record_proof(source_chain_id, true, record.elapsed);

        let report = self
            .inner
            .dispatcher
            .dispatch(&record.proof, source_chain_id)
            .await;
        info!(
            chain_id = source_chain_id,
            ticket = %ticket.key(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Relay completed"
        );

        ProcessOutcome::Relayed { record, report }
    }
}

/// Ties listeners, proof acquisition and fan-out together.
#[derive(Debug)]
pub struct Relayer {
    state: RelayState,
    listeners: Vec<ChainListener>,
    receivers: Vec<mpsc::UnboundedReceiver<RawEvent>>,
    pipeline: RelayPipeline,
    tasks: JoinSet<()>,
}

impl Relayer {
    /// Connects every chain of `registry` and builds one listener per connected chain.
    ///
    /// Unreachable chains are skipped with a warning and are not listened to. They remain fan-out
    /// targets whose submissions are reported as failed. Fails with [`Error::NoListeners`] if no
    /// chain could be connected.
    pub async fn init(
        config: &RelayConfig,
        registry: &ChainRegistry,
        connector: &dyn ChainConnector,
        attestor: Arc<dyn Attestor>,
    ) -> Result<Self> {
        let mut clients = Vec::with_capacity(registry.len());
        for endpoint in registry.iter() {
            match connector.connect(endpoint).await {
                Ok(client) => {
                    info!(
                        chain_id = endpoint.chain_id,
                        name = %endpoint.name,
                        url = %endpoint.rpc_url,
                        "Chain connected"
                    );
                    clients.push(client);
                }
                Err(e) => warn!(
                    chain_id = endpoint.chain_id,
                    name = %endpoint.name,
                    error = %e,
                    "Chain unreachable, skipping"
                ),
            }
        }

        if clients.is_empty() {
            return Err(Error::NoListeners);
        }

        let (listeners, receivers) = clients
            .iter()
            .map(|client| ChainListener::new(client.clone(), config.dedup_capacity))
            .unzip();
        let acquirer = ProofAcquirer::new(attestor, config.poll_policy());

        Ok(Self {
            state: RelayState::Initialized,
            listeners,
            receivers,
            pipeline: RelayPipeline::new(registry, clients, acquirer),
            tasks: JoinSet::new(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// The per-event pipeline.
    pub fn pipeline(&self) -> &RelayPipeline {
        &self.pipeline
    }

    /// Chains currently listened to.
    pub fn listening(&self) -> Vec<ChainId> {
        self.listeners
            .iter()
            .filter(|listener| listener.is_listening())
            .map(ChainListener::chain_id)
            .collect()
    }

    fn expect_state(&self, expected: RelayState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected: expected.as_str(),
                found: self.state.as_str(),
            });
        }
        Ok(())
    }

    /// Starts every listener.
    ///
    /// A chain whose subscription cannot be established is dropped from the listeners but still
    /// receives proofs. Fails with [`Error::NoListeners`] if no listener started.
    pub async fn start(&mut self) -> Result<()> {
        self.expect_state(RelayState::Initialized)?;

        let listeners = std::mem::take(&mut self.listeners);
        let receivers = std::mem::take(&mut self.receivers);
        for (mut listener, receiver) in listeners.into_iter().zip(receivers) {
            match listener.start().await {
                Ok(()) => {
                    self.listeners.push(listener);
                    self.receivers.push(receiver);
                }
                Err(e) => warn!(
                    chain_id = listener.chain_id(),
                    error = %e,
                    "Failed to start listener, chain stays a target only"
                ),
            }
        }

        let listening = self.listening();
        if listening.is_empty() {
            return Err(Error::NoListeners);
        }

        info!(chains = ?listening, "Relayer running");
        self.state = RelayState::Running;
        Ok(())
    }

    /// Handles events until `shutdown` is cancelled or every listener is gone, then stops.
    ///
    /// Returns [`Error::NoListeners`] after stopping if every listener gave up.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.expect_state(RelayState::Running)?;

        let mut events = futures::stream::select_all(
            std::mem::take(&mut self.receivers)
                .into_iter()
                .map(UnboundedReceiverStream::new),
        );

        let listeners_gone = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Relayer received shutdown signal");
                    break false;
                }

                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = result {
                        error!(error = %e, "Relay task failed");
                    }
                }

                event = events.next() => {
                    let Some(event) = event else {
                        error!("All listeners gave up");
                        break true;
                    };
                    let pipeline = self.pipeline.clone();
                    self.tasks.spawn(async move {
                        pipeline.process(event).await;
                    });
                }
            }
        };

        self.stop().await?;
        if listeners_gone {
            return Err(Error::NoListeners);
        }
        Ok(())
    }

    /// Stops every listener and waits for running relays to finish. No-op once stopped.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == RelayState::Stopped {
            return Ok(());
        }

        for listener in &mut self.listeners {
            listener.stop().await;
        }

        if !self.tasks.is_empty() {
            info!(tasks = self.tasks.len(), "Waiting for running relays");
        }
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Relay task failed");
            }
        }

        self.state = RelayState::Stopped;
        info!("Relayer stopped");
        Ok(())
    }
}
