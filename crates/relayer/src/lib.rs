//! Invoice relayer - relays invoice batches between chains using attestation proofs.
//!
//! This crate provides functionality to:
//! - Listen to `InvoiceBatch` logs of the invoice contract on every registered chain
//! - Request a proof of each batch from the attestation service and poll until it is ready
//! - Submit the proof to the invoice contract of every other registered chain
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use attestor_client::AttestorClient;
//! use invoice_relayer::{EvmConnector, RelayConfig, Relayer};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = RelayConfig::load("relayer.toml")?;
//! let registry = config.chain_registry()?;
//! let connector = EvmConnector::new(config.private_key()?.expose(), config.receipt_timeout())?;
//! let attestor = AttestorClient::new(config.attestor.url.clone(), config.attestor_api_key()?.expose())?;
//!
//! let mut relayer = Relayer::init(&config, &registry, &connector, Arc::new(attestor)).await?;
//! relayer.start().await?;
//! relayer.run(CancellationToken::new()).await?;
//! ```

pub mod chain;
pub mod config;
pub mod contract;
pub mod error;
pub mod event;
pub mod metrics;
pub mod registry;
pub mod service;

#[cfg(test)]
mod mock;

// Re-export main types at crate root for convenience.
pub use chain::{ChainClient, ChainConnector, EvmChainClient, EvmConnector, LogStream, TxReceipt};
pub use config::{AttestorConfig, ChainConfig, MetricsConfig, RelayConfig, Secret};
pub use error::{Error, Result};
pub use event::{EventId, RawEvent, TicketKey};
pub use registry::{ChainEndpoint, ChainRegistry};
pub use service::{
    fanout::{DispatchOutcome, DispatchReport, DispatchStatus, Dispatcher},
    listener::ChainListener,
    proof::{Attestor, PollPolicy, ProofAcquirer, ProofRecord},
    relay::{ProcessOutcome, RelayPipeline, RelayState, Relayer},
    ticket::{InFlight, TicketGuard},
};
