//! Cross-chain invoice batch relayer.
//!
//! Relays every `InvoiceBatch` emitted on one registered chain to all the others:
//!
//! 1. Listen to `InvoiceBatch` logs on every chain
//! 2. Request a proof of the log from the attestation service
//! 3. Poll the attestation service until the proof is ready
//! 4. Submit the proof to the invoice contract of every other chain
//!
//! ## Architecture
//!
//! ```text
//!   Source chain        Relayer          Attestation service     Target chains
//!        |                 |                      |                    |
//!        |--InvoiceBatch-->|                      |                    |
//!        |                 |                      |                    |
//!        |<---receipt------|                      |                    |
//!        |                 |                      |                    |
//!        |                 |---request proof----->|                    |
//!        |                 |<------job id---------|                    |
//!        |                 |                      |                    |
//!        |                 |---poll (500 ms)----->|                    |
//!        |                 |<------proof----------|                    |
//!        |                 |                      |                    |
//!        |                 |------------submitProof (parallel)-------->|
//!        |                 |                      |                    |
//! ```
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info invoice-relayer --config relayer.toml
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::bail;
use attestor_client::AttestorClient;
use clap::Parser;
use futures::future::select_all;
use invoice_relayer::{EvmConnector, RelayConfig, Relayer};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "invoice-relayer")]
#[command(about = "Relay invoice batches between chains using attestation proofs")]
struct Cli {
    /// Config file path.
    #[arg(long, short, default_value = "relayer.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = RelayConfig::load(&cli.config)?;
    let registry = config.chain_registry()?;
    info!(chains = registry.len(), "Loaded configuration");
    for endpoint in registry.iter() {
        info!(
            chain_id = endpoint.chain_id,
            name = %endpoint.name,
            url = %endpoint.rpc_url,
            contract = %endpoint.contract_address,
            "Chain configured"
        );
    }

    let connector = EvmConnector::new(config.private_key()?.expose(), config.receipt_timeout())?;
    info!(address = %connector.address(), "Proof submitter configured");

    let attestor = AttestorClient::new(
        config.attestor.url.clone(),
        config.attestor_api_key()?.expose(),
    )?;
    info!(url = %config.attestor.url, "Attestation service configured");

    let shutdown_token = CancellationToken::new();

    // Start metrics endpoint.

    let metrics_task = match &config.metrics {
        Some(metrics) => {
            let handle = invoice_relayer::metrics::install()?;
            let port = metrics.port;
            let shutdown_token = shutdown_token.clone();

            Some(tokio::spawn(async move {
                if let Err(e) = invoice_relayer::metrics::serve(port, handle, shutdown_token).await
                {
                    error!(error = %e, "Metrics server error");
                }
            }))
        }
        None => None,
    };

    // Start relayer.

    let mut relayer = Relayer::init(&config, &registry, &connector, Arc::new(attestor)).await?;
    relayer.start().await?;

    let mut relay_task = {
        let shutdown_token = shutdown_token.clone();
        tokio::spawn(async move { relayer.run(shutdown_token).await })
    };

    info!("Relayer started, waiting for shutdown signal");

    let mut signals: Vec<_> = [SignalKind::interrupt(), SignalKind::terminate()]
        .into_iter()
        .filter_map(|kind| signal(kind).ok())
        .collect();

    if signals.is_empty() {
        bail!("No shutdown signals could be registered");
    }

    let result = tokio::select! {
        _ = select_all(signals.iter_mut().map(|s| Box::pin(s.recv()))) => {
            info!("Received shutdown signal, shutting down");
            shutdown_token.cancel();
            relay_task.await
        }
        result = &mut relay_task => {
            warn!("Relayer stopped without a shutdown signal");
            shutdown_token.cancel();
            result
        }
    };

    if let Some(metrics_task) = metrics_task {
        let _ = metrics_task.await;
    }

    result??;
    info!("Relayer stopped, exiting");

    Ok(())
}
