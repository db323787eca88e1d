//! Configuration types for the invoice relayer.

use std::{collections::BTreeMap, fmt, path::Path, time::Duration};

use alloy_primitives::{Address, ChainId};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::{
    error::{Error, Result},
    registry::{ChainEndpoint, ChainRegistry},
    service::proof::PollPolicy,
};

/// Environment variable consulted when `private_key` is absent from the file.
pub const PRIVATE_KEY_ENV: &str = "RELAYER_PRIVATE_KEY";
/// Environment variable consulted when `attestor.api_key` is absent from the file.
pub const ATTESTOR_API_KEY_ENV: &str = "ATTESTOR_API_KEY";

/// Relayer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Keys of `chains` entries to activate, in order.
    pub active_chains: Vec<String>,
    /// Per-chain settings keyed by an arbitrary chain key.
    #[serde(default)]
    pub chains: BTreeMap<String, ChainConfig>,
    /// Hex private key used to sign `submitProof` transactions.
    pub private_key: Option<Secret>,
    /// Attestation service settings.
    pub attestor: AttestorConfig,
    /// Metrics endpoint settings, disabled when absent.
    pub metrics: Option<MetricsConfig>,
    /// Number of event identities each listener remembers for de-duplication.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// How long to wait for a `submitProof` transaction to be mined.
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

/// Settings of a single chain. Every field must be set for the chain to be activated.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChainConfig {
    /// EIP-155 chain id.
    pub chain_id: Option<ChainId>,
    /// Display name, defaults to the chain key.
    pub name: Option<String>,
    /// JSON-RPC endpoint.
    pub rpc_url: Option<Url>,
    /// Invoice contract address.
    pub contract_address: Option<Address>,
    /// Attestation service account address.
    pub prover_address: Option<Address>,
}

/// Attestation service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttestorConfig {
    /// Service URL.
    pub url: Url,
    /// Bearer credential.
    pub api_key: Option<Secret>,
    /// Delay between two proof polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of proof polls before giving up.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

/// Prometheus endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Port to serve `/metrics` and `/health` on.
    pub port: u16,
}

/// String that is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Returns the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

fn default_dedup_capacity() -> usize {
    65_536
}

fn default_receipt_timeout_secs() -> u64 {
    180
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_poll_attempts() -> u32 {
    120
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml_edit::de::from_str(s)?)
    }

    /// Builds the registry of active chains.
    ///
    /// Active keys without a complete `[chains.<key>]` table are skipped with a warning. Fails if
    /// nothing is left.
    pub fn chain_registry(&self) -> Result<ChainRegistry> {
        let mut endpoints = Vec::with_capacity(self.active_chains.len());

        for key in &self.active_chains {
            let Some(chain) = self.chains.get(key) else {
                warn!(chain = %key, "Active chain has no configuration, skipping");
                continue;
            };
            match chain.endpoint(key) {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(missing) => {
                    warn!(chain = %key, missing = %missing, "Active chain is incomplete, skipping")
                }
            }
        }

        ChainRegistry::new(endpoints)
    }

    /// Signer key from the file, or from [`PRIVATE_KEY_ENV`].
    pub fn private_key(&self) -> Result<Secret> {
        secret_or_env(self.private_key.as_ref(), PRIVATE_KEY_ENV, "private_key")
    }

    /// Attestation service credential from the file, or from [`ATTESTOR_API_KEY_ENV`].
    pub fn attestor_api_key(&self) -> Result<Secret> {
        secret_or_env(
            self.attestor.api_key.as_ref(),
            ATTESTOR_API_KEY_ENV,
            "attestor.api_key",
        )
    }

    /// Proof polling schedule.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.attestor.poll_interval_ms),
            max_attempts: self.attestor.max_poll_attempts,
        }
    }

    /// Maximum wait for a `submitProof` receipt.
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

impl ChainConfig {
    /// Converts to an endpoint, or returns the name of the first missing field.
    fn endpoint(&self, key: &str) -> std::result::Result<ChainEndpoint, &'static str> {
        Ok(ChainEndpoint {
            chain_id: self.chain_id.ok_or("chain_id")?,
            name: self.name.clone().unwrap_or_else(|| key.to_string()),
            rpc_url: self.rpc_url.clone().ok_or("rpc_url")?,
            contract_address: self
                .contract_address
                .filter(|address| !address.is_zero())
                .ok_or("contract_address")?,
            prover_address: self.prover_address.ok_or("prover_address")?,
        })
    }
}

fn secret_or_env(value: Option<&Secret>, env: &str, field: &str) -> Result<Secret> {
    if let Some(value) = value.filter(|value| !value.expose().is_empty()) {
        return Ok(value.clone());
    }
    std::env::var(env)
        .ok()
        .filter(|value| !value.is_empty())
        .map(Secret::from)
        .ok_or_else(|| Error::Config(format!("`{field}` is not set and ${env} is empty")))
}
