//! Registry of chains taking part in the relay.

use std::collections::HashSet;

use alloy_primitives::{Address, ChainId};
use url::Url;

use crate::error::{Error, Result};

/// A chain the relayer listens to and delivers proofs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEndpoint {
    /// EIP-155 chain id.
    pub chain_id: ChainId,
    /// Human-readable name for logs.
    pub name: String,
    /// JSON-RPC endpoint. `ws(s)` URLs use subscriptions, `http(s)` URLs use polled filters.
    pub rpc_url: Url,
    /// Invoice contract emitting batches and accepting proofs.
    pub contract_address: Address,
    /// Attestation service account address for this chain.
    pub prover_address: Address,
}

/// Validated, immutable set of chains.
///
/// Chain ids are unique and the registry is never empty.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<ChainEndpoint>,
}

impl ChainRegistry {
    /// Builds a registry, rejecting an empty set or duplicate chain ids.
    pub fn new(chains: Vec<ChainEndpoint>) -> Result<Self> {
        if chains.is_empty() {
            return Err(Error::Config("no active chains configured".to_string()));
        }

        let mut seen = HashSet::new();
        for chain in &chains {
            if !seen.insert(chain.chain_id) {
                return Err(Error::Config(format!(
                    "chain id {} is configured more than once",
                    chain.chain_id
                )));
            }
        }

        Ok(Self { chains })
    }

    /// Looks up a chain by id.
    pub fn get(&self, chain_id: ChainId) -> Option<&ChainEndpoint> {
        self.chains.iter().find(|chain| chain.chain_id == chain_id)
    }

    /// Iterates over all chains in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &ChainEndpoint> {
        self.chains.iter()
    }

    /// Iterates over every chain except `source`.
    pub fn targets(&self, source: ChainId) -> impl Iterator<Item = &ChainEndpoint> {
        self.chains.iter().filter(move |chain| chain.chain_id != source)
    }

    /// Number of chains.
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Always `false`, a registry holds at least one chain.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn endpoint(chain_id: ChainId) -> ChainEndpoint {
        ChainEndpoint {
            chain_id,
            name: format!("chain-{chain_id}"),
            rpc_url: Url::parse(&format!("http://localhost:{}", 8545 + chain_id)).unwrap(),
            contract_address: Address::repeat_byte(chain_id as u8),
            prover_address: Address::repeat_byte(0xee),
        }
    }

    #[test]
    fn test_rejects_empty_registry() {
        assert!(matches!(ChainRegistry::new(vec![]), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_duplicate_chain_id() {
        let result = ChainRegistry::new(vec![endpoint(1), endpoint(2), endpoint(1)]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_targets_exclude_source() {
        let registry = ChainRegistry::new(vec![endpoint(1), endpoint(2), endpoint(3)]).unwrap();
        let targets: Vec<_> = registry.targets(2).map(|chain| chain.chain_id).collect();
        assert_eq!(targets, vec![1, 3]);
        assert_eq!(registry.get(3).map(|chain| chain.chain_id), Some(3));
        assert!(registry.get(4).is_none());
    }
}
