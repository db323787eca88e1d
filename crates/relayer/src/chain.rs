//! JSON-RPC access to the registered chains.
//!
//! [`ChainClient`] is the only way the relay pipeline touches a chain: listening for batch logs,
//! reading receipts, and submitting proofs. [`EvmConnector`] builds alloy-backed clients for
//! every [`ChainEndpoint`].

use std::{fmt, pin::Pin, sync::Arc, time::Duration};

use alloy_network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy_primitives::{Address, B256, Bytes};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::{Filter, Log, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::{
    contract::{InvoiceBatch, submitProofCall},
    error::{Error, Result},
    registry::ChainEndpoint,
};

/// Stream of raw batch logs from one chain.
pub type LogStream = Pin<Box<dyn Stream<Item = Log> + Send>>;

/// The parts of a transaction receipt the relay needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    /// Transaction hash.
    pub transaction_hash: B256,
    /// Block containing the transaction.
    pub block_number: Option<u64>,
    /// Index of the transaction inside its block.
    pub transaction_index: Option<u64>,
    /// Every log emitted by the transaction, in emission order.
    pub logs: Vec<Log>,
}

/// Access to one registered chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The chain this client talks to.
    fn endpoint(&self) -> &ChainEndpoint;

    /// Current chain height.
    async fn block_number(&self) -> Result<u64>;

    /// Subscribes to `InvoiceBatch` logs emitted by the chain's contract from now on.
    async fn subscribe_batches(&self) -> Result<LogStream>;

    /// Fetches a transaction receipt, `None` if the node does not know the transaction.
    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>>;

    /// Calls `submitProof(proof)` on the chain's contract and waits for the receipt.
    ///
    /// Returns the transaction hash, or an error if sending failed or the call reverted.
    async fn submit_proof(&self, proof: Bytes) -> Result<B256>;
}

/// Builds [`ChainClient`]s from registry entries.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Connects to `endpoint`.
    async fn connect(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn ChainClient>>;
}

/// Connects alloy providers that sign with a local private key.
pub struct EvmConnector {
    wallet: EthereumWallet,
    address: Address,
    receipt_timeout: Duration,
}

impl fmt::Debug for EvmConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmConnector")
            .field("address", &self.address)
            .field("receipt_timeout", &self.receipt_timeout)
            .finish_non_exhaustive()
    }
}

impl EvmConnector {
    /// Create a connector signing with the hex encoded `private_key`.
    pub fn new(private_key: &str, receipt_timeout: Duration) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| Error::Config(format!("invalid private key: {e}")))?;
        let address = signer.address();

        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
            receipt_timeout,
        })
    }

    /// Address proofs are submitted from.
    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl ChainConnector for EvmConnector {
    async fn connect(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn ChainClient>> {
        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .connect(endpoint.rpc_url.as_str())
            .await
            .map_err(|e| Error::transport(endpoint.chain_id, e))?
            .erased();

        Ok(Arc::new(EvmChainClient {
            endpoint: endpoint.clone(),
            provider,
            receipt_timeout: self.receipt_timeout,
        }))
    }
}

/// [`ChainClient`] backed by an alloy provider.
pub struct EvmChainClient {
    endpoint: ChainEndpoint,
    provider: DynProvider,
    receipt_timeout: Duration,
}

impl fmt::Debug for EvmChainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmChainClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl EvmChainClient {
    fn batch_filter(&self) -> Filter {
        Filter::new()
            .address(self.endpoint.contract_address)
            .event_signature(InvoiceBatch::SIGNATURE_HASH)
    }

    fn uses_pubsub(&self) -> bool {
        matches!(self.endpoint.rpc_url.scheme(), "ws" | "wss")
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| Error::transport(self.endpoint.chain_id, e))
    }

    async fn subscribe_batches(&self) -> Result<LogStream> {
        let chain_id = self.endpoint.chain_id;
        let filter = self.batch_filter();

        if self.uses_pubsub() {
            let subscription = self
                .provider
                .subscribe_logs(&filter)
                .await
                .map_err(|e| Error::transport(chain_id, format!("log subscription failed: {e}")))?;
            debug!(chain_id, "Subscribed to batch logs via eth_subscribe");
            return Ok(Box::pin(subscription.into_stream()));
        }

        let poller = self
            .provider
            .watch_logs(&filter)
            .await
            .map_err(|e| Error::transport(chain_id, format!("log filter failed: {e}")))?;
        debug!(chain_id, "Watching batch logs via eth_newFilter");
        Ok(Box::pin(poller.into_stream().flat_map(futures::stream::iter)))
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| Error::transport(self.endpoint.chain_id, e))?;

        Ok(receipt.map(|receipt| TxReceipt {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            transaction_index: receipt.transaction_index,
            logs: receipt.inner.logs().to_vec(),
        }))
    }

    async fn submit_proof(&self, proof: Bytes) -> Result<B256> {
        let chain_id = self.endpoint.chain_id;
        let tx = TransactionRequest::default()
            .with_to(self.endpoint.contract_address)
            .with_input(submitProofCall { proof }.abi_encode());

        let receipt = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| Error::transport(chain_id, e))?
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| Error::transport(chain_id, e))?;

        if !ReceiptResponse::status(&receipt) {
            return Err(Error::Reverted {
                chain_id,
                tx_hash: receipt.transaction_hash,
            });
        }

        Ok(receipt.transaction_hash)
    }
}
