// In-memory chains and attestation service for unit tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy_primitives::{Address, B256, Bytes, ChainId, LogData};
use alloy_rpc_types_eth::Log;
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use attestor_client::{JobId, ProofRequest, ProofStatus};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    chain::{ChainClient, ChainConnector, LogStream, TxReceipt},
    config::RelayConfig,
    contract::InvoiceBatch,
    error::{Error, Result},
    event::RawEvent,
    registry::{ChainEndpoint, ChainRegistry, tests::endpoint},
    service::proof::Attestor,
};

/// A chain whose logs, receipts and submission results are driven by the test.
pub(crate) struct MockChain {
    endpoint: ChainEndpoint,
    receipts: Mutex<HashMap<B256, TxReceipt>>,
    log_tx: Mutex<Option<mpsc::UnboundedSender<Log>>>,
    subscriptions: AtomicUsize,
    fail_subscriptions: AtomicBool,
    submission_error: Mutex<Option<String>>,
    submit_delay: Mutex<Duration>,
    submitted: Mutex<Vec<Bytes>>,
}

impl MockChain {
    pub(crate) fn new(chain_id: ChainId) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint(chain_id),
            receipts: Mutex::default(),
            log_tx: Mutex::default(),
            subscriptions: AtomicUsize::new(0),
            fail_subscriptions: AtomicBool::new(false),
            submission_error: Mutex::default(),
            submit_delay: Mutex::new(Duration::ZERO),
            submitted: Mutex::default(),
        })
    }

    /// Pushes a log to the current subscription, if any.
    pub(crate) fn emit(&self, log: Log) {
        if let Some(tx) = self.log_tx.lock().unwrap().as_ref() {
            let _ = tx.send(log);
        }
    }

    /// Makes `event` fully resolvable and emits its log.
    pub(crate) fn emit_batch(&self, event: &RawEvent) {
        self.insert_receipt(receipt_for(event, vec![batch_log(self, event)]));
        self.emit(batch_log(self, event));
    }

    pub(crate) fn insert_receipt(&self, receipt: TxReceipt) {
        self.receipts
            .lock()
            .unwrap()
            .insert(receipt.transaction_hash, receipt);
    }

    pub(crate) fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_subscriptions(&self) {
        self.fail_subscriptions.store(true, Ordering::SeqCst);
    }

    /// Ends the current log subscription as a node dropping the connection would.
    pub(crate) fn close_stream(&self) {
        self.log_tx.lock().unwrap().take();
    }

    /// Every later submission fails with a transport error carrying `message`.
    pub(crate) fn fail_submissions(&self, message: &str) {
        *self.submission_error.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    /// Proofs submitted so far, failed attempts included.
    pub(crate) fn submitted(&self) -> Vec<Bytes> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(100)
    }

    async fn subscribe_batches(&self) -> Result<LogStream> {
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(Error::transport(
                self.endpoint.chain_id,
                "subscription refused",
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.log_tx.lock().unwrap() = Some(tx);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        Ok(self.receipts.lock().unwrap().get(&tx_hash).cloned())
    }

    async fn submit_proof(&self, proof: Bytes) -> Result<B256> {
        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let count = {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(proof);
            submitted.len()
        };

        let error = self.submission_error.lock().unwrap().clone();
        match error {
            Some(message) => Err(Error::transport(self.endpoint.chain_id, message)),
            None => Ok(B256::with_last_byte(count as u8)),
        }
    }
}

/// Hands out [`MockChain`]s by chain id.
pub(crate) struct MockConnector {
    chains: HashMap<ChainId, Arc<MockChain>>,
    unreachable: Mutex<HashSet<ChainId>>,
}

impl MockConnector {
    pub(crate) fn new(chains: &[Arc<MockChain>]) -> Self {
        Self {
            chains: chains
                .iter()
                .map(|chain| (chain.endpoint.chain_id, chain.clone()))
                .collect(),
            unreachable: Mutex::default(),
        }
    }

    pub(crate) fn unreachable(&self, chain_id: ChainId) {
        self.unreachable.lock().unwrap().insert(chain_id);
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    async fn connect(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn ChainClient>> {
        let chain_id = endpoint.chain_id;
        if self.unreachable.lock().unwrap().contains(&chain_id) {
            return Err(Error::transport(chain_id, "connection refused"));
        }
        match self.chains.get(&chain_id) {
            Some(chain) => Ok(chain.clone()),
            None => Err(Error::transport(chain_id, "unknown chain")),
        }
    }
}

/// Attestation service answering polls from a script. An exhausted script keeps answering
/// [`ProofStatus::Pending`].
pub(crate) struct MockAttestor {
    script: Mutex<VecDeque<ProofStatus>>,
    requests: Mutex<Vec<ProofRequest>>,
    next_job: AtomicU64,
    pub(crate) queries: AtomicU32,
    pub(crate) reject_requests: AtomicBool,
}

impl MockAttestor {
    pub(crate) fn new(script: Vec<ProofStatus>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::default(),
            next_job: AtomicU64::new(1),
            queries: AtomicU32::new(0),
            reject_requests: AtomicBool::new(false),
        })
    }

    pub(crate) fn push(&self, status: ProofStatus) {
        self.script.lock().unwrap().push_back(status);
    }

    pub(crate) fn requests(&self) -> Vec<ProofRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Attestor for MockAttestor {
    async fn request_proof(&self, request: &ProofRequest) -> Result<JobId> {
        if self.reject_requests.load(Ordering::SeqCst) {
            return Err(attestor_client::Error::ErrorStatus {
                status: 500,
                msg: Some("internal error".to_string()),
            }
            .into());
        }
        self.requests.lock().unwrap().push(*request);
        Ok(JobId(self.next_job.fetch_add(1, Ordering::SeqCst)))
    }

    async fn query_proof(&self, _job_id: JobId) -> Result<ProofStatus> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ProofStatus::Pending))
    }
}

pub(crate) fn clients(chains: &[Arc<MockChain>]) -> Vec<Arc<dyn ChainClient>> {
    chains
        .iter()
        .map(|chain| chain.clone() as Arc<dyn ChainClient>)
        .collect()
}

/// Registry of test endpoints, in the given order.
pub(crate) fn registry(ids: &[ChainId]) -> ChainRegistry {
    ChainRegistry::new(ids.iter().copied().map(endpoint).collect()).unwrap()
}

pub(crate) fn relay_config() -> RelayConfig {
    RelayConfig::from_toml_str(
        r#"
        active_chains = []

        [attestor]
        url = "http://localhost:8080"
        "#,
    )
    .unwrap()
}

/// Batch event in block 100, third transaction, with one invoice hash.
pub(crate) fn batch_event(chain_id: ChainId, tx_byte: u8, log_index: u64) -> RawEvent {
    RawEvent {
        source_chain_id: chain_id,
        block_number: 100,
        transaction_hash: B256::repeat_byte(tx_byte),
        log_index,
        position_in_block: 2,
        sender: Address::repeat_byte(0x5e),
        invoice_hashes: vec![B256::repeat_byte(tx_byte)],
    }
}

/// The RPC log `chain` emits for `event`.
pub(crate) fn batch_log(chain: &MockChain, event: &RawEvent) -> Log {
    let batch = InvoiceBatch {
        sender: event.sender,
        invoiceHashes: event.invoice_hashes.clone(),
    };

    Log {
        inner: alloy_primitives::Log {
            address: chain.endpoint.contract_address,
            data: batch.encode_log_data(),
        },
        block_hash: Some(B256::repeat_byte(0xbb)),
        block_number: Some(event.block_number),
        block_timestamp: None,
        transaction_hash: Some(event.transaction_hash),
        transaction_index: Some(event.position_in_block),
        log_index: Some(event.log_index),
        removed: false,
    }
}

/// An unrelated log emitted by the same transaction as `event`.
pub(crate) fn other_log(event: &RawEvent, log_index: u64) -> Log {
    Log {
        inner: alloy_primitives::Log {
            address: Address::repeat_byte(0x77),
            data: LogData::new_unchecked(vec![B256::repeat_byte(0x99)], Bytes::new()),
        },
        block_hash: Some(B256::repeat_byte(0xbb)),
        block_number: Some(event.block_number),
        block_timestamp: None,
        transaction_hash: Some(event.transaction_hash),
        transaction_index: Some(event.position_in_block),
        log_index: Some(log_index),
        removed: false,
    }
}

pub(crate) fn receipt_for(event: &RawEvent, logs: Vec<Log>) -> TxReceipt {
    TxReceipt {
        transaction_hash: event.transaction_hash,
        block_number: Some(event.block_number),
        transaction_index: Some(event.position_in_block),
        logs,
    }
}
