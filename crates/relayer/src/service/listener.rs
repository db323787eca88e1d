//! # Chain Listener
//!
//! This module provides [`ChainListener`], which follows the `InvoiceBatch` logs of one chain's
//! invoice contract and forwards each new occurrence as a [`RawEvent`].
//!
//! ## Delivery
//!
//! Events are pushed on an unbounded channel handed out by [`ChainListener::new`]. The receiving
//! side belongs to the [`Relayer`](super::relay::Relayer). The sending side lives in the listener
//! task while it runs, so the channel closes once the task gives up.
//!
//! Log transports deliver at least once, so every listener remembers the identities of the events
//! it already forwarded in a bounded LRU set and drops redeliveries. Logs removed by a reorg are
//! ignored. A log that cannot be turned into an event is logged and skipped; the subscription
//! keeps running.
//!
//! ## Resubscription
//!
//! A subscription that ends on the node side is re-established every [`RESUBSCRIBE_DELAY`]. Logs
//! emitted while no subscription is live are not replayed. After [`MAX_RESUBSCRIBE_ATTEMPTS`]
//! consecutive failures the listener gives up and its channel closes.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use alloy_primitives::ChainId;
use alloy_rpc_types_eth::Log;
use futures::StreamExt;
use lru::LruCache;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    chain::{ChainClient, LogStream},
    contract::InvoiceBatch,
    error::{Error, Result},
    event::{EventId, RawEvent},
    metrics,
};

/// Delay before each resubscription attempt.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Consecutive failed resubscriptions after which a listener gives up.
pub const MAX_RESUBSCRIBE_ATTEMPTS: u32 = 12;

type DedupSet = Arc<Mutex<LruCache<EventId, ()>>>;
type EventSender = mpsc::UnboundedSender<RawEvent>;

/// Follows the batch logs of one chain.
pub struct ChainListener {
    client: Arc<dyn ChainClient>,
    dedup: DedupSet,
    /// Held while no task runs. `None` once the channel is closed for good.
    events_tx: Option<EventSender>,
    task: Option<ListenerTask>,
}

struct ListenerTask {
    shutdown: CancellationToken,
    /// Hands the sender back when stopped, drops it when giving up.
    handle: JoinHandle<Option<EventSender>>,
}

impl std::fmt::Debug for ChainListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainListener")
            .field("chain_id", &self.chain_id())
            .field("listening", &self.is_listening())
            .finish_non_exhaustive()
    }
}

impl ChainListener {
    /// Creates a listener for `client` and the channel it delivers events on.
    ///
    /// `dedup_capacity` bounds the number of event identities remembered, at least one is kept.
    pub fn new(
        client: Arc<dyn ChainClient>,
        dedup_capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<RawEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let capacity = NonZeroUsize::new(dedup_capacity).unwrap_or(NonZeroUsize::MIN);

        let listener = Self {
            client,
            dedup: Arc::new(Mutex::new(LruCache::new(capacity))),
            events_tx: Some(events_tx),
            task: None,
        };
        (listener, events_rx)
    }

    /// Chain this listener follows.
    pub fn chain_id(&self) -> ChainId {
        self.client.endpoint().chain_id
    }

    /// Returns `true` while the listener task runs, resubscription attempts included.
    pub fn is_listening(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Subscribes to the chain. No-op when already listening.
    ///
    /// Only logs emitted from now on are delivered, nothing is replayed. Fails if the chain
    /// height cannot be read, the subscription cannot be established, or a previous task gave up
    /// and closed the event channel.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_listening() {
            return Ok(());
        }
        self.reap().await;

        let chain_id = self.chain_id();
        let events_tx = self
            .events_tx
            .clone()
            .ok_or_else(|| Error::transport(chain_id, "event channel closed"))?;

        let endpoint = self.client.endpoint();
        let height = self.client.block_number().await?;
        let stream = self.client.subscribe_batches().await?;
        info!(
            chain_id,
            name = %endpoint.name,
            height,
            contract = %endpoint.contract_address,
            "Listening for invoice batches"
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(listen(
            self.client.clone(),
            stream,
            self.dedup.clone(),
            events_tx,
            shutdown.clone(),
        ));
        self.events_tx = None;
        self.task = Some(ListenerTask { shutdown, handle });

        Ok(())
    }

    /// Drops the subscription. No-op when not listening.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.as_ref() else {
            return;
        };

        task.shutdown.cancel();
        self.reap().await;
        info!(chain_id = self.chain_id(), "Stopped listening");
    }

    /// Joins the task, taking back the event sender if the task still had it.
    async fn reap(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        match task.handle.await {
            Ok(events_tx) => self.events_tx = events_tx,
            Err(e) => error!(chain_id = self.chain_id(), error = %e, "Listener task failed"),
        }
    }
}

async fn listen(
    client: Arc<dyn ChainClient>,
    mut stream: LogStream,
    dedup: DedupSet,
    events_tx: EventSender,
    shutdown: CancellationToken,
) -> Option<EventSender> {
    let chain_id = client.endpoint().chain_id;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => return Some(events_tx),

            log = stream.next() => {
                let Some(log) = log else {
                    warn!(chain_id, "Batch log subscription ended, resubscribing");
                    match resubscribe(client.as_ref(), &shutdown).await {
                        Some(resubscribed) => {
                            stream = resubscribed;
                            continue;
                        }
                        None if shutdown.is_cancelled() => return Some(events_tx),
                        None => {
                            error!(
                                chain_id,
                                attempts = MAX_RESUBSCRIBE_ATTEMPTS,
                                "Giving up on batch log subscription"
                            );
                            return None;
                        }
                    }
                };

                match handle_log(client.as_ref(), &dedup, log).await {
                    Ok(Some(event)) => {
                        info!(
                            chain_id,
                            tx_hash = %event.transaction_hash,
                            block_number = event.block_number,
                            sender = %event.sender,
                            invoices = event.invoice_hashes.len(),
                            "Invoice batch observed"
                        );
                        metrics::record_event_received(chain_id);
                        if events_tx.send(event).is_err() {
                            warn!(chain_id, "Event receiver dropped, stopping listener");
                            return None;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!(chain_id, error = %e, "Failed to handle batch log"),
                }
            }
        }
    }
}

/// Re-establishes the subscription, or returns `None` on shutdown or when attempts run out.
async fn resubscribe(client: &dyn ChainClient, shutdown: &CancellationToken) -> Option<LogStream> {
    let chain_id = client.endpoint().chain_id;

    for attempt in 1..=MAX_RESUBSCRIBE_ATTEMPTS {
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
        }

        match client.subscribe_batches().await {
            Ok(stream) => {
                info!(chain_id, attempt, "Resubscribed to batch logs");
                return Some(stream);
            }
            Err(e) => warn!(chain_id, attempt, error = %e, "Failed to resubscribe"),
        }
    }

    None
}

/// Turns a log into an event, or `None` if it was removed or already forwarded.
///
/// The identity is only recorded once the event is fully assembled, so a log that failed here is
/// accepted again if the node redelivers it.
async fn handle_log(
    client: &dyn ChainClient,
    dedup: &DedupSet,
    log: Log,
) -> Result<Option<RawEvent>> {
    let chain_id = client.endpoint().chain_id;

    if log.removed {
        debug!(chain_id, tx_hash = ?log.transaction_hash, "Ignoring removed log");
        return Ok(None);
    }

    let (Some(transaction_hash), Some(log_index)) = (log.transaction_hash, log.log_index) else {
        return Err(Error::ProtocolMismatch(format!(
            "log on chain {chain_id} has no transaction hash or log index"
        )));
    };
    let id = EventId {
        chain_id,
        transaction_hash,
        log_index,
    };

    if lock(dedup).contains(&id) {
        debug!(chain_id, tx_hash = %transaction_hash, log_index, "Dropping redelivered log");
        return Ok(None);
    }

    let batch = log
        .log_decode::<InvoiceBatch>()
        .map_err(|e| Error::ProtocolMismatch(format!("undecodable InvoiceBatch log: {e}")))?
        .inner
        .data;

    let (block_number, position_in_block) = match (log.block_number, log.transaction_index) {
        (Some(block_number), Some(position)) => (block_number, position),
        (block_number, _) => {
            let receipt = client.transaction_receipt(transaction_hash).await?.ok_or(
                Error::MissingReceipt {
                    chain_id,
                    tx_hash: transaction_hash,
                },
            )?;
            let block_number = block_number.or(receipt.block_number);
            match (block_number, receipt.transaction_index) {
                (Some(block_number), Some(position)) => (block_number, position),
                _ => {
                    return Err(Error::ProtocolMismatch(format!(
                        "receipt of {transaction_hash} on chain {chain_id} has no block position"
                    )));
                }
            }
        }
    };

    // Another delivery of the same log may have completed while the receipt was fetched.
    if lock(dedup).put(id, ()).is_some() {
        return Ok(None);
    }

    Ok(Some(RawEvent {
        source_chain_id: chain_id,
        block_number,
        transaction_hash,
        log_index,
        position_in_block,
        sender: batch.sender,
        invoice_hashes: batch.invoiceHashes,
    }))
}

fn lock(dedup: &DedupSet) -> std::sync::MutexGuard<'_, LruCache<EventId, ()>> {
    dedup.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::{Address, B256, LogData};

    use super::*;
    use crate::mock::{MockChain, batch_event, batch_log, receipt_for};

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<RawEvent>) -> RawEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event delivered")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_forwards_batches_and_drops_redeliveries() {
        let chain = MockChain::new(1);
        let (mut listener, mut rx) = ChainListener::new(chain.clone(), 16);
        listener.start().await.unwrap();

        let first = batch_event(1, 0x01, 3);
        let second = batch_event(1, 0x02, 0);

        chain.emit(batch_log(&chain, &first));
        chain.emit(batch_log(&chain, &first));
        let mut removed = batch_log(&chain, &batch_event(1, 0x03, 0));
        removed.removed = true;
        chain.emit(removed);
        chain.emit(batch_log(&chain, &second));

        assert_eq!(next_event(&mut rx).await, first);
        assert_eq!(next_event(&mut rx).await, second);
        assert!(rx.try_recv().is_err());

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let chain = MockChain::new(1);
        let (mut listener, _rx) = ChainListener::new(chain.clone(), 16);

        listener.stop().await;
        assert!(!listener.is_listening());

        listener.start().await.unwrap();
        listener.start().await.unwrap();
        assert!(listener.is_listening());
        assert_eq!(chain.subscriptions(), 1);

        listener.stop().await;
        listener.stop().await;
        assert!(!listener.is_listening());
    }

    #[tokio::test]
    async fn test_subscription_failure_propagates() {
        let chain = MockChain::new(1);
        chain.fail_subscriptions();
        let (mut listener, _rx) = ChainListener::new(chain.clone(), 16);

        let err = listener.start().await.unwrap_err();
        assert!(matches!(err, Error::Transport { chain_id: 1, .. }));
        assert!(!listener.is_listening());
    }

    #[tokio::test]
    async fn test_bad_logs_do_not_stop_the_listener() {
        let chain = MockChain::new(1);
        let (mut listener, mut rx) = ChainListener::new(chain.clone(), 16);
        listener.start().await.unwrap();

        // Wrong payload for the batch signature.
        let mut garbage = batch_log(&chain, &batch_event(1, 0x04, 0));
        garbage.inner.data = LogData::new_unchecked(
            garbage.inner.data.topics().to_vec(),
            vec![0xff; 3].into(),
        );
        chain.emit(garbage);

        // Position missing and no receipt to look it up from.
        let mut unplaced = batch_log(&chain, &batch_event(1, 0x05, 0));
        unplaced.transaction_index = None;
        chain.emit(unplaced);

        let good = batch_event(1, 0x06, 1);
        chain.emit(batch_log(&chain, &good));

        assert_eq!(next_event(&mut rx).await, good);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_position_falls_back_to_receipt() {
        let chain = MockChain::new(1);
        let (mut listener, mut rx) = ChainListener::new(chain.clone(), 16);
        listener.start().await.unwrap();

        let event = batch_event(1, 0x07, 2);
        chain.insert_receipt(receipt_for(&event, vec![batch_log(&chain, &event)]));
        let mut log = batch_log(&chain, &event);
        log.transaction_index = None;
        chain.emit(log);

        assert_eq!(next_event(&mut rx).await, event);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_event_carries_batch_payload() {
        let chain = MockChain::new(7);
        let (mut listener, mut rx) = ChainListener::new(chain.clone(), 1);
        listener.start().await.unwrap();

        let mut event = batch_event(7, 0x09, 0);
        event.sender = Address::repeat_byte(0xaa);
        event.invoice_hashes = vec![B256::repeat_byte(0x01), B256::repeat_byte(0x02)];
        chain.emit(batch_log(&chain, &event));

        let received = next_event(&mut rx).await;
        assert_eq!(received.sender, Address::repeat_byte(0xaa));
        assert_eq!(received.invoice_hashes, event.invoice_hashes);
        assert_eq!(received.source_chain_id, 7);
        listener.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_stream_ends() {
        let chain = MockChain::new(1);
        let (mut listener, mut rx) = ChainListener::new(chain.clone(), 16);
        listener.start().await.unwrap();

        let before = batch_event(1, 0x0a, 0);
        chain.emit(batch_log(&chain, &before));
        assert_eq!(next_event(&mut rx).await, before);

        chain.close_stream();
        tokio::time::sleep(RESUBSCRIBE_DELAY + Duration::from_secs(1)).await;
        assert_eq!(chain.subscriptions(), 2);
        assert!(listener.is_listening());

        // Redeliveries across subscriptions are still dropped.
        let after = batch_event(1, 0x0b, 0);
        chain.emit(batch_log(&chain, &before));
        chain.emit(batch_log(&chain, &after));
        assert_eq!(next_event(&mut rx).await, after);

        listener.stop().await;
        assert!(!listener.is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_and_closes_channel() {
        let chain = MockChain::new(1);
        let (mut listener, mut rx) = ChainListener::new(chain.clone(), 16);
        listener.start().await.unwrap();

        chain.fail_subscriptions();
        chain.close_stream();

        // Closes once the task drops its sender.
        let closed = tokio::time::timeout(
            RESUBSCRIBE_DELAY * (MAX_RESUBSCRIBE_ATTEMPTS + 1),
            rx.recv(),
        )
        .await
        .expect("listener kept retrying");
        assert!(closed.is_none());
        assert!(!listener.is_listening());
        assert_eq!(chain.subscriptions(), 1);

        // The channel is gone, so the listener cannot come back.
        let err = listener.start().await.unwrap_err();
        assert!(matches!(err, Error::Transport { chain_id: 1, .. }));
    }

    #[tokio::test]
    async fn test_restart_after_stop_reuses_channel() {
        let chain = MockChain::new(1);
        let (mut listener, mut rx) = ChainListener::new(chain.clone(), 16);

        listener.start().await.unwrap();
        listener.stop().await;
        listener.start().await.unwrap();
        assert_eq!(chain.subscriptions(), 2);

        let event = batch_event(1, 0x0c, 0);
        chain.emit(batch_log(&chain, &event));
        assert_eq!(next_event(&mut rx).await, event);
        listener.stop().await;
    }
}
