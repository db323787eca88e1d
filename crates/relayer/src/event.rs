//! Batch events observed on source chains.

use std::fmt;

use alloy_primitives::{Address, B256, ChainId};

/// A decoded `InvoiceBatch` log, as delivered by a chain listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Chain the batch was emitted on.
    pub source_chain_id: ChainId,
    /// Block containing the transaction.
    pub block_number: u64,
    /// Transaction emitting the batch.
    pub transaction_hash: B256,
    /// Block-global index of the log.
    pub log_index: u64,
    /// Index of the transaction inside its block.
    pub position_in_block: u64,
    /// Account that created the batch.
    pub sender: Address,
    /// Invoice hashes in emission order.
    pub invoice_hashes: Vec<B256>,
}

impl RawEvent {
    /// Identity of the log, used to drop transport redeliveries.
    pub fn id(&self) -> EventId {
        EventId {
            chain_id: self.source_chain_id,
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }

    /// Key of the in-flight ticket guarding this event.
    pub fn ticket_key(&self) -> TicketKey {
        TicketKey {
            chain_id: self.source_chain_id,
            transaction_hash: self.transaction_hash,
        }
    }
}

/// Identity of a single log: `(chain, transaction, log index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId {
    /// Source chain.
    pub chain_id: ChainId,
    /// Transaction hash.
    pub transaction_hash: B256,
    /// Block-global log index.
    pub log_index: u64,
}

/// Identity of an in-flight relay: `(chain, transaction)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TicketKey {
    /// Source chain.
    pub chain_id: ChainId,
    /// Transaction hash.
    pub transaction_hash: B256,
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.transaction_hash)
    }
}
