//! In-flight tickets: at most one relay attempt per source transaction at a time.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use crate::event::TicketKey;

/// Marker held while a source event is being relayed.
#[derive(Debug, Clone, Copy)]
pub struct Ticket {
    /// When processing started.
    pub started_at: Instant,
}

/// Map of tickets currently held.
///
/// Check-and-insert happens under a synchronous lock, so it can never interleave with another
/// acquisition across an await point.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    tickets: Arc<Mutex<HashMap<TicketKey, Ticket>>>,
}

impl InFlight {
    /// Creates an empty ticket map.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TicketKey, Ticket>> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the ticket for `key`, or returns `None` if it is already held.
    ///
    /// The ticket is released when the returned guard is dropped.
    pub fn try_acquire(&self, key: TicketKey) -> Option<TicketGuard> {
        let mut tickets = self.lock();
        if tickets.contains_key(&key) {
            return None;
        }
        tickets.insert(
            key,
            Ticket {
                started_at: Instant::now(),
            },
        );

        Some(TicketGuard {
            key,
            tickets: self.tickets.clone(),
        })
    }

    /// Returns the ticket held for `key`, if any.
    pub fn get(&self, key: &TicketKey) -> Option<Ticket> {
        self.lock().get(key).copied()
    }

    /// Number of tickets held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no ticket is held.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Releases its ticket on drop, on success, failure, and unwinding alike.
#[derive(Debug)]
pub struct TicketGuard {
    key: TicketKey,
    tickets: Arc<Mutex<HashMap<TicketKey, Ticket>>>,
}

impl TicketGuard {
    /// Key of the held ticket.
    pub fn key(&self) -> TicketKey {
        self.key
    }
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        self.tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
