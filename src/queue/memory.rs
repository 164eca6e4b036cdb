//! In-memory transport.
//!
//! [`MemoryMessage`] settles into a shared [`MemoryLedger`] instead of a
//! broker. Useful for tests and local development: feed messages through a
//! `tokio::sync::mpsc` channel and inspect the ledger once the listener is
//! done.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::message::Message;
use crate::metadata::Metadata;

/// Final state of a settled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Nacked,
}

#[derive(Debug, Default)]
struct LedgerInner {
    outcomes: DashMap<String, Outcome>,
    /// Settle calls on a message that was already settled.
    duplicates: AtomicUsize,
}

/// Shared record of message outcomes, keyed by message id.
///
/// The first outcome recorded for an id wins; any later ack or nack of the
/// same id is counted in [`MemoryLedger::duplicates`].
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<LedgerInner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a message that settles into this ledger.
    pub fn message(&self, id: impl Into<String>, payload: impl Into<Vec<u8>>) -> MemoryMessage {
        MemoryMessage {
            id: id.into(),
            metadata: Metadata::new(),
            payload: payload.into(),
            ledger: self.clone(),
        }
    }

    fn record(&self, id: &str, outcome: Outcome) {
        trace!(message_id = %id, ?outcome, "Settling in-memory message");
        match self.inner.outcomes.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                self.inner.duplicates.fetch_add(1, Ordering::Relaxed);
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(outcome);
            }
        }
    }

    pub fn outcome(&self, id: &str) -> Option<Outcome> {
        self.inner.outcomes.get(id).map(|entry| *entry.value())
    }

    /// Number of settled messages.
    pub fn len(&self) -> usize {
        self.inner.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.outcomes.is_empty()
    }

    pub fn acked(&self) -> usize {
        self.count(Outcome::Acked)
    }

    pub fn nacked(&self) -> usize {
        self.count(Outcome::Nacked)
    }

    pub fn duplicates(&self) -> usize {
        self.inner.duplicates.load(Ordering::Relaxed)
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.inner
            .outcomes
            .iter()
            .filter(|entry| *entry.value() == outcome)
            .count()
    }
}

/// A message held in memory.
#[derive(Debug, Clone)]
pub struct MemoryMessage {
    id: String,
    metadata: Metadata,
    payload: Vec<u8>,
    ledger: MemoryLedger,
}

impl MemoryMessage {
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[async_trait]
impl Message for MemoryMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&self) -> anyhow::Result<()> {
        self.ledger.record(&self.id, Outcome::Acked);
        Ok(())
    }

    async fn nack(&self) -> anyhow::Result<()> {
        self.ledger.record(&self.id, Outcome::Nacked);
        Ok(())
    }
}
