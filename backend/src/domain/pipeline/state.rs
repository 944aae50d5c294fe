//! Driver state machine and run accounting.
//!
//! `Polling → ProcessingBatch → Polling` repeats until a poll comes back empty
//! (`Drained`) or a stop is requested between batches (`Stopped`).

use crate::domain::ports::QueueMessage;

pub(super) enum PipelineState {
    Polling,
    ProcessingBatch(Vec<QueueMessage>),
    Drained,
    Stopped,
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTermination {
    /// A poll returned no messages.
    Drained,
    /// Cancellation was observed between batches.
    Stopped,
}

/// Per-message result inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MessageOutcome {
    Acknowledged,
    AcknowledgeFailed,
    Malformed,
    PersistFailed,
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    /// Non-empty batches processed.
    pub batches: u64,
    /// Messages received across all batches.
    pub received: u64,
    /// Rows committed to the store.
    pub persisted: u64,
    /// Messages deleted after their row was committed.
    pub acknowledged: u64,
    /// Messages left on the queue because their payload was malformed.
    pub malformed: u64,
    /// Messages left on the queue because the store rejected their row.
    pub persist_failures: u64,
    /// Messages whose row was committed but whose delete failed.
    pub acknowledge_failures: u64,
}

impl MessageCounts {
    pub(super) fn record_batch(&mut self, size: usize) {
        self.batches = self.batches.saturating_add(1);
        self.received = self
            .received
            .saturating_add(u64::try_from(size).unwrap_or(u64::MAX));
    }

    pub(super) fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Acknowledged => {
                self.persisted = self.persisted.saturating_add(1);
                self.acknowledged = self.acknowledged.saturating_add(1);
            }
            MessageOutcome::AcknowledgeFailed => {
                self.persisted = self.persisted.saturating_add(1);
                self.acknowledge_failures = self.acknowledge_failures.saturating_add(1);
            }
            MessageOutcome::Malformed => self.malformed = self.malformed.saturating_add(1),
            MessageOutcome::PersistFailed => {
                self.persist_failures = self.persist_failures.saturating_add(1);
            }
        }
    }
}

/// Result of a run that ended without a fatal infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Terminal state reached.
    pub termination: RunTermination,
    /// Message accounting for the run.
    pub counts: MessageCounts,
}
