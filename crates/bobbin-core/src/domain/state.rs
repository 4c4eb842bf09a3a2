//! Per-task settlement state.

use serde::{Deserialize, Serialize};

/// State of a task held by the consumer.
///
/// State transitions:
/// - Received -> Acked
/// - Received -> Requeued
///
/// Both targets are terminal. The consumer never retries a handler itself;
/// redelivery after `Requeued` is the source's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Handed to the consumer, not settled yet.
    Received,

    /// Completion reported; the source will not redeliver.
    Acked,

    /// Returned to the source for redelivery.
    Requeued,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Acked | TaskState::Requeued)
    }
}
