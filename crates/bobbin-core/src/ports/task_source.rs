//! TaskSource port - queue/broker connection.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Task, TaskId};
use crate::error::{SourceError, TaskError};

/// Source of tasks (queue, broker topic, in-memory list...).
///
/// The source owns redelivery policy: the consumer only reports whether a
/// task completed (`acknowledge`) or should come back (`requeue`).
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Wait for the next task. `Ok(None)` means end-of-stream.
    async fn receive(&self) -> Result<Option<Task>, SourceError>;

    /// Durable completion: the task will not be redelivered.
    async fn acknowledge(&self, id: TaskId) -> Result<(), SourceError>;

    /// Hand the task back for redelivery, with the failure that caused it.
    async fn requeue(&self, id: TaskId, error: &TaskError) -> Result<(), SourceError>;
}

#[async_trait]
impl<T: TaskSource + ?Sized> TaskSource for Arc<T> {
    async fn receive(&self) -> Result<Option<Task>, SourceError> {
        (**self).receive().await
    }

    async fn acknowledge(&self, id: TaskId) -> Result<(), SourceError> {
        (**self).acknowledge(id).await
    }

    async fn requeue(&self, id: TaskId, error: &TaskError) -> Result<(), SourceError> {
        (**self).requeue(id, error).await
    }
}
