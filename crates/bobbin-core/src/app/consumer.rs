//! Consumer loop: receive -> handle -> ack | requeue, until end-of-stream.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

use super::retry::SettleRetryPolicy;
use crate::config::ConsumerConfig;
use crate::domain::{Task, TaskId, TaskState};
use crate::error::{ConsumerError, SettleOp, SourceError, TaskError, TaskErrorKind};
use crate::observability::ConsumerStats;
use crate::ports::{TaskHandler, TaskSource};

/// Pulls tasks from a [`TaskSource`] one at a time and settles each of them.
///
/// - One task in flight; the loop waits on the source between tasks.
/// - Stops only when the source reports end-of-stream (or a source call
///   fails for good, see [`ConsumerError`]).
pub struct Consumer<S> {
    source: S,
    name: String,
    settle_policy: SettleRetryPolicy,
}

impl<S: TaskSource> Consumer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            name: "default".to_string(),
            settle_policy: SettleRetryPolicy::default(),
        }
    }

    pub fn with_config(source: S, config: &ConsumerConfig) -> Self {
        Self {
            source,
            name: config.name.clone(),
            settle_policy: SettleRetryPolicy::from(&config.settle_retry),
        }
    }

    pub fn with_settle_policy(mut self, policy: SettleRetryPolicy) -> Self {
        self.settle_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Wait for the next task. `Ok(None)` is end-of-stream.
    ///
    /// The returned handle must be settled with [`ReceivedTask::ack`] or
    /// [`ReceivedTask::requeue`].
    pub async fn wait_task(&self) -> Result<Option<ReceivedTask<'_>>, ConsumerError> {
        match self.source.receive().await {
            Ok(Some(task)) => {
                tracing::debug!(
                    consumer = %self.name,
                    task_id = %task.id(),
                    name = %task.name(),
                    "task received"
                );
                Ok(Some(ReceivedTask::new(
                    task,
                    &self.source,
                    &self.settle_policy,
                )))
            }
            Ok(None) => {
                tracing::debug!(consumer = %self.name, "end of stream");
                Ok(None)
            }
            Err(err) => {
                tracing::error!(consumer = %self.name, error = %err, "receive failed");
                Err(ConsumerError::Receive(err))
            }
        }
    }

    /// Run the loop with `handler` until the source reports end-of-stream.
    pub async fn run<H: TaskHandler>(&self, handler: H) -> Result<ConsumerStats, ConsumerError> {
        let handler = Arc::new(handler);
        let mut stats = ConsumerStats::default();

        tracing::info!(consumer = %self.name, "consumer started");

        while let Some(received) = self.wait_task().await? {
            stats.received += 1;
            let span = tracing::info_span!(
                "task",
                consumer = %self.name,
                task_id = %received.id(),
                name = %received.name(),
                queue = %received.queue(),
                attempt = received.task().attempt(),
            );
            process_one(received, &handler, &mut stats)
                .instrument(span)
                .await?;
        }

        tracing::info!(
            consumer = %self.name,
            received = stats.received,
            acked = stats.acked,
            requeued = stats.requeued,
            "consumer stopped"
        );
        Ok(stats)
    }
}

async fn process_one<H: TaskHandler>(
    received: ReceivedTask<'_>,
    handler: &Arc<H>,
    stats: &mut ConsumerStats,
) -> Result<(), ConsumerError> {
    match run_handler(handler, received.shared()).await {
        Ok(()) => {
            received.ack().await?;
            stats.acked += 1;
        }
        Err(err) => {
            if err.kind() == TaskErrorKind::Panicked {
                stats.panicked += 1;
            }
            received.requeue(&err).await?;
            stats.requeued += 1;
        }
    }
    Ok(())
}

/// Catch-all boundary around the handler.
///
/// The handler runs on its own tokio task, awaited right away, so a panic
/// comes back as a `JoinError` instead of unwinding through the loop.
/// Dropping the `run` future aborts the handler task along with it.
async fn run_handler<H: TaskHandler>(handler: &Arc<H>, task: Arc<Task>) -> Result<(), TaskError> {
    let handler = Arc::clone(handler);
    let mut spawned = AbortOnDrop(tokio::spawn(async move { handler.handle(&task).await }));
    let joined = (&mut spawned.0).await;
    match joined {
        Ok(result) => result,
        Err(err) => Err(join_error_to_task_error(err)),
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        // 完了済みなら何もしない
        self.0.abort();
    }
}

fn join_error_to_task_error(err: JoinError) -> TaskError {
    if err.is_panic() {
        TaskError::panicked(panic_message(err.into_panic()))
    } else {
        TaskError::cancelled(err.to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}

/// A task handed to the consumer, waiting to be settled.
///
/// `ack` and `requeue` consume the handle, so a task can be settled at most
/// once. Dropping it unsettled is reported as a warning.
pub struct ReceivedTask<'c> {
    task: Arc<Task>,
    source: &'c dyn TaskSource,
    policy: &'c SettleRetryPolicy,
    settling: bool,
}

impl<'c> ReceivedTask<'c> {
    fn new(task: Task, source: &'c dyn TaskSource, policy: &'c SettleRetryPolicy) -> Self {
        Self {
            task: Arc::new(task),
            source,
            policy,
            settling: false,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Shared handle to the task, for handing it to another tokio task.
    pub fn shared(&self) -> Arc<Task> {
        Arc::clone(&self.task)
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn queue(&self) -> &str {
        self.task.queue()
    }

    pub fn driver(&self) -> &str {
        self.task.driver()
    }

    pub fn payload(&self) -> &[u8] {
        self.task.payload()
    }

    /// Always `Received`: settling consumes the handle.
    pub fn state(&self) -> TaskState {
        TaskState::Received
    }

    /// Report completion. The source will not redeliver the task.
    pub async fn ack(mut self) -> Result<(), ConsumerError> {
        self.settling = true;
        let id = self.id();
        let source = self.source;
        settle_with_retry(self.policy, id, SettleOp::Ack, || source.acknowledge(id)).await?;
        tracing::info!(task_id = %id, "task acked");
        Ok(())
    }

    /// Return the task to the source for redelivery, carrying `error`.
    pub async fn requeue(mut self, error: &TaskError) -> Result<(), ConsumerError> {
        self.settling = true;
        let id = self.id();
        let source = self.source;
        settle_with_retry(self.policy, id, SettleOp::Requeue, || {
            source.requeue(id, error)
        })
        .await?;
        tracing::warn!(task_id = %id, kind = ?error.kind(), error = %error, "task requeued");
        Ok(())
    }
}

impl Drop for ReceivedTask<'_> {
    fn drop(&mut self) {
        if !self.settling {
            tracing::warn!(
                task_id = %self.task.id(),
                name = %self.task.name(),
                "task dropped without ack or requeue"
            );
        }
    }
}

async fn settle_with_retry<F, Fut>(
    policy: &SettleRetryPolicy,
    id: TaskId,
    op: SettleOp,
    mut call: F,
) -> Result<(), ConsumerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), SourceError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match call().await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() && policy.should_retry(attempts) => {
                let delay = policy.jittered_delay(attempts);
                tracing::warn!(
                    task_id = %id,
                    %op,
                    attempts,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "settle failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::error!(task_id = %id, %op, attempts, error = %err, "settle failed");
                return Err(ConsumerError::Settle {
                    task_id: id,
                    op,
                    source: err,
                });
            }
        }
    }
}
