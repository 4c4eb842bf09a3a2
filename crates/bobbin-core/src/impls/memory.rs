//! In-memory task source.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

use crate::config::MemorySourceConfig;
use crate::domain::{Task, TaskId};
use crate::error::{SourceError, TaskError};
use crate::observability::{SourceCounts, SourceState};
use crate::ports::TaskSource;

/// Driver label reported by [`InMemorySource::state`].
pub const DRIVER: &str = "memory";

const DEFAULT_LABEL: &str = "default";

/// Delivery state of a task inside the in-memory source.
///
/// State transitions:
/// - Queued -> InFlight -> Acked
/// - Queued -> InFlight -> Queued (requeue, loop until max_deliveries)
/// - Queued -> InFlight -> Dead (max_deliveries reached)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Queued,
    InFlight,
    Acked,
    Dead,
}

/// Source-side bookkeeping for one task.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub task: Task,
    pub state: DeliveryState,

    /// Number of times the task was handed out.
    pub deliveries: u32,

    /// Number of requeue calls accepted for this task.
    pub requeues: u32,

    /// Error attached to the latest requeue.
    pub last_error: Option<TaskError>,

    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    fn new(task: Task) -> Self {
        Self {
            task,
            state: DeliveryState::Queued,
            deliveries: 0,
            requeues: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    fn transition(&mut self, state: DeliveryState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

struct InMemoryState {
    /// All records (single source of truth).
    records: HashMap<TaskId, DeliveryRecord>,

    /// Ready queue (TaskIds only).
    ready: VecDeque<TaskId>,

    closed: bool,

    paused: bool,

    requeues: u64,

    pruned: u64,

    max_deliveries: Option<u32>,
}

impl InMemoryState {
    fn in_flight_mut(&mut self, id: TaskId) -> Result<&mut DeliveryRecord, SourceError> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(SourceError::UnknownTask(id))?;
        if record.state != DeliveryState::InFlight {
            return Err(SourceError::AlreadySettled(id));
        }
        Ok(record)
    }

    fn counts(&self) -> SourceCounts {
        let mut counts = SourceCounts {
            requeues: self.requeues,
            pruned: self.pruned,
            ..SourceCounts::default()
        };
        for record in self.records.values() {
            match record.state {
                DeliveryState::Queued => counts.queued += 1,
                DeliveryState::InFlight => counts.in_flight += 1,
                DeliveryState::Acked => counts.acked += 1,
                DeliveryState::Dead => counts.dead += 1,
            }
        }
        counts
    }
}

/// FIFO task source kept in memory.
///
/// - `push` enqueues, `close` signals end-of-stream.
/// - `receive` waits while the queue is empty and the source is open; once
///   closed it drains what is left, then returns `None`.
/// - `pause` holds deliveries back without ending the stream; `resume`
///   releases them.
/// - `requeue` puts the task at the back of the queue, or dead-letters it
///   when `max_deliveries` is reached.
///
/// Settled records stay around for inspection until `prune_settled` drops
/// them, so a long-lived process should prune periodically.
pub struct InMemorySource {
    state: Mutex<InMemoryState>,
    notify: Notify,
    pipeline: String,
    queue: String,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::with_max_deliveries(None)
    }

    pub fn with_max_deliveries(max_deliveries: Option<u32>) -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                records: HashMap::new(),
                ready: VecDeque::new(),
                closed: false,
                paused: false,
                requeues: 0,
                pruned: 0,
                max_deliveries,
            }),
            notify: Notify::new(),
            pipeline: DEFAULT_LABEL.to_string(),
            queue: DEFAULT_LABEL.to_string(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = pipeline.into();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn from_config(config: &MemorySourceConfig) -> Self {
        Self::with_max_deliveries(config.max_deliveries)
    }

    /// Enqueue a task. Fails once the source is closed.
    pub async fn push(&self, task: Task) -> Result<TaskId, SourceError> {
        let id = task.id();
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(SourceError::Closed);
            }
            state.records.insert(id, DeliveryRecord::new(task));
            state.ready.push_back(id);
        }
        self.notify.notify_one();
        Ok(id)
    }

    /// Signal end-of-stream. Already queued tasks are still delivered.
    ///
    /// Closing also lifts a pause, otherwise a paused and closed source
    /// would never reach end-of-stream.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.paused = false;
        }
        // 待機中の receive を全部起こす（まだ待っていない側には permit を残す）
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Stop handing out tasks. `receive` keeps waiting; nothing is lost and
    /// in-flight tasks can still be settled.
    pub async fn pause(&self) -> Result<(), SourceError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SourceError::Closed);
        }
        if state.paused {
            return Err(SourceError::AlreadyPaused);
        }
        state.paused = true;
        tracing::debug!(pipeline = %self.pipeline, "source paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), SourceError> {
        {
            let mut state = self.state.lock().await;
            if !state.paused {
                return Err(SourceError::NotPaused);
            }
            state.paused = false;
        }
        tracing::debug!(pipeline = %self.pipeline, "source resumed");
        self.notify.notify_waiters();
        self.notify.notify_one();
        Ok(())
    }

    pub async fn state(&self) -> SourceState {
        let state = self.state.lock().await;
        SourceState {
            pipeline: self.pipeline.clone(),
            driver: DRIVER.to_string(),
            queue: self.queue.clone(),
            ready: !state.paused && !state.closed,
            paused: state.paused,
            closed: state.closed,
            records: state.records.len(),
            queued: state.ready.len(),
        }
    }

    /// Drop acked and dead-lettered records. Returns how many were removed.
    pub async fn prune_settled(&self) -> usize {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state
            .records
            .retain(|_, record| !matches!(record.state, DeliveryState::Acked | DeliveryState::Dead));
        let removed = before - state.records.len();
        state.pruned += removed as u64;
        removed
    }

    pub async fn counts(&self) -> SourceCounts {
        self.state.lock().await.counts()
    }

    pub async fn record(&self, id: TaskId) -> Option<DeliveryRecord> {
        self.state.lock().await.records.get(&id).cloned()
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskSource for InMemorySource {
    async fn receive(&self) -> Result<Option<Task>, SourceError> {
        loop {
            {
                let mut state = self.state.lock().await;
                // paused の間は配らず、終わりもしない
                if !state.paused {
                    while let Some(id) = state.ready.pop_front() {
                        if let Some(record) = state.records.get_mut(&id) {
                            record.deliveries += 1;
                            record.transition(DeliveryState::InFlight);
                            return Ok(Some(record.task.clone().with_attempt(record.deliveries)));
                        }
                    }
                    if state.closed {
                        return Ok(None);
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    async fn acknowledge(&self, id: TaskId) -> Result<(), SourceError> {
        let mut state = self.state.lock().await;
        state.in_flight_mut(id)?.transition(DeliveryState::Acked);
        Ok(())
    }

    async fn requeue(&self, id: TaskId, error: &TaskError) -> Result<(), SourceError> {
        let requeued = {
            let mut state = self.state.lock().await;
            let max_deliveries = state.max_deliveries;
            let record = state.in_flight_mut(id)?;
            record.requeues += 1;
            record.last_error = Some(error.clone());

            let exhausted = max_deliveries.is_some_and(|max| record.deliveries >= max);
            if exhausted {
                record.transition(DeliveryState::Dead);
                tracing::warn!(
                    task_id = %id,
                    deliveries = record.deliveries,
                    "max deliveries reached, task moved to dead letters"
                );
            } else {
                record.transition(DeliveryState::Queued);
                state.ready.push_back(id);
            }
            state.requeues += 1;
            !exhausted
        };

        if requeued {
            self.notify.notify_one();
        }
        Ok(())
    }
}
