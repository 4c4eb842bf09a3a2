use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TaskId;

/// Errors reported by a [`TaskSource`](crate::ports::TaskSource).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("task source is closed")]
    Closed,

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("task already settled: {0}")]
    AlreadySettled(TaskId),

    #[error("task source is already paused")]
    AlreadyPaused,

    #[error("task source is not paused")]
    NotPaused,

    /// Broker/connection failure; worth retrying.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SourceError {
    /// Only backend failures are retried; the rest will not get better.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Backend(_))
    }
}

/// Which settlement call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleOp {
    Ack,
    Requeue,
}

impl fmt::Display for SettleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettleOp::Ack => f.write_str("ack"),
            SettleOp::Requeue => f.write_str("requeue"),
        }
    }
}

/// Errors that stop the consumer loop.
///
/// Handler failures never show up here: they are turned into requeues.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("receive failed: {0}")]
    Receive(#[source] SourceError),

    #[error("{op} failed for {task_id}: {source}")]
    Settle {
        task_id: TaskId,
        op: SettleOp,
        #[source]
        source: SourceError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How a handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// The handler returned an error.
    Failed,
    /// The handler panicked.
    Panicked,
    /// The handler was cancelled before finishing (runtime shutdown).
    Cancelled,
}

/// Failure raised while processing a task.
///
/// Travels with the requeue call as diagnostic context. Any
/// `std::error::Error` converts into it, so handlers can use `?` freely.
/// It deliberately does not implement `std::error::Error` itself, otherwise
/// the blanket `From` would overlap with `From<T> for T`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    kind: TaskErrorKind,
    message: String,
    /// Rendered `source()` chain, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(TaskErrorKind::Failed, message)
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::with_kind(TaskErrorKind::Panicked, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::with_kind(TaskErrorKind::Cancelled, message)
    }

    fn with_kind(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            causes: Vec::new(),
        }
    }

    pub fn kind(&self) -> TaskErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn causes(&self) -> &[String] {
        &self.causes
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.causes {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for TaskError {
    fn from(err: E) -> Self {
        let mut causes = Vec::new();
        let mut next = err.source();
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }
        Self {
            kind: TaskErrorKind::Failed,
            message: err.to_string(),
            causes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] Inner);

    #[derive(Debug, Error)]
    #[error("inner")]
    struct Inner;

    #[test]
    fn task_error_collects_source_chain() {
        let err = TaskError::from(Outer(Inner));
        assert_eq!(err.kind(), TaskErrorKind::Failed);
        assert_eq!(err.message(), "outer");
        assert_eq!(err.causes(), ["inner".to_string()]);
        assert_eq!(err.to_string(), "outer: inner");
    }

    #[test]
    fn question_mark_converts_into_task_error() {
        fn parse(input: &str) -> Result<u32, TaskError> {
            Ok(input.parse::<u32>()?)
        }
        let err = parse("nope").unwrap_err();
        assert!(err.message().contains("invalid digit"));
    }

    #[test]
    fn only_backend_errors_are_transient() {
        let id = TaskId::generate();
        assert!(SourceError::Backend("down".into()).is_transient());
        assert!(!SourceError::Closed.is_transient());
        assert!(!SourceError::UnknownTask(id).is_transient());
        assert!(!SourceError::AlreadySettled(id).is_transient());
        assert!(!SourceError::AlreadyPaused.is_transient());
        assert!(!SourceError::NotPaused.is_transient());
    }

    #[test]
    fn settle_error_names_the_operation() {
        let id = TaskId::generate();
        let err = ConsumerError::Settle {
            task_id: id,
            op: SettleOp::Requeue,
            source: SourceError::Backend("timeout".into()),
        };
        assert_eq!(
            err.to_string(),
            format!("requeue failed for {id}: backend error: timeout")
        );
    }
}
