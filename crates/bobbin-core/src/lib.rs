//! bobbin-core
//!
//! A task-consumer loop with acknowledge/requeue semantics, independent of
//! any particular queue library.
//!
//! # モジュール構成
//! - **domain**: Task, TaskId, TaskState
//! - **ports**: TaskSource (queue/broker), TaskHandler (caller logic)
//! - **app**: Consumer loop + settlement retry policy
//! - **impls**: InMemorySource (development/tests)
//! - **config**: ConsumerConfig (JSON)
//! - **observability**: counters
//! - **error**: error types
//!
//! # Example
//! ```ignore
//! let source = InMemorySource::new();
//! source.push(Task::new("send-email", payload)).await?;
//! source.close().await;
//!
//! let stats = Consumer::new(source)
//!     .run(handler_fn(|task| async move { send(task).await }))
//!     .await?;
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{Consumer, ReceivedTask, SettleRetryPolicy};
pub use config::ConsumerConfig;
pub use domain::{LogPosition, RawMessage, Task, TaskId, TaskState};
pub use error::{ConfigError, ConsumerError, SettleOp, SourceError, TaskError, TaskErrorKind};
pub use impls::InMemorySource;
pub use observability::{ConsumerStats, SourceCounts, SourceState};
pub use ports::{TaskHandler, TaskSource, handler_fn};
