//! TaskHandler port - caller-supplied processing.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Task;
use crate::error::TaskError;

/// Processes one task.
///
/// `Ok(())` acks the task, `Err(_)` requeues it. Panics are caught by the
/// consumer and requeued as well.
///
/// # 使用例
/// ```ignore
/// struct SendEmail;
///
/// #[async_trait]
/// impl TaskHandler for SendEmail {
///     async fn handle(&self, task: &Task) -> Result<(), TaskError> {
///         let mail: Mail = serde_json::from_slice(task.payload())?;
///         deliver(mail).await
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: &Task) -> Result<(), TaskError>;
}

#[async_trait]
impl<H: TaskHandler + ?Sized> TaskHandler for Arc<H> {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        (**self).handle(task).await
    }
}

/// Adapter turning an async closure into a [`TaskHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap `f` as a handler. The closure receives a shared handle to the task.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Arc<Task>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Arc<Task>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        (self.f)(Arc::new(task.clone())).await
    }
}
