//! Ports: the seams between the consumer loop and the outside world.
//!
//! - `TaskSource`: the queue/broker the loop pulls tasks from
//! - `TaskHandler`: caller-supplied processing logic

pub mod handler;
pub mod task_source;

pub use self::handler::{FnHandler, TaskHandler, handler_fn};
pub use self::task_source::TaskSource;
