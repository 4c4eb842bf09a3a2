//! Domain model: task, id, settlement state.

pub mod ids;
pub mod state;
pub mod task;

pub use ids::TaskId;
pub use state::TaskState;
pub use task::{LogPosition, RawMessage, Task};
