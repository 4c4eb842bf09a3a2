//! App - the consumer loop and its settlement policy.

pub mod consumer;
pub mod retry;

pub use self::consumer::{Consumer, ReceivedTask};
pub use self::retry::SettleRetryPolicy;
