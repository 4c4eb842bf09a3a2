//! Impls - port implementations for development and tests.
//!
//! Broker-backed sources live outside this crate.

pub mod memory;

pub use self::memory::{DeliveryRecord, DeliveryState, InMemorySource};
