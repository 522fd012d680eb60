//! Shared types and utilities for gpuperf
//!
//! This crate contains the plain data structures exchanged between a device
//! backend, the measurement session and report consumers: memory counters,
//! timeline samples and the serializable session report.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{memory::*, report::*};
