//! Data types for device memory statistics and session reports

pub mod memory;
pub mod report;
