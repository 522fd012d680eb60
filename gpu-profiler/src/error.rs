//! Error types for measurement sessions

use gpuperf_shared::StatError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProfilerError>;

/// Errors raised by the profiler itself or by the device it talks to.
///
/// Errors of the measured operation never pass through this type.
#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("device {device} failed during {operation}: {message}")]
    Device {
        device: String,
        operation: &'static str,
        message: String,
    },

    #[error(transparent)]
    Stat(#[from] StatError),

    #[error("invalid device identifier `{0}`")]
    InvalidDevice(String),

    #[error("device {0} is not available: {1}")]
    Unavailable(String, String),

    #[error("session configured for {expected} but device is {actual}")]
    DeviceMismatch { expected: String, actual: String },

    #[error("no timed region is open")]
    NoOpenRegion,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProfilerError {
    pub fn device(device: impl ToString, operation: &'static str, message: impl ToString) -> Self {
        ProfilerError::Device {
            device: device.to_string(),
            operation,
            message: message.to_string(),
        }
    }
}
