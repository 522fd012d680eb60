//! Timing and memory reporting around GPU-bound work
//!
//! A [`Session`] synchronizes a compute device, runs the caller's work,
//! synchronizes again and reports elapsed time together with the device's
//! allocator counters. [`profile`] wraps arbitrary callables so that every
//! call is measured by a fresh session.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gpuperf::{profile, DeviceId, ProfilerConfig, SimulatedDevice};
//!
//! let device = Arc::new(SimulatedDevice::new(0));
//! let profiler = profile(device.clone(), ProfilerConfig::new(DeviceId::sim(0)));
//! let forward = profiler.wrap(|batch: Vec<f32>| batch.iter().sum::<f32>());
//! let total = forward(vec![1.0, 2.0, 3.0]);
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod profiler;
pub mod session;
pub mod sink;
mod timing;

pub use config::{PeakTracking, ProfilerConfig, TimingMode};
#[cfg(feature = "cuda")]
pub use device::cuda::{CudaBuffer, CudaDevice};
pub use device::simulated::SimulatedDevice;
pub use device::{Device, DeviceId, DeviceKind};
pub use error::{ProfilerError, Result};
pub use profiler::{profile, Profiler};
pub use session::{measure, Measured, Session};
pub use sink::{FanoutSink, MemorySink, ReportSink, StdoutSink, TracingSink};

pub use gpuperf_shared::{MemorySample, MemoryStats, SessionReport};
