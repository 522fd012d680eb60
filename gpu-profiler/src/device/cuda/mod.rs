//! CUDA runtime backend
//!
//! The CUDA runtime has no allocator statistics of its own, so memory
//! counters are derived from `cudaMemGetInfo`: "allocated" and "reserved"
//! both mean device memory in use by any process, and the peak is a
//! watermark sampled at every synchronize and stats query.

mod bindings;

use super::{Device, DeviceId};
use crate::error::{ProfilerError, Result};
use bindings::*;
use gpuperf_shared::types::memory::{
    ALLOCATED_CURRENT, ALLOCATED_PEAK, RESERVED_CURRENT, RESERVED_PEAK,
};
use gpuperf_shared::MemoryStats;
use std::ffi::CStr;
use std::sync::Mutex;
use tracing::debug;

/// Timing event on the default stream
pub struct CudaEvent {
    raw: cudaEvent_t,
}

// The handle is an opaque runtime token usable from any host thread.
unsafe impl Send for CudaEvent {}

impl Drop for CudaEvent {
    fn drop(&mut self) {
        // SAFETY: `raw` was created by cudaEventCreate and is destroyed once.
        unsafe {
            cudaEventDestroy(self.raw);
        }
    }
}

/// Device memory owned by the host; freed on drop
pub struct CudaBuffer {
    raw: *mut libc::c_void,
    bytes: u64,
}

// Device pointers are plain addresses in the device's address space.
unsafe impl Send for CudaBuffer {}

impl CudaBuffer {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for CudaBuffer {
    fn drop(&mut self) {
        // SAFETY: `raw` came from cudaMalloc and is freed exactly once.
        unsafe {
            cudaFree(self.raw);
        }
    }
}

/// A CUDA device addressed by ordinal
pub struct CudaDevice {
    id: DeviceId,
    peak_used: Mutex<u64>,
}

impl CudaDevice {
    /// Open device `index`, failing if the runtime does not report it
    pub fn open(index: u32) -> Result<Self> {
        let id = DeviceId::cuda(index);
        let mut count: libc::c_int = 0;
        // SAFETY: `count` is a valid out-pointer for the duration of the call.
        check(id, "get_device_count", unsafe { cudaGetDeviceCount(&mut count) })
            .map_err(|e| ProfilerError::Unavailable(id.to_string(), e.to_string()))?;

        if index as i64 >= count as i64 {
            return Err(ProfilerError::Unavailable(
                id.to_string(),
                format!("only {} CUDA device(s) present", count),
            ));
        }

        let device = Self {
            id,
            peak_used: Mutex::new(0),
        };
        let used = device.used_bytes()?;
        *device.peak() = used;
        debug!(device = %id, used, "opened CUDA device");
        Ok(device)
    }

    /// Allocate `bytes` of device memory
    pub fn allocate(&self, bytes: u64) -> Result<CudaBuffer> {
        self.activate()?;
        let mut raw: *mut libc::c_void = std::ptr::null_mut();
        // SAFETY: `raw` is a valid out-pointer.
        check(self.id, "malloc", unsafe { cudaMalloc(&mut raw, bytes as libc::size_t) })?;
        Ok(CudaBuffer { raw, bytes })
    }

    /// Queue a memset over the whole buffer on the default stream
    pub fn fill(&self, buffer: &CudaBuffer, value: u8) -> Result<()> {
        self.activate()?;
        // SAFETY: `buffer.raw` points to `buffer.bytes` bytes of live device memory.
        check(self.id, "memset", unsafe {
            cudaMemset(buffer.raw, value as libc::c_int, buffer.bytes as libc::size_t)
        })
    }

    fn peak(&self) -> std::sync::MutexGuard<'_, u64> {
        self.peak_used.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn activate(&self) -> Result<()> {
        // SAFETY: plain FFI call with a value argument.
        check(self.id, "set_device", unsafe { cudaSetDevice(self.id.index as libc::c_int) })
    }

    fn used_bytes(&self) -> Result<u64> {
        self.activate()?;
        let mut free: libc::size_t = 0;
        let mut total: libc::size_t = 0;
        // SAFETY: both out-pointers are valid for the duration of the call.
        check(self.id, "mem_get_info", unsafe { cudaMemGetInfo(&mut free, &mut total) })?;
        Ok(total.saturating_sub(free) as u64)
    }

    fn sample_watermark(&self) -> Result<(u64, u64)> {
        let used = self.used_bytes()?;
        let mut peak = self.peak();
        *peak = (*peak).max(used);
        Ok((used, *peak))
    }
}

impl Device for CudaDevice {
    type Event = CudaEvent;

    fn id(&self) -> DeviceId {
        self.id
    }

    fn synchronize(&self) -> Result<()> {
        self.activate()?;
        // SAFETY: no arguments; blocks until the device is idle.
        check(self.id, "synchronize", unsafe { cudaDeviceSynchronize() })?;
        self.sample_watermark().map(|_| ())
    }

    fn reset_peak_memory_stats(&self) -> Result<()> {
        let used = self.used_bytes()?;
        *self.peak() = used;
        Ok(())
    }

    fn memory_stats(&self) -> Result<MemoryStats> {
        let (used, peak) = self.sample_watermark()?;
        Ok(MemoryStats::new()
            .with_counter(ALLOCATED_PEAK, peak)
            .with_counter(ALLOCATED_CURRENT, used)
            .with_counter(RESERVED_PEAK, peak)
            .with_counter(RESERVED_CURRENT, used))
    }

    fn record_event(&self) -> Result<CudaEvent> {
        self.activate()?;
        let mut raw: cudaEvent_t = std::ptr::null_mut();
        // SAFETY: `raw` is a valid out-pointer.
        check(self.id, "event_create", unsafe { cudaEventCreate(&mut raw) })?;
        let event = CudaEvent { raw };
        // SAFETY: `event.raw` is a live event; a null stream is the default stream.
        check(self.id, "event_record", unsafe {
            cudaEventRecord(event.raw, std::ptr::null_mut())
        })?;
        Ok(event)
    }

    fn elapsed_ms(&self, start: &CudaEvent, end: &CudaEvent) -> Result<f64> {
        let mut ms: libc::c_float = 0.0;
        // SAFETY: both events are live and `ms` is a valid out-pointer.
        check(self.id, "event_elapsed_time", unsafe {
            cudaEventElapsedTime(&mut ms, start.raw, end.raw)
        })?;
        Ok(ms as f64)
    }
}

fn check(id: DeviceId, operation: &'static str, code: cudaError_t) -> Result<()> {
    if code == CUDA_SUCCESS {
        return Ok(());
    }
    // SAFETY: cudaGetErrorString returns a static NUL-terminated string.
    let message = unsafe {
        let ptr = cudaGetErrorString(code);
        if ptr.is_null() {
            format!("CUDA error {}", code)
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    };
    Err(ProfilerError::device(id, operation, message))
}
