//! CUDA runtime FFI bindings
//!
//! Hand-written declarations for the few `libcudart` entry points the
//! profiler needs.

#![allow(non_camel_case_types)]

use libc::{c_char, c_float, c_int, c_void, size_t};

pub type cudaError_t = c_int;
pub type cudaEvent_t = *mut c_void;
pub type cudaStream_t = *mut c_void;

pub const CUDA_SUCCESS: cudaError_t = 0;

#[link(name = "cudart")]
extern "C" {
    pub fn cudaGetDeviceCount(count: *mut c_int) -> cudaError_t;
    pub fn cudaSetDevice(device: c_int) -> cudaError_t;
    pub fn cudaDeviceSynchronize() -> cudaError_t;
    pub fn cudaMalloc(ptr: *mut *mut c_void, size: size_t) -> cudaError_t;
    pub fn cudaFree(ptr: *mut c_void) -> cudaError_t;
    pub fn cudaMemset(ptr: *mut c_void, value: c_int, count: size_t) -> cudaError_t;
    pub fn cudaMemGetInfo(free: *mut size_t, total: *mut size_t) -> cudaError_t;
    pub fn cudaEventCreate(event: *mut cudaEvent_t) -> cudaError_t;
    pub fn cudaEventRecord(event: cudaEvent_t, stream: cudaStream_t) -> cudaError_t;
    pub fn cudaEventElapsedTime(ms: *mut c_float, start: cudaEvent_t, end: cudaEvent_t) -> cudaError_t;
    pub fn cudaEventDestroy(event: cudaEvent_t) -> cudaError_t;
    pub fn cudaGetErrorString(error: cudaError_t) -> *const c_char;
}
