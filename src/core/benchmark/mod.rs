//! Benchmark harnesses.
//!
//! Both harnesses drive a [`ComputeBackend`] and time every kernel launch
//! against a [`Clock`]. Hardware outcomes (out of memory, failing vendor
//! calls, wrong results) end up in the report status; only malformed
//! parameters are returned as errors.

mod buffers;
mod dgemm;
pub mod simulated;
mod stats;
mod stream;

pub use buffers::{host_array, BlasSession, DeviceBuffer};
pub use dgemm::{max_matrix_size, DgemmBenchmark, DgemmParams, DgemmReport, DgemmStatus};
pub use stats::{RunningStats, StatsSummary};
pub use stream::{
    max_vector_size, StreamBandwidth, StreamBenchmark, StreamParams, StreamReport, StreamStatus,
};

use thiserror::Error;

/// Device memory address handed out by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

/// BLAS library session handed out by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlasHandle(pub u64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("device out of memory")]
    OutOfMemory,

    #[error("{call} failed with code {code}")]
    Vendor { call: &'static str, code: i32 },

    #[error("{0} is not available in the loaded runtime")]
    Unsupported(&'static str),

    #[error("dimension {0} exceeds what the runtime accepts")]
    InvalidDimension(usize),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Device memory, transfers and BLAS kernels of an accelerator runtime
///
/// All matrices are column-major `f64`.
pub trait ComputeBackend {
    fn allocate(&self, bytes: usize) -> BackendResult<DevicePtr>;

    fn free(&self, ptr: DevicePtr);

    fn upload(&self, dst: DevicePtr, src: &[f64]) -> BackendResult<()>;

    fn download(&self, dst: &mut [f64], src: DevicePtr) -> BackendResult<()>;

    /// Block until all queued work has completed
    fn synchronize(&self) -> BackendResult<()>;

    fn create_blas(&self) -> BackendResult<BlasHandle>;

    fn destroy_blas(&self, handle: BlasHandle);

    /// `c = alpha * a * b + beta * c` for `n`×`n` matrices
    #[allow(clippy::too_many_arguments)]
    fn dgemm(
        &self,
        blas: BlasHandle,
        n: usize,
        alpha: f64,
        a: DevicePtr,
        b: DevicePtr,
        beta: f64,
        c: DevicePtr,
    ) -> BackendResult<()>;

    /// `out = alpha * x + beta * y` over `n` elements
    #[allow(clippy::too_many_arguments)]
    fn scale_add(
        &self,
        blas: BlasHandle,
        n: usize,
        alpha: f64,
        x: DevicePtr,
        beta: f64,
        y: DevicePtr,
        out: DevicePtr,
    ) -> BackendResult<()>;
}

/// Monotonic time source in seconds
pub trait Clock {
    fn now(&self) -> f64;
}
