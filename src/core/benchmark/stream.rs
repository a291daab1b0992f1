use std::fmt;

use serde::{Deserialize, Serialize};

use super::buffers::{host_array, BlasSession, DeviceBuffer};
use super::{BackendError, BackendResult, BlasHandle, Clock, ComputeBackend};
use crate::error::{GpuPerfError, Result};

/// Bytes needed per element: three double arrays
const BYTES_PER_ELEMENT: u64 = 3 * 8;

/// Initial array values and kernel scalar. One round of the kernels scales
/// `a` by 0.96, so the values stay finite for any iteration count.
const START_A: f64 = 0.1;
const START_B: f64 = 0.2;
const START_C: f64 = 0.0;
const SCALAR: f64 = 0.4;
const GIB: f64 = (1u64 << 30) as f64;
const TOLERANCE: f64 = 1e-13;
const VALIDATION_SAMPLES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub array_size: usize,
    pub n_times: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    #[serde(rename = "OK")]
    Success,
    #[serde(rename = "OOM_HOST")]
    OutOfMemoryHost,
    #[serde(rename = "OOM_DEVICE")]
    OutOfMemoryDevice,
    #[serde(rename = "INVALID")]
    Invalid,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Success => "OK",
            StreamStatus::OutOfMemoryHost => "OOM_HOST",
            StreamStatus::OutOfMemoryDevice => "OOM_DEVICE",
            StreamStatus::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best bandwidth per kernel in GiB/s
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamBandwidth {
    pub copy: f64,
    pub scale: f64,
    pub add: f64,
    pub triad: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamReport {
    pub status: StreamStatus,
    #[serde(flatten)]
    pub bandwidth: Option<StreamBandwidth>,
}

impl StreamReport {
    fn failed(status: StreamStatus) -> Self {
        Self {
            status,
            bandwidth: None,
        }
    }
}

/// Largest array length whose three double arrays fit in `budget_bytes`
pub fn max_vector_size(budget_bytes: u64) -> u64 {
    budget_bytes / BYTES_PER_ELEMENT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kernel {
    Copy,
    Scale,
    Add,
    Triad,
}

impl Kernel {
    const ALL: [Kernel; 4] = [Kernel::Copy, Kernel::Scale, Kernel::Add, Kernel::Triad];

    /// Arrays read plus arrays written
    fn arrays_touched(self) -> f64 {
        match self {
            Kernel::Copy | Kernel::Scale => 2.0,
            Kernel::Add | Kernel::Triad => 3.0,
        }
    }
}

struct DeviceArrays<'b, B: ComputeBackend + ?Sized> {
    a: DeviceBuffer<'b, B>,
    b: DeviceBuffer<'b, B>,
    c: DeviceBuffer<'b, B>,
}

impl<B: ComputeBackend + ?Sized> DeviceArrays<'_, B> {
    fn launch(&self, backend: &B, blas: BlasHandle, kernel: Kernel) -> BackendResult<()> {
        let n = self.a.len();
        let (a, b, c) = (self.a.ptr(), self.b.ptr(), self.c.ptr());

        match kernel {
            Kernel::Copy => backend.scale_add(blas, n, 1.0, a, 0.0, a, c),
            Kernel::Scale => backend.scale_add(blas, n, SCALAR, c, 0.0, c, b),
            Kernel::Add => backend.scale_add(blas, n, 1.0, a, 1.0, b, c),
            Kernel::Triad => backend.scale_add(blas, n, 1.0, b, SCALAR, c, a),
        }
    }
}

/// Sustainable memory bandwidth benchmark (copy, scale, add, triad)
pub struct StreamBenchmark<'a, B: ComputeBackend + ?Sized, C: Clock + ?Sized> {
    backend: &'a B,
    clock: &'a C,
}

impl<'a, B: ComputeBackend + ?Sized, C: Clock + ?Sized> StreamBenchmark<'a, B, C> {
    pub fn new(backend: &'a B, clock: &'a C) -> Self {
        Self { backend, clock }
    }

    /// Run the four kernels `n_times` over arrays of `array_size` doubles.
    ///
    /// # Returns
    /// * `Err(GpuPerfError::InvalidArgument)` - If a parameter is zero
    /// * `Ok(report)` - Otherwise; hardware failures are in `report.status`
    pub fn run(&self, params: StreamParams) -> Result<StreamReport> {
        if params.array_size == 0 {
            return Err(GpuPerfError::invalid_argument("array size must be positive"));
        }
        if params.n_times == 0 {
            return Err(GpuPerfError::invalid_argument("iteration count must be positive"));
        }

        log::info!(
            "STREAM array_size={} n_times={}",
            params.array_size,
            params.n_times
        );

        let report = match self.execute(&params) {
            Ok(bandwidth) => StreamReport {
                status: StreamStatus::Success,
                bandwidth: Some(bandwidth),
            },
            Err(status) => StreamReport::failed(status),
        };

        log::info!("STREAM array_size={} finished: {}", params.array_size, report.status);
        Ok(report)
    }

    fn execute(&self, params: &StreamParams) -> std::result::Result<StreamBandwidth, StreamStatus> {
        let n = params.array_size;

        let host_a = host_array(n, START_A).map_err(|_| StreamStatus::OutOfMemoryHost)?;
        let host_b = host_array(n, START_B).map_err(|_| StreamStatus::OutOfMemoryHost)?;
        let host_c = host_array(n, START_C).map_err(|_| StreamStatus::OutOfMemoryHost)?;

        let arrays = DeviceArrays {
            a: DeviceBuffer::alloc(self.backend, n).map_err(allocation_failure)?,
            b: DeviceBuffer::alloc(self.backend, n).map_err(allocation_failure)?,
            c: DeviceBuffer::alloc(self.backend, n).map_err(allocation_failure)?,
        };

        let blas = BlasSession::create(self.backend).map_err(allocation_failure)?;

        arrays.a.upload(&host_a).map_err(run_failure)?;
        arrays.b.upload(&host_b).map_err(run_failure)?;
        arrays.c.upload(&host_c).map_err(run_failure)?;

        let element_bytes = (n * std::mem::size_of::<f64>()) as f64;
        let mut best = [0.0f64; 4];

        for iteration in 0..params.n_times {
            for (slot, kernel) in Kernel::ALL.iter().enumerate() {
                let start = self.clock.now();
                arrays
                    .launch(self.backend, blas.handle(), *kernel)
                    .map_err(run_failure)?;
                self.backend.synchronize().map_err(run_failure)?;
                let elapsed = self.clock.now() - start;

                let bandwidth = kernel.arrays_touched() * element_bytes / elapsed / GIB;
                log::debug!(
                    "STREAM iteration {} {:?}: {:.3} GiB/s",
                    iteration,
                    kernel,
                    bandwidth
                );
                if bandwidth > best[slot] {
                    best[slot] = bandwidth;
                }
            }
        }

        let mut result_a = host_a;
        let mut result_b = host_b;
        let mut result_c = host_c;
        arrays.a.download(&mut result_a).map_err(run_failure)?;
        arrays.b.download(&mut result_b).map_err(run_failure)?;
        arrays.c.download(&mut result_c).map_err(run_failure)?;

        let expected = expected_values(params.n_times);
        if !validate(&result_a, expected.0)
            || !validate(&result_b, expected.1)
            || !validate(&result_c, expected.2)
        {
            log::warn!("STREAM results failed validation");
            return Err(StreamStatus::Invalid);
        }

        Ok(StreamBandwidth {
            copy: best[0],
            scale: best[1],
            add: best[2],
            triad: best[3],
        })
    }
}

fn allocation_failure(error: BackendError) -> StreamStatus {
    log::warn!("STREAM aborted: {}", error);
    match error {
        BackendError::OutOfMemory => StreamStatus::OutOfMemoryDevice,
        _ => StreamStatus::Invalid,
    }
}

fn run_failure(error: BackendError) -> StreamStatus {
    log::warn!("STREAM aborted: {}", error);
    StreamStatus::Invalid
}

/// Final (a, b, c) after `n_times` rounds of the kernel sequence
fn expected_values(n_times: u32) -> (f64, f64, f64) {
    let (mut a, mut b, mut c) = (START_A, START_B, START_C);
    for _ in 0..n_times {
        c = a;
        b = SCALAR * c;
        c = a + b;
        a = b + SCALAR * c;
    }
    (a, b, c)
}

fn validate(values: &[f64], expected: f64) -> bool {
    if !expected.is_finite() {
        log::warn!("STREAM expected value {} is not finite", expected);
        return false;
    }
    let Some(last) = values.len().checked_sub(1) else {
        return true;
    };
    let stride = (values.len() / VALIDATION_SAMPLES).max(1);

    (0..values.len())
        .step_by(stride)
        .chain(std::iter::once(last))
        .all(|i| (values[i] - expected).abs() <= TOLERANCE * expected.abs())
}
