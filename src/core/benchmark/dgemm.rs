use std::fmt;

use serde::{Deserialize, Serialize};

use super::buffers::{host_array, BlasSession, DeviceBuffer};
use super::stats::{RunningStats, StatsSummary};
use super::{BackendError, Clock, ComputeBackend};
use crate::error::{GpuPerfError, Result};

/// Bytes needed per matrix cell: A, B and C in double precision
const BYTES_PER_CELL: u64 = 3 * 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DgemmParams {
    /// Matrix dimension N (N×N matrices)
    pub n: usize,
    pub alpha: f64,
    pub beta: f64,
    pub repeats: u32,
}

impl DgemmParams {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            alpha: 1.0,
            beta: 0.0,
            repeats: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DgemmStatus {
    #[serde(rename = "OK")]
    Success,
    #[serde(rename = "OOM")]
    OutOfMemory,
    #[serde(rename = "Unknown")]
    OtherError,
}

impl DgemmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DgemmStatus::Success => "OK",
            DgemmStatus::OutOfMemory => "OOM",
            DgemmStatus::OtherError => "Unknown",
        }
    }
}

impl fmt::Display for DgemmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one DGEMM run; throughput figures are in GFLOP/s and only
/// present on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DgemmReport {
    pub status: DgemmStatus,
    #[serde(flatten)]
    pub gflops: Option<StatsSummary>,
}

impl DgemmReport {
    fn failed(status: DgemmStatus) -> Self {
        Self {
            status,
            gflops: None,
        }
    }
}

/// Largest N whose three N×N double matrices fit in `budget_bytes`
pub fn max_matrix_size(budget_bytes: u64) -> u64 {
    let cells = budget_bytes / BYTES_PER_CELL;
    let fits = |r: u64| r.checked_mul(r).is_some_and(|sq| sq <= cells);

    let mut r = (cells as f64).sqrt() as u64;
    while r > 0 && !fits(r) {
        r -= 1;
    }
    while fits(r + 1) {
        r += 1;
    }
    r
}

/// Double-precision matrix multiply throughput benchmark
pub struct DgemmBenchmark<'a, B: ComputeBackend + ?Sized, C: Clock + ?Sized> {
    backend: &'a B,
    clock: &'a C,
}

impl<'a, B: ComputeBackend + ?Sized, C: Clock + ?Sized> DgemmBenchmark<'a, B, C> {
    pub fn new(backend: &'a B, clock: &'a C) -> Self {
        Self { backend, clock }
    }

    /// Multiply two N×N matrices `repeats` times and report GFLOP/s.
    ///
    /// # Returns
    /// * `Err(GpuPerfError::InvalidArgument)` - If `n` or `repeats` is zero
    /// * `Ok(report)` - Otherwise; hardware failures are in `report.status`
    pub fn run(&self, params: DgemmParams) -> Result<DgemmReport> {
        if params.n == 0 {
            return Err(GpuPerfError::invalid_argument("matrix size must be positive"));
        }
        if params.repeats == 0 {
            return Err(GpuPerfError::invalid_argument("repeat count must be positive"));
        }

        log::info!(
            "DGEMM N={} alpha={} beta={} repeats={}",
            params.n,
            params.alpha,
            params.beta,
            params.repeats
        );

        let report = match self.execute(&params) {
            Ok(stats) => DgemmReport {
                status: DgemmStatus::Success,
                gflops: stats.summary(),
            },
            Err(status) => DgemmReport::failed(status),
        };

        log::info!("DGEMM N={} finished: {}", params.n, report.status);
        Ok(report)
    }

    fn execute(&self, params: &DgemmParams) -> std::result::Result<RunningStats, DgemmStatus> {
        let n = params.n;
        let cells = n.checked_mul(n).ok_or(DgemmStatus::OutOfMemory)?;

        let blas = BlasSession::create(self.backend).map_err(failure)?;

        let (host_a, host_b, host_c) = init_matrices(n, cells).map_err(|_| {
            log::warn!("Host allocation of {} matrix cells failed", 3 * cells as u128);
            DgemmStatus::OtherError
        })?;

        let dev_a = DeviceBuffer::alloc(self.backend, cells).map_err(failure)?;
        let dev_b = DeviceBuffer::alloc(self.backend, cells).map_err(failure)?;
        let dev_c = DeviceBuffer::alloc(self.backend, cells).map_err(failure)?;

        dev_a.upload(&host_a).map_err(failure)?;
        dev_b.upload(&host_b).map_err(failure)?;
        dev_c.upload(&host_c).map_err(failure)?;

        let nf = n as f64;
        let flops = 2.0 * nf * nf * (nf + 1.0);
        let mut stats = RunningStats::new();

        for r in 0..params.repeats {
            let start = self.clock.now();
            self.backend
                .dgemm(
                    blas.handle(),
                    n,
                    params.alpha,
                    dev_b.ptr(),
                    dev_a.ptr(),
                    params.beta,
                    dev_c.ptr(),
                )
                .map_err(failure)?;
            self.backend.synchronize().map_err(failure)?;
            let elapsed = self.clock.now() - start;

            let gflops = flops / elapsed / 1e9;
            log::debug!("DGEMM repeat {}: {:.3} GFLOP/s", r, gflops);
            stats.push(gflops);
        }

        Ok(stats)
    }
}

fn failure(error: BackendError) -> DgemmStatus {
    log::warn!("DGEMM aborted: {}", error);
    match error {
        BackendError::OutOfMemory => DgemmStatus::OutOfMemory,
        _ => DgemmStatus::OtherError,
    }
}

type HostMatrices = (Vec<f64>, Vec<f64>, Vec<f64>);

/// A and B vary along the column index j = k mod N:
/// `A[k] = 2 + sin(j)`, `B[k] = 1 / (2 + sin(j))`, `C = 0`.
fn init_matrices(
    n: usize,
    cells: usize,
) -> std::result::Result<HostMatrices, std::collections::TryReserveError> {
    let mut a = host_array(cells, 0.0)?;
    let mut b = host_array(cells, 0.0)?;
    let c = host_array(cells, 0.0)?;

    for k in 0..cells {
        let value = 2.0 + ((k % n) as f64).sin();
        a[k] = value;
        b[k] = 1.0 / value;
    }

    Ok((a, b, c))
}
