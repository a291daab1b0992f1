//! Device telemetry.
//!
//! The [`Telemetry`] trait is the seam between the device registry and a
//! vendor management library. Every accessor is backed by its own runtime
//! capability and reports a missing capability as
//! [`TelemetryError::Unsupported`] instead of failing the whole readout.

mod process_buffer;
mod registry;

pub use process_buffer::{ProcessIdBuffer, RawProcessInfo};
pub use registry::{DeviceRegistry, DeviceSelector, DeviceSnapshot};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single telemetry reading is unavailable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("{0} is not supported by the loaded management library")]
    Unsupported(&'static str),

    #[error("{call} failed: {reason} (code {code})")]
    Vendor {
        call: &'static str,
        code: i32,
        reason: &'static str,
    },
}

pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;

/// GPU and memory-controller utilization over the last sample period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utilization {
    pub gpu_percent: u32,
    pub memory_percent: u32,
}

/// Device memory occupancy in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub free: u64,
    pub total: u64,
    pub used: u64,
}

/// Per-device hardware counters of a management library
///
/// Implementations hand out `Device` tokens only through
/// [`Telemetry::device_handle`]; the tokens stay valid for as long as the
/// implementation itself is alive.
pub trait Telemetry {
    type Device: Copy;

    fn device_count(&self) -> TelemetryResult<u32>;

    fn device_handle(&self, index: u32) -> TelemetryResult<Self::Device>;

    fn device_name(&self, device: Self::Device) -> TelemetryResult<String>;

    /// GPU die temperature in °C
    fn temperature(&self, device: Self::Device) -> TelemetryResult<u32>;

    /// Current graphics clock in MHz
    fn frequency(&self, device: Self::Device) -> TelemetryResult<u32>;

    /// Power draw in milliwatts
    fn power_usage(&self, device: Self::Device) -> TelemetryResult<u32>;

    /// PCIe transmit throughput in KB/s
    fn pcie_throughput(&self, device: Self::Device) -> TelemetryResult<u32>;

    fn utilization(&self, device: Self::Device) -> TelemetryResult<Utilization>;

    fn memory_info(&self, device: Self::Device) -> TelemetryResult<MemoryInfo>;

    fn num_cores(&self, device: Self::Device) -> TelemetryResult<u32>;

    fn persistence_mode(&self, device: Self::Device) -> TelemetryResult<bool>;

    /// Fill `buffer` with the compute processes running on `device`.
    ///
    /// The buffer is grown as needed and never shrunk. Returns the number of
    /// valid entries.
    fn running_processes(
        &self,
        device: Self::Device,
        buffer: &mut ProcessIdBuffer,
    ) -> TelemetryResult<usize>;

    fn process_name(&self, pid: u32) -> TelemetryResult<String>;

    fn driver_version(&self) -> TelemetryResult<String>;

    fn library_version(&self) -> TelemetryResult<String>;
}
