//! Raw NVML ABI: status codes, enum constants, structs and entry-point types.

use std::ffi::{c_char, c_int, c_uint, c_void};

/// `nvmlDevice_t`
pub type NvmlDeviceRaw = *mut c_void;

pub const NVML_SUCCESS: c_int = 0;
pub const NVML_ERROR_INSUFFICIENT_SIZE: c_int = 7;

pub const NVML_TEMPERATURE_GPU: c_uint = 0;
pub const NVML_CLOCK_GRAPHICS: c_uint = 0;
pub const NVML_CLOCK_ID_CURRENT: c_uint = 0;
pub const NVML_PCIE_UTIL_TX_BYTES: c_uint = 0;
pub const NVML_FEATURE_ENABLED: c_uint = 1;

pub const NVML_DEVICE_NAME_BUFFER_SIZE: usize = 96;
pub const NVML_SYSTEM_DRIVER_VERSION_BUFFER_SIZE: usize = 80;
pub const NVML_SYSTEM_NVML_VERSION_BUFFER_SIZE: usize = 80;
pub const NVML_PROCESS_NAME_BUFFER_SIZE: usize = 256;

/// `nvmlReturn_t`
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmlReturn {
    Success = 0,
    Uninitialized = 1,
    InvalidArgument = 2,
    NotSupported = 3,
    NoPermission = 4,
    AlreadyInitialized = 5,
    NotFound = 6,
    InsufficientSize = 7,
    InsufficientPower = 8,
    DriverNotLoaded = 9,
    Timeout = 10,
    IrqIssue = 11,
    LibraryNotFound = 12,
    FunctionNotFound = 13,
    CorruptedInforom = 14,
    GpuIsLost = 15,
    ResetRequired = 16,
    OperatingSystem = 17,
    LibRmVersionMismatch = 18,
    InUse = 19,
    Memory = 20,
    NoData = 21,
    VgpuEccNotSupported = 22,
    Unknown = 999,
}

impl NvmlReturn {
    pub fn from_code(code: c_int) -> Self {
        use NvmlReturn::*;
        match code {
            0 => Success,
            1 => Uninitialized,
            2 => InvalidArgument,
            3 => NotSupported,
            4 => NoPermission,
            5 => AlreadyInitialized,
            6 => NotFound,
            7 => InsufficientSize,
            8 => InsufficientPower,
            9 => DriverNotLoaded,
            10 => Timeout,
            11 => IrqIssue,
            12 => LibraryNotFound,
            13 => FunctionNotFound,
            14 => CorruptedInforom,
            15 => GpuIsLost,
            16 => ResetRequired,
            17 => OperatingSystem,
            18 => LibRmVersionMismatch,
            19 => InUse,
            20 => Memory,
            21 => NoData,
            22 => VgpuEccNotSupported,
            _ => Unknown,
        }
    }

    pub fn description(self) -> &'static str {
        use NvmlReturn::*;
        match self {
            Success => "success",
            Uninitialized => "NVML was not initialized",
            InvalidArgument => "invalid argument",
            NotSupported => "not supported by this device",
            NoPermission => "insufficient permissions",
            AlreadyInitialized => "already initialized",
            NotFound => "not found",
            InsufficientSize => "buffer too small",
            InsufficientPower => "insufficient external power",
            DriverNotLoaded => "NVIDIA driver is not loaded",
            Timeout => "timeout",
            IrqIssue => "interrupt request issue",
            LibraryNotFound => "NVML shared library not found",
            FunctionNotFound => "function not found in the loaded NVML",
            CorruptedInforom => "infoROM is corrupted",
            GpuIsLost => "GPU has fallen off the bus",
            ResetRequired => "GPU requires a reset",
            OperatingSystem => "blocked by the operating system",
            LibRmVersionMismatch => "driver/library version mismatch",
            InUse => "in use",
            Memory => "insufficient memory",
            NoData => "no data",
            VgpuEccNotSupported => "ECC not supported on vGPU",
            Unknown => "unknown error",
        }
    }
}

/// `nvmlUtilization_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NvmlUtilization {
    pub gpu: c_uint,
    pub memory: c_uint,
}

/// `nvmlMemory_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NvmlMemory {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

/// `nvmlProcessInfo_v1_t`, written by the unversioned process query
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NvmlProcessInfoV1 {
    pub pid: c_uint,
    pub used_gpu_memory: u64,
}

pub type NvmlInitFn = unsafe extern "C" fn() -> c_int;
pub type NvmlShutdownFn = unsafe extern "C" fn() -> c_int;
pub type NvmlSystemGetStringFn = unsafe extern "C" fn(out: *mut c_char, length: c_uint) -> c_int;
pub type NvmlSystemGetProcessNameFn =
    unsafe extern "C" fn(pid: c_uint, name: *mut c_char, length: c_uint) -> c_int;
pub type NvmlDeviceGetCountFn = unsafe extern "C" fn(count: *mut c_uint) -> c_int;
pub type NvmlDeviceGetHandleByIndexFn =
    unsafe extern "C" fn(index: c_uint, device: *mut NvmlDeviceRaw) -> c_int;
pub type NvmlDeviceGetNameFn =
    unsafe extern "C" fn(device: NvmlDeviceRaw, name: *mut c_char, length: c_uint) -> c_int;
pub type NvmlDeviceGetTemperatureFn =
    unsafe extern "C" fn(device: NvmlDeviceRaw, sensor: c_uint, temp: *mut c_uint) -> c_int;
pub type NvmlDeviceGetClockFn = unsafe extern "C" fn(
    device: NvmlDeviceRaw,
    clock_type: c_uint,
    clock_id: c_uint,
    mhz: *mut c_uint,
) -> c_int;
pub type NvmlDeviceGetClockInfoFn =
    unsafe extern "C" fn(device: NvmlDeviceRaw, clock_type: c_uint, mhz: *mut c_uint) -> c_int;
pub type NvmlDeviceGetUintFn = unsafe extern "C" fn(device: NvmlDeviceRaw, value: *mut c_uint) -> c_int;
pub type NvmlDeviceGetPcieThroughputFn =
    unsafe extern "C" fn(device: NvmlDeviceRaw, counter: c_uint, value: *mut c_uint) -> c_int;
pub type NvmlDeviceGetUtilizationRatesFn =
    unsafe extern "C" fn(device: NvmlDeviceRaw, utilization: *mut NvmlUtilization) -> c_int;
pub type NvmlDeviceGetMemoryInfoFn =
    unsafe extern "C" fn(device: NvmlDeviceRaw, memory: *mut NvmlMemory) -> c_int;
/// The record layout behind `infos` depends on the bound revision.
pub type NvmlDeviceGetComputeRunningProcessesFn =
    unsafe extern "C" fn(device: NvmlDeviceRaw, count: *mut c_uint, infos: *mut c_void) -> c_int;
