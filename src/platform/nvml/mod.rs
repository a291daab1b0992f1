//! NVML bound at runtime.
//!
//! Nothing links against `libnvidia-ml`; the library is opened when an
//! [`Nvml`] is created and every entry point is bound through the
//! [`Binder`]. Entry points that are missing from an older driver only
//! disable the reading that needs them.

mod ffi;

use std::ffi::{c_uint, c_void, CStr};
use std::marker::PhantomData;
use std::path::Path;
use std::ptr;

use crate::core::telemetry::{
    MemoryInfo, ProcessIdBuffer, RawProcessInfo, Telemetry, TelemetryError, TelemetryResult,
    Utilization,
};
use crate::error::Result;
use crate::platform::binder::{Binder, Capability, CapabilityTable, SharedLibrary, SymbolSource};

pub use ffi::NvmlReturn;
use ffi::*;

/// Library names tried by [`Nvml::load_default`]
#[cfg(target_os = "windows")]
pub const DEFAULT_LIBRARY_CANDIDATES: &[&str] = &[
    "nvml.dll",
    "C:\\Program Files\\NVIDIA Corporation\\NVSMI\\nvml.dll",
];

/// Library names tried by [`Nvml::load_default`]
#[cfg(not(target_os = "windows"))]
pub const DEFAULT_LIBRARY_CANDIDATES: &[&str] = &["libnvidia-ml.so.1", "libnvidia-ml.so"];

/// Processes may start between the sizing call and the fill call.
const MAX_PROCESS_QUERY_ATTEMPTS: usize = 4;

/// Opaque NVML device handle. Only valid while the [`Nvml`] that produced it
/// is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle(NvmlDeviceRaw);

struct NvmlFunctions {
    init: Capability<NvmlInitFn>,
    shutdown: Capability<NvmlShutdownFn>,
    driver_version: Capability<NvmlSystemGetStringFn>,
    library_version: Capability<NvmlSystemGetStringFn>,
    process_name: Capability<NvmlSystemGetProcessNameFn>,
    device_count: Capability<NvmlDeviceGetCountFn>,
    device_handle: Capability<NvmlDeviceGetHandleByIndexFn>,
    device_name: Capability<NvmlDeviceGetNameFn>,
    temperature: Capability<NvmlDeviceGetTemperatureFn>,
    clock: Capability<NvmlDeviceGetClockFn>,
    clock_info: Capability<NvmlDeviceGetClockInfoFn>,
    num_cores: Capability<NvmlDeviceGetUintFn>,
    power_usage: Capability<NvmlDeviceGetUintFn>,
    persistence_mode: Capability<NvmlDeviceGetUintFn>,
    pcie_throughput: Capability<NvmlDeviceGetPcieThroughputFn>,
    utilization: Capability<NvmlDeviceGetUtilizationRatesFn>,
    memory_info: Capability<NvmlDeviceGetMemoryInfoFn>,
    running_processes: Capability<NvmlDeviceGetComputeRunningProcessesFn>,
}

impl NvmlFunctions {
    fn bind<S: SymbolSource + ?Sized>(source: &S) -> (Self, CapabilityTable) {
        let mut binder = Binder::new(source);

        // SAFETY: every function type in `ffi` is declared after the NVML
        // header prototype of each symbol it is bound to.
        let functions = unsafe {
            Self {
                init: binder.resolve("init", &["nvmlInit_v2", "nvmlInit"]),
                shutdown: binder.resolve("shutdown", &["nvmlShutdown"]),
                driver_version: binder.resolve("driver_version", &["nvmlSystemGetDriverVersion"]),
                library_version: binder.resolve("library_version", &["nvmlSystemGetNVMLVersion"]),
                process_name: binder.resolve("process_name", &["nvmlSystemGetProcessName"]),
                device_count: binder
                    .resolve("device_count", &["nvmlDeviceGetCount_v2", "nvmlDeviceGetCount"]),
                device_handle: binder.resolve(
                    "device_handle",
                    &["nvmlDeviceGetHandleByIndex_v2", "nvmlDeviceGetHandleByIndex"],
                ),
                device_name: binder.resolve("device_name", &["nvmlDeviceGetName"]),
                temperature: binder.resolve("temperature", &["nvmlDeviceGetTemperature"]),
                clock: binder.resolve("clock", &["nvmlDeviceGetClock"]),
                clock_info: binder.resolve("clock_info", &["nvmlDeviceGetClockInfo"]),
                num_cores: binder.resolve("num_cores", &["nvmlDeviceGetNumGpuCores"]),
                power_usage: binder.resolve("power_usage", &["nvmlDeviceGetPowerUsage"]),
                persistence_mode: binder
                    .resolve("persistence_mode", &["nvmlDeviceGetPersistenceMode"]),
                pcie_throughput: binder
                    .resolve("pcie_throughput", &["nvmlDeviceGetPcieThroughput"]),
                utilization: binder.resolve("utilization", &["nvmlDeviceGetUtilizationRates"]),
                memory_info: binder.resolve("memory_info", &["nvmlDeviceGetMemoryInfo"]),
                running_processes: binder.resolve(
                    "running_processes",
                    &[
                        "nvmlDeviceGetComputeRunningProcesses_v3",
                        "nvmlDeviceGetComputeRunningProcesses_v2",
                        "nvmlDeviceGetComputeRunningProcesses",
                    ],
                ),
            }
        };

        (functions, binder.finish())
    }
}

/// Process record layout written by the bound process query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessRecordLayout {
    /// `nvmlProcessInfo_v1_t`, 16 bytes
    Legacy,
    /// `nvmlProcessInfo_v2_t`, 24 bytes
    Current,
}

impl ProcessRecordLayout {
    /// Revision 2 is the unversioned symbol.
    fn for_revision(revision: usize) -> Self {
        if revision >= 2 {
            Self::Legacy
        } else {
            Self::Current
        }
    }
}

/// NVML session over a symbol source
///
/// Creating an `Nvml` initializes the library; dropping it shuts the
/// library down again. Calls are not made reentrant: the session is neither
/// `Send` nor `Sync`.
pub struct Nvml<S: SymbolSource = SharedLibrary> {
    functions: NvmlFunctions,
    capabilities: CapabilityTable,
    initialized: bool,
    source: S,
    _not_sync: PhantomData<*const ()>,
}

impl Nvml<SharedLibrary> {
    /// Open NVML from an explicit path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::with_source(SharedLibrary::open(path)?))
    }

    /// Open NVML from the platform's usual library names
    pub fn load_default() -> Result<Self> {
        Ok(Self::with_source(SharedLibrary::open_first(
            DEFAULT_LIBRARY_CANDIDATES,
        )?))
    }

    pub fn library_path(&self) -> &Path {
        self.source.path()
    }
}

impl<S: SymbolSource> Nvml<S> {
    /// Bind all entry points from `source` and initialize the library
    pub fn with_source(source: S) -> Self {
        let (functions, capabilities) = NvmlFunctions::bind(&source);

        let initialized = match functions.init.get() {
            Some(init) => {
                // SAFETY: nvmlInit takes no arguments.
                let code = unsafe { init() };
                if code == NVML_SUCCESS {
                    log::info!("NVML initialized");
                    true
                } else {
                    log::warn!(
                        "NVML initialization failed: {}",
                        NvmlReturn::from_code(code).description()
                    );
                    false
                }
            }
            None => false,
        };

        Self {
            functions,
            capabilities,
            initialized,
            source,
            _not_sync: PhantomData,
        }
    }

    /// Which operations were bound, and to which symbol
    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn read_uint(
        &self,
        capability: &Capability<NvmlDeviceGetUintFn>,
        device: DeviceHandle,
    ) -> TelemetryResult<u32> {
        let (f, call) = require(capability)?;
        let mut value: c_uint = 0;
        // SAFETY: `value` outlives the call, the handle came from this session.
        check(call, unsafe { f(device.0, &mut value) })?;
        Ok(value)
    }

    fn read_system_string(
        &self,
        capability: &Capability<NvmlSystemGetStringFn>,
        buffer_size: usize,
    ) -> TelemetryResult<String> {
        let (f, call) = require(capability)?;
        let mut buf = vec![0u8; buffer_size];
        // SAFETY: NVML writes at most `buffer_size` bytes including the NUL.
        check(call, unsafe { f(buf.as_mut_ptr().cast(), buffer_size as c_uint) })?;
        Ok(c_string(&buf))
    }
}

impl<S: SymbolSource> Drop for Nvml<S> {
    fn drop(&mut self) {
        if !self.initialized {
            return;
        }

        if let Some(shutdown) = self.functions.shutdown.get() {
            // SAFETY: paired with the successful init in `with_source`.
            let code = unsafe { shutdown() };
            if code != NVML_SUCCESS {
                log::warn!(
                    "NVML shutdown failed: {}",
                    NvmlReturn::from_code(code).description()
                );
            }
        }
    }
}

impl<S: SymbolSource> Telemetry for Nvml<S> {
    type Device = DeviceHandle;

    fn device_count(&self) -> TelemetryResult<u32> {
        let (f, call) = require(&self.functions.device_count)?;
        let mut count: c_uint = 0;
        // SAFETY: out-pointer to a local.
        check(call, unsafe { f(&mut count) })?;
        Ok(count)
    }

    fn device_handle(&self, index: u32) -> TelemetryResult<DeviceHandle> {
        let (f, call) = require(&self.functions.device_handle)?;
        let mut handle: NvmlDeviceRaw = ptr::null_mut();
        // SAFETY: out-pointer to a local.
        check(call, unsafe { f(index, &mut handle) })?;
        Ok(DeviceHandle(handle))
    }

    fn device_name(&self, device: DeviceHandle) -> TelemetryResult<String> {
        let (f, call) = require(&self.functions.device_name)?;
        let mut buf = [0u8; NVML_DEVICE_NAME_BUFFER_SIZE];
        // SAFETY: NVML writes at most the given length including the NUL.
        check(call, unsafe {
            f(device.0, buf.as_mut_ptr().cast(), buf.len() as c_uint)
        })?;
        Ok(c_string(&buf))
    }

    fn temperature(&self, device: DeviceHandle) -> TelemetryResult<u32> {
        let (f, call) = require(&self.functions.temperature)?;
        let mut value: c_uint = 0;
        // SAFETY: out-pointer to a local.
        check(call, unsafe { f(device.0, NVML_TEMPERATURE_GPU, &mut value) })?;
        Ok(value)
    }

    fn frequency(&self, device: DeviceHandle) -> TelemetryResult<u32> {
        let mut value: c_uint = 0;

        if let Some(f) = self.functions.clock.get() {
            // SAFETY: out-pointer to a local.
            let code = unsafe { f(device.0, NVML_CLOCK_GRAPHICS, NVML_CLOCK_ID_CURRENT, &mut value) };
            check("nvmlDeviceGetClock", code)?;
            return Ok(value);
        }

        // Drivers without nvmlDeviceGetClock only report the current clock.
        let (f, call) = require(&self.functions.clock_info)
            .map_err(|_| TelemetryError::Unsupported("frequency"))?;
        // SAFETY: out-pointer to a local.
        check(call, unsafe { f(device.0, NVML_CLOCK_GRAPHICS, &mut value) })?;
        Ok(value)
    }

    fn power_usage(&self, device: DeviceHandle) -> TelemetryResult<u32> {
        self.read_uint(&self.functions.power_usage, device)
    }

    fn pcie_throughput(&self, device: DeviceHandle) -> TelemetryResult<u32> {
        let (f, call) = require(&self.functions.pcie_throughput)?;
        let mut value: c_uint = 0;
        // SAFETY: out-pointer to a local.
        check(call, unsafe { f(device.0, NVML_PCIE_UTIL_TX_BYTES, &mut value) })?;
        Ok(value)
    }

    fn utilization(&self, device: DeviceHandle) -> TelemetryResult<Utilization> {
        let (f, call) = require(&self.functions.utilization)?;
        let mut raw = NvmlUtilization::default();
        // SAFETY: out-pointer to a local with the header's layout.
        check(call, unsafe { f(device.0, &mut raw) })?;
        Ok(Utilization {
            gpu_percent: raw.gpu,
            memory_percent: raw.memory,
        })
    }

    fn memory_info(&self, device: DeviceHandle) -> TelemetryResult<MemoryInfo> {
        let (f, call) = require(&self.functions.memory_info)?;
        let mut raw = NvmlMemory::default();
        // SAFETY: out-pointer to a local with the header's layout.
        check(call, unsafe { f(device.0, &mut raw) })?;
        Ok(MemoryInfo {
            free: raw.free,
            total: raw.total,
            used: raw.used,
        })
    }

    fn num_cores(&self, device: DeviceHandle) -> TelemetryResult<u32> {
        self.read_uint(&self.functions.num_cores, device)
    }

    fn persistence_mode(&self, device: DeviceHandle) -> TelemetryResult<bool> {
        self.read_uint(&self.functions.persistence_mode, device)
            .map(|state| state == NVML_FEATURE_ENABLED)
    }

    fn running_processes(
        &self,
        device: DeviceHandle,
        buffer: &mut ProcessIdBuffer,
    ) -> TelemetryResult<usize> {
        let capability = &self.functions.running_processes;
        let (f, call) = require(capability)?;
        let layout = ProcessRecordLayout::for_revision(capability.revision().unwrap_or(0));

        // Sizing call: no buffer, NVML reports how many records it has.
        let mut count: c_uint = 0;
        // SAFETY: a null buffer with a zero count is the documented sizing query.
        let code = unsafe { f(device.0, &mut count, ptr::null_mut()) };
        match code {
            NVML_SUCCESS => {
                buffer.clear();
                return Ok(0);
            }
            NVML_ERROR_INSUFFICIENT_SIZE => {}
            other => return Err(vendor_error(call, other)),
        }

        for _ in 0..MAX_PROCESS_QUERY_ATTEMPTS {
            buffer.reserve_slots(count as usize);

            let slots = buffer.slots_mut();
            let mut written = slots.len() as c_uint;
            // SAFETY: `slots` holds `written` 24-byte records, which also
            // covers `written` legacy 16-byte records.
            let code = unsafe { f(device.0, &mut written, slots.as_mut_ptr().cast::<c_void>()) };

            match code {
                NVML_SUCCESS => {
                    let written = (written as usize).min(slots.len());
                    if layout == ProcessRecordLayout::Legacy {
                        widen_legacy_records(slots, written);
                    }
                    buffer.set_len(written);
                    return Ok(buffer.len());
                }
                NVML_ERROR_INSUFFICIENT_SIZE => {
                    log::debug!("Process count grew to {} during query, retrying", written);
                    count = written.max(count + 1);
                }
                other => return Err(vendor_error(call, other)),
            }
        }

        Err(vendor_error(call, NVML_ERROR_INSUFFICIENT_SIZE))
    }

    fn process_name(&self, pid: u32) -> TelemetryResult<String> {
        let (f, call) = require(&self.functions.process_name)?;
        let mut buf = [0u8; NVML_PROCESS_NAME_BUFFER_SIZE];
        // SAFETY: NVML writes at most the given length including the NUL.
        check(call, unsafe { f(pid, buf.as_mut_ptr().cast(), buf.len() as c_uint) })?;
        Ok(c_string(&buf))
    }

    fn driver_version(&self) -> TelemetryResult<String> {
        self.read_system_string(
            &self.functions.driver_version,
            NVML_SYSTEM_DRIVER_VERSION_BUFFER_SIZE,
        )
    }

    fn library_version(&self) -> TelemetryResult<String> {
        self.read_system_string(
            &self.functions.library_version,
            NVML_SYSTEM_NVML_VERSION_BUFFER_SIZE,
        )
    }
}

fn require<F: Copy>(capability: &Capability<F>) -> TelemetryResult<(F, &'static str)> {
    match (capability.get(), capability.symbol()) {
        (Some(f), Some(symbol)) => Ok((f, symbol)),
        _ => Err(TelemetryError::Unsupported(capability.operation())),
    }
}

fn check(call: &'static str, code: i32) -> TelemetryResult<()> {
    if code == NVML_SUCCESS {
        Ok(())
    } else {
        Err(vendor_error(call, code))
    }
}

fn vendor_error(call: &'static str, code: i32) -> TelemetryError {
    TelemetryError::Vendor {
        call,
        code,
        reason: NvmlReturn::from_code(code).description(),
    }
}

/// Rewrite `count` legacy records packed at the start of `slots` into the
/// current layout.
fn widen_legacy_records(slots: &mut [RawProcessInfo], count: usize) {
    let legacy: Vec<NvmlProcessInfoV1> = {
        // SAFETY: the legacy records were written into this allocation, which
        // is at least `count * 24` bytes long.
        let raw = unsafe {
            std::slice::from_raw_parts(slots.as_ptr().cast::<NvmlProcessInfoV1>(), count)
        };
        raw.to_vec()
    };

    for (slot, record) in slots.iter_mut().zip(legacy) {
        *slot = RawProcessInfo {
            pid: record.pid,
            used_gpu_memory: record.used_gpu_memory,
            ..Default::default()
        };
    }
}

fn c_string(buf: &[u8]) -> String {
    match CStr::from_bytes_until_nul(buf) {
        Ok(s) => s.to_string_lossy().into_owned(),
        Err(_) => String::from_utf8_lossy(buf).into_owned(),
    }
}
