//! A fake NVML assembled from `extern "C"` functions.
//!
//! State lives in thread locals, so every test (one thread each) gets its
//! own simulated driver.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_uint, c_void};

use gpuperf::core::telemetry::RawProcessInfo;
use gpuperf::platform::binder::RawSymbol;

pub const SUCCESS: c_int = 0;
pub const ERROR_NOT_SUPPORTED: c_int = 3;
pub const ERROR_INSUFFICIENT_SIZE: c_int = 7;

thread_local! {
    static DEVICE_COUNT: Cell<u32> = const { Cell::new(0) };
    static PROCESSES: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
    static GROW_AFTER_SIZING: Cell<u32> = const { Cell::new(0) };
    static INITS: Cell<u32> = const { Cell::new(0) };
    static SHUTDOWNS: Cell<u32> = const { Cell::new(0) };
}

pub fn init_count() -> u32 {
    INITS.with(|c| c.get())
}

pub fn shutdown_count() -> u32 {
    SHUTDOWNS.with(|c| c.get())
}

pub fn set_processes(pids: &[u32]) {
    PROCESSES.with(|p| *p.borrow_mut() = pids.to_vec());
}

fn device_index(device: *mut c_void) -> usize {
    (device as usize).saturating_sub(1)
}

unsafe fn write_str(out: *mut c_char, length: c_uint, value: &str) -> c_int {
    let bytes = value.as_bytes();
    if bytes.len() + 1 > length as usize {
        return ERROR_INSUFFICIENT_SIZE;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), out.cast::<u8>(), bytes.len());
        *out.add(bytes.len()) = 0;
    }
    SUCCESS
}

unsafe extern "C" fn init() -> c_int {
    INITS.with(|c| c.set(c.get() + 1));
    SUCCESS
}

unsafe extern "C" fn shutdown() -> c_int {
    SHUTDOWNS.with(|c| c.set(c.get() + 1));
    SUCCESS
}

unsafe extern "C" fn driver_version(out: *mut c_char, length: c_uint) -> c_int {
    unsafe { write_str(out, length, "550.54.15") }
}

unsafe extern "C" fn library_version(out: *mut c_char, length: c_uint) -> c_int {
    unsafe { write_str(out, length, "12.550.54.15") }
}

unsafe extern "C" fn process_name(pid: c_uint, out: *mut c_char, length: c_uint) -> c_int {
    unsafe { write_str(out, length, &format!("/usr/bin/worker-{}", pid)) }
}

unsafe extern "C" fn device_count(count: *mut c_uint) -> c_int {
    unsafe { *count = DEVICE_COUNT.with(|c| c.get()) };
    SUCCESS
}

unsafe extern "C" fn device_handle(index: c_uint, device: *mut *mut c_void) -> c_int {
    unsafe { *device = (index as usize + 1) as *mut c_void };
    SUCCESS
}

unsafe extern "C" fn device_name(device: *mut c_void, out: *mut c_char, length: c_uint) -> c_int {
    unsafe { write_str(out, length, &format!("Fake GPU {}", device_index(device))) }
}

unsafe extern "C" fn temperature(device: *mut c_void, _sensor: c_uint, temp: *mut c_uint) -> c_int {
    unsafe { *temp = 40 + device_index(device) as c_uint };
    SUCCESS
}

unsafe extern "C" fn clock(
    _device: *mut c_void,
    _clock_type: c_uint,
    _clock_id: c_uint,
    mhz: *mut c_uint,
) -> c_int {
    unsafe { *mhz = 1410 };
    SUCCESS
}

unsafe extern "C" fn clock_info(_device: *mut c_void, _clock_type: c_uint, mhz: *mut c_uint) -> c_int {
    unsafe { *mhz = 1200 };
    SUCCESS
}

unsafe extern "C" fn power_usage(_device: *mut c_void, milliwatts: *mut c_uint) -> c_int {
    unsafe { *milliwatts = 65_500 };
    SUCCESS
}

unsafe extern "C" fn num_cores(_device: *mut c_void, _cores: *mut c_uint) -> c_int {
    ERROR_NOT_SUPPORTED
}

unsafe extern "C" fn persistence_mode(_device: *mut c_void, state: *mut c_uint) -> c_int {
    unsafe { *state = 1 };
    SUCCESS
}

unsafe extern "C" fn pcie_throughput(_device: *mut c_void, _counter: c_uint, value: *mut c_uint) -> c_int {
    unsafe { *value = 2048 };
    SUCCESS
}

#[repr(C)]
struct Utilization {
    gpu: c_uint,
    memory: c_uint,
}

unsafe extern "C" fn utilization(_device: *mut c_void, out: *mut Utilization) -> c_int {
    unsafe { *out = Utilization { gpu: 87, memory: 34 } };
    SUCCESS
}

#[repr(C)]
struct Memory {
    total: u64,
    free: u64,
    used: u64,
}

unsafe extern "C" fn memory_info(_device: *mut c_void, out: *mut Memory) -> c_int {
    unsafe {
        *out = Memory {
            total: 16 << 30,
            free: 12 << 30,
            used: 4 << 30,
        }
    };
    SUCCESS
}

#[repr(C)]
#[derive(Clone, Copy)]
struct LegacyRecord {
    pid: c_uint,
    used_gpu_memory: u64,
}

/// Shared two-phase logic; `write` stores one record at a slot index.
unsafe fn running_processes(
    count: *mut c_uint,
    infos: *mut c_void,
    write: unsafe fn(*mut c_void, usize, u32),
) -> c_int {
    let pids = PROCESSES.with(|p| p.borrow().clone());
    let capacity = unsafe { *count } as usize;

    if infos.is_null() || capacity < pids.len() {
        unsafe { *count = pids.len() as c_uint };

        let extra = GROW_AFTER_SIZING.with(|g| g.replace(0));
        PROCESSES.with(|p| {
            let mut p = p.borrow_mut();
            for i in 0..extra {
                p.push(9000 + i);
            }
        });

        return if pids.is_empty() {
            SUCCESS
        } else {
            ERROR_INSUFFICIENT_SIZE
        };
    }

    for (slot, pid) in pids.iter().enumerate() {
        unsafe { write(infos, slot, *pid) };
    }
    unsafe { *count = pids.len() as c_uint };
    SUCCESS
}

unsafe fn write_current(infos: *mut c_void, slot: usize, pid: u32) {
    unsafe {
        *infos.cast::<RawProcessInfo>().add(slot) = RawProcessInfo {
            pid,
            used_gpu_memory: 256 << 20,
            gpu_instance_id: 0,
            compute_instance_id: 0,
        }
    };
}

unsafe fn write_legacy(infos: *mut c_void, slot: usize, pid: u32) {
    unsafe {
        *infos.cast::<LegacyRecord>().add(slot) = LegacyRecord {
            pid,
            used_gpu_memory: 128 << 20,
        }
    };
}

unsafe extern "C" fn processes_current(
    _device: *mut c_void,
    count: *mut c_uint,
    infos: *mut c_void,
) -> c_int {
    unsafe { running_processes(count, infos, write_current) }
}

unsafe extern "C" fn processes_legacy(
    _device: *mut c_void,
    count: *mut c_uint,
    infos: *mut c_void,
) -> c_int {
    unsafe { running_processes(count, infos, write_legacy) }
}

/// Builder for the symbol table of a fake driver
pub struct FakeNvml {
    symbols: HashMap<String, RawSymbol>,
}

impl FakeNvml {
    /// A recent driver exporting every entry point, with `devices` GPUs
    pub fn new(devices: u32) -> Self {
        DEVICE_COUNT.with(|c| c.set(devices));
        PROCESSES.with(|p| p.borrow_mut().clear());
        GROW_AFTER_SIZING.with(|g| g.set(0));

        let entries: [(&str, RawSymbol); 19] = [
            ("nvmlInit_v2", init as RawSymbol),
            ("nvmlShutdown", shutdown as RawSymbol),
            ("nvmlSystemGetDriverVersion", driver_version as RawSymbol),
            ("nvmlSystemGetNVMLVersion", library_version as RawSymbol),
            ("nvmlSystemGetProcessName", process_name as RawSymbol),
            ("nvmlDeviceGetCount_v2", device_count as RawSymbol),
            ("nvmlDeviceGetHandleByIndex_v2", device_handle as RawSymbol),
            ("nvmlDeviceGetName", device_name as RawSymbol),
            ("nvmlDeviceGetTemperature", temperature as RawSymbol),
            ("nvmlDeviceGetClock", clock as RawSymbol),
            ("nvmlDeviceGetClockInfo", clock_info as RawSymbol),
            ("nvmlDeviceGetPowerUsage", power_usage as RawSymbol),
            ("nvmlDeviceGetNumGpuCores", num_cores as RawSymbol),
            ("nvmlDeviceGetPersistenceMode", persistence_mode as RawSymbol),
            ("nvmlDeviceGetPcieThroughput", pcie_throughput as RawSymbol),
            ("nvmlDeviceGetUtilizationRates", utilization as RawSymbol),
            ("nvmlDeviceGetMemoryInfo", memory_info as RawSymbol),
            ("nvmlDeviceGetComputeRunningProcesses_v3", processes_current as RawSymbol),
            ("nvmlDeviceGetComputeRunningProcesses_v2", processes_current as RawSymbol),
        ];

        Self {
            symbols: entries
                .iter()
                .map(|(name, raw)| (name.to_string(), *raw))
                .collect(),
        }
    }

    /// Drop an exported symbol, as an older driver would
    pub fn without(mut self, name: &str) -> Self {
        self.symbols.remove(name);
        self
    }

    /// Export `name` with the implementation currently registered under `from`
    pub fn alias(mut self, name: &str, from: &str) -> Self {
        if let Some(raw) = self.symbols.get(from).copied() {
            self.symbols.insert(name.to_string(), raw);
        }
        self
    }

    /// Only the unversioned process query, writing 16-byte records
    pub fn with_legacy_processes(mut self) -> Self {
        self.symbols.remove("nvmlDeviceGetComputeRunningProcesses_v3");
        self.symbols.remove("nvmlDeviceGetComputeRunningProcesses_v2");
        self.symbols.insert(
            "nvmlDeviceGetComputeRunningProcesses".to_string(),
            processes_legacy as RawSymbol,
        );
        self
    }

    pub fn with_processes(self, pids: &[u32]) -> Self {
        set_processes(pids);
        self
    }

    /// Start `extra` more processes right after the next sizing query
    pub fn grow_during_query(self, extra: u32) -> Self {
        GROW_AFTER_SIZING.with(|g| g.set(extra));
        self
    }

    pub fn build(self) -> HashMap<String, RawSymbol> {
        self.symbols
    }
}
