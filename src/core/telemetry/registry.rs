use std::fmt;
use std::io::Write;

use chrono::{DateTime, Utc};
use humansize::{format_size, BINARY};
use serde::Serialize;

use super::{MemoryInfo, ProcessIdBuffer, Telemetry, TelemetryResult, Utilization};
use crate::error::{GpuPerfError, Result};

/// Latest readout of one device. `None` means the counter is unsupported or
/// the vendor call failed, never a zero reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub index: usize,
    pub name: Option<String>,
    pub temperature_celsius: Option<u32>,
    pub clock_mhz: Option<u32>,
    pub power_milliwatts: Option<u32>,
    pub pcie_tx_kbps: Option<u32>,
    pub utilization: Option<Utilization>,
    pub memory: Option<MemoryInfo>,
    pub cores: Option<u32>,
    pub persistence_mode: Option<bool>,
    pub processes: Option<Vec<u32>>,
    pub process_capacity: usize,
    pub refreshed_at: Option<DateTime<Utc>>,
}

fn or_na<T: fmt::Display>(value: Option<T>, unit: &str) -> String {
    match value {
        Some(v) => format!("{}{}", v, unit),
        None => "n/a".to_string(),
    }
}

impl fmt::Display for DeviceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device {}: {} | {} | {} | {} | PCIe TX {}",
            self.index,
            self.name.as_deref().unwrap_or("unknown"),
            or_na(self.temperature_celsius, " C"),
            or_na(self.clock_mhz, " MHz"),
            or_na(
                self.power_milliwatts.map(|mw| format!("{:.1}", mw as f64 / 1000.0)),
                " W"
            ),
            or_na(self.pcie_tx_kbps, " KB/s"),
        )?;

        match self.utilization {
            Some(u) => write!(f, " | GPU {}% MEM {}%", u.gpu_percent, u.memory_percent)?,
            None => write!(f, " | GPU n/a MEM n/a")?,
        }

        match self.memory {
            Some(m) => write!(
                f,
                " | Memory {} / {}",
                format_size(m.used, BINARY),
                format_size(m.total, BINARY)
            )?,
            None => write!(f, " | Memory n/a")?,
        }

        write!(f, " | Cores {}", or_na(self.cores, ""))?;

        match &self.processes {
            Some(pids) if pids.is_empty() => write!(f, " | Processes: 0"),
            Some(pids) => {
                let list: Vec<String> = pids.iter().map(|p| p.to_string()).collect();
                write!(f, " | Processes: {} [{}]", pids.len(), list.join(", "))
            }
            None => write!(f, " | Processes: n/a"),
        }
    }
}

/// Which devices an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    All,
    Index(usize),
}

impl DeviceSelector {
    /// Negative indices select every device
    pub fn from_signed(index: i64) -> Self {
        if index < 0 {
            DeviceSelector::All
        } else {
            DeviceSelector::Index(index as usize)
        }
    }
}

/// Every device present at construction time, with its latest snapshot.
///
/// Devices are enumerated exactly once; the position in every internal list
/// is the device index.
pub struct DeviceRegistry<'t, T: Telemetry + ?Sized> {
    telemetry: &'t T,
    handles: Vec<Option<T::Device>>,
    names: Vec<Option<String>>,
    process_buffers: Vec<ProcessIdBuffer>,
    snapshots: Vec<DeviceSnapshot>,
}

impl<'t, T: Telemetry + ?Sized> DeviceRegistry<'t, T> {
    pub fn new(telemetry: &'t T) -> Self {
        let count = match telemetry.device_count() {
            Ok(count) => count as usize,
            Err(e) => {
                log::warn!("Could not enumerate devices: {}", e);
                0
            }
        };

        if count == 0 {
            log::info!("No devices found");
        } else {
            log::debug!("Initialized device registry with {} devices", count);
        }

        let handles: Vec<Option<T::Device>> = (0..count)
            .map(|index| match telemetry.device_handle(index as u32) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::warn!("No handle for device {}: {}", index, e);
                    None
                }
            })
            .collect();

        let names: Vec<Option<String>> = handles
            .iter()
            .map(|handle| handle.and_then(|h| telemetry.device_name(h).ok()))
            .collect();

        let snapshots = names
            .iter()
            .enumerate()
            .map(|(index, name)| DeviceSnapshot {
                index,
                name: name.clone(),
                ..Default::default()
            })
            .collect();

        Self {
            telemetry,
            handles,
            names,
            process_buffers: vec![ProcessIdBuffer::new(); count],
            snapshots,
        }
    }

    pub fn device_count(&self) -> usize {
        self.handles.len()
    }

    /// Re-read every device in index order
    pub fn refresh(&mut self) {
        for index in 0..self.handles.len() {
            let snapshot = self.read_device(index);
            self.snapshots[index] = snapshot;
        }
    }

    pub fn refresh_device(&mut self, index: usize) -> Result<&DeviceSnapshot> {
        self.check_index(index)?;
        let snapshot = self.read_device(index);
        self.snapshots[index] = snapshot;
        Ok(&self.snapshots[index])
    }

    pub fn snapshot(&self, index: usize) -> Result<&DeviceSnapshot> {
        self.check_index(index)?;
        Ok(&self.snapshots[index])
    }

    pub fn snapshots(&self) -> &[DeviceSnapshot] {
        &self.snapshots
    }

    /// Snapshots addressed by `selector`, in index order
    pub fn selected(&self, selector: DeviceSelector) -> Result<&[DeviceSnapshot]> {
        match selector {
            DeviceSelector::All => Ok(&self.snapshots),
            DeviceSelector::Index(index) => {
                self.check_index(index)?;
                Ok(std::slice::from_ref(&self.snapshots[index]))
            }
        }
    }

    pub fn handle(&self, index: usize) -> Result<Option<T::Device>> {
        self.check_index(index)?;
        Ok(self.handles[index])
    }

    /// Allocated slots of the device's process buffer
    pub fn process_capacity(&self, index: usize) -> Result<usize> {
        self.check_index(index)?;
        Ok(self.process_buffers[index].capacity())
    }

    /// Write the latest snapshot(s) to `out`, one line per device
    pub fn display<W: Write>(&self, selector: DeviceSelector, out: &mut W) -> Result<()> {
        for snapshot in self.selected(selector)? {
            writeln!(out, "{}", snapshot)?;
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.handles.len() {
            Ok(())
        } else {
            Err(GpuPerfError::out_of_range(index, self.handles.len()))
        }
    }

    fn read_device(&mut self, index: usize) -> DeviceSnapshot {
        let telemetry = self.telemetry;
        let mut snapshot = DeviceSnapshot {
            index,
            name: self.names[index].clone(),
            refreshed_at: Some(Utc::now()),
            ..Default::default()
        };

        let Some(device) = self.handles[index] else {
            return snapshot;
        };

        snapshot.temperature_celsius = reading(index, "temperature", telemetry.temperature(device));
        snapshot.clock_mhz = reading(index, "frequency", telemetry.frequency(device));
        snapshot.power_milliwatts = reading(index, "power usage", telemetry.power_usage(device));
        snapshot.pcie_tx_kbps = reading(index, "PCIe throughput", telemetry.pcie_throughput(device));
        snapshot.utilization = reading(index, "utilization", telemetry.utilization(device));
        snapshot.memory = reading(index, "memory info", telemetry.memory_info(device));
        snapshot.cores = reading(index, "core count", telemetry.num_cores(device));
        snapshot.persistence_mode =
            reading(index, "persistence mode", telemetry.persistence_mode(device));

        let buffer = &mut self.process_buffers[index];
        snapshot.processes = reading(
            index,
            "running processes",
            telemetry.running_processes(device, buffer),
        )
        .map(|_| buffer.pids().collect());
        snapshot.process_capacity = buffer.capacity();

        snapshot
    }
}

fn reading<V>(index: usize, what: &str, result: TelemetryResult<V>) -> Option<V> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::debug!("Device {}: no {} reading: {}", index, what, e);
            None
        }
    }
}
