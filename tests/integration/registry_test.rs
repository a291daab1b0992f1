use gpuperf::core::telemetry::{DeviceRegistry, DeviceSelector, Telemetry};
use gpuperf::platform::nvml::Nvml;
use gpuperf::GpuPerfError;

use super::support::FakeNvml;

fn render<T: Telemetry>(registry: &DeviceRegistry<'_, T>, selector: DeviceSelector) -> String {
    let mut out: Vec<u8> = Vec::new();
    registry.display(selector, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_refresh_reads_every_device() {
    let nvml = Nvml::with_source(FakeNvml::new(2).with_processes(&[4242]).build());
    let mut registry = DeviceRegistry::new(&nvml);
    assert_eq!(registry.device_count(), 2);

    registry.refresh();

    for (index, snapshot) in registry.snapshots().iter().enumerate() {
        assert_eq!(snapshot.index, index);
        assert_eq!(snapshot.name.as_deref(), Some(format!("Fake GPU {}", index).as_str()));
        assert_eq!(snapshot.temperature_celsius, Some(40 + index as u32));
        assert_eq!(snapshot.cores, None);
        assert_eq!(snapshot.processes.as_deref(), Some(&[4242u32][..]));
        assert!(snapshot.refreshed_at.is_some());
    }
}

#[test]
fn test_display_one_and_all() {
    let nvml = Nvml::with_source(FakeNvml::new(3).build());
    let mut registry = DeviceRegistry::new(&nvml);
    registry.refresh();

    let one = render(&registry, DeviceSelector::Index(1));
    assert_eq!(one.lines().count(), 1);
    assert!(one.starts_with("Device 1: Fake GPU 1"));
    assert!(one.contains("41 C"));
    assert!(one.contains("Cores n/a"));

    let all = render(&registry, DeviceSelector::from_signed(-1));
    let lines: Vec<&str> = all.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("Device 0"));
    assert!(lines[2].starts_with("Device 2"));
}

#[test]
fn test_zero_devices() {
    let nvml = Nvml::with_source(FakeNvml::new(0).build());
    let mut registry = DeviceRegistry::new(&nvml);

    registry.refresh();
    assert_eq!(registry.device_count(), 0);
    assert!(registry.snapshots().is_empty());
    assert_eq!(render(&registry, DeviceSelector::All), "");
}

#[test]
fn test_out_of_range_index() {
    let nvml = Nvml::with_source(FakeNvml::new(2).build());
    let mut registry = DeviceRegistry::new(&nvml);

    let err = registry.refresh_device(2).err();
    assert!(matches!(
        err,
        Some(GpuPerfError::DeviceIndexOutOfRange { index: 2, count: 2 })
    ));

    let mut out: Vec<u8> = Vec::new();
    assert!(registry.display(DeviceSelector::Index(5), &mut out).is_err());
    assert!(out.is_empty());
}

#[test]
fn test_unenumerable_devices_count_as_zero() {
    let nvml = Nvml::with_source(FakeNvml::new(4).without("nvmlDeviceGetCount_v2").build());
    let registry = DeviceRegistry::new(&nvml);
    assert_eq!(registry.device_count(), 0);
}

#[test]
fn test_process_capacity_grows_monotonically() {
    let nvml = Nvml::with_source(FakeNvml::new(1).build());
    let mut registry = DeviceRegistry::new(&nvml);
    let mut last = 0;

    for pids in [&[1u32, 2][..], &[1, 2, 3, 4, 5], &[9], &[], &[1, 2, 3, 4, 5, 6, 7, 8, 9]] {
        super::support::set_processes(pids);
        let snapshot = registry.refresh_device(0).unwrap();
        assert_eq!(snapshot.processes.as_deref(), Some(pids));

        let capacity = registry.process_capacity(0).unwrap();
        assert!(capacity >= last);
        assert!(capacity >= pids.len());
        last = capacity;
    }
}
