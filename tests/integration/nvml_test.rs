use gpuperf::core::telemetry::{ProcessIdBuffer, Telemetry, TelemetryError};
use gpuperf::platform::nvml::Nvml;

use super::support::{self, FakeNvml};

#[test]
fn test_init_and_shutdown_are_paired() {
    let before = support::shutdown_count();
    let inits = support::init_count();
    {
        let nvml = Nvml::with_source(FakeNvml::new(1).build());
        assert!(nvml.is_initialized());
        assert_eq!(support::init_count(), inits + 1);
        assert_eq!(support::shutdown_count(), before);
    }
    assert_eq!(support::shutdown_count(), before + 1);
}

#[test]
fn test_basic_readings() {
    let nvml = Nvml::with_source(FakeNvml::new(2).build());

    assert_eq!(nvml.device_count(), Ok(2));
    let device = nvml.device_handle(1).unwrap();

    assert_eq!(nvml.device_name(device).unwrap(), "Fake GPU 1");
    assert_eq!(nvml.temperature(device), Ok(41));
    assert_eq!(nvml.frequency(device), Ok(1410));
    assert_eq!(nvml.power_usage(device), Ok(65_500));
    assert_eq!(nvml.pcie_throughput(device), Ok(2048));
    assert_eq!(nvml.persistence_mode(device), Ok(true));

    let utilization = nvml.utilization(device).unwrap();
    assert_eq!(utilization.gpu_percent, 87);
    assert_eq!(utilization.memory_percent, 34);

    let memory = nvml.memory_info(device).unwrap();
    assert_eq!(memory.total, 16 << 30);
    assert_eq!(memory.used, 4 << 30);

    assert_eq!(nvml.driver_version().unwrap(), "550.54.15");
    assert_eq!(nvml.library_version().unwrap(), "12.550.54.15");
    assert_eq!(nvml.process_name(42).unwrap(), "/usr/bin/worker-42");
}

#[test]
fn test_vendor_error_carries_reason() {
    let nvml = Nvml::with_source(FakeNvml::new(1).build());
    let device = nvml.device_handle(0).unwrap();

    match nvml.num_cores(device) {
        Err(TelemetryError::Vendor { call, code, .. }) => {
            assert_eq!(call, "nvmlDeviceGetNumGpuCores");
            assert_eq!(code, support::ERROR_NOT_SUPPORTED);
        }
        other => panic!("expected vendor error, got {:?}", other),
    }
}

#[test]
fn test_older_driver_falls_back_to_unversioned_symbols() {
    let symbols = FakeNvml::new(3)
        .alias("nvmlInit", "nvmlInit_v2")
        .alias("nvmlDeviceGetCount", "nvmlDeviceGetCount_v2")
        .without("nvmlInit_v2")
        .without("nvmlDeviceGetCount_v2")
        .build();
    let nvml = Nvml::with_source(symbols);

    assert!(nvml.is_initialized());
    assert_eq!(nvml.device_count(), Ok(3));
    assert_eq!(nvml.capabilities().symbol("init"), Some("nvmlInit"));
    assert_eq!(
        nvml.capabilities().symbol("device_count"),
        Some("nvmlDeviceGetCount")
    );
}

#[test]
fn test_missing_symbol_is_unsupported() {
    let nvml = Nvml::with_source(FakeNvml::new(1).without("nvmlDeviceGetTemperature").build());
    let device = nvml.device_handle(0).unwrap();

    assert_eq!(
        nvml.temperature(device),
        Err(TelemetryError::Unsupported("temperature"))
    );
    assert!(!nvml.capabilities().is_present("temperature"));
    assert!(nvml.capabilities().missing().any(|op| op == "temperature"));

    // Other readings are unaffected.
    assert_eq!(nvml.power_usage(device), Ok(65_500));
}

#[test]
fn test_frequency_falls_back_to_clock_info() {
    let nvml = Nvml::with_source(FakeNvml::new(1).without("nvmlDeviceGetClock").build());
    let device = nvml.device_handle(0).unwrap();
    assert_eq!(nvml.frequency(device), Ok(1200));

    let nvml = Nvml::with_source(
        FakeNvml::new(1)
            .without("nvmlDeviceGetClock")
            .without("nvmlDeviceGetClockInfo")
            .build(),
    );
    let device = nvml.device_handle(0).unwrap();
    assert_eq!(
        nvml.frequency(device),
        Err(TelemetryError::Unsupported("frequency"))
    );
}

#[test]
fn test_no_init_symbol_means_no_shutdown() {
    let before = support::shutdown_count();
    {
        let nvml = Nvml::with_source(FakeNvml::new(1).without("nvmlInit_v2").build());
        assert!(!nvml.is_initialized());
    }
    assert_eq!(support::shutdown_count(), before);
}

#[test]
fn test_processes_two_phase() {
    let nvml = Nvml::with_source(FakeNvml::new(1).with_processes(&[11, 22, 33]).build());
    let device = nvml.device_handle(0).unwrap();
    let mut buffer = ProcessIdBuffer::new();

    assert_eq!(nvml.running_processes(device, &mut buffer), Ok(3));
    assert_eq!(buffer.pids().collect::<Vec<_>>(), vec![11, 22, 33]);
    assert_eq!(buffer.entries()[0].used_gpu_memory, 256 << 20);
}

#[test]
fn test_processes_empty() {
    let nvml = Nvml::with_source(FakeNvml::new(1).build());
    let device = nvml.device_handle(0).unwrap();
    let mut buffer = ProcessIdBuffer::new();
    buffer.fill_pids(&[1, 2]);

    assert_eq!(nvml.running_processes(device, &mut buffer), Ok(0));
    assert!(buffer.is_empty());
    assert_eq!(buffer.capacity(), 2);
}

#[test]
fn test_processes_started_between_phases() {
    let nvml = Nvml::with_source(
        FakeNvml::new(1)
            .with_processes(&[5, 6])
            .grow_during_query(3)
            .build(),
    );
    let device = nvml.device_handle(0).unwrap();
    let mut buffer = ProcessIdBuffer::new();

    assert_eq!(nvml.running_processes(device, &mut buffer), Ok(5));
    assert_eq!(
        buffer.pids().collect::<Vec<_>>(),
        vec![5, 6, 9000, 9001, 9002]
    );
    assert!(buffer.capacity() >= 5);
}

#[test]
fn test_processes_capacity_is_kept() {
    let nvml = Nvml::with_source(FakeNvml::new(1).with_processes(&[1, 2, 3, 4, 5, 6]).build());
    let device = nvml.device_handle(0).unwrap();
    let mut buffer = ProcessIdBuffer::new();

    nvml.running_processes(device, &mut buffer).unwrap();
    let high_water = buffer.capacity();

    support::set_processes(&[7]);
    assert_eq!(nvml.running_processes(device, &mut buffer), Ok(1));
    assert_eq!(buffer.pids().collect::<Vec<_>>(), vec![7]);
    assert_eq!(buffer.capacity(), high_water);
}

#[test]
fn test_legacy_process_records() {
    let nvml = Nvml::with_source(
        FakeNvml::new(1)
            .with_legacy_processes()
            .with_processes(&[100, 200, 300])
            .build(),
    );
    assert_eq!(
        nvml.capabilities().symbol("running_processes"),
        Some("nvmlDeviceGetComputeRunningProcesses")
    );

    let device = nvml.device_handle(0).unwrap();
    let mut buffer = ProcessIdBuffer::new();

    assert_eq!(nvml.running_processes(device, &mut buffer), Ok(3));
    assert_eq!(buffer.pids().collect::<Vec<_>>(), vec![100, 200, 300]);
    assert!(buffer
        .entries()
        .iter()
        .all(|p| p.used_gpu_memory == 128 << 20));
}

#[test]
fn test_missing_library_is_reported() {
    let err = Nvml::load("/nonexistent/libnvidia-ml.so.1").err();
    assert!(err.is_some());
}
