use gpuperf::core::benchmark::simulated::{SimulatedBackend, SimulatedClock};
use gpuperf::core::benchmark::{
    max_matrix_size, max_vector_size, ComputeBackend, DgemmBenchmark, DgemmParams, DgemmStatus,
    StreamBenchmark, StreamParams, StreamStatus,
};

#[test]
fn test_dgemm_constant_latency() {
    let backend = SimulatedBackend::new();
    let clock = SimulatedClock::with_step(0.5);
    let report = DgemmBenchmark::new(&backend, &clock)
        .run(DgemmParams {
            n: 4,
            alpha: 1.0,
            beta: 0.0,
            repeats: 3,
        })
        .unwrap();

    assert_eq!(report.status, DgemmStatus::Success);
    let g = report.gflops.unwrap();
    assert_eq!(g.avg, g.min);
    assert_eq!(g.min, g.max);
    assert_eq!(g.stddev, 0.0);
    assert!(g.avg > 0.0);
}

#[test]
fn test_dgemm_releases_buffers_on_success() {
    let backend = SimulatedBackend::new();
    let clock = SimulatedClock::with_step(1.0);
    let report = DgemmBenchmark::new(&backend, &clock)
        .run(DgemmParams::new(3))
        .unwrap();
    assert_eq!(report.status, DgemmStatus::Success);
    assert_eq!(backend.live_buffers(), 0);
}

#[test]
fn test_dgemm_out_of_memory_budget() {
    let n = 64usize;
    let required = 3 * n * n * 8;
    let backend = SimulatedBackend::new().with_memory_limit(required - 1);
    let clock = SimulatedClock::with_step(1.0);

    let report = DgemmBenchmark::new(&backend, &clock)
        .run(DgemmParams::new(n))
        .unwrap();

    assert_eq!(report.status, DgemmStatus::OutOfMemory);
    assert_eq!(backend.allocation_count(), 3);
    assert_eq!(backend.live_buffers(), 0);
    assert_eq!(backend.live_blas_sessions(), 0);

    let json = serde_json::to_string(&report).unwrap();
    assert_eq!(json, r#"{"status":"OOM"}"#);
}

#[test]
fn test_dgemm_fits_at_max_size() {
    let budget = 3 * 20 * 20 * 8 + 100;
    let n = max_matrix_size(budget as u64) as usize;
    assert_eq!(n, 20);

    let backend = SimulatedBackend::new().with_memory_limit(budget);
    let clock = SimulatedClock::with_step(1.0);
    let report = DgemmBenchmark::new(&backend, &clock)
        .run(DgemmParams::new(n))
        .unwrap();
    assert_eq!(report.status, DgemmStatus::Success);
}

#[test]
fn test_dgemm_through_trait_object() {
    let backend = SimulatedBackend::new();
    let dynamic: &dyn ComputeBackend = &backend;
    let clock = SimulatedClock::with_step(0.5);

    let report = DgemmBenchmark::new(dynamic, &clock)
        .run(DgemmParams::new(2))
        .unwrap();
    assert_eq!(report.status, DgemmStatus::Success);
}

#[test]
fn test_stream_report_json() {
    let backend = SimulatedBackend::new();
    let clock = SimulatedClock::with_step(0.25);
    let report = StreamBenchmark::new(&backend, &clock)
        .run(StreamParams {
            array_size: 4096,
            n_times: 10,
        })
        .unwrap();

    assert_eq!(report.status, StreamStatus::Success);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "OK");
    for key in ["copy", "scale", "add", "triad"] {
        assert!(json[key].as_f64().unwrap() > 0.0, "{}", key);
    }
}

#[test]
fn test_stream_out_of_device_memory() {
    let n = 1000usize;
    let budget = max_vector_size((3 * n * 8) as u64) as usize;
    assert_eq!(budget, n);

    let backend = SimulatedBackend::new().with_memory_limit(3 * n * 8 - 8);
    let clock = SimulatedClock::with_step(1.0);
    let report = StreamBenchmark::new(&backend, &clock)
        .run(StreamParams {
            array_size: n,
            n_times: 2,
        })
        .unwrap();

    assert_eq!(report.status, StreamStatus::OutOfMemoryDevice);
    assert_eq!(backend.live_buffers(), 0);
    assert_eq!(
        serde_json::to_string(&report).unwrap(),
        r#"{"status":"OOM_DEVICE"}"#
    );
}

#[test]
fn test_stream_download_failure_is_invalid() {
    let backend = SimulatedBackend::new().fail_call("download");
    let clock = SimulatedClock::with_step(1.0);
    let report = StreamBenchmark::new(&backend, &clock)
        .run(StreamParams {
            array_size: 10,
            n_times: 1,
        })
        .unwrap();

    assert_eq!(report.status, StreamStatus::Invalid);
    assert_eq!(backend.live_buffers(), 0);
    assert_eq!(backend.live_blas_sessions(), 0);
}

/// Start/end readings for consecutive timed regions lasting `elapsed` each
fn timestamps(elapsed: &[f64]) -> Vec<f64> {
    let mut t = 0.0;
    let mut readings = Vec::with_capacity(2 * elapsed.len());
    for e in elapsed {
        readings.push(t);
        t += e;
        readings.push(t);
    }
    readings
}

#[test]
fn test_stream_reports_best_iteration_per_kernel() {
    // copy, scale, add, triad for each of three iterations
    let elapsed = [
        1.0, 1.0, 1.0, 1.0, //
        0.25, 0.5, 1.0, 0.5, //
        0.5, 0.25, 0.5, 2.0,
    ];
    let backend = SimulatedBackend::new();
    let clock = SimulatedClock::from_timestamps(timestamps(&elapsed));
    let n = 1024usize;

    let report = StreamBenchmark::new(&backend, &clock)
        .run(StreamParams {
            array_size: n,
            n_times: 3,
        })
        .unwrap();

    assert_eq!(report.status, StreamStatus::Success);
    let bw = report.bandwidth.unwrap();
    let bytes = (n * 8) as f64;
    let gib = (1u64 << 30) as f64;
    assert_eq!(bw.copy, 2.0 * bytes / 0.25 / gib);
    assert_eq!(bw.scale, 2.0 * bytes / 0.25 / gib);
    assert_eq!(bw.add, 3.0 * bytes / 0.5 / gib);
    assert_eq!(bw.triad, 3.0 * bytes / 0.5 / gib);
}

#[test]
fn test_dgemm_spread_follows_varying_latency() {
    let backend = SimulatedBackend::new();
    let clock = SimulatedClock::from_timestamps(timestamps(&[0.5, 1.0, 0.25]));

    let report = DgemmBenchmark::new(&backend, &clock)
        .run(DgemmParams {
            n: 4,
            alpha: 1.0,
            beta: 0.0,
            repeats: 3,
        })
        .unwrap();

    assert_eq!(report.status, DgemmStatus::Success);
    let g = report.gflops.unwrap();

    let flops = 2.0 * 16.0 * 5.0;
    let samples = [flops / 0.5 / 1e9, flops / 1.0 / 1e9, flops / 0.25 / 1e9];
    let mean = samples.iter().sum::<f64>() / 3.0;
    let squares: f64 = samples.iter().map(|x| (x - mean).powi(2)).sum();

    assert_eq!(g.min, samples[1]);
    assert_eq!(g.max, samples[2]);
    assert!((g.avg - mean).abs() < 1e-9 * mean);
    assert!((g.stddev - (squares / 4.0).sqrt()).abs() < 1e-9 * mean);
}
