//! Benchmark command handlers.

use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::Serialize;

use crate::commands::devices::open_nvml;
use crate::core::benchmark::simulated::SimulatedBackend;
use crate::core::benchmark::{
    max_matrix_size, max_vector_size, ComputeBackend, DgemmBenchmark, DgemmParams,
    StreamBenchmark, StreamParams,
};
use crate::core::telemetry::Telemetry;
use crate::core::Config;
use crate::platform::clock::MonotonicClock;
use crate::platform::cuda::CudaRuntime;
use crate::ui::device_formatters;

fn device_index(matches: &ArgMatches) -> u32 {
    matches.get_one::<u32>("device").copied().unwrap_or(0)
}

fn size(matches: &ArgMatches) -> Result<usize> {
    let size = matches.get_one::<u64>("size").copied().unwrap_or(0);
    usize::try_from(size).with_context(|| format!("Size {} is too large for this platform", size))
}

fn print_json<T: Serialize>(record: &T) -> Result<()> {
    println!("{}", serde_json::to_string(record)?);
    Ok(())
}

/// Run `f` against either the CUDA runtime or, for dry runs, host memory
fn with_backend<R>(
    matches: &ArgMatches,
    config: &Config,
    f: impl FnOnce(&dyn ComputeBackend) -> Result<R>,
) -> Result<R> {
    if matches.get_flag("dry-run") {
        log::info!("Dry run: kernels execute on the host");
        let backend = SimulatedBackend::new();
        return f(&backend as &dyn ComputeBackend);
    }

    let runtime = CudaRuntime::load(
        config.cudart_library.as_deref(),
        config.cublas_library.as_deref(),
    )
    .context("Failed to load the CUDA runtime")?;

    let device = device_index(matches);
    runtime
        .select_device(device)
        .with_context(|| format!("Failed to select device {}", device))?;

    f(&runtime as &dyn ComputeBackend)
}

/// Execute the dgemm command
pub fn execute_dgemm(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let params = DgemmParams {
        n: size(matches)?,
        alpha: matches.get_one::<f64>("alpha").copied().unwrap_or(1.0),
        beta: matches.get_one::<f64>("beta").copied().unwrap_or(0.0),
        repeats: matches
            .get_one::<u32>("repeats")
            .copied()
            .unwrap_or(config.default_repeats),
    };

    let clock = MonotonicClock::new();
    let report = with_backend(matches, &config, |backend| {
        Ok(DgemmBenchmark::new(backend, &clock).run(params)?)
    })?;

    if matches.get_flag("json") {
        print_json(&report)
    } else {
        device_formatters::format_dgemm_report(&params, &report);
        println!();
        Ok(())
    }
}

/// Execute the stream command
pub fn execute_stream(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let params = StreamParams {
        array_size: size(matches)?,
        n_times: matches
            .get_one::<u32>("ntimes")
            .copied()
            .unwrap_or(config.default_stream_ntimes),
    };

    let clock = MonotonicClock::new();
    let report = with_backend(matches, &config, |backend| {
        Ok(StreamBenchmark::new(backend, &clock).run(params)?)
    })?;

    if matches.get_flag("json") {
        print_json(&report)
    } else {
        device_formatters::format_stream_report(&params, &report);
        println!();
        Ok(())
    }
}

#[derive(Serialize)]
struct MaxSize {
    memory_bytes: u64,
    max_size: u64,
}

/// Memory budget from `--memory`, or the device's total memory
fn memory_budget(matches: &ArgMatches) -> Result<u64> {
    if let Some(bytes) = matches.get_one::<u64>("memory") {
        return Ok(*bytes);
    }

    let config = Config::load()?;
    let nvml = open_nvml(&config)?;
    let index = device_index(matches);

    let handle = nvml
        .device_handle(index)
        .with_context(|| format!("No handle for device {}", index))?;
    let memory = nvml
        .memory_info(handle)
        .with_context(|| format!("Could not read memory of device {}", index))?;
    Ok(memory.total)
}

/// Execute the dgemm-max-size command
pub fn execute_dgemm_max_size(matches: &ArgMatches) -> Result<()> {
    let memory_bytes = memory_budget(matches)?;
    print_json(&MaxSize {
        memory_bytes,
        max_size: max_matrix_size(memory_bytes),
    })
}

/// Execute the stream-max-size command
pub fn execute_stream_max_size(matches: &ArgMatches) -> Result<()> {
    let memory_bytes = memory_budget(matches)?;
    print_json(&MaxSize {
        memory_bytes,
        max_size: max_vector_size(memory_bytes),
    })
}
