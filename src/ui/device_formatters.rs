use chrono::{DateTime, Local, Utc};
use colored::*;
use humansize::{format_size, BINARY};

use crate::core::benchmark::{
    DgemmParams, DgemmReport, DgemmStatus, StreamParams, StreamReport, StreamStatus,
};
use crate::core::telemetry::DeviceSnapshot;
use crate::platform::binder::CapabilityTable;

fn print_section_header(title: &str) {
    println!("\n{}", title.bold().green());
    println!("{}", "-".repeat(title.len()));
}

fn na() -> ColoredString {
    "n/a".dimmed()
}

/// Local wall-clock time of a refresh, `HH:MM:SS`
pub fn format_refresh_time(time: DateTime<Utc>) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%H:%M:%S").to_string()
}

pub fn format_versions(driver: Option<&str>, library: Option<&str>) {
    println!("\n{}", "GPU DEVICES".bold().bright_cyan());
    println!("{}", "=".repeat(80));
    println!(
        "  Driver: {}   NVML: {}",
        driver.map(|d| d.normal()).unwrap_or_else(na),
        library.map(|l| l.normal()).unwrap_or_else(na)
    );
}

/// Detailed, multi-line view of each snapshot.
///
/// `process_name` resolves a PID to its executable name; unresolvable PIDs
/// are printed bare.
pub fn format_device_snapshots<F>(snapshots: &[DeviceSnapshot], process_name: F)
where
    F: Fn(u32) -> Option<String>,
{
    if snapshots.is_empty() {
        println!("  {}", "No devices found".yellow());
        return;
    }

    for snapshot in snapshots {
        let title = format!(
            "Device {}: {}",
            snapshot.index,
            snapshot.name.as_deref().unwrap_or("unknown")
        );
        print_section_header(&title);

        match snapshot.temperature_celsius {
            Some(t) => println!("  Temperature: {}", temperature_colored(t)),
            None => println!("  Temperature: {}", na()),
        }
        match snapshot.clock_mhz {
            Some(mhz) => println!("  Graphics Clock: {} MHz", mhz),
            None => println!("  Graphics Clock: {}", na()),
        }
        match snapshot.power_milliwatts {
            Some(mw) => println!("  Power: {:.1} W", mw as f64 / 1000.0),
            None => println!("  Power: {}", na()),
        }
        match snapshot.pcie_tx_kbps {
            Some(kbps) => println!(
                "  PCIe TX: {}/s",
                format_size(u64::from(kbps) * 1024, BINARY)
            ),
            None => println!("  PCIe TX: {}", na()),
        }
        match snapshot.utilization {
            Some(u) => println!(
                "  Utilization: GPU {} | Memory {}",
                percent_colored(u.gpu_percent),
                percent_colored(u.memory_percent)
            ),
            None => println!("  Utilization: {}", na()),
        }
        match snapshot.memory {
            Some(m) => println!(
                "  Memory: {} used / {} total ({} free)",
                format_size(m.used, BINARY),
                format_size(m.total, BINARY),
                format_size(m.free, BINARY)
            ),
            None => println!("  Memory: {}", na()),
        }
        match snapshot.cores {
            Some(cores) => println!("  Cores: {}", cores),
            None => println!("  Cores: {}", na()),
        }
        match snapshot.persistence_mode {
            Some(true) => println!("  Persistence Mode: {}", "enabled".green()),
            Some(false) => println!("  Persistence Mode: disabled"),
            None => println!("  Persistence Mode: {}", na()),
        }

        match &snapshot.processes {
            Some(pids) if pids.is_empty() => println!("  Processes: none"),
            Some(pids) => {
                println!("  Processes: {}", pids.len());
                for pid in pids {
                    match process_name(*pid) {
                        Some(name) => println!("    {} {}", pid.to_string().cyan(), name),
                        None => println!("    {}", pid.to_string().cyan()),
                    }
                }
            }
            None => println!("  Processes: {}", na()),
        }

        if let Some(time) = snapshot.refreshed_at {
            println!("  {}", format!("refreshed {}", format_refresh_time(time)).dimmed());
        }
    }
}

pub fn format_capabilities(title: &str, table: &CapabilityTable) {
    print_section_header(title);
    for (operation, symbol) in table.iter() {
        match symbol {
            Some(symbol) => println!("  {:<20} {}", operation, symbol.green()),
            None => println!("  {:<20} {}", operation, "missing".red()),
        }
    }
}

pub fn format_dgemm_report(params: &DgemmParams, report: &DgemmReport) {
    print_section_header(&format!("DGEMM N = {}", params.n));
    let status = match report.status {
        DgemmStatus::Success => report.status.as_str().green(),
        _ => report.status.as_str().red(),
    };
    println!("  Status: {}", status);

    if let Some(g) = report.gflops {
        println!("  Repeats: {}", params.repeats);
        println!("  Average: {:.3} GFLOP/s", g.avg);
        println!("  Min:     {:.3} GFLOP/s", g.min);
        println!("  Max:     {:.3} GFLOP/s", g.max);
        println!("  Stddev:  {:.3} GFLOP/s", g.stddev);
    }
}

pub fn format_stream_report(params: &StreamParams, report: &StreamReport) {
    print_section_header(&format!("STREAM N = {}", params.array_size));
    let status = match report.status {
        StreamStatus::Success => report.status.as_str().green(),
        _ => report.status.as_str().red(),
    };
    println!("  Status: {}", status);

    if let Some(bw) = report.bandwidth {
        println!("  Iterations: {}", params.n_times);
        println!("  Copy:  {:>10.3} GiB/s", bw.copy);
        println!("  Scale: {:>10.3} GiB/s", bw.scale);
        println!("  Add:   {:>10.3} GiB/s", bw.add);
        println!("  Triad: {:>10.3} GiB/s", bw.triad);
    }
}

fn temperature_colored(celsius: u32) -> ColoredString {
    let text = format!("{} °C", celsius);
    match celsius {
        0..=69 => text.green(),
        70..=84 => text.yellow(),
        _ => text.red(),
    }
}

fn percent_colored(percent: u32) -> ColoredString {
    let text = format!("{}%", percent);
    match percent {
        0..=49 => text.normal(),
        50..=89 => text.yellow(),
        _ => text.red(),
    }
}
