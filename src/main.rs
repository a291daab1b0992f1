use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};

use gpuperf::commands;

fn index_arg() -> Arg {
    Arg::new("index")
        .short('i')
        .long("index")
        .value_name("N")
        .help("Device index (negative for all devices)")
        .allow_negative_numbers(true)
        .value_parser(value_parser!(i64))
}

fn device_arg() -> Arg {
    Arg::new("device")
        .short('d')
        .long("device")
        .value_name("N")
        .help("Device to run on")
        .default_value("0")
        .value_parser(value_parser!(u32))
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .help("Print the result as JSON")
        .action(ArgAction::SetTrue)
}

fn dry_run_arg() -> Arg {
    Arg::new("dry-run")
        .long("dry-run")
        .help("Execute the kernels on the host instead of the GPU")
        .action(ArgAction::SetTrue)
}

fn memory_arg() -> Arg {
    Arg::new("memory")
        .short('m')
        .long("memory")
        .value_name("BYTES")
        .help("Memory budget in bytes (defaults to the device's total memory)")
        .value_parser(value_parser!(u64))
}

fn size_arg(help: &'static str) -> Arg {
    Arg::new("size")
        .short('n')
        .long("size")
        .value_name("N")
        .help(help)
        .required(true)
        .value_parser(value_parser!(u64).range(1..))
}

fn build_cli() -> Command {
    Command::new("gpuperf")
        .version(env!("CARGO_PKG_VERSION"))
        .about("GPU telemetry and DGEMM/STREAM micro-benchmarks")
        .subcommand(
            Command::new("devices")
                .about("Show a telemetry snapshot of the GPUs")
                .arg(index_arg())
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("watch")
                .about("Refresh and print device telemetry periodically")
                .arg(index_arg())
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .value_name("MS")
                        .help("Refresh interval in milliseconds (default from config)")
                        .value_parser(value_parser!(u64).range(1..)),
                )
                .arg(
                    Arg::new("count")
                        .short('c')
                        .long("count")
                        .value_name("K")
                        .help("Stop after K refreshes")
                        .value_parser(value_parser!(u64).range(1..)),
                ),
        )
        .subcommand(
            Command::new("capabilities")
                .about("List the NVML operations available with the installed driver"),
        )
        .subcommand(
            Command::new("dgemm")
                .about("Measure double-precision matrix multiply throughput")
                .arg(size_arg("Matrix dimension N"))
                .arg(
                    Arg::new("alpha")
                        .long("alpha")
                        .value_name("A")
                        .default_value("1.0")
                        .allow_negative_numbers(true)
                        .value_parser(value_parser!(f64)),
                )
                .arg(
                    Arg::new("beta")
                        .long("beta")
                        .value_name("B")
                        .default_value("0.0")
                        .allow_negative_numbers(true)
                        .value_parser(value_parser!(f64)),
                )
                .arg(
                    Arg::new("repeats")
                        .short('r')
                        .long("repeats")
                        .value_name("R")
                        .help("Number of timed multiplications (default from config)")
                        .value_parser(value_parser!(u32).range(1..)),
                )
                .arg(device_arg())
                .arg(json_arg())
                .arg(dry_run_arg()),
        )
        .subcommand(
            Command::new("dgemm-max-size")
                .about("Largest DGEMM matrix dimension that fits in memory")
                .arg(memory_arg())
                .arg(device_arg()),
        )
        .subcommand(
            Command::new("stream")
                .about("Measure device memory bandwidth (copy, scale, add, triad)")
                .arg(size_arg("Array length"))
                .arg(
                    Arg::new("ntimes")
                        .short('k')
                        .long("ntimes")
                        .value_name("K")
                        .help("Number of iterations (default from config)")
                        .value_parser(value_parser!(u32).range(1..)),
                )
                .arg(device_arg())
                .arg(json_arg())
                .arg(dry_run_arg()),
        )
        .subcommand(
            Command::new("stream-max-size")
                .about("Largest STREAM array length that fits in memory")
                .arg(memory_arg())
                .arg(device_arg()),
        )
        .subcommand(
            Command::new("config")
                .about("Manage configuration (use 'gpuperf config --help' for subcommands)")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(Command::new("show").about("Show the effective configuration"))
                .subcommand(
                    Command::new("set")
                        .about("Set a configuration value")
                        .arg(Arg::new("key").help("Configuration key").required(true).index(1))
                        .arg(
                            Arg::new("value")
                                .help("New value (empty clears a library path)")
                                .required(true)
                                .index(2),
                        ),
                )
                .subcommand(Command::new("reset").about("Restore the default configuration")),
        )
        .subcommand(Command::new("version").about("Shows version information"))
}

fn main() -> Result<()> {
    gpuperf::init_logging();

    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("devices", sub_matches)) => commands::devices::execute(sub_matches)?,
        Some(("watch", sub_matches)) => commands::devices::execute_watch(sub_matches)?,
        Some(("capabilities", sub_matches)) => {
            commands::devices::execute_capabilities(sub_matches)?
        }
        Some(("dgemm", sub_matches)) => commands::bench::execute_dgemm(sub_matches)?,
        Some(("dgemm-max-size", sub_matches)) => {
            commands::bench::execute_dgemm_max_size(sub_matches)?
        }
        Some(("stream", sub_matches)) => commands::bench::execute_stream(sub_matches)?,
        Some(("stream-max-size", sub_matches)) => {
            commands::bench::execute_stream_max_size(sub_matches)?
        }
        Some(("config", sub_matches)) => commands::config::execute(sub_matches)?,
        Some(("version", _)) => commands::version()?,
        _ => {
            println!("Welcome to gpuperf!");
            println!("Use 'gpuperf --help' for more information.");
        }
    }

    Ok(())
}
