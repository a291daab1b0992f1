// Core logic module

pub mod benchmark;
pub mod config;
pub mod telemetry;

// Re-export commonly used items
pub use benchmark::{ComputeBackend, DgemmBenchmark, StreamBenchmark};
pub use config::Config;
pub use telemetry::{DeviceRegistry, Telemetry};
