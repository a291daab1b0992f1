use anyhow::Result;

use crate::core::telemetry::Telemetry;
use crate::core::Config;

pub fn execute() -> Result<()> {
    println!("gpuperf version {}", env!("CARGO_PKG_VERSION"));

    // Driver details are best effort: no GPU is not an error here.
    let config = Config::load()?;
    match super::devices::open_nvml(&config) {
        Ok(nvml) => {
            if let Ok(driver) = nvml.driver_version() {
                println!("NVIDIA driver {}", driver);
            }
            if let Ok(library) = nvml.library_version() {
                println!("NVML {}", library);
            }
        }
        Err(e) => log::debug!("NVML unavailable: {:#}", e),
    }

    Ok(())
}
