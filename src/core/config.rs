use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::GpuPerfError;

pub const ENV_NVML_LIBRARY: &str = "GPUPERF_NVML_LIBRARY";
pub const ENV_CUDART_LIBRARY: &str = "GPUPERF_CUDART_LIBRARY";
pub const ENV_CUBLAS_LIBRARY: &str = "GPUPERF_CUBLAS_LIBRARY";

/// Keys accepted by [`Config::set`]
pub const KEYS: &[&str] = &[
    "nvml_library",
    "cudart_library",
    "cublas_library",
    "default_repeats",
    "default_stream_ntimes",
    "watch_interval_ms",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Explicit NVML library path (otherwise the platform defaults are tried)
    #[serde(default)]
    pub nvml_library: Option<String>,
    #[serde(default)]
    pub cudart_library: Option<String>,
    #[serde(default)]
    pub cublas_library: Option<String>,
    #[serde(default = "default_repeats")]
    pub default_repeats: u32,
    #[serde(default = "default_stream_ntimes")]
    pub default_stream_ntimes: u32,
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
}

fn default_repeats() -> u32 {
    1
}

fn default_stream_ntimes() -> u32 {
    10
}

fn default_watch_interval_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nvml_library: None,
            cudart_library: None,
            cublas_library: None,
            default_repeats: default_repeats(),
            default_stream_ntimes: default_stream_ntimes(),
            watch_interval_ms: default_watch_interval_ms(),
        }
    }
}

impl Config {
    /// Load from the default location and apply environment overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from `path` without environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        if data.trim().is_empty() {
            return Ok(Config::default());
        }

        Ok(serde_json::from_str(&data).unwrap_or_else(|e| {
            log::warn!("Ignoring corrupted config file {:?}: {}", path, e);
            Config::default()
        }))
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let data = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, data)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().with_context(|| "Could not determine config directory")?;

        Ok(config_dir.join("gpuperf").join("config.json"))
    }

    /// Library paths from the environment win over the file
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let apply = |target: &mut Option<String>, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                log::debug!("{} overrides configured library path", key);
                *target = Some(value);
            }
        };

        apply(&mut self.nvml_library, ENV_NVML_LIBRARY);
        apply(&mut self.cudart_library, ENV_CUDART_LIBRARY);
        apply(&mut self.cublas_library, ENV_CUBLAS_LIBRARY);
    }

    /// Set one key from its textual form. An empty value clears a library path.
    pub fn set(&mut self, key: &str, value: &str) -> crate::error::Result<()> {
        let library = || (!value.is_empty()).then(|| value.to_string());

        match key {
            "nvml_library" => self.nvml_library = library(),
            "cudart_library" => self.cudart_library = library(),
            "cublas_library" => self.cublas_library = library(),
            "default_repeats" => self.default_repeats = parse_positive(key, value)?,
            "default_stream_ntimes" => self.default_stream_ntimes = parse_positive(key, value)?,
            "watch_interval_ms" => {
                self.watch_interval_ms = u64::from(parse_positive(key, value)?)
            }
            _ => {
                return Err(GpuPerfError::config(format!(
                    "Unknown key '{}' (expected one of: {})",
                    key,
                    KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }
}

fn parse_positive(key: &str, value: &str) -> crate::error::Result<u32> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(GpuPerfError::config(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))),
    }
}
