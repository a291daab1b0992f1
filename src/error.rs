use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Custom error type for gpuperf
#[derive(Error, Debug)]
pub enum GpuPerfError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load library {path:?}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("None of the candidate libraries could be loaded: {0}")]
    LibraryNotFound(String),

    #[error("Device index {index} out of range (device count: {count})")]
    DeviceIndexOutOfRange { index: usize, count: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias for gpuperf
pub type Result<T> = std::result::Result<T, GpuPerfError>;

impl GpuPerfError {
    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GpuPerfError::Config(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        GpuPerfError::InvalidArgument(msg.into())
    }

    pub fn out_of_range(index: usize, count: usize) -> Self {
        GpuPerfError::DeviceIndexOutOfRange { index, count }
    }
}
