// UI and formatting module

pub mod device_formatters;

pub use device_formatters::{
    format_capabilities, format_device_snapshots, format_dgemm_report, format_stream_report,
};
