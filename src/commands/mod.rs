// Command handlers module
pub mod bench;
pub mod config;
pub mod devices;
pub mod version;

// Re-exports for cleaner imports
pub use version::execute as version;
