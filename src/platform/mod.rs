// Vendor library bindings and OS facilities

pub mod binder;
pub mod clock;
pub mod cuda;
pub mod nvml;

pub use clock::MonotonicClock;
pub use cuda::CudaRuntime;
pub use nvml::{DeviceHandle, Nvml};
