use std::collections::TryReserveError;
use std::mem;

use super::{BackendError, BackendResult, BlasHandle, ComputeBackend, DevicePtr};

/// Host vector of `len` copies of `fill`, without aborting when the
/// allocator refuses.
pub fn host_array(len: usize, fill: f64) -> std::result::Result<Vec<f64>, TryReserveError> {
    let mut values = Vec::new();
    values.try_reserve_exact(len)?;
    values.resize(len, fill);
    Ok(values)
}

/// `f64` array in device memory, freed on drop
pub struct DeviceBuffer<'b, B: ComputeBackend + ?Sized> {
    backend: &'b B,
    ptr: DevicePtr,
    len: usize,
}

impl<'b, B: ComputeBackend + ?Sized> DeviceBuffer<'b, B> {
    pub fn alloc(backend: &'b B, len: usize) -> BackendResult<Self> {
        let bytes = len
            .checked_mul(mem::size_of::<f64>())
            .ok_or(BackendError::OutOfMemory)?;
        let ptr = backend.allocate(bytes)?;
        Ok(Self { backend, ptr, len })
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn upload(&self, src: &[f64]) -> BackendResult<()> {
        debug_assert_eq!(src.len(), self.len);
        self.backend.upload(self.ptr, src)
    }

    pub fn download(&self, dst: &mut [f64]) -> BackendResult<()> {
        debug_assert_eq!(dst.len(), self.len);
        self.backend.download(dst, self.ptr)
    }
}

impl<B: ComputeBackend + ?Sized> Drop for DeviceBuffer<'_, B> {
    fn drop(&mut self) {
        self.backend.free(self.ptr);
    }
}

/// BLAS session, destroyed on drop
pub struct BlasSession<'b, B: ComputeBackend + ?Sized> {
    backend: &'b B,
    handle: BlasHandle,
}

impl<'b, B: ComputeBackend + ?Sized> BlasSession<'b, B> {
    pub fn create(backend: &'b B) -> BackendResult<Self> {
        let handle = backend.create_blas()?;
        Ok(Self { backend, handle })
    }

    pub fn handle(&self) -> BlasHandle {
        self.handle
    }
}

impl<B: ComputeBackend + ?Sized> Drop for BlasSession<'_, B> {
    fn drop(&mut self) {
        self.backend.destroy_blas(self.handle);
    }
}
