//! CUDA runtime and cuBLAS bound at runtime.

use std::ffi::{c_int, c_void};
use std::marker::PhantomData;
use std::mem;
use std::ptr;

use crate::core::benchmark::{BackendError, BackendResult, BlasHandle, ComputeBackend, DevicePtr};
use crate::error::Result;
use crate::platform::binder::{Binder, Capability, CapabilityTable, SharedLibrary, SymbolSource};

#[cfg(target_os = "windows")]
pub const DEFAULT_CUDART_CANDIDATES: &[&str] =
    &["cudart64_12.dll", "cudart64_110.dll", "cudart64_101.dll"];
#[cfg(not(target_os = "windows"))]
pub const DEFAULT_CUDART_CANDIDATES: &[&str] =
    &["libcudart.so", "libcudart.so.12", "libcudart.so.11.0"];

#[cfg(target_os = "windows")]
pub const DEFAULT_CUBLAS_CANDIDATES: &[&str] = &["cublas64_12.dll", "cublas64_11.dll"];
#[cfg(not(target_os = "windows"))]
pub const DEFAULT_CUBLAS_CANDIDATES: &[&str] =
    &["libcublas.so", "libcublas.so.12", "libcublas.so.11"];

const CUDA_SUCCESS: c_int = 0;
const CUDA_ERROR_MEMORY_ALLOCATION: c_int = 2;
const CUDA_MEMCPY_HOST_TO_DEVICE: c_int = 1;
const CUDA_MEMCPY_DEVICE_TO_HOST: c_int = 2;

const CUBLAS_STATUS_SUCCESS: c_int = 0;
const CUBLAS_STATUS_ALLOC_FAILED: c_int = 3;
const CUBLAS_OP_N: c_int = 0;

type CudaSetDeviceFn = unsafe extern "C" fn(device: c_int) -> c_int;
type CudaMallocFn = unsafe extern "C" fn(ptr: *mut *mut c_void, size: usize) -> c_int;
type CudaFreeFn = unsafe extern "C" fn(ptr: *mut c_void) -> c_int;
type CudaMemcpyFn =
    unsafe extern "C" fn(dst: *mut c_void, src: *const c_void, count: usize, kind: c_int) -> c_int;
type CudaDeviceSynchronizeFn = unsafe extern "C" fn() -> c_int;

type CublasCreateFn = unsafe extern "C" fn(handle: *mut *mut c_void) -> c_int;
type CublasDestroyFn = unsafe extern "C" fn(handle: *mut c_void) -> c_int;
type CublasDgemmFn = unsafe extern "C" fn(
    handle: *mut c_void,
    transa: c_int,
    transb: c_int,
    m: c_int,
    n: c_int,
    k: c_int,
    alpha: *const f64,
    a: *const f64,
    lda: c_int,
    b: *const f64,
    ldb: c_int,
    beta: *const f64,
    c: *mut f64,
    ldc: c_int,
) -> c_int;
type CublasDgeamFn = unsafe extern "C" fn(
    handle: *mut c_void,
    transa: c_int,
    transb: c_int,
    m: c_int,
    n: c_int,
    alpha: *const f64,
    a: *const f64,
    lda: c_int,
    beta: *const f64,
    b: *const f64,
    ldb: c_int,
    c: *mut f64,
    ldc: c_int,
) -> c_int;

struct RuntimeFunctions {
    set_device: Capability<CudaSetDeviceFn>,
    malloc: Capability<CudaMallocFn>,
    free: Capability<CudaFreeFn>,
    memcpy: Capability<CudaMemcpyFn>,
    synchronize: Capability<CudaDeviceSynchronizeFn>,
}

struct BlasFunctions {
    create: Capability<CublasCreateFn>,
    destroy: Capability<CublasDestroyFn>,
    dgemm: Capability<CublasDgemmFn>,
    dgeam: Capability<CublasDgeamFn>,
}

/// CUDA runtime plus cuBLAS, as a [`ComputeBackend`]
pub struct CudaRuntime<S: SymbolSource = SharedLibrary> {
    runtime: RuntimeFunctions,
    blas: BlasFunctions,
    capabilities: CapabilityTable,
    _cudart: S,
    _cublas: S,
    _not_sync: PhantomData<*const ()>,
}

impl CudaRuntime<SharedLibrary> {
    /// Open both libraries; `None` tries the platform's usual names.
    pub fn load(cudart: Option<&str>, cublas: Option<&str>) -> Result<Self> {
        let cudart = match cudart {
            Some(path) => SharedLibrary::open(path)?,
            None => SharedLibrary::open_first(DEFAULT_CUDART_CANDIDATES)?,
        };
        let cublas = match cublas {
            Some(path) => SharedLibrary::open(path)?,
            None => SharedLibrary::open_first(DEFAULT_CUBLAS_CANDIDATES)?,
        };
        Ok(Self::with_sources(cudart, cublas))
    }
}

impl<S: SymbolSource> CudaRuntime<S> {
    pub fn with_sources(cudart: S, cublas: S) -> Self {
        let mut capabilities = Vec::new();

        let mut binder = Binder::new(&cudart);
        // SAFETY: the function types above follow the CUDA runtime headers.
        let runtime = unsafe {
            RuntimeFunctions {
                set_device: binder.resolve("set_device", &["cudaSetDevice"]),
                malloc: binder.resolve("malloc", &["cudaMalloc"]),
                free: binder.resolve("free", &["cudaFree"]),
                memcpy: binder.resolve("memcpy", &["cudaMemcpy"]),
                synchronize: binder.resolve("synchronize", &["cudaDeviceSynchronize"]),
            }
        };
        capabilities.push(binder.finish());

        let mut binder = Binder::new(&cublas);
        // SAFETY: the function types above follow cublas_api.h.
        let blas = unsafe {
            BlasFunctions {
                create: binder.resolve("blas_create", &["cublasCreate_v2", "cublasCreate"]),
                destroy: binder.resolve("blas_destroy", &["cublasDestroy_v2", "cublasDestroy"]),
                dgemm: binder.resolve("dgemm", &["cublasDgemm_v2", "cublasDgemm"]),
                dgeam: binder.resolve("dgeam", &["cublasDgeam"]),
            }
        };
        capabilities.push(binder.finish());

        Self {
            runtime,
            blas,
            capabilities: CapabilityTable::merge(capabilities),
            _cudart: cudart,
            _cublas: cublas,
            _not_sync: PhantomData,
        }
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Make `index` the device subsequent calls run on
    pub fn select_device(&self, index: u32) -> BackendResult<()> {
        let f = require(&self.runtime.set_device)?;
        let device = c_int::try_from(index).map_err(|_| BackendError::InvalidDimension(index as usize))?;
        // SAFETY: plain integer argument.
        cuda_check("cudaSetDevice", unsafe { f(device) })
    }
}

impl<S: SymbolSource> ComputeBackend for CudaRuntime<S> {
    fn allocate(&self, bytes: usize) -> BackendResult<DevicePtr> {
        let f = require(&self.runtime.malloc)?;
        let mut raw: *mut c_void = ptr::null_mut();
        // SAFETY: out-pointer to a local.
        let code = unsafe { f(&mut raw, bytes) };
        match code {
            CUDA_SUCCESS => Ok(DevicePtr(raw as usize as u64)),
            CUDA_ERROR_MEMORY_ALLOCATION => Err(BackendError::OutOfMemory),
            code => Err(BackendError::Vendor {
                call: "cudaMalloc",
                code,
            }),
        }
    }

    fn free(&self, ptr: DevicePtr) {
        if let Some(f) = self.runtime.free.get() {
            // SAFETY: `ptr` came from cudaMalloc and is freed exactly once by
            // its owning `DeviceBuffer`.
            let code = unsafe { f(device_ptr(ptr)) };
            if code != CUDA_SUCCESS {
                log::warn!("cudaFree failed with code {}", code);
            }
        }
    }

    fn upload(&self, dst: DevicePtr, src: &[f64]) -> BackendResult<()> {
        let f = require(&self.runtime.memcpy)?;
        // SAFETY: `src` is a live host slice; `dst` holds at least as many bytes.
        let code = unsafe {
            f(
                device_ptr(dst),
                src.as_ptr().cast(),
                mem::size_of_val(src),
                CUDA_MEMCPY_HOST_TO_DEVICE,
            )
        };
        cuda_check("cudaMemcpy", code)
    }

    fn download(&self, dst: &mut [f64], src: DevicePtr) -> BackendResult<()> {
        let f = require(&self.runtime.memcpy)?;
        let bytes = mem::size_of_val(dst);
        // SAFETY: `dst` is a live host slice; `src` holds at least as many bytes.
        let code = unsafe {
            f(
                dst.as_mut_ptr().cast(),
                device_ptr(src),
                bytes,
                CUDA_MEMCPY_DEVICE_TO_HOST,
            )
        };
        cuda_check("cudaMemcpy", code)
    }

    fn synchronize(&self) -> BackendResult<()> {
        let f = require(&self.runtime.synchronize)?;
        // SAFETY: no arguments.
        cuda_check("cudaDeviceSynchronize", unsafe { f() })
    }

    fn create_blas(&self) -> BackendResult<BlasHandle> {
        let f = require(&self.blas.create)?;
        let mut handle: *mut c_void = ptr::null_mut();
        // SAFETY: out-pointer to a local.
        let code = unsafe { f(&mut handle) };
        match code {
            CUBLAS_STATUS_SUCCESS => Ok(BlasHandle(handle as usize as u64)),
            CUBLAS_STATUS_ALLOC_FAILED => Err(BackendError::OutOfMemory),
            code => Err(BackendError::Vendor {
                call: "cublasCreate",
                code,
            }),
        }
    }

    fn destroy_blas(&self, handle: BlasHandle) {
        if let Some(f) = self.blas.destroy.get() {
            // SAFETY: the handle came from cublasCreate and is destroyed once.
            let code = unsafe { f(blas_handle(handle)) };
            if code != CUBLAS_STATUS_SUCCESS {
                log::warn!("cublasDestroy failed with code {}", code);
            }
        }
    }

    fn dgemm(
        &self,
        blas: BlasHandle,
        n: usize,
        alpha: f64,
        a: DevicePtr,
        b: DevicePtr,
        beta: f64,
        c: DevicePtr,
    ) -> BackendResult<()> {
        let f = require(&self.blas.dgemm)?;
        let dim = c_int::try_from(n).map_err(|_| BackendError::InvalidDimension(n))?;
        // SAFETY: the three device buffers hold n*n doubles each.
        let code = unsafe {
            f(
                blas_handle(blas),
                CUBLAS_OP_N,
                CUBLAS_OP_N,
                dim,
                dim,
                dim,
                &alpha,
                device_ptr(a).cast(),
                dim,
                device_ptr(b).cast(),
                dim,
                &beta,
                device_ptr(c).cast(),
                dim,
            )
        };
        blas_check("cublasDgemm", code)
    }

    /// `dgeam` over a 1×n matrix with unit leading dimension
    fn scale_add(
        &self,
        blas: BlasHandle,
        n: usize,
        alpha: f64,
        x: DevicePtr,
        beta: f64,
        y: DevicePtr,
        out: DevicePtr,
    ) -> BackendResult<()> {
        let f = require(&self.blas.dgeam)?;
        let cols = c_int::try_from(n).map_err(|_| BackendError::InvalidDimension(n))?;
        // SAFETY: the device buffers hold n doubles each.
        let code = unsafe {
            f(
                blas_handle(blas),
                CUBLAS_OP_N,
                CUBLAS_OP_N,
                1,
                cols,
                &alpha,
                device_ptr(x).cast(),
                1,
                &beta,
                device_ptr(y).cast(),
                1,
                device_ptr(out).cast(),
                1,
            )
        };
        blas_check("cublasDgeam", code)
    }
}

fn require<F: Copy>(capability: &Capability<F>) -> BackendResult<F> {
    capability
        .get()
        .ok_or(BackendError::Unsupported(capability.operation()))
}

fn cuda_check(call: &'static str, code: c_int) -> BackendResult<()> {
    if code == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(BackendError::Vendor { call, code })
    }
}

fn blas_check(call: &'static str, code: c_int) -> BackendResult<()> {
    if code == CUBLAS_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(BackendError::Vendor { call, code })
    }
}

fn device_ptr(ptr: DevicePtr) -> *mut c_void {
    ptr.0 as usize as *mut c_void
}

fn blas_handle(handle: BlasHandle) -> *mut c_void {
    handle.0 as usize as *mut c_void
}
