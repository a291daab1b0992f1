//! Host-memory stand-ins for an accelerator runtime and a clock.
//!
//! [`SimulatedBackend`] executes every kernel on the CPU and keeps track of
//! what is currently allocated, which makes it usable for dry runs of the
//! harnesses on machines without a GPU. Failures can be injected to exercise
//! the out-of-memory and vendor-error paths.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::mem;

use super::{BackendError, BackendResult, BlasHandle, Clock, ComputeBackend, DevicePtr};

const SIMULATED_ERROR_CODE: i32 = 1;

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    buffers: HashMap<u64, Vec<f64>>,
    blas_sessions: HashSet<u64>,
    used_bytes: usize,
    allocations: usize,
    memory_limit: Option<usize>,
    fail_allocation: Option<usize>,
    failing_calls: HashSet<&'static str>,
    perturbation: f64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn fail_if_requested(&self, call: &'static str) -> BackendResult<()> {
        if self.failing_calls.contains(call) {
            Err(BackendError::Vendor {
                call,
                code: SIMULATED_ERROR_CODE,
            })
        } else {
            Ok(())
        }
    }

    fn buffer(&self, call: &'static str, ptr: DevicePtr) -> BackendResult<&Vec<f64>> {
        self.buffers.get(&ptr.0).ok_or(BackendError::Vendor {
            call,
            code: SIMULATED_ERROR_CODE,
        })
    }

    fn check_blas(&self, call: &'static str, blas: BlasHandle) -> BackendResult<()> {
        if self.blas_sessions.contains(&blas.0) {
            Ok(())
        } else {
            Err(BackendError::Vendor {
                call,
                code: SIMULATED_ERROR_CODE,
            })
        }
    }
}

/// Accelerator runtime simulated in host memory
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    state: RefCell<State>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse allocations that would take the device past `bytes`
    pub fn with_memory_limit(self, bytes: usize) -> Self {
        self.state.borrow_mut().memory_limit = Some(bytes);
        self
    }

    /// Make the `nth` (0-based) device allocation fail with out-of-memory
    pub fn fail_allocation(self, nth: usize) -> Self {
        self.state.borrow_mut().fail_allocation = Some(nth);
        self
    }

    /// Make every call of `call` fail with a vendor error
    ///
    /// Call names: `allocate`, `upload`, `download`, `synchronize`,
    /// `create_blas`, `dgemm`, `scale_add`.
    pub fn fail_call(self, call: &'static str) -> Self {
        self.state.borrow_mut().failing_calls.insert(call);
        self
    }

    /// Add `offset` to every element `scale_add` produces
    pub fn perturb_results(self, offset: f64) -> Self {
        self.state.borrow_mut().perturbation = offset;
        self
    }

    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn live_blas_sessions(&self) -> usize {
        self.state.borrow().blas_sessions.len()
    }

    /// Device allocations attempted so far, failed ones included
    pub fn allocation_count(&self) -> usize {
        self.state.borrow().allocations
    }

    pub fn used_bytes(&self) -> usize {
        self.state.borrow().used_bytes
    }
}

impl ComputeBackend for SimulatedBackend {
    fn allocate(&self, bytes: usize) -> BackendResult<DevicePtr> {
        let mut state = self.state.borrow_mut();
        let attempt = state.allocations;
        state.allocations += 1;

        state.fail_if_requested("allocate")?;
        if state.fail_allocation == Some(attempt) {
            return Err(BackendError::OutOfMemory);
        }

        let used = state
            .used_bytes
            .checked_add(bytes)
            .ok_or(BackendError::OutOfMemory)?;
        if state.memory_limit.is_some_and(|limit| used > limit) {
            return Err(BackendError::OutOfMemory);
        }

        let len = bytes / mem::size_of::<f64>();
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(len)
            .map_err(|_| BackendError::OutOfMemory)?;
        storage.resize(len, 0.0);

        let id = state.next_id();
        state.buffers.insert(id, storage);
        state.used_bytes = used;
        Ok(DevicePtr(id))
    }

    fn free(&self, ptr: DevicePtr) {
        let mut state = self.state.borrow_mut();
        if let Some(storage) = state.buffers.remove(&ptr.0) {
            state.used_bytes -= storage.len() * mem::size_of::<f64>();
        }
    }

    fn upload(&self, dst: DevicePtr, src: &[f64]) -> BackendResult<()> {
        let mut state = self.state.borrow_mut();
        state.fail_if_requested("upload")?;

        let storage = state.buffers.get_mut(&dst.0).ok_or(BackendError::Vendor {
            call: "upload",
            code: SIMULATED_ERROR_CODE,
        })?;
        if storage.len() < src.len() {
            return Err(BackendError::Vendor {
                call: "upload",
                code: SIMULATED_ERROR_CODE,
            });
        }
        storage[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn download(&self, dst: &mut [f64], src: DevicePtr) -> BackendResult<()> {
        let state = self.state.borrow();
        state.fail_if_requested("download")?;

        let storage = state.buffer("download", src)?;
        if storage.len() < dst.len() {
            return Err(BackendError::Vendor {
                call: "download",
                code: SIMULATED_ERROR_CODE,
            });
        }
        dst.copy_from_slice(&storage[..dst.len()]);
        Ok(())
    }

    fn synchronize(&self) -> BackendResult<()> {
        self.state.borrow().fail_if_requested("synchronize")
    }

    fn create_blas(&self) -> BackendResult<BlasHandle> {
        let mut state = self.state.borrow_mut();
        state.fail_if_requested("create_blas")?;

        let id = state.next_id();
        state.blas_sessions.insert(id);
        Ok(BlasHandle(id))
    }

    fn destroy_blas(&self, handle: BlasHandle) {
        self.state.borrow_mut().blas_sessions.remove(&handle.0);
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
        let mut state = self.state.borrow_mut();
        state.fail_if_requested("dgemm")?;
        state.check_blas("dgemm", blas)?;

        let cells = n.checked_mul(n).ok_or(BackendError::InvalidDimension(n))?;
        let lhs = state.buffer("dgemm", a)?.clone();
        let rhs = state.buffer("dgemm", b)?.clone();
        let out = state.buffers.get_mut(&c.0).ok_or(BackendError::Vendor {
            call: "dgemm",
            code: SIMULATED_ERROR_CODE,
        })?;
        if lhs.len() < cells || rhs.len() < cells || out.len() < cells {
            return Err(BackendError::InvalidDimension(n));
        }

        for col in 0..n {
            for row in 0..n {
                let dot: f64 = (0..n).map(|k| lhs[k * n + row] * rhs[col * n + k]).sum();
                let cell = &mut out[col * n + row];
                *cell = alpha * dot + beta * *cell;
            }
        }
        Ok(())
    }

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
        let mut state = self.state.borrow_mut();
        state.fail_if_requested("scale_add")?;
        state.check_blas("scale_add", blas)?;

        let perturbation = state.perturbation;
        let xs = state.buffer("scale_add", x)?.clone();
        let ys = state.buffer("scale_add", y)?.clone();
        let target = state.buffers.get_mut(&out.0).ok_or(BackendError::Vendor {
            call: "scale_add",
            code: SIMULATED_ERROR_CODE,
        })?;
        if xs.len() < n || ys.len() < n || target.len() < n {
            return Err(BackendError::InvalidDimension(n));
        }

        for (i, slot) in target.iter_mut().take(n).enumerate() {
            *slot = alpha * xs[i] + beta * ys[i] + perturbation;
        }
        Ok(())
    }
}

/// Clock that replays scripted readings, then moves forward by a fixed step
/// every time it is read
#[derive(Debug)]
pub struct SimulatedClock {
    now: Cell<f64>,
    step: f64,
    script: RefCell<VecDeque<f64>>,
}

impl SimulatedClock {
    pub fn with_step(step: f64) -> Self {
        Self {
            now: Cell::new(0.0),
            step,
            script: RefCell::new(VecDeque::new()),
        }
    }

    /// Return `timestamps` in order; once they run out, continue from the
    /// last one in steps of one second.
    pub fn from_timestamps(timestamps: Vec<f64>) -> Self {
        Self {
            now: Cell::new(0.0),
            step: 1.0,
            script: RefCell::new(timestamps.into()),
        }
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> f64 {
        if let Some(t) = self.script.borrow_mut().pop_front() {
            self.now.set(t + self.step);
            return t;
        }

        let t = self.now.get();
        self.now.set(t + self.step);
        t
    }
}
