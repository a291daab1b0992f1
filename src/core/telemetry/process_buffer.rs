/// One running-process record as laid out by the management library
/// (`nvmlProcessInfo_v2_t`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawProcessInfo {
    pub pid: u32,
    pub used_gpu_memory: u64,
    pub gpu_instance_id: u32,
    pub compute_instance_id: u32,
}

/// Caller-owned storage for process enumeration.
///
/// Capacity (allocated slots) and length (valid entries of the last query)
/// are tracked separately. Slots are only ever added: process counts
/// fluctuate per device, so the buffer keeps its high-water mark instead of
/// reallocating downwards.
#[derive(Debug, Clone, Default)]
pub struct ProcessIdBuffer {
    slots: Vec<RawProcessInfo>,
    len: usize,
}

impl ProcessIdBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of valid entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn entries(&self) -> &[RawProcessInfo] {
        &self.slots[..self.len]
    }

    pub fn pids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries().iter().map(|p| p.pid)
    }

    /// Make sure at least `required` slots exist.
    ///
    /// Growth at least doubles the slot count. Existing entries are kept.
    pub fn reserve_slots(&mut self, required: usize) {
        if required <= self.slots.len() {
            return;
        }

        let target = required.max(self.slots.len() * 2);
        self.slots.resize(target, RawProcessInfo::default());
    }

    /// All allocated slots, for the vendor call to write into
    pub fn slots_mut(&mut self) -> &mut [RawProcessInfo] {
        &mut self.slots
    }

    /// Mark the first `len` slots as valid (clamped to the capacity)
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.slots.len());
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Store `pids` as the current contents
    pub fn fill_pids(&mut self, pids: &[u32]) {
        self.reserve_slots(pids.len());
        for (slot, pid) in self.slots.iter_mut().zip(pids) {
            *slot = RawProcessInfo {
                pid: *pid,
                ..Default::default()
            };
        }
        self.len = pids.len();
    }
}
