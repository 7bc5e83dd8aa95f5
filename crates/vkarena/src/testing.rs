//! In-memory backend and resource used by unit tests.

use crate::backend::{Allocation, AllocationRequest, ArenaIds, MemoryDevice};
use crate::error::{ArenaError, Result};
use crate::resource::MemoryObject;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Install a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("vkarena=debug"))
        .with_test_writer()
        .try_init();
}

/// Shared, ordered record of backend frees and resource drops.
pub type EventLog = Arc<Mutex<Vec<&'static str>>>;

/// What the arena asked the backend for.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub name: String,
    pub size: u64,
    pub alignment: u64,
    pub memory_type_index: u32,
    pub linear: bool,
}

#[derive(Debug)]
pub struct MockAllocation {
    memory: vk::DeviceMemory,
    offset: u64,
    size: u64,
}

impl Allocation for MockAllocation {
    fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Backend that keeps "device memory" in host vectors.
pub struct MockDevice {
    memory_types: Vec<vk::MemoryType>,
    arena_ids: ArenaIds,
    base_offset: u64,
    next_handle: AtomicU64,
    fail_next: AtomicBool,
    requests: Mutex<Vec<RecordedRequest>>,
    freed: Mutex<Vec<vk::DeviceMemory>>,
    storage: Mutex<HashMap<u64, Vec<u8>>>,
    mapped: Mutex<HashSet<u64>>,
    maps: AtomicUsize,
    flushes: AtomicUsize,
    invalidations: AtomicUsize,
    events: EventLog,
}

impl MockDevice {
    pub fn new(types: &[vk::MemoryPropertyFlags]) -> Self {
        Self {
            memory_types: types
                .iter()
                .map(|&property_flags| vk::MemoryType {
                    property_flags,
                    heap_index: 0,
                })
                .collect(),
            arena_ids: ArenaIds::new(),
            base_offset: 0,
            next_handle: AtomicU64::new(1),
            fail_next: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            freed: Mutex::new(Vec::new()),
            storage: Mutex::new(HashMap::new()),
            mapped: Mutex::new(HashSet::new()),
            maps: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
            events: EventLog::default(),
        }
    }

    /// Place every allocation at `offset` inside its memory, like a sub-allocator.
    pub fn with_base_offset(mut self, offset: u64) -> Self {
        self.base_offset = offset;
        self
    }

    pub fn fail_next_allocation(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Successful allocation requests, oldest first.
    pub fn allocations(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn freed(&self) -> Vec<vk::DeviceMemory> {
        self.freed.lock().clone()
    }

    pub fn live_allocations(&self) -> usize {
        self.storage.lock().len()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Number of `map` calls so far.
    pub fn maps(&self) -> usize {
        self.maps.load(Ordering::SeqCst)
    }

    /// Log that records a `"free"` per freed allocation.
    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    /// Flush and invalidate cover the whole allocation, so it must be mapped.
    fn assert_mapped(&self, allocation: &MockAllocation, operation: &str) {
        assert!(
            self.mapped.lock().contains(&allocation.memory.as_raw()),
            "{operation} of {:?} outside a mapping",
            allocation.memory
        );
    }
}

impl MemoryDevice for MockDevice {
    type Allocation = MockAllocation;

    fn memory_types(&self) -> &[vk::MemoryType] {
        &self.memory_types
    }

    fn arena_ids(&self) -> &ArenaIds {
        &self.arena_ids
    }

    fn allocate(&self, request: &AllocationRequest<'_>) -> Result<MockAllocation> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ArenaError::AllocationFailure {
                size: request.size,
                reason: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.to_string(),
            });
        }

        let raw = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let total = usize::try_from(self.base_offset + request.size).unwrap();
        self.storage.lock().insert(raw, vec![0; total]);
        self.requests.lock().push(RecordedRequest {
            name: request.name.to_string(),
            size: request.size,
            alignment: request.alignment,
            memory_type_index: request.memory_type_index,
            linear: request.linear,
        });

        Ok(MockAllocation {
            memory: vk::DeviceMemory::from_raw(raw),
            offset: self.base_offset,
            size: request.size,
        })
    }

    fn free(&self, allocation: MockAllocation) {
        let removed = self.storage.lock().remove(&allocation.memory.as_raw());
        assert!(removed.is_some(), "double free of {:?}", allocation.memory);
        assert!(
            !self.mapped.lock().contains(&allocation.memory.as_raw()),
            "freed {:?} while mapped",
            allocation.memory
        );
        self.freed.lock().push(allocation.memory);
        self.events.lock().push("free");
    }

    unsafe fn map(&self, allocation: &MockAllocation) -> Result<NonNull<u8>> {
        let raw = allocation.memory.as_raw();
        let mut storage = self.storage.lock();
        let bytes = storage
            .get_mut(&raw)
            .ok_or(ArenaError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        assert!(self.mapped.lock().insert(raw), "{:?} mapped twice", allocation.memory);
        self.maps.fetch_add(1, Ordering::SeqCst);
        let start = usize::try_from(allocation.offset).unwrap();
        // The vector is never resized while the allocation lives.
        Ok(NonNull::new(unsafe { bytes.as_mut_ptr().add(start) }).unwrap())
    }

    unsafe fn unmap(&self, allocation: &MockAllocation) {
        let removed = self.mapped.lock().remove(&allocation.memory.as_raw());
        assert!(removed, "unmap of unmapped {:?}", allocation.memory);
    }

    unsafe fn flush(&self, allocation: &MockAllocation) -> Result<()> {
        self.assert_mapped(allocation, "flush");
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn invalidate(&self, allocation: &MockAllocation) -> Result<()> {
        self.assert_mapped(allocation, "invalidate");
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Resource with fixed requirements that records where it was bound.
pub struct MockResource {
    requirements: vk::MemoryRequirements,
    linear: bool,
    fail_bind: bool,
    dropped: Option<Arc<AtomicBool>>,
    events: Option<EventLog>,
    pub bound: Option<(vk::DeviceMemory, u64)>,
    pub label: &'static str,
}

impl MockResource {
    pub fn new(size: u64, alignment: u64) -> Self {
        Self {
            requirements: vk::MemoryRequirements {
                size,
                alignment,
                memory_type_bits: u32::MAX,
            },
            linear: true,
            fail_bind: false,
            dropped: None,
            events: None,
            bound: None,
            label: "mock",
        }
    }

    pub fn with_type_bits(mut self, bits: u32) -> Self {
        self.requirements.memory_type_bits = bits;
        self
    }

    pub fn non_linear(mut self) -> Self {
        self.linear = false;
        self
    }

    pub fn failing_bind(mut self) -> Self {
        self.fail_bind = true;
        self
    }

    /// Returns a flag that flips when the resource is dropped.
    pub fn tracked(mut self) -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        self.dropped = Some(flag.clone());
        (self, flag)
    }

    /// Record a `"drop"` in `events` when the resource is dropped.
    pub fn logged(mut self, events: &EventLog) -> Self {
        self.events = Some(events.clone());
        self
    }
}

impl MemoryObject for MockResource {
    fn memory_requirements(&self) -> vk::MemoryRequirements {
        self.requirements
    }

    fn is_linear(&self) -> bool {
        self.linear
    }

    fn bind(&mut self, memory: vk::DeviceMemory, offset: u64) -> std::result::Result<(), vk::Result> {
        if self.fail_bind {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        self.bound = Some((memory, offset));
        Ok(())
    }
}

impl Drop for MockResource {
    fn drop(&mut self) {
        if let Some(flag) = &self.dropped {
            flag.store(true, Ordering::SeqCst);
        }
        if let Some(events) = &self.events {
            events.lock().push("drop");
        }
    }
}
