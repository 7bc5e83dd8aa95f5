//! Backend contract consumed by [`Memory`](crate::Memory).
//!
//! An arena never talks to Vulkan memory directly. It asks a [`MemoryDevice`]
//! for the memory types it may choose from, for one allocation of the packed
//! size and for host mappings. [`Device`](crate::Device) backs every arena
//! with its own `VkDeviceMemory`, while [`GpuAllocator`](crate::GpuAllocator)
//! carves arenas out of shared gpu-allocator blocks.

use crate::error::Result;
use crate::memory_type::select_memory_type;
use ash::vk;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of one arena.
///
/// Pairs the address of the issuing [`ArenaIds`] with its sequence number, so
/// arenas on different live backends never share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaId {
    registry: usize,
    sequence: u64,
}

impl ArenaId {
    /// Raw sequence number within the issuing backend.
    pub const fn get(self) -> u64 {
        self.sequence
    }
}

/// Sequence counter that hands out [`ArenaId`]s.
///
/// Each backend owns one. Arenas hold their backend through an `Arc`, so the
/// registry address stays fixed and unique while any of its arenas lives.
#[derive(Debug, Default)]
pub struct ArenaIds {
    next: AtomicU64,
}

impl ArenaIds {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Issue the next id.
    pub fn issue(&self) -> ArenaId {
        ArenaId {
            registry: std::ptr::from_ref(self) as usize,
            sequence: self.next.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// Everything a backend needs to place one arena.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest<'a> {
    /// Debug name of the arena.
    pub name: &'a str,
    /// Packed size of all resources.
    pub size: u64,
    /// Largest alignment among the resources. The base offset must honor it.
    pub alignment: u64,
    /// Memory type chosen by the arena.
    pub memory_type_index: u32,
    /// True when every resource is linear (buffers, linear images).
    pub linear: bool,
}

/// A block of device memory handed out by a backend.
pub trait Allocation {
    /// Memory object the block lives in.
    fn memory(&self) -> vk::DeviceMemory;
    /// Start of the block inside [`memory`](Self::memory).
    fn offset(&self) -> u64;
    /// Size of the block in bytes.
    fn size(&self) -> u64;
}

/// Device-side memory services an arena relies on.
pub trait MemoryDevice {
    type Allocation: Allocation;

    /// Memory types of the physical device, index aligned with Vulkan's.
    fn memory_types(&self) -> &[vk::MemoryType];

    /// Issuer of arena identities.
    fn arena_ids(&self) -> &ArenaIds;

    /// Allocate one block for an arena.
    fn allocate(&self, request: &AllocationRequest<'_>) -> Result<Self::Allocation>;

    /// Return a block. Failures are logged; the block is gone either way.
    fn free(&self, allocation: Self::Allocation);

    /// Map the whole of `allocation` and return a pointer to its first byte.
    ///
    /// The mapping must cover every byte [`flush`](Self::flush) and
    /// [`invalidate`](Self::invalidate) touch.
    ///
    /// # Safety
    /// The allocation must come from this backend and be host visible. The
    /// pointer is only valid until the matching [`unmap`](Self::unmap).
    unsafe fn map(&self, allocation: &Self::Allocation) -> Result<NonNull<u8>>;

    /// Undo [`map`](Self::map).
    ///
    /// # Safety
    /// The allocation must currently be mapped by this backend.
    unsafe fn unmap(&self, allocation: &Self::Allocation);

    /// Make host writes visible to the device on non-coherent memory.
    ///
    /// # Safety
    /// The allocation must currently be mapped.
    unsafe fn flush(&self, allocation: &Self::Allocation) -> Result<()>;

    /// Make device writes visible to the host on non-coherent memory.
    ///
    /// # Safety
    /// The allocation must currently be mapped.
    unsafe fn invalidate(&self, allocation: &Self::Allocation) -> Result<()>;

    /// Two-phase memory type search restricted to `type_bits`.
    fn find_memory_type(
        &self,
        properties: vk::MemoryPropertyFlags,
        type_bits: u32,
    ) -> Option<u32> {
        select_memory_type(self.memory_types(), properties, type_bits)
    }
}

/// Backends that can also hand out the logical device for resource creation.
pub trait LogicalDevice {
    fn logical(&self) -> &Arc<ash::Device>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_per_registry() {
        let a = ArenaIds::new();
        let b = ArenaIds::new();
        assert_eq!(a.issue().get(), 0);
        assert_eq!(a.issue().get(), 1);
        assert_eq!(a.issue().get(), 2);
        assert_eq!(b.issue().get(), 0);
    }

    #[test]
    fn ids_from_different_registries_differ() {
        let a = ArenaIds::new();
        let b = ArenaIds::new();
        let first = a.issue();
        let second = b.issue();
        assert_eq!(first.get(), second.get());
        assert_ne!(first, second);
    }
}
