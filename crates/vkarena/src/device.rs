//! Direct Vulkan memory backend.

use crate::backend::{Allocation, AllocationRequest, ArenaIds, LogicalDevice, MemoryDevice};
use crate::error::{ArenaError, Result};
use crate::memory_type::query_memory_types;
use ash::vk;
use std::ptr::NonNull;
use std::sync::Arc;

/// Backend that gives every arena a dedicated `VkDeviceMemory`.
///
/// Does not own the logical device: the caller destroys it after every arena
/// and resource built on this backend has been dropped.
pub struct Device {
    device: Arc<ash::Device>,
    memory_types: Vec<vk::MemoryType>,
    arena_ids: ArenaIds,
}

impl Device {
    /// Wrap a logical device created by the application.
    ///
    /// # Safety
    /// `device` must have been created from `physical_device` on `instance`.
    pub unsafe fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: Arc<ash::Device>,
    ) -> Self {
        let memory_types = unsafe { query_memory_types(instance, physical_device) };
        tracing::info!(
            "Direct memory backend ready ({} memory types)",
            memory_types.len()
        );

        Self {
            device,
            memory_types,
            arena_ids: ArenaIds::new(),
        }
    }

    /// Get the Vulkan device handle.
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }
}

/// A whole `VkDeviceMemory` owned by one arena.
#[derive(Debug)]
pub struct DeviceAllocation {
    memory: vk::DeviceMemory,
    size: u64,
    memory_type_index: u32,
}

impl DeviceAllocation {
    pub const fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }
}

impl Allocation for DeviceAllocation {
    fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    fn offset(&self) -> u64 {
        0
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl MemoryDevice for Device {
    type Allocation = DeviceAllocation;

    fn memory_types(&self) -> &[vk::MemoryType] {
        &self.memory_types
    }

    fn arena_ids(&self) -> &ArenaIds {
        &self.arena_ids
    }

    fn allocate(&self, request: &AllocationRequest<'_>) -> Result<DeviceAllocation> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(request.size)
            .memory_type_index(request.memory_type_index);

        let memory = unsafe { self.device.allocate_memory(&info, None) }.map_err(|e| {
            ArenaError::AllocationFailure {
                size: request.size,
                reason: e.to_string(),
            }
        })?;

        tracing::debug!(
            "Allocated {} bytes of memory type {} for '{}'",
            request.size,
            request.memory_type_index,
            request.name
        );

        Ok(DeviceAllocation {
            memory,
            size: request.size,
            memory_type_index: request.memory_type_index,
        })
    }

    fn free(&self, allocation: DeviceAllocation) {
        unsafe {
            self.device.free_memory(allocation.memory, None);
        }
    }

    unsafe fn map(&self, allocation: &DeviceAllocation) -> Result<NonNull<u8>> {
        // Whole object, so the whole-object flush and invalidate stay inside it.
        let ptr = unsafe {
            self.device.map_memory(
                allocation.memory,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )?
        };
        NonNull::new(ptr.cast::<u8>()).ok_or(ArenaError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED))
    }

    unsafe fn unmap(&self, allocation: &DeviceAllocation) {
        unsafe {
            self.device.unmap_memory(allocation.memory);
        }
    }

    unsafe fn flush(&self, allocation: &DeviceAllocation) -> Result<()> {
        let range = whole_range(allocation.memory);
        unsafe { self.device.flush_mapped_memory_ranges(&[range])? };
        Ok(())
    }

    unsafe fn invalidate(&self, allocation: &DeviceAllocation) -> Result<()> {
        let range = whole_range(allocation.memory);
        unsafe { self.device.invalidate_mapped_memory_ranges(&[range])? };
        Ok(())
    }
}

impl LogicalDevice for Device {
    fn logical(&self) -> &Arc<ash::Device> {
        &self.device
    }
}

/// Range covering all of `memory`, which sidesteps `nonCoherentAtomSize` rounding.
pub(crate) fn whole_range<'a>(memory: vk::DeviceMemory) -> vk::MappedMemoryRange<'a> {
    vk::MappedMemoryRange::default()
        .memory(memory)
        .offset(0)
        .size(vk::WHOLE_SIZE)
}
