//! gpu-allocator backed memory backend.

use crate::backend::{Allocation, AllocationRequest, ArenaIds, LogicalDevice, MemoryDevice};
use crate::device::whole_range;
use crate::error::{ArenaError, Result};
use crate::memory_type::query_memory_types;
use ash::vk;
use gpu_allocator::vulkan::{self, AllocationCreateDesc, AllocationScheme, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::Arc;

/// Backend that sub-allocates arenas from gpu-allocator memory blocks.
///
/// Arenas share `VkDeviceMemory` objects, so resource offsets are relative to
/// each arena's base offset inside its block.
pub struct GpuAllocator {
    allocator: Mutex<Option<vulkan::Allocator>>,
    device: Arc<ash::Device>,
    memory_types: Vec<vk::MemoryType>,
    arena_ids: ArenaIds,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = vulkan::Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: cfg!(debug_assertions),
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| ArenaError::AllocationFailure {
            size: 0,
            reason: e.to_string(),
        })?;

        let memory_types = unsafe { query_memory_types(instance, physical_device) };
        tracing::info!(
            "gpu-allocator backend ready ({} memory types)",
            memory_types.len()
        );

        Ok(Self {
            allocator: Mutex::new(Some(allocator)),
            device,
            memory_types,
            arena_ids: ArenaIds::new(),
        })
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&self) {
        // gpu_allocator::Allocator::drop calls vkFreeMemory on every block
        if let Some(allocator) = self.allocator.lock().take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Allocation for vulkan::Allocation {
    fn memory(&self) -> vk::DeviceMemory {
        unsafe { Self::memory(self) }
    }

    fn offset(&self) -> u64 {
        Self::offset(self)
    }

    fn size(&self) -> u64 {
        Self::size(self)
    }
}

impl MemoryDevice for GpuAllocator {
    type Allocation = vulkan::Allocation;

    fn memory_types(&self) -> &[vk::MemoryType] {
        &self.memory_types
    }

    fn arena_ids(&self) -> &ArenaIds {
        &self.arena_ids
    }

    fn allocate(&self, request: &AllocationRequest<'_>) -> Result<vulkan::Allocation> {
        // Pin gpu-allocator to the type the arena selected. With an unknown
        // location it takes the first type allowed by the bits.
        let requirements = vk::MemoryRequirements {
            size: request.size,
            alignment: request.alignment.max(1),
            memory_type_bits: 1 << request.memory_type_index,
        };

        let allocation = self
            .allocator
            .lock()
            .as_mut()
            .ok_or(ArenaError::AllocatorShutdown)?
            .allocate(&AllocationCreateDesc {
                name: request.name,
                requirements,
                location: MemoryLocation::Unknown,
                linear: request.linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| ArenaError::AllocationFailure {
                size: request.size,
                reason: e.to_string(),
            })?;

        tracing::debug!(
            "Sub-allocated {} bytes at offset {} for '{}'",
            request.size,
            allocation.offset(),
            request.name
        );

        Ok(allocation)
    }

    fn free(&self, allocation: vulkan::Allocation) {
        let mut guard = self.allocator.lock();
        let Some(allocator) = guard.as_mut() else {
            // Shutdown already released the whole heap.
            return;
        };
        if let Err(e) = allocator.free(allocation) {
            tracing::error!("Freeing arena allocation failed: {e}");
        }
    }

    unsafe fn map(&self, allocation: &vulkan::Allocation) -> Result<NonNull<u8>> {
        // Host-visible blocks stay persistently mapped, whole block included.
        allocation
            .mapped_ptr()
            .map(NonNull::cast::<u8>)
            .ok_or(ArenaError::NotHostVisible)
    }

    unsafe fn unmap(&self, _allocation: &vulkan::Allocation) {}

    unsafe fn flush(&self, allocation: &vulkan::Allocation) -> Result<()> {
        let range = whole_range(unsafe { allocation.memory() });
        unsafe { self.device.flush_mapped_memory_ranges(&[range])? };
        Ok(())
    }

    unsafe fn invalidate(&self, allocation: &vulkan::Allocation) -> Result<()> {
        let range = whole_range(unsafe { allocation.memory() });
        unsafe { self.device.invalidate_mapped_memory_ranges(&[range])? };
        Ok(())
    }
}

impl LogicalDevice for GpuAllocator {
    fn logical(&self) -> &Arc<ash::Device> {
        &self.device
    }
}
