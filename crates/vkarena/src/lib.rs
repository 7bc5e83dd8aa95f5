//! RAII Vulkan resources packed into shared device memory arenas.
//!
//! This crate provides:
//! - [`Memory`] arenas that lay out many buffers and images in one allocation
//! - Owned [`Buffer`] and [`Image`] wrappers destroyed on drop
//! - A direct `vkAllocateMemory` backend ([`Device`])
//! - A gpu-allocator backed sub-allocating backend ([`GpuAllocator`])
//! - Host copies into host-visible arenas

pub mod allocator;
pub mod backend;
pub mod buffer;
pub mod device;
pub mod error;
pub mod image;
pub mod layout;
pub mod memory;
pub mod memory_type;
pub mod resource;

#[cfg(test)]
pub(crate) mod testing;

pub use allocator::GpuAllocator;
pub use backend::{Allocation, AllocationRequest, ArenaId, ArenaIds, LogicalDevice, MemoryDevice};
pub use buffer::{Buffer, BufferDesc};
pub use device::{Device, DeviceAllocation};
pub use error::{ArenaError, Result};
pub use image::{Image, ImageDesc};
pub use layout::{align_up, compute_layout, Layout, MemoryRequirement};
pub use memory::{ArenaState, Memory, MemoryBuilder};
pub use memory_type::select_memory_type;
pub use resource::{MemoryObject, ResourceHandle};

pub use ash;
