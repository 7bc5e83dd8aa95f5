//! Buffer wrapper.

use crate::error::Result;
use crate::resource::MemoryObject;
use ash::vk;
use std::sync::Arc;

/// Buffer creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub sharing_mode: vk::SharingMode,
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self {
            size: 0,
            usage: vk::BufferUsageFlags::empty(),
            sharing_mode: vk::SharingMode::EXCLUSIVE,
        }
    }
}

impl BufferDesc {
    pub fn new(size: u64, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            ..Self::default()
        }
    }

    /// Buffer holding `count` elements of `T`, or `None` if the byte size
    /// overflows.
    pub fn of<T>(count: usize, usage: vk::BufferUsageFlags) -> Option<Self> {
        let bytes = count.checked_mul(std::mem::size_of::<T>())?;
        Some(Self::new(u64::try_from(bytes).ok()?, usage))
    }

    pub const fn sharing_mode(mut self, sharing_mode: vk::SharingMode) -> Self {
        self.sharing_mode = sharing_mode;
        self
    }
}

/// Owned `VkBuffer`, destroyed on drop.
pub struct Buffer {
    device: Arc<ash::Device>,
    buffer: vk::Buffer,
    size: u64,
    usage: vk::BufferUsageFlags,
    requirements: vk::MemoryRequirements,
    bound_offset: Option<u64>,
}

impl Buffer {
    /// Create an unbound buffer.
    pub fn new(device: Arc<ash::Device>, desc: &BufferDesc) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(desc.sharing_mode);

        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        Ok(Self {
            device,
            buffer,
            size: desc.size,
            usage: desc.usage,
            requirements,
            bound_offset: None,
        })
    }

    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size requested at creation, which may be smaller than the memory footprint.
    pub const fn size(&self) -> u64 {
        self.size
    }

    pub const fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Offset inside the device memory once bound.
    pub const fn bound_offset(&self) -> Option<u64> {
        self.bound_offset
    }
}

impl MemoryObject for Buffer {
    fn memory_requirements(&self) -> vk::MemoryRequirements {
        self.requirements
    }

    fn bind(&mut self, memory: vk::DeviceMemory, offset: u64) -> std::result::Result<(), vk::Result> {
        unsafe { self.device.bind_buffer_memory(self.buffer, memory, offset)? };
        self.bound_offset = Some(offset);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}
