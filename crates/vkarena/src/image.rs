//! Image wrapper.

use crate::error::Result;
use crate::resource::MemoryObject;
use ash::vk;
use std::sync::Arc;

/// Image creation parameters.
///
/// Defaults describe a single-layer, single-mip 2D image with optimal tiling
/// and a mutable format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub tiling: vk::ImageTiling,
    pub flags: vk::ImageCreateFlags,
    pub sharing_mode: vk::SharingMode,
}

impl Default for ImageDesc {
    fn default() -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::R8G8B8A8_UNORM,
            extent: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            usage: vk::ImageUsageFlags::empty(),
            array_layers: 1,
            mip_levels: 1,
            tiling: vk::ImageTiling::OPTIMAL,
            flags: vk::ImageCreateFlags::MUTABLE_FORMAT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
        }
    }
}

impl ImageDesc {
    /// 2D image of `width` x `height`.
    pub fn new_2d(format: vk::Format, width: u32, height: u32, usage: vk::ImageUsageFlags) -> Self {
        Self {
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            usage,
            ..Self::default()
        }
    }

    pub const fn image_type(mut self, image_type: vk::ImageType) -> Self {
        self.image_type = image_type;
        self
    }

    pub const fn array_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers;
        self
    }

    pub const fn mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels;
        self
    }

    pub const fn tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    pub const fn flags(mut self, flags: vk::ImageCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub const fn sharing_mode(mut self, sharing_mode: vk::SharingMode) -> Self {
        self.sharing_mode = sharing_mode;
        self
    }
}

/// Owned `VkImage`, destroyed on drop.
pub struct Image {
    device: Arc<ash::Device>,
    image: vk::Image,
    format: vk::Format,
    extent: vk::Extent3D,
    usage: vk::ImageUsageFlags,
    tiling: vk::ImageTiling,
    requirements: vk::MemoryRequirements,
    bound_offset: Option<u64>,
}

impl Image {
    /// Create an unbound image in `UNDEFINED` layout.
    pub fn new(device: Arc<ash::Device>, desc: &ImageDesc) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .flags(desc.flags)
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(desc.sharing_mode)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&image_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        Ok(Self {
            device,
            image,
            format: desc.format,
            extent: desc.extent,
            usage: desc.usage,
            tiling: desc.tiling,
            requirements,
            bound_offset: None,
        })
    }

    pub const fn handle(&self) -> vk::Image {
        self.image
    }

    pub const fn format(&self) -> vk::Format {
        self.format
    }

    pub const fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub const fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub const fn bound_offset(&self) -> Option<u64> {
        self.bound_offset
    }
}

impl MemoryObject for Image {
    fn memory_requirements(&self) -> vk::MemoryRequirements {
        self.requirements
    }

    fn is_linear(&self) -> bool {
        self.tiling == vk::ImageTiling::LINEAR
    }

    fn bind(&mut self, memory: vk::DeviceMemory, offset: u64) -> std::result::Result<(), vk::Result> {
        unsafe { self.device.bind_image_memory(self.image, memory, offset)? };
        self.bound_offset = Some(offset);
        Ok(())
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}
