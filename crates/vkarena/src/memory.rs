//! Device memory arenas.
//!
//! A [`Memory`] packs several resources into one allocation:
//!
//! 1. register buffers, images or any other [`MemoryObject`];
//! 2. call [`Memory::allocate`] once to lay them out, allocate and bind;
//! 3. drop, [`release`](Memory::release) or [`reset`](Memory::reset) the arena.
//!
//! Registered resources are owned by the arena and reached through
//! [`ResourceHandle`]s, so none of them can outlive the memory they are bound to.

use crate::backend::{Allocation, AllocationRequest, ArenaId, LogicalDevice, MemoryDevice};
use crate::buffer::{Buffer, BufferDesc};
use crate::error::{ArenaError, Result};
use crate::image::{Image, ImageDesc};
use crate::layout::{compute_layout, MemoryRequirement};
use crate::resource::{AsAny, MemoryObject, ResourceHandle};
use ash::vk;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaState {
    /// Nothing registered.
    Empty,
    /// Resources registered, no memory yet.
    Registering,
    /// Memory allocated and every resource bound.
    Allocated,
    /// Memory freed; bindings are stale until [`Memory::reset`].
    Released,
}

impl fmt::Display for ArenaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Registering => "registering",
            Self::Allocated => "allocated",
            Self::Released => "released",
        };
        f.write_str(name)
    }
}

struct Slot {
    object: Box<dyn MemoryObject>,
    requirement: MemoryRequirement,
    offset: Option<u64>,
}

/// Builder for creating a [`Memory`].
pub struct MemoryBuilder<D: MemoryDevice> {
    device: Arc<D>,
    name: String,
    properties: vk::MemoryPropertyFlags,
}

impl<D: MemoryDevice> MemoryBuilder<D> {
    /// Set the debug name passed to the backend.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the memory properties the arena must live in.
    pub fn properties(mut self, properties: vk::MemoryPropertyFlags) -> Self {
        self.properties = properties;
        self
    }

    pub fn build(self) -> Memory<D> {
        let id = self.device.arena_ids().issue();
        Memory {
            device: self.device,
            id,
            name: self.name,
            properties: self.properties,
            slots: Vec::new(),
            generation: 0,
            allocation: None,
            allocated_size: 0,
            state: ArenaState::Empty,
        }
    }
}

/// One device allocation shared by every registered resource.
pub struct Memory<D: MemoryDevice> {
    device: Arc<D>,
    id: ArenaId,
    name: String,
    properties: vk::MemoryPropertyFlags,
    slots: Vec<Slot>,
    generation: u32,
    allocation: Option<D::Allocation>,
    allocated_size: u64,
    state: ArenaState,
}

impl<D: MemoryDevice> Memory<D> {
    /// Create an empty arena for memory with `properties`.
    pub fn new(device: Arc<D>, properties: vk::MemoryPropertyFlags) -> Self {
        Self::builder(device).properties(properties).build()
    }

    pub fn builder(device: Arc<D>) -> MemoryBuilder<D> {
        MemoryBuilder {
            device,
            name: "arena".to_string(),
            properties: vk::MemoryPropertyFlags::empty(),
        }
    }

    pub const fn id(&self) -> ArenaId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    pub const fn state(&self) -> ArenaState {
        self.state
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total bytes in use, or `None` when nothing is allocated.
    pub fn allocated_size(&self) -> Option<u64> {
        self.allocation.as_ref().map(|_| self.allocated_size)
    }

    /// Memory object backing the arena while allocated.
    pub fn device_memory(&self) -> Option<vk::DeviceMemory> {
        self.allocation.as_ref().map(Allocation::memory)
    }

    /// Start of the arena inside [`device_memory`](Self::device_memory).
    pub fn base_offset(&self) -> Option<u64> {
        self.allocation.as_ref().map(Allocation::offset)
    }

    /// Hand `object` to the arena. It is bound on [`allocate`](Self::allocate).
    pub fn register<T: MemoryObject>(&mut self, object: T) -> Result<ResourceHandle<T>> {
        if matches!(self.state, ArenaState::Allocated | ArenaState::Released) {
            return Err(ArenaError::InvalidState {
                operation: "register",
                state: self.state,
            });
        }

        let requirement = MemoryRequirement::from(object.memory_requirements());
        let index = self.slots.len();
        self.slots.push(Slot {
            object: Box::new(object),
            requirement,
            offset: None,
        });
        self.state = ArenaState::Registering;

        Ok(ResourceHandle::new(self.id, self.generation, index))
    }

    /// Lay out every registered resource, allocate once and bind them all.
    ///
    /// A failed bind frees the allocation and resets the arena, dropping
    /// every registered resource.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all, fields(arena = %self.name))
    )]
    pub fn allocate(&mut self) -> Result<()> {
        match self.state {
            ArenaState::Empty => return Err(ArenaError::EmptyArena),
            ArenaState::Registering => {}
            state @ (ArenaState::Allocated | ArenaState::Released) => {
                return Err(ArenaError::InvalidState {
                    operation: "allocate",
                    state,
                })
            }
        }

        let requirements: Vec<MemoryRequirement> =
            self.slots.iter().map(|slot| slot.requirement).collect();
        let layout = compute_layout(&requirements)?;

        let memory_type_index = self
            .device
            .find_memory_type(self.properties, layout.memory_type_bits)
            .ok_or(ArenaError::NoSuitableMemory {
                properties: self.properties,
                type_bits: layout.memory_type_bits,
            })?;

        let linear = self.slots.iter().all(|slot| slot.object.is_linear());
        let allocation = self.device.allocate(&AllocationRequest {
            name: &self.name,
            size: layout.size,
            alignment: layout.alignment,
            memory_type_index,
            linear,
        })?;

        tracing::debug!(
            "Arena '{}': {} resources in {} bytes of memory type {}",
            self.name,
            self.slots.len(),
            layout.size,
            memory_type_index
        );

        let memory = allocation.memory();
        let base = allocation.offset();
        let mut failure = None;
        for (index, (slot, &offset)) in self.slots.iter_mut().zip(&layout.offsets).enumerate() {
            match slot.object.bind(memory, base + offset) {
                Ok(()) => slot.offset = Some(offset),
                Err(result) => {
                    failure = Some(ArenaError::BindFailure {
                        index,
                        offset,
                        result,
                    });
                    break;
                }
            }
        }

        if let Some(err) = failure {
            tracing::warn!("Arena '{}': {err}, rolling back", self.name);
            // Resources go before the memory they are bound to.
            self.slots.clear();
            self.device.free(allocation);
            self.reset();
            return Err(err);
        }

        self.allocation = Some(allocation);
        self.allocated_size = layout.size;
        self.state = ArenaState::Allocated;
        Ok(())
    }

    /// Free the allocation, keeping the registered resources.
    ///
    /// Does nothing when no allocation is held.
    pub fn release(&mut self) {
        let Some(allocation) = self.allocation.take() else {
            return;
        };

        self.device.free(allocation);
        self.allocated_size = 0;
        for slot in &mut self.slots {
            slot.offset = None;
        }
        self.state = ArenaState::Released;
        tracing::debug!("Arena '{}' released", self.name);
    }

    /// Release and drop every registered resource, returning to
    /// [`ArenaState::Empty`]. Handles issued before the reset go stale.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.release();
        self.generation = self.generation.wrapping_add(1);
        self.state = ArenaState::Empty;
    }

    fn slot(&self, arena: ArenaId, generation: u32, index: usize) -> Option<&Slot> {
        if arena != self.id || generation != self.generation {
            return None;
        }
        self.slots.get(index)
    }

    /// Registered resource behind `handle`.
    pub fn get<T: MemoryObject>(&self, handle: ResourceHandle<T>) -> Option<&T> {
        let slot = self.slot(handle.arena, handle.generation, handle.index)?;
        AsAny::as_any(&*slot.object).downcast_ref::<T>()
    }

    pub fn get_mut<T: MemoryObject>(&mut self, handle: ResourceHandle<T>) -> Option<&mut T> {
        if handle.arena != self.id || handle.generation != self.generation {
            return None;
        }
        let slot = self.slots.get_mut(handle.index)?;
        AsAny::as_any_mut(&mut *slot.object).downcast_mut::<T>()
    }

    /// Offset of the resource relative to the start of the arena.
    ///
    /// `None` until allocated and again after release.
    pub fn offset<T>(&self, handle: ResourceHandle<T>) -> Option<u64> {
        self.slot(handle.arena, handle.generation, handle.index)?
            .offset
    }

    /// Requirement captured when the resource was registered.
    pub fn requirement<T>(&self, handle: ResourceHandle<T>) -> Option<MemoryRequirement> {
        self.slot(handle.arena, handle.generation, handle.index)
            .map(|slot| slot.requirement)
    }

    /// Copy `data` into the arena at `offset` bytes from its start.
    ///
    /// An empty `data` is validated like any other copy but never maps.
    pub fn copy_from_host<T: bytemuck::Pod>(&self, offset: u64, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let (allocation, start) = self.host_range("copy_from_host", offset, bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }

        unsafe {
            let ptr = self.device.map(allocation)?.as_ptr().add(start);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
            let flushed = if self.is_coherent() {
                Ok(())
            } else {
                self.device.flush(allocation)
            };
            self.device.unmap(allocation);
            flushed
        }
    }

    /// Copy bytes at `offset` from the start of the arena into `out`.
    pub fn copy_to_host<T: bytemuck::Pod>(&self, offset: u64, out: &mut [T]) -> Result<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        let (allocation, start) = self.host_range("copy_to_host", offset, bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }

        unsafe {
            let ptr = self.device.map(allocation)?.as_ptr().add(start);
            let invalidated = if self.is_coherent() {
                Ok(())
            } else {
                self.device.invalidate(allocation)
            };
            if invalidated.is_ok() {
                std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), bytes.len());
            }
            self.device.unmap(allocation);
            invalidated
        }
    }

    /// Write `data` at the start of the resource behind `handle`.
    pub fn write<R, T: bytemuck::Pod>(&self, handle: ResourceHandle<R>, data: &[T]) -> Result<()> {
        let offset = self.resource_range(handle, std::mem::size_of_val(data))?;
        self.copy_from_host(offset, data)
    }

    /// Read the start of the resource behind `handle` into `out`.
    pub fn read<R, T: bytemuck::Pod>(&self, handle: ResourceHandle<R>, out: &mut [T]) -> Result<()> {
        let offset = self.resource_range(handle, std::mem::size_of_val(out))?;
        self.copy_to_host(offset, out)
    }

    fn is_coherent(&self) -> bool {
        self.properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Validate host access and return the allocation and the start of the
    /// range relative to the mapped allocation.
    fn host_range(
        &self,
        operation: &'static str,
        offset: u64,
        len: usize,
    ) -> Result<(&D::Allocation, usize)> {
        let allocation = match (&self.allocation, self.state) {
            (Some(allocation), ArenaState::Allocated) => allocation,
            (_, state) => return Err(ArenaError::InvalidState { operation, state }),
        };
        if !self
            .properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            return Err(ArenaError::NotHostVisible);
        }

        let len = len as u64;
        let end = offset.checked_add(len).ok_or(ArenaError::OutOfBounds {
            offset,
            end: u64::MAX,
            size: self.allocated_size,
        })?;
        if end > self.allocated_size {
            return Err(ArenaError::OutOfBounds {
                offset,
                end,
                size: self.allocated_size,
            });
        }
        let start = usize::try_from(offset).map_err(|_| ArenaError::OutOfBounds {
            offset,
            end,
            size: self.allocated_size,
        })?;
        Ok((allocation, start))
    }

    /// Arena offset of a resource, checking `len` bytes fit inside it.
    fn resource_range<R>(&self, handle: ResourceHandle<R>, len: usize) -> Result<u64> {
        let slot = self
            .slot(handle.arena, handle.generation, handle.index)
            .ok_or(ArenaError::InvalidHandle)?;
        let Some(offset) = slot.offset else {
            return Err(ArenaError::InvalidState {
                operation: "access resource",
                state: self.state,
            });
        };
        let len = len as u64;
        if len > slot.requirement.size {
            return Err(ArenaError::OutOfBounds {
                offset: 0,
                end: len,
                size: slot.requirement.size,
            });
        }
        Ok(offset)
    }
}

impl<D: MemoryDevice + LogicalDevice> Memory<D> {
    /// Create a buffer and register it.
    pub fn create_buffer(&mut self, desc: &BufferDesc) -> Result<ResourceHandle<Buffer>> {
        self.ensure_registrable("create_buffer")?;
        let buffer = Buffer::new(self.device.logical().clone(), desc)?;
        self.register(buffer)
    }

    /// Create an image and register it.
    pub fn create_image(&mut self, desc: &ImageDesc) -> Result<ResourceHandle<Image>> {
        self.ensure_registrable("create_image")?;
        let image = Image::new(self.device.logical().clone(), desc)?;
        self.register(image)
    }

    fn ensure_registrable(&self, operation: &'static str) -> Result<()> {
        match self.state {
            ArenaState::Empty | ArenaState::Registering => Ok(()),
            state => Err(ArenaError::InvalidState { operation, state }),
        }
    }
}

impl<D: MemoryDevice> Drop for Memory<D> {
    fn drop(&mut self) {
        // Resources go first so nothing is still bound when the memory is freed.
        self.slots.clear();
        self.release();
    }
}

impl<D: MemoryDevice> fmt::Debug for Memory<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("id", &self.id.get())
            .field("name", &self.name)
            .field("properties", &self.properties)
            .field("resources", &self.slots.len())
            .field("state", &self.state)
            .field("allocated_size", &self.allocated_size)
            .finish()
    }
}
