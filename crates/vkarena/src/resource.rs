//! Resources that can be bound into an arena.

use crate::backend::ArenaId;
use ash::vk;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// Type-erasure helper so the arena can hand back concrete resource types.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A GPU object that needs a slice of device memory.
pub trait MemoryObject: AsAny + Send {
    /// Size, alignment and allowed memory types, as reported by Vulkan.
    fn memory_requirements(&self) -> vk::MemoryRequirements;

    /// Linear resources may share a page with other linear resources.
    fn is_linear(&self) -> bool {
        true
    }

    /// Bind the object to `memory` at `offset`.
    fn bind(&mut self, memory: vk::DeviceMemory, offset: u64) -> Result<(), vk::Result>;
}

/// Typed index of a resource registered in a [`Memory`](crate::Memory).
///
/// Only resolves against the arena that issued it, and only until that arena
/// is reset.
pub struct ResourceHandle<T> {
    pub(crate) arena: ArenaId,
    pub(crate) generation: u32,
    pub(crate) index: usize,
    marker: PhantomData<fn() -> T>,
}

impl<T> ResourceHandle<T> {
    pub(crate) const fn new(arena: ArenaId, generation: u32, index: usize) -> Self {
        Self {
            arena,
            generation,
            index,
            marker: PhantomData,
        }
    }

    /// Registration order of the resource inside its arena.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Arena that issued this handle.
    pub const fn arena(&self) -> ArenaId {
        self.arena
    }
}

impl<T> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ResourceHandle<T> {}

impl<T> PartialEq for ResourceHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.arena == other.arena
            && self.generation == other.generation
            && self.index == other.index
    }
}

impl<T> Eq for ResourceHandle<T> {}

impl<T> fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("arena", &self.arena.get())
            .field("generation", &self.generation)
            .field("index", &self.index)
            .finish()
    }
}
