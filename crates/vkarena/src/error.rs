//! Arena error types.

use crate::memory::ArenaState;
use ash::vk;
use thiserror::Error;

/// Errors produced by arenas, backends and resource wrappers.
#[derive(Error, Debug)]
pub enum ArenaError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// `allocate` was called before anything was registered.
    #[error("Cannot allocate an arena with no registered resources")]
    EmptyArena,

    /// No memory type satisfies the arena's property mask, not even as a superset.
    #[error("No memory type matches {properties:?} (allowed type bits {type_bits:#034b})")]
    NoSuitableMemory {
        properties: vk::MemoryPropertyFlags,
        type_bits: u32,
    },

    /// The backend refused the allocation.
    #[error("Memory allocation of {size} bytes failed: {reason}")]
    AllocationFailure { size: u64, reason: String },

    /// A resource could not be bound. The arena has been rolled back to empty.
    #[error("Binding resource {index} at offset {offset} failed: {result}")]
    BindFailure {
        index: usize,
        offset: u64,
        #[source]
        result: vk::Result,
    },

    /// Operation not permitted in the arena's current lifecycle state.
    #[error("Cannot {operation} while the arena is {state}")]
    InvalidState {
        operation: &'static str,
        state: ArenaState,
    },

    /// Offset arithmetic overflowed while laying out the resource at `index`.
    #[error("Arena layout overflows at resource {index}")]
    SizeOverflow { index: usize },

    /// Handle belongs to another arena or predates a reset.
    #[error("Resource handle is stale or belongs to another arena")]
    InvalidHandle,

    /// Host access on memory without `HOST_VISIBLE`.
    #[error("Arena memory is not host visible")]
    NotHostVisible,

    /// Host access outside the allocated range.
    #[error("Range {offset}..{end} is outside the {size} byte region")]
    OutOfBounds { offset: u64, end: u64, size: u64 },

    /// The gpu-allocator heap was already shut down.
    #[error("Allocator has been shut down")]
    AllocatorShutdown,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ArenaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    #[test]
    fn error_is_send_sync() {
        assert_impl_all!(ArenaError: Send, Sync, std::error::Error);
    }

    #[test]
    fn bind_failure_keeps_vulkan_source() {
        let err = ArenaError::BindFailure {
            index: 2,
            offset: 512,
            result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(
            source,
            Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.to_string())
        );
        assert!(err.to_string().contains("resource 2"));
    }

    #[test]
    fn invalid_state_names_the_state() {
        let err = ArenaError::InvalidState {
            operation: "register",
            state: ArenaState::Allocated,
        };
        assert_eq!(
            err.to_string(),
            "Cannot register while the arena is allocated"
        );
    }
}
