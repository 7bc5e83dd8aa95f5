//! Offset packing for arena allocations.
//!
//! Resources are laid out back to back in registration order. Each offset is
//! rounded up to the alignment of the resource placed there, so the packing is
//! a plain bump allocator over a list known up front.

use crate::error::{ArenaError, Result};
use ash::vk;

/// Size and alignment a resource needs, captured once at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirement {
    /// Byte size of the resource.
    pub size: u64,
    /// Required offset alignment. Zero is treated as one.
    pub alignment: u64,
    /// Bit `i` set means memory type `i` is acceptable.
    pub memory_type_bits: u32,
}

impl MemoryRequirement {
    /// Requirement that accepts any memory type.
    pub const fn new(size: u64, alignment: u64) -> Self {
        Self {
            size,
            alignment,
            memory_type_bits: u32::MAX,
        }
    }
}

impl From<vk::MemoryRequirements> for MemoryRequirement {
    fn from(req: vk::MemoryRequirements) -> Self {
        Self {
            size: req.size,
            alignment: req.alignment,
            memory_type_bits: req.memory_type_bits,
        }
    }
}

/// Computed placement of every resource inside one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Offset per resource, in registration order.
    pub offsets: Vec<u64>,
    /// Total bytes needed: last offset plus last size.
    pub size: u64,
    /// Largest alignment of any resource.
    pub alignment: u64,
    /// Memory types acceptable to every resource.
    pub memory_type_bits: u32,
}

/// Round `offset` up to the next multiple of `alignment`.
///
/// Returns `None` on overflow.
pub const fn align_up(offset: u64, alignment: u64) -> Option<u64> {
    if alignment <= 1 {
        return Some(offset);
    }
    let rem = offset % alignment;
    if rem == 0 {
        Some(offset)
    } else {
        offset.checked_add(alignment - rem)
    }
}

/// Lay out `requirements` back to back.
///
/// The first resource always sits at offset 0. Every following resource
/// starts at the end of its predecessor, rounded up to its own alignment.
pub fn compute_layout(requirements: &[MemoryRequirement]) -> Result<Layout> {
    if requirements.is_empty() {
        return Err(ArenaError::EmptyArena);
    }

    let mut offsets = Vec::with_capacity(requirements.len());
    let mut cursor = 0u64;
    let mut alignment = 1u64;
    let mut memory_type_bits = u32::MAX;

    for (index, req) in requirements.iter().enumerate() {
        let offset = align_up(cursor, req.alignment).ok_or(ArenaError::SizeOverflow { index })?;
        cursor = offset
            .checked_add(req.size)
            .ok_or(ArenaError::SizeOverflow { index })?;

        offsets.push(offset);
        alignment = alignment.max(req.alignment);
        memory_type_bits &= req.memory_type_bits;
    }

    Ok(Layout {
        offsets,
        size: cursor,
        alignment,
        memory_type_bits,
    })
}
