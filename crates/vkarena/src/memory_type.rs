//! Memory type selection.

use ash::vk;

/// Pick a memory type for `properties` among the types allowed by `type_bits`.
///
/// A type whose flags equal `properties` exactly wins over one that merely
/// contains them. Among equals the lowest index is returned.
pub fn select_memory_type(
    memory_types: &[vk::MemoryType],
    properties: vk::MemoryPropertyFlags,
    type_bits: u32,
) -> Option<u32> {
    let allowed = |index: usize| index < vk::MAX_MEMORY_TYPES && type_bits & (1u32 << index) != 0;

    let exact = memory_types
        .iter()
        .enumerate()
        .position(|(index, ty)| allowed(index) && ty.property_flags == properties);

    exact
        .or_else(|| {
            memory_types
                .iter()
                .enumerate()
                .position(|(index, ty)| allowed(index) && ty.property_flags.contains(properties))
        })
        .map(|index| index as u32)
}

/// Memory types reported by the physical device, trimmed to the valid count.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn query_memory_types(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Vec<vk::MemoryType> {
    let props = unsafe { instance.get_physical_device_memory_properties(physical_device) };
    props
        .memory_types
        .iter()
        .take(props.memory_type_count as usize)
        .copied()
        .collect()
}
