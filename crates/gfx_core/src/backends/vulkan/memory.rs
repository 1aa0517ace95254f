//! Device memory allocation
//!
//! Every buffer and texture gets its own dedicated allocation. Host-visible memory
//! is mapped only for the duration of a read or write.

use ash::{vk, Device};

use super::conversions::memory_property_candidates;
use super::{VulkanError, VulkanResult};
use crate::graphics::resources::MemoryUsage;

/// Find a memory type allowed by `type_filter` with all `properties`
pub fn find_memory_type(
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        (type_filter & (1 << i)) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}

/// Pick the first memory type matching the candidates for `usage`
pub fn select_memory_type(
    type_filter: u32,
    usage: MemoryUsage,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> VulkanResult<u32> {
    memory_property_candidates(usage)
        .iter()
        .find_map(|&properties| find_memory_type(type_filter, properties, memory_properties))
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// Allocate memory for `requirements`
pub fn allocate(
    device: &Device,
    requirements: vk::MemoryRequirements,
    usage: MemoryUsage,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> VulkanResult<vk::DeviceMemory> {
    let memory_type_index = select_memory_type(
        requirements.memory_type_bits,
        usage,
        memory_properties,
    )?;
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { device.allocate_memory(&alloc_info, None) }.map_err(|err| match err {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            VulkanError::OutOfMemory {
                requested: requirements.size,
            }
        }
        other => VulkanError::Api(other),
    })
}

/// Copy `data` into mapped memory at `offset`
pub fn write_mapped(
    device: &Device,
    memory: vk::DeviceMemory,
    offset: u64,
    data: &[u8],
) -> VulkanResult<()> {
    if data.is_empty() {
        return Ok(());
    }
    unsafe {
        let ptr = device
            .map_memory(memory, offset, data.len() as u64, vk::MemoryMapFlags::empty())
            .map_err(VulkanError::Api)?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
        device.unmap_memory(memory);
    }
    Ok(())
}

/// Copy mapped memory at `offset` into `out`
pub fn read_mapped(
    device: &Device,
    memory: vk::DeviceMemory,
    offset: u64,
    out: &mut [u8],
) -> VulkanResult<()> {
    if out.is_empty() {
        return Ok(());
    }
    unsafe {
        let ptr = device
            .map_memory(memory, offset, out.len() as u64, vk::MemoryMapFlags::empty())
            .map_err(VulkanError::Api)?;
        std::ptr::copy_nonoverlapping(ptr.cast::<u8>().cast_const(), out.as_mut_ptr(), out.len());
        device.unmap_memory(memory);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = flags;
        }
        props
    }

    #[test]
    fn test_memory_type_respects_filter() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(find_memory_type(0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL, &props), Some(0));
        assert_eq!(find_memory_type(0b110, vk::MemoryPropertyFlags::DEVICE_LOCAL, &props), Some(2));
        assert_eq!(find_memory_type(0b001, vk::MemoryPropertyFlags::HOST_VISIBLE, &props), None);
    }

    #[test]
    fn test_readback_falls_back_to_uncached_memory() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        assert_eq!(
            select_memory_type(0b11, MemoryUsage::Readback, &props)
                .expect("Should find coherent memory"),
            1
        );
        assert!(matches!(
            select_memory_type(0b01, MemoryUsage::StageEveryFrame, &props),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }
}
