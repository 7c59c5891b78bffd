//! Device memory allocation
//!
//! Scans the device's memory-type table in index order and takes the first type
//! that the resource accepts and that provides every required property. There is
//! no fallback: a resource that cannot be placed aborts its own construction.

use ash::vk;
use std::sync::Arc;

use super::{ResourceKind, VulkanContext, VulkanError, VulkanResult};

/// Find the first memory type allowed by `type_bits` whose flags contain `required`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);

    (0..count).find(|&index| {
        (type_bits & (1 << index)) != 0
            && memory_properties.memory_types[index as usize]
                .property_flags
                .contains(required)
    })
}

/// Device memory allocation with RAII cleanup
pub struct DeviceMemory {
    context: Arc<VulkanContext>,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    memory_type_index: u32,
}

impl DeviceMemory {
    /// Allocate memory satisfying `requirements` and `required`
    pub fn allocate(
        context: &Arc<VulkanContext>,
        requirements: vk::MemoryRequirements,
        required: vk::MemoryPropertyFlags,
        resource: ResourceKind,
    ) -> VulkanResult<Self> {
        let memory_type_index = find_memory_type(
            context.memory_properties(),
            requirements.memory_type_bits,
            required,
        )
        .ok_or(VulkanError::NoCompatibleMemoryType {
            resource,
            type_bits: requirements.memory_type_bits,
            required,
        })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe {
            context.device().allocate_memory(&alloc_info, None)
                .map_err(VulkanError::creation(resource))?
        };

        log::debug!(
            "Allocated {} bytes for {} from memory type {} ({:?})",
            requirements.size, resource, memory_type_index, required
        );

        Ok(Self {
            context: Arc::clone(context),
            memory,
            size: requirements.size,
            memory_type_index,
        })
    }

    /// Allocate memory for `buffer` and bind it at offset 0
    pub fn for_buffer(
        context: &Arc<VulkanContext>,
        buffer: vk::Buffer,
        required: vk::MemoryPropertyFlags,
        resource: ResourceKind,
    ) -> VulkanResult<Self> {
        let requirements = unsafe { context.device().get_buffer_memory_requirements(buffer) };
        let memory = Self::allocate(context, requirements, required, resource)?;

        unsafe {
            context.device().bind_buffer_memory(buffer, memory.memory, 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(memory)
    }

    /// Allocate memory for `image` and bind it at offset 0
    pub fn for_image(
        context: &Arc<VulkanContext>,
        image: vk::Image,
        required: vk::MemoryPropertyFlags,
        resource: ResourceKind,
    ) -> VulkanResult<Self> {
        let requirements = unsafe { context.device().get_image_memory_requirements(image) };
        let memory = Self::allocate(context, requirements, required, resource)?;

        unsafe {
            context.device().bind_image_memory(image, memory.memory, 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(memory)
    }

    /// Copy `data` into the allocation at `offset`
    ///
    /// The allocation must be host-visible and host-coherent.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let len = data.len() as vk::DeviceSize;
        if offset + len > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {len} bytes at {offset} exceeds allocation of {} bytes", self.size),
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        unsafe {
            let mapped = self.context.device()
                .map_memory(self.memory, offset, len, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast::<u8>(), data.len());
            self.context.device().unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Read `len` bytes starting at `offset`
    ///
    /// The allocation must be host-visible and host-coherent.
    pub fn read(&self, offset: vk::DeviceSize, len: usize) -> VulkanResult<Vec<u8>> {
        if offset + len as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("read of {len} bytes at {offset} exceeds allocation of {} bytes", self.size),
            });
        }

        let mut bytes = vec![0u8; len];
        if len == 0 {
            return Ok(bytes);
        }

        unsafe {
            let mapped = self.context.device()
                .map_memory(self.memory, offset, len as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(mapped.cast::<u8>(), bytes.as_mut_ptr(), len);
            self.context.device().unmap_memory(self.memory);
        }
        Ok(bytes)
    }

    /// Get the memory handle
    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Allocation size in bytes (may exceed the resource's own size)
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Index of the selected memory type
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        unsafe {
            self.context.device().free_memory(self.memory, None);
        }
    }
}
