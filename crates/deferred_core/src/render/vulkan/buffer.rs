//! Buffer management for geometry and uniforms
//!
//! Memory management following RAII patterns with proper allocation and cleanup.

use ash::vk;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{DeviceMemory, ResourceKind, VulkanContext, VulkanError, VulkanResult};

/// Memory flags for every buffer the CPU writes
pub const HOST_WRITABLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Buffer wrapper with memory management
///
/// Field order matters: the buffer handle is destroyed before its memory is freed.
pub struct Buffer {
    context: Arc<VulkanContext>,
    buffer: vk::Buffer,
    memory: DeviceMemory,
    size: vk::DeviceSize,
    kind: ResourceKind,
}

impl Buffer {
    /// Create a new buffer with memory allocation
    pub fn new(
        context: &Arc<VulkanContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        kind: ResourceKind,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            context.device().create_buffer(&buffer_info, None)
                .map_err(VulkanError::creation(kind))?
        };

        let memory = match DeviceMemory::for_buffer(context, buffer, properties, kind) {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { context.device().destroy_buffer(buffer, None) };
                return Err(error);
            }
        };

        Ok(Self {
            context: Arc::clone(context),
            buffer,
            memory,
            size,
            kind,
        })
    }

    /// Create a host-visible, host-coherent buffer
    pub fn host_visible(
        context: &Arc<VulkanContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        kind: ResourceKind,
    ) -> VulkanResult<Self> {
        Self::new(context, size, usage, HOST_WRITABLE, kind)
    }

    /// Write bytes at `offset`; the buffer must be host-visible
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        if offset + data.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "write of {} bytes at {offset} overflows {} of {} bytes",
                    data.len(), self.kind, self.size
                ),
            });
        }
        self.memory.write(offset, data)
    }

    /// Write a slice of plain data from the start of the buffer
    pub fn write_data<T: bytemuck::Pod>(&self, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Read the whole buffer; the buffer must be host-visible
    pub fn read_bytes(&self) -> VulkanResult<Vec<u8>> {
        let len = usize::try_from(self.size).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{} of {} bytes does not fit in host memory", self.kind, self.size),
        })?;
        self.memory.read(0, len)
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size requested at creation
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// What this buffer holds
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Backing memory
    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_buffer(self.buffer, None);
        }
    }
}

/// Fixed-size uniform buffer holding one `T`
pub struct UniformBuffer<T> {
    buffer: Buffer,
    _phantom: PhantomData<T>,
}

impl<T: bytemuck::Pod> UniformBuffer<T> {
    /// Create uniform buffer
    pub fn new(context: &Arc<VulkanContext>) -> VulkanResult<Self> {
        let size = std::mem::size_of::<T>() as vk::DeviceSize;

        let buffer = Buffer::host_visible(
            context,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            ResourceKind::UniformBuffer,
        )?;

        Ok(Self {
            buffer,
            _phantom: PhantomData,
        })
    }

    /// Update uniform data
    pub fn update(&self, data: &T) -> VulkanResult<()> {
        self.buffer.write_data(std::slice::from_ref(data))
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }
}
