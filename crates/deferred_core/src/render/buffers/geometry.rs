//! Geometry buffers
//!
//! Vertex and index data uploaded once and never modified. The staged path writes
//! into host-visible staging buffers and copies them into device-local memory with
//! one blocking transfer; the direct path allocates the destination host-visible
//! and writes into it. Both return only after the data is fully in place.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use crate::config::UploadPath;
use crate::render::vulkan::{Buffer, ResourceKind, VulkanContext, VulkanError, VulkanResult};

use super::layout::UniformStrategy;

/// Vertex layout shared by every pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Texture coordinate
    pub tex_coord: [f32; 2],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Tangent
    pub tangent: [f32; 3],
    /// Bitangent
    pub bitangent: [f32; 3],
}

impl Vertex {
    /// Vertex at `position` with every other attribute zeroed
    pub fn at(position: [f32; 3]) -> Self {
        Self { position, ..Self::default() }
    }
}

/// Device-resident vertex and 32-bit index buffers
pub struct GeometryBuffers {
    context: Arc<VulkanContext>,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    vertex_count: u32,
    index_count: u32,
    upload: UploadPath,
}

impl GeometryBuffers {
    /// Upload `vertices` and `indices` along `upload`
    pub fn upload(
        context: &Arc<VulkanContext>,
        vertices: &[Vertex],
        indices: &[u32],
        upload: UploadPath,
        strategy: UniformStrategy,
    ) -> VulkanResult<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(VulkanError::InvalidSceneSize {
                strategy,
                reason: format!(
                    "geometry needs vertices and indices (got {} vertices, {} indices)",
                    vertices.len(),
                    indices.len()
                ),
            });
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);

        let (vertex_buffer, index_buffer) = match upload {
            UploadPath::Staged => Self::staged(context, vertex_bytes, index_bytes)?,
            UploadPath::Direct => (
                Self::direct(context, vertex_bytes, vk::BufferUsageFlags::VERTEX_BUFFER, ResourceKind::VertexBuffer)?,
                Self::direct(context, index_bytes, vk::BufferUsageFlags::INDEX_BUFFER, ResourceKind::IndexBuffer)?,
            ),
        };

        log::info!(
            "Uploaded geometry ({:?}): {} vertices ({} bytes), {} indices ({} bytes)",
            upload,
            vertices.len(),
            vertex_bytes.len(),
            indices.len(),
            index_bytes.len()
        );

        Ok(Self {
            context: Arc::clone(context),
            vertex_buffer,
            index_buffer,
            vertex_count: count_u32(vertices.len())?,
            index_count: count_u32(indices.len())?,
            upload,
        })
    }

    fn staged(
        context: &Arc<VulkanContext>,
        vertex_bytes: &[u8],
        index_bytes: &[u8],
    ) -> VulkanResult<(Buffer, Buffer)> {
        let vertex_staging = Self::staging(context, vertex_bytes)?;
        let index_staging = Self::staging(context, index_bytes)?;

        let vertex_buffer = Self::device_local(
            context,
            vertex_staging.size(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            ResourceKind::VertexBuffer,
        )?;
        let index_buffer = Self::device_local(
            context,
            index_staging.size(),
            vk::BufferUsageFlags::INDEX_BUFFER,
            ResourceKind::IndexBuffer,
        )?;

        // Both copies share one submission
        context.execute_one_shot(|recorder| {
            recorder.cmd_copy_buffer(vertex_staging.handle(), vertex_buffer.handle(), vertex_staging.size());
            recorder.cmd_copy_buffer(index_staging.handle(), index_buffer.handle(), index_staging.size());
            Ok(())
        })?;

        log::debug!(
            "Staged {} vertex bytes and {} index bytes into device-local memory",
            vertex_staging.size(),
            index_staging.size()
        );
        Ok((vertex_buffer, index_buffer))
    }

    fn staging(context: &Arc<VulkanContext>, data: &[u8]) -> VulkanResult<Buffer> {
        let staging = Buffer::host_visible(
            context,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            ResourceKind::StagingBuffer,
        )?;
        staging.write_bytes(0, data)?;
        Ok(staging)
    }

    fn device_local(
        context: &Arc<VulkanContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        kind: ResourceKind,
    ) -> VulkanResult<Buffer> {
        Buffer::new(
            context,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            kind,
        )
    }

    fn direct(
        context: &Arc<VulkanContext>,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        kind: ResourceKind,
    ) -> VulkanResult<Buffer> {
        let buffer = Buffer::host_visible(
            context,
            data.len() as vk::DeviceSize,
            usage | vk::BufferUsageFlags::TRANSFER_SRC,
            kind,
        )?;
        buffer.write_bytes(0, data)?;
        Ok(buffer)
    }

    /// Copy both buffers back to the host through a readback buffer
    ///
    /// Returns the vertex bytes and the index bytes. Blocks until the copy completes.
    pub fn read_back(&self) -> VulkanResult<(Vec<u8>, Vec<u8>)> {
        let vertex_bytes = self.read_buffer(&self.vertex_buffer)?;
        let index_bytes = self.read_buffer(&self.index_buffer)?;
        Ok((vertex_bytes, index_bytes))
    }

    fn read_buffer(&self, source: &Buffer) -> VulkanResult<Vec<u8>> {
        let readback = Buffer::host_visible(
            &self.context,
            source.size(),
            vk::BufferUsageFlags::TRANSFER_DST,
            ResourceKind::ReadbackBuffer,
        )?;

        self.context.execute_one_shot(|recorder| {
            recorder.cmd_copy_buffer(source.handle(), readback.handle(), source.size());
            Ok(())
        })?;

        readback.read_bytes()
    }

    /// Vertex buffer handle
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    /// Index buffer handle
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Path the data took to the device
    pub fn upload_path(&self) -> UploadPath {
        self.upload
    }
}

fn count_u32(len: usize) -> VulkanResult<u32> {
    u32::try_from(len).map_err(|_| VulkanError::InvalidOperation {
        reason: format!("{len} elements exceed the 32-bit draw range"),
    })
}
