//! Host-side parameter arena
//!
//! One contiguous byte block laid out exactly like the packed dynamic buffer.
//! Matrices are written at `region base + index * stride` and the block (or one
//! region of it) is copied into mapped device memory when flushed.

use crate::foundation::math::{Mat4, Mat4Ext, MAT4_SIZE};
use crate::render::vulkan::{VulkanError, VulkanResult};

use super::layout::{ParameterLayout, ParameterRegion};

/// Stride-indexed host copy of every per-element parameter region
#[derive(Debug, Clone)]
pub struct ParameterArena {
    layout: ParameterLayout,
    bytes: Vec<u8>,
}

impl ParameterArena {
    /// Zero-filled arena sized for `layout`
    pub fn new(layout: ParameterLayout) -> VulkanResult<Self> {
        let size = host_len(layout.packed_size())?;
        Ok(Self {
            layout,
            bytes: vec![0; size],
        })
    }

    /// Layout the arena follows
    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    /// Store `matrix` as element `index` of `region`
    pub fn write_matrix(&mut self, region: ParameterRegion, index: u32, matrix: &Mat4) -> VulkanResult<()> {
        let start = host_len(self.layout.packed_offset(region, index)?)?;
        self.bytes[start..start + MAT4_SIZE].copy_from_slice(matrix.as_bytes());
        Ok(())
    }

    /// Element `index` of `region`
    pub fn matrix(&self, region: ParameterRegion, index: u32) -> VulkanResult<Mat4> {
        let start = host_len(self.layout.packed_offset(region, index)?)?;
        let floats: [f32; 16] = bytemuck::pod_read_unaligned(&self.bytes[start..start + MAT4_SIZE]);
        Ok(Mat4::from_column_slice(&floats))
    }

    /// Bytes of one region, starting at its element 0
    pub fn region_bytes(&self, region: ParameterRegion) -> VulkanResult<&[u8]> {
        let span = self.layout.span(region);
        let start = host_len(span.base)?;
        let end = host_len(span.end(self.layout.stride()))?;
        Ok(&self.bytes[start..end])
    }

    /// The whole arena in packed order
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn host_len(size: u64) -> VulkanResult<usize> {
    usize::try_from(size).map_err(|_| VulkanError::InvalidOperation {
        reason: format!("parameter arena offset {size} exceeds host address space"),
    })
}
