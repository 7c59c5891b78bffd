//! Per-pass parameter buffers
//!
//! One closed variant per uniform strategy. Every variant keeps a host-side
//! [`ParameterArena`] that callers write matrices into; `flush` copies it into
//! the mapped device buffers the strategy owns.
//!
//! | Strategy      | Static buffers                 | Dynamic buffers                 |
//! |---------------|--------------------------------|---------------------------------|
//! | GlobalPacked  | `FrameGlobals`                 | one, all four regions packed    |
//! | Individual    | `CameraUniform`, `LightingGlobals` | one per region              |
//! | PushConstants | none                           | none                            |

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use crate::foundation::math::{Mat4, MAT4_SIZE};
use crate::render::vulkan::{Buffer, ResourceKind, UniformBuffer, VulkanContext, VulkanError, VulkanResult};

use super::arena::ParameterArena;
use super::layout::{to_dynamic_offset, ParameterLayout, ParameterRegion, SceneSize, UniformStrategy};

fn columns(matrix: &Mat4) -> [f32; 16] {
    let mut out = [0.0; 16];
    out.copy_from_slice(matrix.as_slice());
    out
}

/// Static block of the packed strategy: camera view-projection and global scalars
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameGlobals {
    /// Camera view-projection, column-major
    pub view_projection: [f32; 16],
    /// Global scalars packed into a matrix
    pub data: [f32; 16],
}

impl FrameGlobals {
    /// Build from matrices
    pub fn new(view_projection: &Mat4, data: &Mat4) -> Self {
        Self {
            view_projection: columns(view_projection),
            data: columns(data),
        }
    }
}

/// Camera block of the individual strategy
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    /// Camera view-projection, column-major
    pub view_projection: [f32; 16],
}

/// Lighting scalars block of the individual strategy
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightingGlobals {
    /// Global scalars packed into a matrix
    pub data: [f32; 16],
}

/// Inline constants pushed per draw: model, view, projection
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PushConstantBlock {
    matrices: [[f32; 16]; 3],
}

impl PushConstantBlock {
    /// Size of the block in bytes
    pub const SIZE: usize = 3 * MAT4_SIZE;

    /// Build from the three matrices in slot order
    pub fn new(model: &Mat4, view: &Mat4, projection: &Mat4) -> Self {
        Self {
            matrices: [columns(model), columns(view), columns(projection)],
        }
    }

    /// Raw bytes for `vkCmdPushConstants`
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Buffers of the packed strategy
pub struct PackedParameters {
    arena: ParameterArena,
    globals: UniformBuffer<FrameGlobals>,
    dynamic: Buffer,
}

/// Buffers of the individual strategy, one per logical region
pub struct IndividualParameters {
    arena: ParameterArena,
    camera: UniformBuffer<CameraUniform>,
    lighting: UniformBuffer<LightingGlobals>,
    regions: [Buffer; 4],
}

/// Parameter buffers for the active strategy
pub enum ParameterBuffers {
    /// One static and one packed dynamic buffer
    GlobalPacked(PackedParameters),
    /// Two static buffers and four dynamic buffers
    Individual(IndividualParameters),
    /// No buffers; the arena only stages matrices for inline pushes
    PushConstants(ParameterArena),
}

impl ParameterBuffers {
    /// Validate `scene` and allocate the buffers `strategy` needs
    ///
    /// Counts are checked before any device call is issued.
    pub fn new(context: &Arc<VulkanContext>, strategy: UniformStrategy, scene: SceneSize) -> VulkanResult<Self> {
        scene.validate_for(strategy)?;

        let layout = ParameterLayout::new(scene, context.min_uniform_buffer_offset_alignment());
        let arena = ParameterArena::new(layout)?;

        let buffers = match strategy {
            UniformStrategy::GlobalPacked => Self::GlobalPacked(PackedParameters {
                globals: UniformBuffer::new(context)?,
                dynamic: dynamic_buffer(context, layout.packed_size())?,
                arena,
            }),
            UniformStrategy::Individual => Self::Individual(IndividualParameters {
                camera: UniformBuffer::new(context)?,
                lighting: UniformBuffer::new(context)?,
                regions: [
                    dynamic_buffer(context, layout.region_size(ParameterRegion::ShadowViewProjection))?,
                    dynamic_buffer(context, layout.region_size(ParameterRegion::ModelWorld))?,
                    dynamic_buffer(context, layout.region_size(ParameterRegion::LightViewProjection))?,
                    dynamic_buffer(context, layout.region_size(ParameterRegion::LightData))?,
                ],
                arena,
            }),
            UniformStrategy::PushConstants => Self::PushConstants(arena),
        };

        log::info!(
            "Parameter buffers ready: {:?}, stride {} bytes, {:?}, {} dynamic bytes",
            strategy,
            layout.stride(),
            scene,
            buffers.dynamic_size()
        );

        Ok(buffers)
    }

    /// Strategy these buffers implement
    pub fn strategy(&self) -> UniformStrategy {
        match self {
            Self::GlobalPacked(_) => UniformStrategy::GlobalPacked,
            Self::Individual(_) => UniformStrategy::Individual,
            Self::PushConstants(_) => UniformStrategy::PushConstants,
        }
    }

    fn arena(&self) -> &ParameterArena {
        match self {
            Self::GlobalPacked(packed) => &packed.arena,
            Self::Individual(individual) => &individual.arena,
            Self::PushConstants(arena) => arena,
        }
    }

    fn arena_mut(&mut self) -> &mut ParameterArena {
        match self {
            Self::GlobalPacked(packed) => &mut packed.arena,
            Self::Individual(individual) => &mut individual.arena,
            Self::PushConstants(arena) => arena,
        }
    }

    /// Region placement and stride
    pub fn layout(&self) -> &ParameterLayout {
        self.arena().layout()
    }

    /// Aligned distance between consecutive elements
    pub fn stride(&self) -> u64 {
        self.layout().stride()
    }

    /// Store `matrix` as element `index` of `region`; visible to the GPU after [`flush`](Self::flush)
    pub fn write_matrix(&mut self, region: ParameterRegion, index: u32, matrix: &Mat4) -> VulkanResult<()> {
        self.arena_mut().write_matrix(region, index, matrix)
    }

    /// Element `index` of `region` as last written
    pub fn matrix(&self, region: ParameterRegion, index: u32) -> VulkanResult<Mat4> {
        self.arena().matrix(region, index)
    }

    /// Dynamic offset that selects element `index` of `region` in its bound buffer
    ///
    /// Packed buffers add the region's base; individual buffers start at their
    /// own element 0.
    pub fn dynamic_offset(&self, region: ParameterRegion, index: u32) -> VulkanResult<u32> {
        let offset = match self {
            Self::GlobalPacked(packed) => packed.arena.layout().packed_offset(region, index)?,
            Self::Individual(individual) => individual.arena.layout().element_offset(region, index)?,
            Self::PushConstants(_) => {
                return Err(VulkanError::InvalidOperation {
                    reason: "push constants use no dynamic offsets".to_string(),
                })
            }
        };
        to_dynamic_offset(offset)
    }

    /// Buffer holding `region`, if the strategy has one
    pub fn buffer(&self, region: ParameterRegion) -> Option<vk::Buffer> {
        match self {
            Self::GlobalPacked(packed) => Some(packed.dynamic.handle()),
            Self::Individual(individual) => Some(individual.regions[region_slot(region)].handle()),
            Self::PushConstants(_) => None,
        }
    }

    /// Static buffers in binding order
    pub fn static_buffers(&self) -> Vec<vk::Buffer> {
        match self {
            Self::GlobalPacked(packed) => vec![packed.globals.handle()],
            Self::Individual(individual) => vec![individual.camera.handle(), individual.lighting.handle()],
            Self::PushConstants(_) => Vec::new(),
        }
    }

    /// Write the camera view-projection and global scalars into the static buffers
    ///
    /// Push constants have no static buffers and fail with `InvalidOperation`.
    pub fn write_globals(&self, view_projection: &Mat4, data: &Mat4) -> VulkanResult<()> {
        match self {
            Self::GlobalPacked(packed) => packed.globals.update(&FrameGlobals::new(view_projection, data)),
            Self::Individual(individual) => {
                individual.camera.update(&CameraUniform { view_projection: columns(view_projection) })?;
                individual.lighting.update(&LightingGlobals { data: columns(data) })
            }
            Self::PushConstants(_) => Err(VulkanError::InvalidOperation {
                reason: "push constants have no static buffers to write globals into".to_string(),
            }),
        }
    }

    /// Copy the arena into the mapped dynamic buffers
    pub fn flush(&self) -> VulkanResult<()> {
        match self {
            Self::GlobalPacked(packed) => packed.dynamic.write_bytes(0, packed.arena.as_bytes()),
            Self::Individual(individual) => {
                for region in ParameterRegion::ALL {
                    let bytes = individual.arena.region_bytes(region)?;
                    individual.regions[region_slot(region)].write_bytes(0, bytes)?;
                }
                Ok(())
            }
            Self::PushConstants(_) => Ok(()),
        }
    }

    /// Total bytes of dynamic parameter storage on the device
    pub fn dynamic_size(&self) -> u64 {
        match self {
            Self::GlobalPacked(packed) => packed.dynamic.size(),
            Self::Individual(individual) => individual.regions.iter().map(Buffer::size).sum(),
            Self::PushConstants(_) => 0,
        }
    }
}

fn region_slot(region: ParameterRegion) -> usize {
    match region {
        ParameterRegion::ShadowViewProjection => 0,
        ParameterRegion::ModelWorld => 1,
        ParameterRegion::LightViewProjection => 2,
        ParameterRegion::LightData => 3,
    }
}

fn dynamic_buffer(context: &Arc<VulkanContext>, size: u64) -> VulkanResult<Buffer> {
    Buffer::host_visible(
        context,
        size,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        ResourceKind::DynamicUniformBuffer,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    #[test]
    fn test_push_constant_block_is_three_matrices() {
        assert_eq!(PushConstantBlock::SIZE, 192);
        assert_eq!(std::mem::size_of::<PushConstantBlock>(), PushConstantBlock::SIZE);

        let model = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let block = PushConstantBlock::new(&model, &Mat4::identity(), &Mat4::zeros());
        let bytes = block.as_bytes();

        assert_eq!(bytes.len(), 192);
        let translation: [f32; 3] = bytemuck::pod_read_unaligned(&bytes[48..60]);
        assert_eq!(translation, [1.0, 2.0, 3.0]);
        let view_diagonal: f32 = bytemuck::pod_read_unaligned(&bytes[64..68]);
        assert_eq!(view_diagonal, 1.0);
        assert!(bytes[128..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_static_blocks_have_shader_layout() {
        assert_eq!(std::mem::size_of::<FrameGlobals>(), 2 * MAT4_SIZE);
        assert_eq!(std::mem::size_of::<CameraUniform>(), MAT4_SIZE);
        assert_eq!(std::mem::size_of::<LightingGlobals>(), MAT4_SIZE);

        let globals = FrameGlobals::new(&Mat4::identity(), &Mat4::from_element(2.0));
        assert_eq!(globals.view_projection[0], 1.0);
        assert_eq!(globals.view_projection[1], 0.0);
        assert_eq!(globals.data, [2.0; 16]);
    }

    #[test]
    fn test_push_constants_refuse_buffer_operations() {
        let layout = ParameterLayout::new(SceneSize::new(2, 1, 1), 256);
        let mut parameters = ParameterBuffers::PushConstants(ParameterArena::new(layout).unwrap());

        let globals = parameters.write_globals(&Mat4::identity(), &Mat4::zeros());
        assert!(matches!(globals, Err(VulkanError::InvalidOperation { .. })));
        let offset = parameters.dynamic_offset(ParameterRegion::ModelWorld, 0);
        assert!(matches!(offset, Err(VulkanError::InvalidOperation { .. })));

        // The host arena still serves matrices baked into push constants
        parameters.write_matrix(ParameterRegion::ModelWorld, 1, &Mat4::identity()).unwrap();
        assert_eq!(parameters.matrix(ParameterRegion::ModelWorld, 1).unwrap(), Mat4::identity());
        assert!(parameters.flush().is_ok());
        assert!(parameters.static_buffers().is_empty());
    }

    #[test]
    fn test_region_slots_are_distinct() {
        let mut slots: Vec<usize> = ParameterRegion::ALL.iter().map(|&region| region_slot(region)).collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2, 3]);
    }
}
