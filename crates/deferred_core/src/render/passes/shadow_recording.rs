//! Shadow pass command recording
//!
//! The draw sequence for one shadow map, written against [`PassCommands`] so the
//! exact command stream can be checked without a device.

use ash::vk;

use crate::foundation::math::Mat4;
use crate::render::buffers::{ParameterLayout, ParameterRegion, PushConstantBlock, UniformStrategy};
use crate::render::buffers::layout::to_dynamic_offset;
use crate::render::vulkan::{DepthPipeline, PassCommands, RenderPass, VulkanResult};

/// Depth the shadow map is cleared to before drawing
pub const SHADOW_CLEAR_DEPTH: f32 = 1.0;

/// Descriptor set index of the per-model world matrix binding
pub const MODEL_SET_INDEX: u32 = 0;

/// Descriptor set index of the light view-projection binding
pub const LIGHT_SET_INDEX: u32 = 1;

/// Handles of the depth-only pipeline, owned by the pass orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowPipeline {
    /// Render pass with a single depth attachment
    pub render_pass: vk::RenderPass,
    /// Depth-only graphics pipeline
    pub pipeline: vk::Pipeline,
    /// Layout with the model set at 0 and the light set at 1, or a push-constant range
    pub layout: vk::PipelineLayout,
}

impl ShadowPipeline {
    /// Handles of a built depth pipeline and the pass it was created for
    pub fn new(render_pass: &RenderPass, pipeline: &DepthPipeline) -> Self {
        Self {
            render_pass: render_pass.handle(),
            pipeline: pipeline.handle(),
            layout: pipeline.layout(),
        }
    }
}

/// How the shadow pass reaches its per-draw matrices, one variant per strategy
///
/// The sets are owned by the pass orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowUniformBinding {
    /// One dynamic set over the packed buffer, bound at both set indices
    GlobalPacked {
        /// Set over the packed dynamic buffer
        dynamic_set: vk::DescriptorSet,
    },
    /// Separate dynamic sets over the shadow and model region buffers
    Individual {
        /// Set over the shadow view-projection buffer
        shadow_set: vk::DescriptorSet,
        /// Set over the model world matrix buffer
        model_set: vk::DescriptorSet,
    },
    /// Matrices pushed inline per model
    PushConstants,
}

impl ShadowUniformBinding {
    /// Strategy this binding belongs to
    pub fn strategy(&self) -> UniformStrategy {
        match self {
            Self::GlobalPacked { .. } => UniformStrategy::GlobalPacked,
            Self::Individual { .. } => UniformStrategy::Individual,
            Self::PushConstants => UniformStrategy::PushConstants,
        }
    }
}

/// Index range of one mesh inside the shared index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRange {
    /// Number of indices to draw
    pub index_count: u32,
    /// Offset of the first index
    pub first_index: u32,
}

/// One model: its world matrix and the meshes it is made of
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDraw {
    /// Object-to-world transform
    pub world_matrix: Mat4,
    /// Meshes drawn in order
    pub meshes: Vec<MeshRange>,
}

impl ModelDraw {
    /// Model with the given transform and meshes
    pub fn new(world_matrix: Mat4, meshes: Vec<MeshRange>) -> Self {
        Self { world_matrix, meshes }
    }
}

/// Everything one shadow pass recording reads
pub struct ShadowPassRecording<'a> {
    /// Pipeline handles
    pub pipeline: ShadowPipeline,
    /// Target framebuffer
    pub framebuffer: vk::Framebuffer,
    /// Render area
    pub extent: vk::Extent2D,
    /// Shared vertex buffer
    pub vertex_buffer: vk::Buffer,
    /// Shared 32-bit index buffer
    pub index_buffer: vk::Buffer,
    /// Parameter placement used for dynamic offsets
    pub layout: &'a ParameterLayout,
    /// Parameter binding for the active strategy
    pub binding: ShadowUniformBinding,
    /// Index of this shadow map in the shadow view-projection region
    pub shadow_index: u32,
    /// Models in draw order
    pub models: &'a [ModelDraw],
    /// Light view matrix, baked into push constants
    pub light_view: Mat4,
    /// Light projection matrix, baked into push constants
    pub light_projection: Mat4,
}

impl ShadowPassRecording<'_> {
    fn offset(&self, region: ParameterRegion, index: u32) -> VulkanResult<u32> {
        let offset = match self.binding {
            ShadowUniformBinding::GlobalPacked { .. } => self.layout.packed_offset(region, index)?,
            _ => self.layout.element_offset(region, index)?,
        };
        to_dynamic_offset(offset)
    }
}

/// Record the full shadow pass: one indexed draw per mesh, model by model
///
/// Returns the number of draws issued.
pub fn record_shadow_pass<R: PassCommands>(recorder: &mut R, pass: &ShadowPassRecording<'_>) -> VulkanResult<u32> {
    let layout = pass.pipeline.layout;

    recorder.begin_render_pass(pass.pipeline.render_pass, pass.framebuffer, pass.extent, SHADOW_CLEAR_DEPTH);
    recorder.bind_pipeline(pass.pipeline.pipeline);
    recorder.bind_vertex_buffer(pass.vertex_buffer);
    recorder.bind_index_buffer(pass.index_buffer);

    match pass.binding {
        ShadowUniformBinding::GlobalPacked { dynamic_set } => {
            let offset = pass.offset(ParameterRegion::ShadowViewProjection, pass.shadow_index)?;
            recorder.bind_descriptor_set(layout, LIGHT_SET_INDEX, dynamic_set, &[offset]);
        }
        ShadowUniformBinding::Individual { shadow_set, .. } => {
            let offset = pass.offset(ParameterRegion::ShadowViewProjection, pass.shadow_index)?;
            recorder.bind_descriptor_set(layout, LIGHT_SET_INDEX, shadow_set, &[offset]);
        }
        ShadowUniformBinding::PushConstants => {}
    }

    let mut draws = 0;
    for (model_index, model) in (0u32..).zip(pass.models) {
        match pass.binding {
            ShadowUniformBinding::GlobalPacked { dynamic_set } => {
                let offset = pass.offset(ParameterRegion::ModelWorld, model_index)?;
                recorder.bind_descriptor_set(layout, MODEL_SET_INDEX, dynamic_set, &[offset]);
            }
            ShadowUniformBinding::Individual { model_set, .. } => {
                let offset = pass.offset(ParameterRegion::ModelWorld, model_index)?;
                recorder.bind_descriptor_set(layout, MODEL_SET_INDEX, model_set, &[offset]);
            }
            ShadowUniformBinding::PushConstants => {
                let block = PushConstantBlock::new(&model.world_matrix, &pass.light_view, &pass.light_projection);
                recorder.push_constants(layout, vk::ShaderStageFlags::VERTEX, block.as_bytes());
            }
        }

        for mesh in &model.meshes {
            log::trace!(
                "Shadow {} draw: model {} indices {}..+{}",
                pass.shadow_index, model_index, mesh.first_index, mesh.index_count
            );
            recorder.draw_indexed(mesh.index_count, mesh.first_index);
            draws += 1;
        }
    }

    recorder.end_render_pass();
    Ok(draws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4Ext, Vec3};
    use crate::render::buffers::SceneSize;
    use ash::vk::Handle;

    #[derive(Debug, Clone, PartialEq)]
    enum Command {
        BeginRenderPass { clear_depth: f32 },
        EndRenderPass,
        BindPipeline,
        BindVertexBuffer,
        BindIndexBuffer,
        BindSet { set_index: u32, set: u64, offsets: Vec<u32> },
        PushConstants { bytes: Vec<u8> },
        Draw { index_count: u32, first_index: u32 },
    }

    #[derive(Default)]
    struct MockRecorder {
        commands: Vec<Command>,
    }

    impl PassCommands for MockRecorder {
        fn begin_render_pass(&mut self, _: vk::RenderPass, _: vk::Framebuffer, _: vk::Extent2D, clear_depth: f32) {
            self.commands.push(Command::BeginRenderPass { clear_depth });
        }

        fn end_render_pass(&mut self) {
            self.commands.push(Command::EndRenderPass);
        }

        fn bind_pipeline(&mut self, _: vk::Pipeline) {
            self.commands.push(Command::BindPipeline);
        }

        fn bind_vertex_buffer(&mut self, _: vk::Buffer) {
            self.commands.push(Command::BindVertexBuffer);
        }

        fn bind_index_buffer(&mut self, _: vk::Buffer) {
            self.commands.push(Command::BindIndexBuffer);
        }

        fn bind_descriptor_set(&mut self, _: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet, offsets: &[u32]) {
            self.commands.push(Command::BindSet {
                set_index,
                set: set.as_raw(),
                offsets: offsets.to_vec(),
            });
        }

        fn push_constants(&mut self, _: vk::PipelineLayout, _: vk::ShaderStageFlags, bytes: &[u8]) {
            self.commands.push(Command::PushConstants { bytes: bytes.to_vec() });
        }

        fn draw_indexed(&mut self, index_count: u32, first_index: u32) {
            self.commands.push(Command::Draw { index_count, first_index });
        }
    }

    impl MockRecorder {
        fn draws(&self) -> Vec<(u32, u32)> {
            self.commands
                .iter()
                .filter_map(|command| match command {
                    Command::Draw { index_count, first_index } => Some((*index_count, *first_index)),
                    _ => None,
                })
                .collect()
        }

        fn set_binds(&self, wanted: u32) -> Vec<(u64, Vec<u32>)> {
            self.commands
                .iter()
                .filter_map(|command| match command {
                    Command::BindSet { set_index, set, offsets } if *set_index == wanted => {
                        Some((*set, offsets.clone()))
                    }
                    _ => None,
                })
                .collect()
        }
    }

    fn models() -> Vec<ModelDraw> {
        vec![
            ModelDraw::new(
                Mat4::identity(),
                vec![
                    MeshRange { index_count: 36, first_index: 0 },
                    MeshRange { index_count: 6, first_index: 36 },
                ],
            ),
            ModelDraw::new(Mat4::new_translation(&Vec3::new(5.0, 0.0, 0.0)), vec![]),
            ModelDraw::new(
                Mat4::new_scaling(2.0),
                vec![MeshRange { index_count: 99, first_index: 42 }],
            ),
        ]
    }

    fn recording<'a>(
        layout: &'a ParameterLayout,
        models: &'a [ModelDraw],
        binding: ShadowUniformBinding,
        shadow_index: u32,
    ) -> ShadowPassRecording<'a> {
        ShadowPassRecording {
            pipeline: ShadowPipeline {
                render_pass: vk::RenderPass::null(),
                pipeline: vk::Pipeline::null(),
                layout: vk::PipelineLayout::null(),
            },
            framebuffer: vk::Framebuffer::null(),
            extent: vk::Extent2D { width: 4096, height: 4096 },
            vertex_buffer: vk::Buffer::null(),
            index_buffer: vk::Buffer::null(),
            layout,
            binding,
            shadow_index,
            models,
            light_view: Mat4::look_at(Vec3::new(0.0, 0.0, -10.0), Vec3::zeros(), Vec3::y()),
            light_projection: Mat4::orthographic(-1.0, 1.0, -1.0, 1.0, 0.0, 20.0),
        }
    }

    #[test]
    fn test_one_draw_per_mesh_in_model_then_mesh_order() {
        let layout = ParameterLayout::new(SceneSize::new(3, 2, 2), 256);
        let models = models();
        let binding = ShadowUniformBinding::GlobalPacked { dynamic_set: vk::DescriptorSet::from_raw(7) };
        let mut recorder = MockRecorder::default();

        let draws = record_shadow_pass(&mut recorder, &recording(&layout, &models, binding, 0)).unwrap();

        assert_eq!(draws, 3);
        assert_eq!(recorder.draws(), vec![(36, 0), (6, 36), (99, 42)]);
        assert_eq!(recorder.commands.first(), Some(&Command::BeginRenderPass { clear_depth: 1.0 }));
        assert_eq!(recorder.commands.last(), Some(&Command::EndRenderPass));
        assert_eq!(
            &recorder.commands[1..4],
            &[Command::BindPipeline, Command::BindVertexBuffer, Command::BindIndexBuffer]
        );
    }

    #[test]
    fn test_packed_offsets_include_region_base() {
        let layout = ParameterLayout::new(SceneSize::new(3, 2, 2), 256);
        let models = models();
        let binding = ShadowUniformBinding::GlobalPacked { dynamic_set: vk::DescriptorSet::from_raw(7) };
        let mut recorder = MockRecorder::default();

        record_shadow_pass(&mut recorder, &recording(&layout, &models, binding, 1)).unwrap();

        assert_eq!(recorder.set_binds(LIGHT_SET_INDEX), vec![(7, vec![256])]);
        // Model i lives at (shadow_maps + i) * stride
        assert_eq!(
            recorder.set_binds(MODEL_SET_INDEX),
            vec![(7, vec![512]), (7, vec![768]), (7, vec![1024])]
        );
    }

    #[test]
    fn test_individual_offsets_start_at_zero() {
        let layout = ParameterLayout::new(SceneSize::new(3, 2, 2), 64);
        let models = models();
        let binding = ShadowUniformBinding::Individual {
            shadow_set: vk::DescriptorSet::from_raw(1),
            model_set: vk::DescriptorSet::from_raw(2),
        };
        let mut recorder = MockRecorder::default();

        record_shadow_pass(&mut recorder, &recording(&layout, &models, binding, 1)).unwrap();

        assert_eq!(recorder.set_binds(LIGHT_SET_INDEX), vec![(1, vec![64])]);
        assert_eq!(
            recorder.set_binds(MODEL_SET_INDEX),
            vec![(2, vec![0]), (2, vec![64]), (2, vec![128])]
        );
    }

    #[test]
    fn test_push_constants_bake_model_and_light_matrices() {
        let layout = ParameterLayout::new(SceneSize::default(), 64);
        let models = models();
        let mut recorder = MockRecorder::default();
        let pass = recording(&layout, &models, ShadowUniformBinding::PushConstants, 0);

        record_shadow_pass(&mut recorder, &pass).unwrap();

        assert!(recorder.set_binds(MODEL_SET_INDEX).is_empty());
        assert!(recorder.set_binds(LIGHT_SET_INDEX).is_empty());

        let pushes: Vec<&Vec<u8>> = recorder
            .commands
            .iter()
            .filter_map(|command| match command {
                Command::PushConstants { bytes } => Some(bytes),
                _ => None,
            })
            .collect();
        assert_eq!(pushes.len(), models.len());

        let expected = PushConstantBlock::new(&models[1].world_matrix, &pass.light_view, &pass.light_projection);
        assert_eq!(pushes[1].as_slice(), expected.as_bytes());
        assert_eq!(recorder.draws().len(), 3);
    }

    #[test]
    fn test_more_models_than_finalized_is_rejected() {
        let layout = ParameterLayout::new(SceneSize::new(2, 1, 1), 64);
        let models = models();
        let binding = ShadowUniformBinding::GlobalPacked { dynamic_set: vk::DescriptorSet::from_raw(7) };
        let mut recorder = MockRecorder::default();

        assert!(record_shadow_pass(&mut recorder, &recording(&layout, &models, binding, 0)).is_err());
    }

    #[test]
    fn test_shadow_index_out_of_range_is_rejected() {
        let layout = ParameterLayout::new(SceneSize::new(3, 1, 1), 64);
        let models = models();
        let binding = ShadowUniformBinding::GlobalPacked { dynamic_set: vk::DescriptorSet::from_raw(7) };
        let mut recorder = MockRecorder::default();

        assert!(record_shadow_pass(&mut recorder, &recording(&layout, &models, binding, 1)).is_err());
    }
}
