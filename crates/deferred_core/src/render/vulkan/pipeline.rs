//! Depth-only render pass and pipeline
//!
//! The pieces a shadow pass orchestrator builds once and shares between every
//! shadow map: a single-attachment render pass that leaves the depth image ready
//! for sampling, and a vertex-only graphics pipeline whose layout matches the
//! active uniform strategy.

use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use crate::render::buffers::{PushConstantBlock, UniformStrategy, Vertex};

use super::{DescriptorPool, ResourceKind, VulkanContext, VulkanError, VulkanResult, DEPTH_FORMAT};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// SPIR-V vertex shader that writes every vertex to the clip-space origin
///
/// Triangles collapse to a point and cover no texels, so a depth pass built on it
/// clears the map and runs every recorded draw without compiled shader assets.
pub const DEGENERATE_VERTEX_SPIRV: &[u32] = &[
    0x0723_0203, 0x0001_0000, 0, 10, 0,
    // OpCapability Shader
    0x0002_0011, 1,
    // OpMemoryModel Logical GLSL450
    0x0003_000E, 0, 1,
    // OpEntryPoint Vertex %8 "main" %6
    0x0006_000F, 0, 8, 0x6E69_616D, 0, 6,
    // OpDecorate %6 BuiltIn Position
    0x0004_0047, 6, 11, 0,
    // %1 void, %2 fn() -> void, %3 f32, %4 vec4, %5 *Output vec4
    0x0002_0013, 1,
    0x0003_0021, 2, 1,
    0x0003_0016, 3, 32,
    0x0004_0017, 4, 3, 4,
    0x0004_0020, 5, 3, 4,
    // %6 Output variable, %7 null vec4
    0x0004_003B, 5, 6, 3,
    0x0003_002E, 4, 7,
    // %8 main: store %7 to %6
    0x0005_0036, 1, 8, 0, 2,
    0x0002_00F8, 9,
    0x0003_003E, 6, 7,
    0x0001_00FD,
    0x0001_0038,
];

/// Render pass with one depth attachment, cleared on load and left shader-readable
pub struct RenderPass {
    context: Arc<VulkanContext>,
    render_pass: vk::RenderPass,
}

impl RenderPass {
    /// Create the depth-only pass used by every shadow map
    pub fn depth_only(context: &Arc<VulkanContext>) -> VulkanResult<Self> {
        let depth_attachment = vk::AttachmentDescription::builder()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build();
        let attachments = [depth_attachment];

        let depth_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .depth_stencil_attachment(&depth_attachment_ref)
            .build();
        let subpasses = [subpass];

        // Previous frame's lighting reads must finish before the clear, and this
        // pass's depth writes must land before the next lighting read
        let dependencies = [
            vk::SubpassDependency::builder()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(vk::AccessFlags::SHADER_READ)
                .dst_stage_mask(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
                .dst_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                .build(),
            vk::SubpassDependency::builder()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS)
                .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .build(),
        ];

        let render_pass_create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe {
            context.device().create_render_pass(&render_pass_create_info, None)
                .map_err(VulkanError::creation(ResourceKind::RenderPass))?
        };

        Ok(Self {
            context: Arc::clone(context),
            render_pass,
        })
    }

    /// Get the render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    context: Arc<VulkanContext>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a shader module from SPIR-V words
    pub fn from_spirv(context: &Arc<VulkanContext>, code: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let module = unsafe {
            context.device().create_shader_module(&create_info, None)
                .map_err(VulkanError::creation(ResourceKind::ShaderModule))?
        };

        Ok(Self {
            context: Arc::clone(context),
            module,
        })
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_shader_module(self.module, None);
        }
    }
}

/// Vertex-only graphics pipeline writing depth, with its layout
pub struct DepthPipeline {
    context: Arc<VulkanContext>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl DepthPipeline {
    /// Create a pipeline for `render_pass` with a layout matching `strategy`
    ///
    /// Buffer strategies get the pool's dynamic uniform layout at sets 0 and 1;
    /// push constants get one vertex-stage range holding a [`PushConstantBlock`].
    pub fn new(
        context: &Arc<VulkanContext>,
        render_pass: &RenderPass,
        vertex_shader: &ShaderModule,
        descriptor_pool: &DescriptorPool,
        strategy: UniformStrategy,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let set_layouts = if strategy.uses_buffers() {
            vec![descriptor_pool.dynamic_uniform_layout(); 2]
        } else {
            Vec::new()
        };
        let push_constant_ranges = if strategy.uses_buffers() {
            Vec::new()
        } else {
            vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: PushConstantBlock::SIZE as u32,
            }]
        };

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe {
            context.device().create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::creation(ResourceKind::Pipeline))?
        };

        let shader_stages = [vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_shader.handle())
            .name(ENTRY_POINT)
            .build()];

        let binding_descriptions = [vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()];
        let attribute_descriptions = [vk::VertexInputAttributeDescription::builder()
            .location(0)
            .binding(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(0)
            .build()];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport::builder()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0)
            .build()];
        let scissors = [vk::Rect2D::builder().extent(extent).build()];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder();

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass.handle())
            .subpass(0);

        let created = unsafe {
            context.device().create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        };
        let pipeline = match created {
            Ok(pipelines) => pipelines.first().copied().ok_or(vk::Result::ERROR_UNKNOWN),
            Err((_, result)) => Err(result),
        };
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(result) => {
                unsafe {
                    context.device().destroy_pipeline_layout(layout, None);
                }
                return Err(VulkanError::creation(ResourceKind::Pipeline)(result));
            }
        };

        log::debug!("Created depth pipeline for {:?} uniforms at {}x{}", strategy, extent.width, extent.height);

        Ok(Self {
            context: Arc::clone(context),
            pipeline,
            layout,
        })
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for DepthPipeline {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_pipeline(self.pipeline, None);
            self.context.device().destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_shader_is_well_formed() {
        let words = DEGENERATE_VERTEX_SPIRV;
        assert_eq!(words[0], 0x0723_0203);

        // Every instruction's word count must tile the body exactly
        let mut position = 5;
        let mut opcodes = Vec::new();
        while position < words.len() {
            let word_count = (words[position] >> 16) as usize;
            assert!(word_count > 0);
            opcodes.push(words[position] & 0xFFFF);
            position += word_count;
        }
        assert_eq!(position, words.len());

        // Capability first, function end last, ids below the declared bound
        assert_eq!(opcodes.first(), Some(&17));
        assert_eq!(opcodes.last(), Some(&56));
        assert_eq!(words[3], 10);
    }

    #[test]
    fn test_entry_point_name() {
        assert_eq!(ENTRY_POINT.to_str(), Ok("main"));
        let name = DEGENERATE_VERTEX_SPIRV[13].to_le_bytes();
        assert_eq!(&name, b"main");
    }
}
