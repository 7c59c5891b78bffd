//! Command buffer management
//!
//! Type-safe command buffer recording following RAII patterns. Draw-level commands
//! go through [`PassCommands`] so pass recording can be driven against any recorder.

use ash::{vk, Device};
use std::sync::Arc;

use super::{VulkanContext, VulkanError, VulkanResult};

/// Command buffer allocated from the context's pool, freed back to it on drop
pub struct CommandBuffer {
    context: Arc<VulkanContext>,
    command_buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocate one primary command buffer
    pub fn allocate(context: &Arc<VulkanContext>) -> VulkanResult<Self> {
        let command_buffer = context.allocate_command_buffer()?;
        Ok(Self {
            context: Arc::clone(context),
            command_buffer,
        })
    }

    /// Start recording into this buffer
    pub fn recorder(&self, usage: vk::CommandBufferUsageFlags) -> VulkanResult<CommandRecorder> {
        let mut recorder = CommandRecorder::new(self.command_buffer, self.context.device().clone());
        recorder.begin(usage)?;
        Ok(recorder)
    }

    /// Get the command buffer handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device()
                .free_command_buffers(self.context.command_pool(), &[self.command_buffer]);
        }
    }
}

/// Draw-level commands issued while recording a pass
pub trait PassCommands {
    /// Begin `render_pass` on `framebuffer`, clearing its single depth attachment
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_depth: f32,
    );

    /// End the current render pass
    fn end_render_pass(&mut self);

    /// Bind a graphics pipeline
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);

    /// Bind a vertex buffer at binding 0
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);

    /// Bind a 32-bit index buffer
    fn bind_index_buffer(&mut self, buffer: vk::Buffer);

    /// Bind one descriptor set with its dynamic offsets
    fn bind_descriptor_set(
        &mut self,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    );

    /// Push constant bytes at offset 0
    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, bytes: &[u8]);

    /// One indexed draw of a single instance
    fn draw_indexed(&mut self, index_count: u32, first_index: u32);
}

/// Type-safe command buffer recorder
pub struct CommandRecorder {
    command_buffer: vk::CommandBuffer,
    device: Device,
    recording: bool,
}

impl CommandRecorder {
    /// Create a new command recorder
    pub fn new(command_buffer: vk::CommandBuffer, device: Device) -> Self {
        Self {
            command_buffer,
            device,
            recording: false,
        }
    }

    /// Begin command recording
    pub fn begin(&mut self, usage: vk::CommandBufferUsageFlags) -> VulkanResult<&mut Self> {
        if self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer already recording".to_string(),
            });
        }

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(usage);

        unsafe {
            self.device.begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        self.recording = true;
        Ok(self)
    }

    /// End command recording
    pub fn end(mut self) -> VulkanResult<vk::CommandBuffer> {
        if !self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            });
        }

        unsafe {
            self.device.end_command_buffer(self.command_buffer)
                .map_err(VulkanError::Api)?;
        }

        self.recording = false;
        Ok(self.command_buffer)
    }

    /// Copy the first `size` bytes of `src` into `dst`
    pub fn cmd_copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy::builder().size(size).build();
        unsafe {
            self.device.cmd_copy_buffer(self.command_buffer, src, dst, &[region]);
        }
    }

    /// Record a single image memory barrier
    pub fn cmd_image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

impl PassCommands for CommandRecorder {
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_depth: f32,
    ) {
        let clear_values = [vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth: clear_depth, stencil: 0 },
        }];

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
        }
    }

    fn end_render_pass(&mut self) {
        unsafe {
            self.device.cmd_end_render_pass(self.command_buffer);
        }
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device.cmd_bind_vertex_buffers(self.command_buffer, 0, &[buffer], &[0]);
        }
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device.cmd_bind_index_buffer(self.command_buffer, buffer, 0, vk::IndexType::UINT32);
        }
    }

    fn bind_descriptor_set(
        &mut self,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set],
                dynamic_offsets,
            );
        }
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, bytes: &[u8]) {
        unsafe {
            self.device.cmd_push_constants(self.command_buffer, layout, stages, 0, bytes);
        }
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32) {
        unsafe {
            self.device.cmd_draw_indexed(self.command_buffer, index_count, 1, first_index, 0, 0);
        }
    }
}
