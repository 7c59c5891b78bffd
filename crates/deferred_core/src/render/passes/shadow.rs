//! Shadow Pass Unit
//!
//! One depth-only render target per shadow-casting light, with its draw sequence
//! recorded once at construction. A map moves through three states while it is
//! built and never changes afterwards; to re-record, drop it and build a new one.
//! Any failure along the way aborts construction and releases what was created.
//! Dropping a map waits for the device to go idle, since a submission of its
//! command buffer may still be reading the framebuffer and depth image.

use ash::vk;
use std::sync::Arc;

use crate::config::ShadowSettings;
use crate::foundation::math::{Mat4, Mat4Ext, Vec3};
use crate::render::buffers::{GeometryBuffers, ParameterBuffers, ParameterRegion, UniformStrategy};
use crate::render::vulkan::{
    CommandBuffer, DepthImage, DescriptorPool, DescriptorSet, Framebuffer, Sampler, VulkanContext, VulkanError,
    VulkanResult,
};

use super::shadow_recording::{record_shadow_pass, ModelDraw, ShadowPassRecording, ShadowPipeline, ShadowUniformBinding};

/// Light frustum used to render a shadow map
///
/// The eye sits at `-light_distance` times the light position and looks at the
/// origin with +Y up, through a fixed orthographic box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowProjection {
    /// Scale applied to the negated light position to place the eye
    pub light_distance: f32,
    /// Half width and half height of the box
    pub half_extent: f32,
    /// Near plane
    pub near: f32,
    /// Far plane
    pub far: f32,
}

impl From<&ShadowSettings> for ShadowProjection {
    fn from(settings: &ShadowSettings) -> Self {
        Self {
            light_distance: settings.light_distance,
            half_extent: settings.half_extent,
            near: settings.near,
            far: settings.far,
        }
    }
}

impl Default for ShadowProjection {
    fn default() -> Self {
        Self::from(&ShadowSettings::default())
    }
}

impl ShadowProjection {
    /// Eye position for a light at `light_position`
    pub fn eye(&self, light_position: Vec3) -> Vec3 {
        light_position * -self.light_distance
    }

    /// View matrix looking from the light eye toward the origin
    ///
    /// Degenerate when the light position is parallel to +Y.
    pub fn view_matrix(&self, light_position: Vec3) -> Mat4 {
        Mat4::look_at(self.eye(light_position), Vec3::zeros(), Vec3::y())
    }

    /// Orthographic projection with clip-space Y flipped
    pub fn projection_matrix(&self) -> Mat4 {
        let h = self.half_extent;
        Mat4::orthographic(-h, h, -h, h, self.near, self.far).flip_y()
    }

    /// Projection times view
    pub fn view_projection_matrix(&self, light_position: Vec3) -> Mat4 {
        self.projection_matrix() * self.view_matrix(light_position)
    }
}

/// Construction progress of a shadow map
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShadowMapState {
    /// Image, memory, view, framebuffer and sampler exist
    Constructed,
    /// Depth image is in attachment-optimal layout
    LayoutTransitioned,
    /// Descriptor set allocated and draw sequence recorded
    Recorded,
}

/// Scene data a shadow map records against
pub struct ShadowScene<'a> {
    /// Shared geometry
    pub geometry: &'a GeometryBuffers,
    /// Finalized parameter buffers
    pub parameters: &'a ParameterBuffers,
    /// Descriptor sets for the active strategy
    pub binding: ShadowUniformBinding,
    /// Models in draw order
    pub models: &'a [ModelDraw],
}

/// Depth target, sampler and pre-recorded draw sequence for one light
pub struct ShadowMap {
    command_buffer: CommandBuffer,
    descriptor_set: DescriptorSet,
    framebuffer: Framebuffer,
    sampler: Sampler,
    depth: DepthImage,
    state: ShadowMapState,
    shadow_index: u32,
    light_position: Vec3,
    projection: ShadowProjection,
    draw_count: u32,
    context: Arc<VulkanContext>,
}

/// Reject settings and bindings that cannot produce a map, before any device call
fn check_inputs(
    settings: &ShadowSettings,
    binding: ShadowUniformBinding,
    strategy: UniformStrategy,
) -> VulkanResult<()> {
    settings.validate()?;
    if binding.strategy() != strategy {
        return Err(VulkanError::InvalidOperation {
            reason: format!("shadow binding is {:?} but parameter buffers are {:?}", binding.strategy(), strategy),
        });
    }
    Ok(())
}

impl ShadowMap {
    /// Build and record the shadow map at `shadow_index` for a light at `light_position`
    pub fn new(
        context: &Arc<VulkanContext>,
        settings: &ShadowSettings,
        descriptor_pool: &Arc<DescriptorPool>,
        pipeline: ShadowPipeline,
        scene: &ShadowScene<'_>,
        shadow_index: u32,
        light_position: Vec3,
    ) -> VulkanResult<Self> {
        let strategy = scene.parameters.strategy();
        check_inputs(settings, scene.binding, strategy)?;

        let projection = ShadowProjection::from(settings);

        let depth = DepthImage::new(context, settings.resolution)?;
        let framebuffer = Framebuffer::new(context, pipeline.render_pass, &[depth.view()], depth.extent())?;
        let sampler = Sampler::shadow_map(context)?;
        log::debug!("Shadow map {}: {:?}", shadow_index, ShadowMapState::Constructed);

        depth.transition_to_depth_attachment()?;
        log::debug!("Shadow map {}: {:?}", shadow_index, ShadowMapState::LayoutTransitioned);

        let descriptor_set = descriptor_pool.allocate_shadow_map_set(depth.view(), sampler.handle())?;
        let command_buffer = CommandBuffer::allocate(context)?;

        let mut recorder = command_buffer.recorder(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)?;
        let recording = ShadowPassRecording {
            pipeline,
            framebuffer: framebuffer.handle(),
            extent: framebuffer.extent(),
            vertex_buffer: scene.geometry.vertex_buffer(),
            index_buffer: scene.geometry.index_buffer(),
            layout: scene.parameters.layout(),
            binding: scene.binding,
            shadow_index,
            models: scene.models,
            light_view: projection.view_matrix(light_position),
            light_projection: projection.projection_matrix(),
        };
        let draw_count = record_shadow_pass(&mut recorder, &recording)?;
        recorder.end()?;

        log::info!(
            "Shadow map {} ready: {}x{}, {} draws, {:?} uniforms",
            shadow_index,
            settings.resolution,
            settings.resolution,
            draw_count,
            strategy
        );

        Ok(Self {
            command_buffer,
            descriptor_set,
            framebuffer,
            sampler,
            depth,
            state: ShadowMapState::Recorded,
            shadow_index,
            light_position,
            projection,
            draw_count,
            context: Arc::clone(context),
        })
    }

    /// Light view-projection for the light this map was built for
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection.view_projection_matrix(self.light_position)
    }

    /// Store this map's view-projection in the shadow region of `parameters`
    pub fn write_view_projection(&self, parameters: &mut ParameterBuffers) -> VulkanResult<()> {
        parameters.write_matrix(
            ParameterRegion::ShadowViewProjection,
            self.shadow_index,
            &self.view_projection_matrix(),
        )
    }

    /// Construction state; always `Recorded` once built
    pub fn state(&self) -> ShadowMapState {
        self.state
    }

    /// Index in the shadow view-projection region
    pub fn shadow_index(&self) -> u32 {
        self.shadow_index
    }

    /// Light position the map was recorded for
    pub fn light_position(&self) -> Vec3 {
        self.light_position
    }

    /// Frustum parameters
    pub fn projection(&self) -> &ShadowProjection {
        &self.projection
    }

    /// Number of indexed draws in the recorded sequence
    pub fn draw_count(&self) -> u32 {
        self.draw_count
    }

    /// Depth image
    pub fn depth_image(&self) -> vk::Image {
        self.depth.image()
    }

    /// Depth view
    pub fn depth_view(&self) -> vk::ImageView {
        self.depth.view()
    }

    /// Sampler for reading the map in the lighting pass
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }

    /// Framebuffer the pass renders into
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer.handle()
    }

    /// Descriptor set binding the depth view and sampler
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set.handle()
    }

    /// Pre-recorded draw sequence, submittable any number of times
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer.handle()
    }
}

impl Drop for ShadowMap {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("Device wait failed before destroying shadow map {}: {}", self.shadow_index, e);
        }
    }
}
