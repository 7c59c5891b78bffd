//! Buffer Manager
//!
//! Owns the geometry buffers and every parameter buffer. Geometry may be uploaded
//! at any time; parameter buffers are sized once, by [`BufferManager::finalize`],
//! when the model, light and shadow map counts are known. After that the counts
//! are fixed for the manager's lifetime. Releasing buffers, on drop or when geometry
//! is replaced, first waits for the device to go idle.

pub mod arena;
pub mod geometry;
pub mod layout;
pub mod parameters;

pub use arena::ParameterArena;
pub use geometry::{GeometryBuffers, Vertex};
pub use layout::{align_up, parameter_stride, ParameterLayout, ParameterRegion, RegionSpan, SceneSize, UniformStrategy};
pub use parameters::{
    CameraUniform, FrameGlobals, IndividualParameters, LightingGlobals, PackedParameters, ParameterBuffers,
    PushConstantBlock,
};

use std::sync::Arc;

use crate::config::BufferConfig;
use crate::render::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Geometry and parameter buffers for one renderer
pub struct BufferManager {
    context: Arc<VulkanContext>,
    config: BufferConfig,
    geometry: Option<GeometryBuffers>,
    parameters: Option<ParameterBuffers>,
}

impl BufferManager {
    /// Create an empty manager using `config` for every later upload and allocation
    pub fn new(context: Arc<VulkanContext>, config: BufferConfig) -> Self {
        log::debug!("Buffer manager: {:?} upload, {:?} uniforms", config.upload, config.uniforms);
        Self {
            context,
            config,
            geometry: None,
            parameters: None,
        }
    }

    /// Upload vertex and index data into device-resident buffers
    ///
    /// Replaces any geometry uploaded before.
    pub fn create_geometry_buffers(&mut self, vertices: &[Vertex], indices: &[u32]) -> VulkanResult<&GeometryBuffers> {
        let geometry = GeometryBuffers::upload(
            &self.context,
            vertices,
            indices,
            self.config.upload,
            self.config.uniforms,
        )?;
        if self.geometry.is_some() {
            self.context.wait_idle()?;
        }
        Ok(self.geometry.insert(geometry))
    }

    /// Size and allocate the parameter buffers for `scene`
    ///
    /// Callable once; a second call fails with `InvalidOperation`.
    pub fn finalize(&mut self, scene: SceneSize) -> VulkanResult<&ParameterBuffers> {
        if self.parameters.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "parameter buffers are already finalized".to_string(),
            });
        }

        let parameters = ParameterBuffers::new(&self.context, self.config.uniforms, scene)?;
        Ok(self.parameters.insert(parameters))
    }

    /// Geometry buffers, once uploaded
    pub fn geometry(&self) -> Option<&GeometryBuffers> {
        self.geometry.as_ref()
    }

    /// Parameter buffers, once finalized
    pub fn parameters(&self) -> Option<&ParameterBuffers> {
        self.parameters.as_ref()
    }

    /// Mutable parameter buffers for per-frame writes
    pub fn parameters_mut(&mut self) -> Option<&mut ParameterBuffers> {
        self.parameters.as_mut()
    }

    /// Stride of the per-element regions, once finalized
    pub fn stride(&self) -> Option<u64> {
        self.parameters.as_ref().map(ParameterBuffers::stride)
    }

    /// Active uniform strategy
    pub fn strategy(&self) -> UniformStrategy {
        self.config.uniforms
    }

    /// Buffer construction choices
    pub fn config(&self) -> BufferConfig {
        self.config
    }

    /// Shared context
    pub fn context(&self) -> &Arc<VulkanContext> {
        &self.context
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        if self.geometry.is_none() && self.parameters.is_none() {
            return;
        }
        if let Err(e) = self.context.wait_idle() {
            log::error!("Device wait failed before destroying buffers: {}", e);
        }
    }
}
