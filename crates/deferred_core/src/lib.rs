//! # Deferred Core
//!
//! GPU resource and multi-pass synchronization core of a deferred Vulkan renderer
//! with shadow mapping.
//!
//! ## Features
//!
//! - **Device Memory Allocation**: memory-type selection and bound allocations
//! - **Buffer Management**: geometry upload (staged or direct) and per-pass parameter
//!   buffers under one of three uniform-delivery strategies
//! - **Pass Synchronization**: the shadow → geometry → lighting → composite ordering contract
//! - **Shadow Maps**: per-light depth targets with pre-recorded draw sequences
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deferred_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::default();
//!     let context = VulkanContext::new(&config)?;
//!
//!     let mut buffers = BufferManager::new(context.clone(), config.buffers);
//!     buffers.create_geometry_buffers(&[Vertex::default(); 3], &[0, 1, 2])?;
//!     buffers.finalize(SceneSize::new(1, 1, 1))?;
//!
//!     let _sync = PassSynchronization::new(context)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for users of the core
pub mod prelude {
    pub use crate::{
        config::{BufferConfig, CoreConfig, ShadowSettings, UploadPath},
        foundation::math::{Mat4, Mat4Ext, Vec3},
        render::buffers::{
            BufferManager, GeometryBuffers, ParameterBuffers, ParameterRegion, SceneSize,
            UniformStrategy, Vertex,
        },
        render::passes::{
            ModelDraw, MeshRange, Pass, PassSynchronization, ShadowMap, ShadowPipeline,
            ShadowProjection, ShadowUniformBinding,
        },
        render::vulkan::{DescriptorPool, ResourceKind, VulkanContext, VulkanError, VulkanResult},
    };
}
