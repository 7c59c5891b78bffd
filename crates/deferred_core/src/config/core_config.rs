//! # Core Configuration
//!
//! Build-time choices for the renderer core. Everything here is fixed once the
//! core is constructed: the upload path and uniform strategy decide which buffers
//! exist, and the shadow settings decide the size and frustum of every shadow map.
//!
//! Files may be TOML or RON; missing fields fall back to [`Default`].

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};
use crate::render::buffers::UniformStrategy;

/// How geometry reaches device memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UploadPath {
    /// Host-visible staging buffer copied into device-local memory on the transfer queue
    #[default]
    Staged,
    /// Destination buffer allocated host-visible and written directly
    Direct,
}

/// Buffer construction choices, selected once for the renderer lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BufferConfig {
    /// Geometry upload path
    pub upload: UploadPath,
    /// Per-draw transform delivery strategy
    pub uniforms: UniformStrategy,
}

/// Shadow map resolution and light frustum
///
/// The frustum is a fixed orthographic box around the origin; it does not follow
/// scene bounds, so scenes much larger or smaller than the defaults need their own
/// values here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    /// Width and height of every depth target in texels
    pub resolution: u32,
    /// Distance along the negated light position at which the light eye is placed
    pub light_distance: f32,
    /// Half width and half height of the orthographic frustum
    pub half_extent: f32,
    /// Near plane of the orthographic frustum
    pub near: f32,
    /// Far plane of the orthographic frustum
    pub far: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: 4096,
            light_distance: 5500.0,
            half_extent: 2500.0,
            near: 0.0,
            far: 7500.0,
        }
    }
}

impl ShadowSettings {
    /// Reject settings that would produce an empty target or a degenerate frustum
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution == 0 {
            return Err(ConfigError::Invalid {
                field: "shadow.resolution",
                reason: "must be at least 1 texel".to_string(),
            });
        }
        if self.half_extent <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "shadow.half_extent",
                reason: format!("must be positive, got {}", self.half_extent),
            });
        }
        if self.light_distance <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "shadow.light_distance",
                reason: format!("must be positive, got {}", self.light_distance),
            });
        }
        if self.far <= self.near {
            return Err(ConfigError::Invalid {
                field: "shadow.far",
                reason: format!("far ({}) must exceed near ({})", self.far, self.near),
            });
        }
        Ok(())
    }
}

/// Top-level configuration for the renderer core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Application name reported to the Vulkan instance
    pub application_name: String,
    /// Request the Khronos validation layer (debug builds only)
    pub enable_validation: bool,
    /// Buffer construction choices
    pub buffers: BufferConfig,
    /// Shadow map settings
    pub shadow: ShadowSettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            application_name: "deferred_core".to_string(),
            enable_validation: cfg!(debug_assertions),
            buffers: BufferConfig::default(),
            shadow: ShadowSettings::default(),
        }
    }
}

impl CoreConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shadow.validate()
    }
}

impl Config for CoreConfig {}
