//! Render passes
//!
//! Pass ordering signals and the shadow pass unit. The geometry, lighting and
//! composite passes themselves live with the pass orchestrator; this module only
//! provides what they synchronize on and sample from.

pub mod shadow;
pub mod shadow_recording;
pub mod sync;

pub use shadow::{ShadowMap, ShadowMapState, ShadowProjection, ShadowScene};
pub use shadow_recording::{
    record_shadow_pass, MeshRange, ModelDraw, ShadowPassRecording, ShadowPipeline, ShadowUniformBinding,
};
pub use sync::{Pass, PassSequencer, PassSynchronization, Signal, SignalState};
