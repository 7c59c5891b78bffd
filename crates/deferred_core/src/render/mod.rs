//! Rendering core
//!
//! - [`vulkan`]: RAII wrappers over device objects, memory selection and the context
//! - [`buffers`]: geometry and per-pass parameter buffers
//! - [`passes`]: pass ordering signals and the shadow pass unit

pub mod vulkan;
pub mod buffers;
pub mod passes;
