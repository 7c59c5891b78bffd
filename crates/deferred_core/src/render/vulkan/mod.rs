//! Vulkan backend
//!
//! Low-level wrappers. Every device object is owned by exactly one wrapper that
//! destroys it on drop, and every wrapper holds an `Arc<VulkanContext>` so the
//! device always outlives the objects created from it.

/// Context: instance, device, queue, command pool
pub mod context;
/// Memory-type selection and bound allocations
pub mod memory;
/// Buffer wrappers
pub mod buffer;
/// Command buffers and recording
pub mod commands;
/// Semaphores
pub mod sync;
/// Depth images and samplers
pub mod image;
/// Framebuffers
pub mod framebuffer;
/// Descriptor pool, layouts and sets
pub mod descriptor_set;
/// Depth-only render pass and pipeline
pub mod pipeline;

pub use context::{PhysicalDeviceInfo, ResourceKind, VulkanContext, VulkanError, VulkanResult};
pub use memory::{find_memory_type, DeviceMemory};
pub use buffer::{Buffer, UniformBuffer, HOST_WRITABLE};
pub use commands::{CommandBuffer, CommandRecorder, PassCommands};
pub use sync::Semaphore;
pub use image::{DepthImage, Sampler, DEPTH_FORMAT};
pub use framebuffer::Framebuffer;
pub use descriptor_set::{DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use pipeline::{DepthPipeline, RenderPass, ShaderModule, DEGENERATE_VERTEX_SPIRV};
