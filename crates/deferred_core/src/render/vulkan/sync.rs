//! Vulkan synchronization primitives
//!
//! Binary semaphores order submissions on the GPU timeline; the CPU never waits on them.

use ash::vk;
use std::sync::Arc;

use super::{ResourceKind, VulkanContext, VulkanError, VulkanResult};

/// Semaphore wrapper with RAII cleanup
pub struct Semaphore {
    context: Arc<VulkanContext>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore in the unsignaled state
    pub fn new(context: &Arc<VulkanContext>) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            context.device().create_semaphore(&create_info, None)
                .map_err(VulkanError::creation(ResourceKind::Semaphore))?
        };

        Ok(Self {
            context: Arc::clone(context),
            semaphore,
        })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_semaphore(self.semaphore, None);
        }
    }
}
