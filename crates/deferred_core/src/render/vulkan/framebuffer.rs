//! Framebuffer management
//!
//! Handles Vulkan framebuffer creation following RAII principles

use ash::vk;
use std::sync::Arc;

use super::{ResourceKind, VulkanContext, VulkanError, VulkanResult};

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    context: Arc<VulkanContext>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Create a new single-layer framebuffer
    pub fn new(
        context: &Arc<VulkanContext>,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let framebuffer_create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            context.device().create_framebuffer(&framebuffer_create_info, None)
                .map_err(VulkanError::creation(ResourceKind::Framebuffer))?
        };

        Ok(Self {
            context: Arc::clone(context),
            framebuffer,
            extent,
        })
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Size of every attachment
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_framebuffer(self.framebuffer, None);
        }
    }
}
