//! Depth images and samplers
//!
//! Shadow maps render into a depth image and are later sampled from it, so the
//! image carries both attachment and sampled usage.

use ash::vk;
use std::sync::Arc;

use super::{DeviceMemory, ResourceKind, VulkanContext, VulkanError, VulkanResult};

/// Depth format used for every shadow map
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

const DEPTH_SUBRESOURCE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::DEPTH,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Square depth image with device-local memory and a view
pub struct DepthImage {
    context: Arc<VulkanContext>,
    image: vk::Image,
    view: vk::ImageView,
    memory: DeviceMemory,
    extent: vk::Extent2D,
}

impl DepthImage {
    /// Create the image, bind device-local memory and create its view
    ///
    /// The image starts in `UNDEFINED` layout.
    pub fn new(context: &Arc<VulkanContext>, resolution: u32) -> VulkanResult<Self> {
        let extent = vk::Extent2D { width: resolution, height: resolution };

        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(DEPTH_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let device = context.device();

        let image = unsafe {
            device.create_image(&image_create_info, None)
                .map_err(VulkanError::creation(ResourceKind::DepthImage))?
        };

        let memory = match DeviceMemory::for_image(
            context,
            image,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ResourceKind::DepthImage,
        ) {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { device.destroy_image(image, None) };
                return Err(error);
            }
        };

        let view_create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(DEPTH_SUBRESOURCE);

        let view = match unsafe { device.create_image_view(&view_create_info, None) } {
            Ok(view) => view,
            Err(result) => {
                unsafe { device.destroy_image(image, None) };
                return Err(VulkanError::creation(ResourceKind::DepthImageView)(result));
            }
        };

        log::debug!("Created {}x{} depth image ({} bytes)", resolution, resolution, memory.size());

        Ok(Self {
            context: Arc::clone(context),
            image,
            view,
            memory,
            extent,
        })
    }

    /// Move the image from `UNDEFINED` to `DEPTH_STENCIL_ATTACHMENT_OPTIMAL`
    ///
    /// Runs as a one-shot submission and blocks until the queue is idle.
    pub fn transition_to_depth_attachment(&self) -> VulkanResult<()> {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(DEPTH_SUBRESOURCE)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build();

        self.context.execute_one_shot(|recorder| {
            recorder.cmd_image_barrier(
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                barrier,
            );
            Ok(())
        })
    }

    /// Get the image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Get the depth view handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Width and height in texels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Backing memory
    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }
}

impl Drop for DepthImage {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_image_view(self.view, None);
            self.context.device().destroy_image(self.image, None);
        }
    }
}

/// Sampler wrapper with RAII cleanup
pub struct Sampler {
    context: Arc<VulkanContext>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Linear, clamp-to-edge sampler with an opaque white border for reading shadow maps
    pub fn shadow_map(context: &Arc<VulkanContext>) -> VulkanResult<Self> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .mip_lod_bias(0.0)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .min_lod(0.0)
            .max_lod(1.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);

        let sampler = unsafe {
            context.device().create_sampler(&create_info, None)
                .map_err(VulkanError::creation(ResourceKind::Sampler))?
        };

        Ok(Self {
            context: Arc::clone(context),
            sampler,
        })
    }

    /// Get the sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_sampler(self.sampler, None);
        }
    }
}
