//! Descriptor pool, layouts and sets
//!
//! The pool owns the two layouts this core binds against: a combined image sampler
//! for reading a shadow map, and a dynamic uniform buffer addressed by stride-aligned
//! offsets. Sets are freed back to the pool when dropped.

use ash::vk;
use std::sync::Arc;

use super::{ResourceKind, VulkanContext, VulkanError, VulkanResult};

/// Descriptor set layout builder for creating reusable layouts
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dynamic uniform buffer binding
    pub fn add_dynamic_uniform_buffer(mut self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build()
        );
        self
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(mut self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build()
        );
        self
    }

    /// Build the descriptor set layout
    pub fn build(self, context: &Arc<VulkanContext>) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&self.bindings);

        let layout = unsafe { context.device().create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::creation(ResourceKind::DescriptorSetLayout))?;

        Ok(DescriptorSetLayout {
            layout,
            context: Arc::clone(context),
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    context: Arc<VulkanContext>,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool for allocating descriptor sets
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    shadow_map_layout: DescriptorSetLayout,
    dynamic_uniform_layout: DescriptorSetLayout,
    context: Arc<VulkanContext>,
}

impl DescriptorPool {
    /// Create a pool able to hold `max_sets` sets of either layout
    pub fn new(context: &Arc<VulkanContext>, max_sets: u32) -> VulkanResult<Arc<Self>> {
        let shadow_map_layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .build(context)?;

        let dynamic_uniform_layout = DescriptorSetLayoutBuilder::new()
            .add_dynamic_uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .build(context)?;

        let pool_sizes = [
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(max_sets)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(max_sets)
                .build(),
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { context.device().create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::creation(ResourceKind::DescriptorPool))?;

        Ok(Arc::new(Self {
            pool,
            shadow_map_layout,
            dynamic_uniform_layout,
            context: Arc::clone(context),
        }))
    }

    /// Layout with one fragment-stage combined image sampler at binding 0
    pub fn shadow_map_layout(&self) -> vk::DescriptorSetLayout {
        self.shadow_map_layout.handle()
    }

    /// Layout with one dynamic uniform buffer at binding 0
    pub fn dynamic_uniform_layout(&self) -> vk::DescriptorSetLayout {
        self.dynamic_uniform_layout.handle()
    }

    /// Allocate a set sampling `view` (in shader-read layout) through `sampler`
    pub fn allocate_shadow_map_set(
        self: &Arc<Self>,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> VulkanResult<DescriptorSet> {
        let set = self.allocate(self.shadow_map_layout())?;

        let image_info = vk::DescriptorImageInfo::builder()
            .image_view(view)
            .sampler(sampler)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build();

        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set.handle())
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(&image_info))
            .build();

        unsafe {
            self.context.device().update_descriptor_sets(&[write], &[]);
        }
        Ok(set)
    }

    /// Allocate a set exposing `range` bytes of `buffer` at a dynamic offset
    pub fn allocate_dynamic_uniform_set(
        self: &Arc<Self>,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> VulkanResult<DescriptorSet> {
        let set = self.allocate(self.dynamic_uniform_layout())?;

        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(buffer)
            .offset(0)
            .range(range)
            .build();

        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set.handle())
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(std::slice::from_ref(&buffer_info))
            .build();

        unsafe {
            self.context.device().update_descriptor_sets(&[write], &[]);
        }
        Ok(set)
    }

    fn allocate(self: &Arc<Self>, layout: vk::DescriptorSetLayout) -> VulkanResult<DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.context.device().allocate_descriptor_sets(&alloc_info) }
            .map_err(VulkanError::creation(ResourceKind::DescriptorSet))?;

        let set = sets.into_iter().next().ok_or(VulkanError::ResourceCreation {
            resource: ResourceKind::DescriptorSet,
            result: vk::Result::ERROR_UNKNOWN,
        })?;

        Ok(DescriptorSet {
            pool: Arc::clone(self),
            set,
        })
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Descriptor set freed back to its pool on drop
pub struct DescriptorSet {
    pool: Arc<DescriptorPool>,
    set: vk::DescriptorSet,
}

impl DescriptorSet {
    /// Get the descriptor set handle
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        unsafe {
            let _ = self.pool.context.device().free_descriptor_sets(self.pool.pool, &[self.set]);
        }
    }
}
