//! Vulkan context management
//!
//! Owns the instance, the selected physical device, the logical device, one
//! graphics queue (also used for transfers) and a command pool. The context is
//! shared as `Arc<VulkanContext>`; it is constructor-injected into every
//! resource instead of being reached through a global.

use ash::extensions::ext::DebugUtils;
use ash::vk;
use ash::{Device, Entry, Instance};
use std::ffi::{c_char, CStr, CString};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigError, CoreConfig};
use crate::render::buffers::UniformStrategy;
use crate::render::passes::{Pass, Signal};
use crate::render::vulkan::commands::CommandRecorder;

/// Kind of GPU resource, named in every construction failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Device-resident vertex buffer
    VertexBuffer,
    /// Device-resident index buffer
    IndexBuffer,
    /// Host-visible transfer source
    StagingBuffer,
    /// Host-visible buffer used to read device data back
    ReadbackBuffer,
    /// Fixed-size uniform buffer
    UniformBuffer,
    /// Stride-indexed uniform buffer bound with dynamic offsets
    DynamicUniformBuffer,
    /// Shadow map depth image
    DepthImage,
    /// Shadow map depth image view
    DepthImageView,
    /// Shadow map framebuffer
    Framebuffer,
    /// Shadow map sampler
    Sampler,
    /// Descriptor set
    DescriptorSet,
    /// Descriptor pool
    DescriptorPool,
    /// Descriptor set layout
    DescriptorSetLayout,
    /// Depth-only render pass
    RenderPass,
    /// Shader module
    ShaderModule,
    /// Pipeline or pipeline layout
    Pipeline,
    /// Command buffer
    CommandBuffer,
    /// Command pool
    CommandPool,
    /// Binary semaphore
    Semaphore,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VertexBuffer => "vertex buffer",
            Self::IndexBuffer => "index buffer",
            Self::StagingBuffer => "staging buffer",
            Self::ReadbackBuffer => "readback buffer",
            Self::UniformBuffer => "uniform buffer",
            Self::DynamicUniformBuffer => "dynamic uniform buffer",
            Self::DepthImage => "depth image",
            Self::DepthImageView => "depth image view",
            Self::Framebuffer => "framebuffer",
            Self::Sampler => "sampler",
            Self::DescriptorSet => "descriptor set",
            Self::DescriptorPool => "descriptor pool",
            Self::DescriptorSetLayout => "descriptor set layout",
            Self::RenderPass => "render pass",
            Self::ShaderModule => "shader module",
            Self::Pipeline => "pipeline",
            Self::CommandBuffer => "command buffer",
            Self::CommandPool => "command pool",
            Self::Semaphore => "semaphore",
        };
        f.write_str(name)
    }
}

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Settings rejected before any device object was created
    #[error("Invalid settings: {0}")]
    InvalidSettings(#[from] ConfigError),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// No memory type satisfies both the resource's type bits and the required flags
    #[error("No compatible memory type for {resource}: type bits {type_bits:#b}, required {required:?}")]
    NoCompatibleMemoryType {
        /// Resource being allocated
        resource: ResourceKind,
        /// Memory-type bitmask from the resource's requirements
        type_bits: u32,
        /// Property flags the memory type had to provide
        required: vk::MemoryPropertyFlags,
    },

    /// Command buffer allocation failed (pool exhaustion or device error)
    #[error("Command buffer allocation failed: {0:?}")]
    CommandBufferAllocationFailed(vk::Result),

    /// Scene counts cannot produce the buffers the strategy needs
    #[error("Invalid scene size for {strategy:?}: {reason}")]
    InvalidSceneSize {
        /// Strategy that rejected the scene
        strategy: UniformStrategy,
        /// Which count was unusable
        reason: String,
    },

    /// Creating a device object failed
    #[error("Failed to create {resource}: {result:?}")]
    ResourceCreation {
        /// Resource being created
        resource: ResourceKind,
        /// Result code returned by the device
        result: vk::Result,
    },

    /// A pass was submitted before the signal it waits on was produced
    #[error("{pass:?} pass submitted before {waiting_on:?} was signaled")]
    PassOrderViolation {
        /// Pass whose submission was refused
        pass: Pass,
        /// Signal it waits on
        waiting_on: Signal,
    },
}

impl VulkanError {
    /// Map a device result into a creation failure for `resource`
    pub fn creation(resource: ResourceKind) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::ResourceCreation { resource, result }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
}

impl PhysicalDeviceInfo {
    /// Select a device with a graphics queue, preferring discrete GPUs
    pub fn select_suitable_device(instance: &Instance) -> VulkanResult<Self> {
        let devices = unsafe {
            instance.enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        let mut candidates: Vec<Self> = devices
            .into_iter()
            .filter_map(|device| Self::evaluate_device(instance, device))
            .collect();

        candidates.sort_by_key(|info| info.properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU);

        let selected = candidates.into_iter().next().ok_or_else(|| {
            VulkanError::InitializationFailed("No GPU with a graphics queue found".to_string())
        })?;

        log::info!("Selected GPU: {}", selected.name());
        Ok(selected)
    }

    fn evaluate_device(instance: &Instance, device: vk::PhysicalDevice) -> Option<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe {
            instance.get_physical_device_queue_family_properties(device)
        };

        let graphics_family = queue_families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;

        Some(Self {
            device,
            properties,
            memory_properties,
            graphics_family: u32::try_from(graphics_family).ok()?,
        })
    }

    /// Human-readable device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Main Vulkan context that owns all core Vulkan objects
pub struct VulkanContext {
    command_pool: vk::CommandPool,
    queue: vk::Queue,
    device: Device,
    physical_device: PhysicalDeviceInfo,
    debug_messenger: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    instance: Instance,
    _entry: Entry,
}

impl VulkanContext {
    /// Create a headless context: instance, device, one graphics queue and a command pool
    pub fn new(config: &CoreConfig) -> VulkanResult<Arc<Self>> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let validation = config.enable_validation && cfg!(debug_assertions) && Self::validation_available(&entry);
        if config.enable_validation && !validation {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation or VK_EXT_debug_utils is unavailable");
        }

        let instance = Self::create_instance(&entry, &config.application_name, validation)?;

        // Partial construction is unwound by the guard's Drop until it is disarmed
        let mut guard = PartialContext {
            instance: Some(instance.clone()),
            debug_messenger: None,
            device: None,
        };

        let debug_messenger = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            guard.debug_messenger = Some((debug_utils.clone(), messenger));
            Some((debug_utils, messenger))
        } else {
            None
        };

        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance)?;

        let queue_priorities = [1.0];
        let queue_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical_device.graphics_family)
            .queue_priorities(&queue_priorities)
            .build();

        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_info));

        let device = unsafe {
            instance.create_device(physical_device.device, &device_create_info, None)
                .map_err(VulkanError::Api)?
        };
        guard.device = Some(device.clone());

        let queue = unsafe { device.get_device_queue(physical_device.graphics_family, 0) };

        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(physical_device.graphics_family);

        let command_pool = unsafe {
            device.create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::creation(ResourceKind::CommandPool))?
        };

        guard.disarm();

        log::info!(
            "Vulkan context ready (min uniform offset alignment {} bytes)",
            physical_device.properties.limits.min_uniform_buffer_offset_alignment
        );

        Ok(Arc::new(Self {
            command_pool,
            queue,
            device,
            physical_device,
            debug_messenger,
            instance,
            _entry: entry,
        }))
    }

    fn validation_available(entry: &Entry) -> bool {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        let has_layer = layers.iter().any(|layer| {
            unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }.to_bytes() == b"VK_LAYER_KHRONOS_validation"
        });

        let extensions = unsafe { entry.enumerate_instance_extension_properties(None) }.unwrap_or_default();
        let has_debug_utils = extensions.iter().any(|extension| {
            (unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) }) == DebugUtils::name()
        });

        has_layer && has_debug_utils
    }

    fn create_instance(entry: &Entry, app_name: &str, validation: bool) -> VulkanResult<Instance> {
        let app_name_cstr = CString::new(app_name)
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {e}")))?;
        let engine_name_cstr = CString::new("deferred_core")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let validation_layer = CString::new("VK_LAYER_KHRONOS_validation")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

        let (layers, extensions): (Vec<*const c_char>, Vec<*const c_char>) = if validation {
            (vec![validation_layer.as_ptr()], vec![DebugUtils::name().as_ptr()])
        } else {
            (Vec::new(), Vec::new())
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);

        unsafe {
            entry.create_instance(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// Get the logical device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Get the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Memory heaps and types of the selected device
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.physical_device.memory_properties
    }

    /// Minimum alignment for uniform buffer offsets, including dynamic offsets
    pub fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.physical_device.properties.limits.min_uniform_buffer_offset_alignment
    }

    /// Get the submission queue
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Get the command pool
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Allocate one primary command buffer from the context's pool
    pub fn allocate_command_buffer(&self) -> VulkanResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe {
            self.device.allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::CommandBufferAllocationFailed)?
        };

        command_buffers
            .into_iter()
            .next()
            .ok_or(VulkanError::CommandBufferAllocationFailed(vk::Result::ERROR_UNKNOWN))
    }

    /// Submit command buffers without waiting for them
    pub fn submit(&self, command_buffers: &[vk::CommandBuffer]) -> VulkanResult<()> {
        let submit_info = vk::SubmitInfo::builder().command_buffers(command_buffers);

        unsafe {
            self.device.queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())
                .map_err(VulkanError::Api)
        }
    }

    /// Submit command buffers and block until the queue is idle
    pub fn submit_and_wait(&self, command_buffers: &[vk::CommandBuffer]) -> VulkanResult<()> {
        self.submit(command_buffers)?;
        unsafe { self.device.queue_wait_idle(self.queue).map_err(VulkanError::Api) }
    }

    /// Record and run a one-shot command sequence synchronously
    ///
    /// Allocates a command buffer, begins it for one-time submission, lets `record`
    /// fill it, ends it, submits it, waits for the queue to go idle and frees it.
    /// The buffer is freed on every path.
    pub fn execute_one_shot<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder) -> VulkanResult<()>,
    {
        let command_buffer = self.allocate_command_buffer()?;

        let result = (|| {
            let mut recorder = CommandRecorder::new(command_buffer, self.device.clone());
            recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            record(&mut recorder)?;
            let command_buffer = recorder.end()?;
            self.submit_and_wait(&[command_buffer])
        })();

        unsafe {
            self.device.free_command_buffers(self.command_pool, &[command_buffer]);
        }

        result
    }

    /// Block until every queue of the device is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Unwinds a context that failed halfway through construction
struct PartialContext {
    instance: Option<Instance>,
    debug_messenger: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    device: Option<Device>,
}

impl PartialContext {
    fn disarm(mut self) {
        self.device = None;
        self.debug_messenger = None;
        self.instance = None;
    }
}

impl Drop for PartialContext {
    fn drop(&mut self) {
        unsafe {
            if let Some(device) = self.device.take() {
                device.destroy_device(None);
            }
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            if let Some(instance) = self.instance.take() {
                instance.destroy_instance(None);
            }
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}
