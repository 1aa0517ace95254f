//! Vulkan instance, physical device selection and logical device creation

use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use raw_window_handle::RawDisplayHandle;

use super::{VulkanError, VulkanResult};
use crate::config::GraphicsConfig;

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug utilities extension, when validation is enabled
    pub debug_utils: Option<DebugUtils>,
    /// Debug messenger handle, when validation is enabled
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance
    ///
    /// `display` adds the surface extensions of the windowing system; validation
    /// layers are enabled when `config.validation_layers` is set.
    pub fn new(config: &GraphicsConfig, display: Option<RawDisplayHandle>) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e))
        })?;

        let app_name = CString::new(config.application_name.as_str()).map_err(|e| {
            VulkanError::InitializationFailed(format!("Invalid application name: {}", e))
        })?;
        let engine_name = CString::new("gfx_core")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions: Vec<*const c_char> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .map_err(VulkanError::Api)?
                .to_vec(),
            None => Vec::new(),
        };
        if config.validation_layers {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let validation_layer = CString::new("VK_LAYER_KHRONOS_validation")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let layer_names: Vec<*const c_char> = if config.validation_layers {
            vec![validation_layer.as_ptr()]
        } else {
            Vec::new()
        };

        // Synchronization validation catches frame ring hazards
        let validation_features = [vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION];
        let mut validation_info =
            vk::ValidationFeaturesEXT::builder().enabled_validation_features(&validation_features);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        if config.validation_layers {
            create_info = create_info.push_next(&mut validation_info);
        }

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.map_err(VulkanError::Api)?;

        let (debug_utils, debug_messenger) = if config.validation_layers {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => (Some(debug_utils), Some(messenger)),
                Err(err) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(err);
                }
            }
        } else {
            (None, None)
        };

        log::info!(
            "Created Vulkan instance for '{}' (validation: {})",
            config.application_name,
            config.validation_layers
        );

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(VulkanError::Api)
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(debug_messenger)) =
                (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(debug_messenger, None);
            }
            self.instance.destroy_instance(None);
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
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Queue families the device is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Graphics family, also used for presentation
    pub graphics: u32,
    /// Compute-only family
    pub compute: Option<u32>,
    /// Transfer-only family
    pub transfer: Option<u32>,
}

impl QueueFamilies {
    /// Pick families from the properties a device reports
    ///
    /// The graphics family must support presentation when `supports_present` says
    /// so. A dedicated compute family has no graphics bit; a dedicated transfer
    /// family has neither graphics nor compute.
    pub fn pick(
        families: &[vk::QueueFamilyProperties],
        supports_present: impl Fn(u32) -> bool,
        want_compute: bool,
        want_transfer: bool,
    ) -> Option<Self> {
        let with_queues = || {
            families
                .iter()
                .enumerate()
                .filter(|(_, family)| family.queue_count > 0)
                .map(|(index, family)| (index as u32, family.queue_flags))
        };

        let graphics = with_queues()
            .find(|&(index, flags)| {
                flags.contains(vk::QueueFlags::GRAPHICS) && supports_present(index)
            })
            .map(|(index, _)| index)?;

        let compute = want_compute
            .then(|| {
                with_queues()
                    .find(|(_, flags)| {
                        flags.contains(vk::QueueFlags::COMPUTE)
                            && !flags.contains(vk::QueueFlags::GRAPHICS)
                    })
                    .map(|(index, _)| index)
            })
            .flatten();

        let transfer = want_transfer
            .then(|| {
                with_queues()
                    .find(|(_, flags)| {
                        flags.contains(vk::QueueFlags::TRANSFER)
                            && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                    })
                    .map(|(index, _)| index)
            })
            .flatten();

        Some(Self {
            graphics,
            compute,
            transfer,
        })
    }

    /// Every distinct family
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        families.extend(self.compute);
        families.extend(self.transfer);
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory types and heaps
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Selected queue families
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// Select the first suitable physical device
    pub fn select_suitable_device(
        instance: &Instance,
        surface: Option<(&Surface, vk::SurfaceKHR)>,
        config: &GraphicsConfig,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }.map_err(VulkanError::Api)?;

        for device in devices {
            match Self::evaluate_device(instance, device, surface, config) {
                Ok(info) => {
                    let name = unsafe { CStr::from_ptr(info.properties.device_name.as_ptr()) };
                    log::info!(
                        "Selected GPU: {} (queues: {:?})",
                        name.to_string_lossy(),
                        info.queue_families
                    );
                    return Ok(info);
                }
                Err(err) => log::debug!("Skipping physical device: {}", err),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: Option<(&Surface, vk::SurfaceKHR)>,
        config: &GraphicsConfig,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if properties.api_version < vk::API_VERSION_1_3 {
            return Err(VulkanError::InitializationFailed("Vulkan 1.3 not supported".to_string()));
        }
        if properties.limits.timestamp_compute_and_graphics == vk::FALSE
            && config.timestamp_queries > 0
        {
            log::warn!("Device does not guarantee timestamps on every graphics queue");
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let supports_present = |index: u32| match surface {
            Some((loader, surface)) => unsafe {
                loader
                    .get_physical_device_surface_support(device, index, surface)
                    .unwrap_or(false)
            },
            None => true,
        };
        let queue_families = QueueFamilies::pick(
            &families,
            supports_present,
            config.dedicated_compute_queue,
            config.dedicated_transfer_queue,
        )
        .ok_or_else(|| {
            VulkanError::InitializationFailed("No graphics queue family found".to_string())
        })?;

        if surface.is_some() {
            let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
                .map_err(VulkanError::Api)?;
            let has_swapchain = extensions.iter().any(|available| {
                let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
                name == SwapchainLoader::name()
            });
            if !has_swapchain {
                return Err(VulkanError::InitializationFailed(
                    "Required device extensions not supported".to_string(),
                ));
            }
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Self {
            device,
            properties,
            memory_properties,
            queue_families,
        })
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics queue, also used for presentation
    pub graphics_queue: vk::Queue,
    /// Compute-only queue
    pub compute_queue: Option<vk::Queue>,
    /// Transfer-only queue
    pub transfer_queue: Option<vk::Queue>,
    /// Swapchain extension loader, when presenting
    pub swapchain_loader: Option<SwapchainLoader>,
}

impl LogicalDevice {
    /// Create the logical device with one queue per selected family
    pub fn new(
        instance: &Instance,
        physical_device: &PhysicalDeviceInfo,
        present: bool,
    ) -> VulkanResult<Self> {
        let families = physical_device.queue_families;
        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const c_char> = if present {
            vec![SwapchainLoader::name().as_ptr()]
        } else {
            Vec::new()
        };

        let mut vulkan13_features =
            vk::PhysicalDeviceVulkan13Features::builder().synchronization2(true);
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut vulkan13_features);

        let device =
            unsafe { instance.create_device(physical_device.device, &create_info, None) }
                .map_err(VulkanError::Api)?;

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let compute_queue = families
            .compute
            .map(|family| unsafe { device.get_device_queue(family, 0) });
        let transfer_queue = families
            .transfer
            .map(|family| unsafe { device.get_device_queue(family, 0) });
        let swapchain_loader = present.then(|| SwapchainLoader::new(instance, &device));

        Ok(Self {
            device,
            graphics_queue,
            compute_queue,
            transfer_queue,
            swapchain_loader,
        })
    }
}

/// Report a failed idle wait during teardown, returning whether the device went idle
pub(crate) fn idle_before_teardown(result: ash::prelude::VkResult<()>, owner: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            log::warn!("Failed to wait for device idle before destroying {}: {:?}", owner, err);
            false
        }
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            idle_before_teardown(self.device.device_wait_idle(), "logical device");
            self.device.destroy_device(None);
        }
    }
}
