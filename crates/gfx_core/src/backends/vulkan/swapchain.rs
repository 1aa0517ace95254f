//! Vulkan swapchain management
//!
//! Owns the swapchain, one image-available semaphore per frame context, and the
//! image index acquired for each frame context until it is presented.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device};

use super::{PhysicalDeviceInfo, VulkanError, VulkanResult};

/// Swapchain wrapper with RAII cleanup
pub struct Swapchain {
    device: Device,
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    image_available: Vec<vk::Semaphore>,
    acquired: Vec<Option<u32>>,
}

impl Swapchain {
    /// Create a swapchain, replacing `old_swapchain` if it is not null
    pub fn new(
        device: Device,
        swapchain_loader: SwapchainLoader,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
        physical_device: &PhysicalDeviceInfo,
        window_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device.device, surface)
        }
        .map_err(VulkanError::Api)?;

        let surface_formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device.device, surface)
        }
        .map_err(VulkanError::Api)?;
        let format = choose_surface_format(&surface_formats).ok_or_else(|| {
            VulkanError::InitializationFailed("Surface reports no formats".to_string())
        })?;

        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical_device.device, surface)
        }
        .map_err(VulkanError::Api)?;
        let present_mode = choose_present_mode(&present_modes);

        let extent = choose_extent(&surface_caps, window_extent);
        let image_count = choose_image_count(&surface_caps);

        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&swapchain_create_info, None) }
            .map_err(VulkanError::Api)?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(err) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::Api(err));
            }
        };

        let mut image_available = Vec::with_capacity(images.len());
        for _ in 0..images.len() {
            match unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) } {
                Ok(semaphore) => image_available.push(semaphore),
                Err(err) => {
                    unsafe {
                        for semaphore in image_available {
                            device.destroy_semaphore(semaphore, None);
                        }
                        swapchain_loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(VulkanError::Api(err));
                }
            }
        }

        log::info!(
            "Created swapchain: {} images, {}x{}, {:?}, {:?}",
            images.len(),
            extent.width,
            extent.height,
            format.format,
            present_mode
        );

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            acquired: vec![None; images.len()],
            images,
            format,
            extent,
            image_available,
        })
    }

    /// Acquire the next image for frame context `frame_index`
    pub fn acquire(&mut self, frame_index: u8) -> VulkanResult<u32> {
        let semaphore = self.semaphore(frame_index)?;
        let (image_index, suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
        .map_err(VulkanError::Api)?;
        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }

        self.acquired[usize::from(frame_index)] = Some(image_index);
        Ok(image_index)
    }

    /// Present the image acquired for `frame_index` on `queue`
    pub fn present(
        &mut self,
        queue: vk::Queue,
        frame_index: u8,
        wait_semaphores: &[vk::Semaphore],
    ) -> VulkanResult<()> {
        let image_index = self
            .acquired
            .get_mut(usize::from(frame_index))
            .and_then(Option::take)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no image acquired for frame context {}", frame_index),
            })?;

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
            .map_err(VulkanError::Api)?;
        if suboptimal {
            log::debug!("Presented to a suboptimal swapchain");
        }
        Ok(())
    }

    /// Image-available semaphore of `frame_index`
    pub fn semaphore(&self, frame_index: u8) -> VulkanResult<vk::Semaphore> {
        self.image_available
            .get(usize::from(frame_index))
            .copied()
            .ok_or(VulkanError::ResourceNotFound {
                id: u64::from(frame_index),
            })
    }

    /// Swapchain images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Get image count
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &semaphore in &self.image_available {
                self.device.destroy_semaphore(semaphore, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// B8G8R8A8 sRGB if offered, otherwise the first format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| {
            sf.format == vk::Format::B8G8R8A8_SRGB
                && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox if offered, otherwise FIFO
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface extent, or the window extent clamped to the surface limits
pub fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window_extent
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window_extent
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One image more than the minimum, within the surface maximum
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        preferred.min(caps.max_image_count)
    } else {
        preferred
    }
}
