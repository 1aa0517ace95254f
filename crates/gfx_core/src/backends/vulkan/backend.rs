//! [`GraphicsBackend`] implementation over `ash`

use std::ffi::CString;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::extensions::khr::Surface;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::barriers::{group_barriers, to_vk_aspect_mask, to_vk_image_layout};
use super::conversions::{
    clamp_lod_max, from_vk_format, to_vk_address_mode, to_vk_bind_point, to_vk_buffer_usage,
    to_vk_descriptor_type, to_vk_filter, to_vk_format, to_vk_image_type, to_vk_image_usage,
    to_vk_load_op, to_vk_mipmap_mode, to_vk_shader_stages, to_vk_store_op, to_vk_view_type,
};
use super::device::{idle_before_teardown, LogicalDevice, PhysicalDeviceInfo, VulkanInstance};
use super::memory;
use super::swapchain::Swapchain;
use super::{VulkanError, VulkanResult};
use crate::config::GraphicsConfig;
use crate::graphics::backend::{
    BindPoint, GraphicsBackend, NativeAttachment, NativeBarriers, NativeDescriptor,
    NativeDescriptorWrite, NativeGraphicsPipelineDesc, NativeRenderPassDesc, NativeShaderStage,
    QueueRole, Submission, WaitStage,
};
use crate::graphics::barriers::{
    TextureLayout, TexturePlane, REMAINING_ARRAY_LAYERS, REMAINING_MIP_LEVELS,
};
use crate::graphics::descriptors::{DescriptorBindingType, PushConstantDesc, ResolvedBinding};
use crate::graphics::error::{GraphicsError, GraphicsResult};
use crate::graphics::resources::{
    BufferCopy, BufferDesc, LoadOp, MemoryUsage, RenderTargetViewDesc, SamplerDesc,
    ShaderModuleDesc, TextureDesc, TextureUsage, TextureViewDesc,
};

/// Window the backend presents to
#[derive(Debug, Clone, Copy)]
pub struct SurfaceTarget {
    /// Display connection of the windowing system
    pub display: RawDisplayHandle,
    /// Window to create the surface for
    pub window: RawWindowHandle,
    /// Framebuffer size in pixels, used when the surface leaves it to the swapchain
    pub extent: [u32; 2],
}

/// Buffer with its dedicated memory
#[derive(Debug)]
pub struct VulkanBuffer {
    /// Buffer handle
    pub buffer: vk::Buffer,
    /// Bound memory
    pub memory: vk::DeviceMemory,
    /// Size in bytes
    pub size: u64,
}

/// Image with its memory, unless it belongs to the swapchain
#[derive(Debug)]
pub struct VulkanTexture {
    /// Image handle
    pub image: vk::Image,
    /// Bound memory, `None` for swapchain images
    pub memory: Option<vk::DeviceMemory>,
    /// Native format
    pub format: vk::Format,
}

/// One physical descriptor set per frame context, allocated from a private pool
#[derive(Debug)]
pub struct VulkanDescriptorSet {
    /// Pool every copy is allocated from
    pub pool: vk::DescriptorPool,
    /// Copies, indexed by frame context
    pub sets: Vec<vk::DescriptorSet>,
}

/// Image view rendered to
#[derive(Debug)]
pub struct VulkanRenderTargetView {
    /// View handle
    pub view: vk::ImageView,
    /// Native format
    pub format: vk::Format,
}

/// Render pass with the framebuffer over its attachments
#[derive(Debug)]
pub struct VulkanRenderPass {
    /// Render pass handle
    pub render_pass: vk::RenderPass,
    /// Framebuffer binding every attachment
    pub framebuffer: vk::Framebuffer,
    /// Framebuffer size
    pub extent: vk::Extent2D,
    /// Color attachment count
    pub color_attachments: u32,
    /// Whether the last attachment is a depth/stencil attachment
    pub depth_stencil: bool,
}

struct QueueInfo {
    family: u32,
    queue: Mutex<vk::Queue>,
}

struct PresentationSurface {
    loader: Surface,
    surface: vk::SurfaceKHR,
}

/// Vulkan device, queues and optional swapchain
pub struct VulkanBackend {
    swapchain: Option<Mutex<Swapchain>>,
    surface: Option<PresentationSurface>,
    queues: [Option<QueueInfo>; 3],
    device: LogicalDevice,
    physical_device: PhysicalDeviceInfo,
    instance: VulkanInstance,
}

fn api_error(result: vk::Result) -> GraphicsError {
    GraphicsError::Vulkan(VulkanError::Api(result))
}

const fn role_slot(role: QueueRole) -> usize {
    match role {
        QueueRole::Transfer => 0,
        QueueRole::Compute => 1,
        QueueRole::Graphics => 2,
    }
}

fn entry_point_name(entry_point: &str) -> GraphicsResult<CString> {
    CString::new(entry_point).map_err(|_| GraphicsError::InvalidOperation {
        reason: format!("entry point '{}' contains a nul byte", entry_point),
    })
}

fn buffer_infos(
    descriptors: &[NativeDescriptor<'_, VulkanBackend>],
) -> Vec<vk::DescriptorBufferInfo> {
    descriptors
        .iter()
        .filter_map(|descriptor| match descriptor {
            NativeDescriptor::Buffer { buffer, offset, size } => Some(vk::DescriptorBufferInfo {
                buffer: buffer.buffer,
                offset: *offset,
                range: *size,
            }),
            _ => None,
        })
        .collect()
}

/// Storage textures with no tracked layout are read in GENERAL
fn image_infos(
    descriptors: &[NativeDescriptor<'_, VulkanBackend>],
    storage: bool,
) -> Vec<vk::DescriptorImageInfo> {
    descriptors
        .iter()
        .filter_map(|descriptor| match descriptor {
            NativeDescriptor::Sampler(sampler) => Some(vk::DescriptorImageInfo {
                sampler: **sampler,
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::UNDEFINED,
            }),
            NativeDescriptor::Texture { view, layout } => Some(vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: **view,
                image_layout: match layout {
                    TextureLayout::Unknown if storage => vk::ImageLayout::GENERAL,
                    TextureLayout::Unknown => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    other => to_vk_image_layout(*other),
                },
            }),
            NativeDescriptor::Buffer { .. } => None,
        })
        .collect()
}

fn attachment_description(
    attachment: &NativeAttachment<'_, VulkanBackend>,
) -> vk::AttachmentDescription {
    let planes = attachment.format.planes();
    let layout = if planes.contains(TexturePlane::COLOR) {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    };
    let (stencil_load_op, stencil_store_op) = if planes.contains(TexturePlane::STENCIL) {
        (to_vk_load_op(attachment.load), to_vk_store_op(attachment.store))
    } else {
        (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
    };

    vk::AttachmentDescription {
        format: attachment.view.format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: to_vk_load_op(attachment.load),
        store_op: to_vk_store_op(attachment.store),
        stencil_load_op,
        stencil_store_op,
        // Loaded contents must already be in the attachment layout
        initial_layout: if attachment.load == LoadOp::Load {
            layout
        } else {
            vk::ImageLayout::UNDEFINED
        },
        final_layout: layout,
        ..Default::default()
    }
}

fn to_vk_wait_stage(stage: WaitStage) -> vk::PipelineStageFlags {
    if stage.contains(WaitStage::ALL_COMMANDS) {
        vk::PipelineStageFlags::ALL_COMMANDS
    } else {
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
    }
}

impl VulkanBackend {
    /// Create the device, and a swapchain for `target` when `config.present` is set
    pub fn new(config: &GraphicsConfig, target: Option<SurfaceTarget>) -> GraphicsResult<Self> {
        if config.present && target.is_none() {
            return Err(GraphicsError::InitializationFailed(
                "presentation requested without a window".to_string(),
            ));
        }
        let target = target.filter(|_| config.present);

        let instance = VulkanInstance::new(config, target.map(|target| target.display))?;

        let surface = match target {
            Some(target) => {
                let loader = Surface::new(&instance.entry, &instance.instance);
                let surface = unsafe {
                    ash_window::create_surface(
                        &instance.entry,
                        &instance.instance,
                        target.display,
                        target.window,
                        None,
                    )
                }
                .map_err(|err| {
                    VulkanError::InitializationFailed(format!("Surface creation: {:?}", err))
                })?;
                Some(PresentationSurface { loader, surface })
            }
            None => None,
        };

        let physical_device = match PhysicalDeviceInfo::select_suitable_device(
            &instance.instance,
            surface.as_ref().map(|s| (&s.loader, s.surface)),
            config,
        ) {
            Ok(info) => info,
            Err(err) => {
                if let Some(surface) = &surface {
                    unsafe { surface.loader.destroy_surface(surface.surface, None) };
                }
                return Err(err.into());
            }
        };

        let device = match LogicalDevice::new(
            &instance.instance,
            &physical_device,
            surface.is_some(),
        ) {
            Ok(device) => device,
            Err(err) => {
                if let Some(surface) = &surface {
                    unsafe { surface.loader.destroy_surface(surface.surface, None) };
                }
                return Err(err.into());
            }
        };

        let families = physical_device.queue_families;
        let queues = [
            families.transfer.zip(device.transfer_queue),
            families.compute.zip(device.compute_queue),
            Some((families.graphics, device.graphics_queue)),
        ]
        .map(|queue| {
            queue.map(|(family, queue)| QueueInfo {
                family,
                queue: Mutex::new(queue),
            })
        });

        let mut backend = Self {
            swapchain: None,
            surface,
            queues,
            device,
            physical_device,
            instance,
        };

        if let Some(target) = target {
            let extent = vk::Extent2D {
                width: target.extent[0],
                height: target.extent[1],
            };
            let swapchain = backend.create_swapchain(extent, vk::SwapchainKHR::null())?;
            backend.swapchain = Some(Mutex::new(swapchain));
        }

        log::info!(
            "Vulkan backend ready (compute queue: {}, transfer queue: {}, presenting: {})",
            backend.queues[role_slot(QueueRole::Compute)].is_some(),
            backend.queues[role_slot(QueueRole::Transfer)].is_some(),
            backend.swapchain.is_some()
        );
        Ok(backend)
    }

    fn create_swapchain(
        &self,
        extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Swapchain> {
        let (Some(surface), Some(loader)) = (&self.surface, &self.device.swapchain_loader) else {
            return Err(VulkanError::InvalidOperation {
                reason: "backend was created without a surface".to_string(),
            });
        };
        Swapchain::new(
            self.device.device.clone(),
            loader.clone(),
            surface.surface,
            &surface.loader,
            &self.physical_device,
            extent,
            old_swapchain,
        )
    }

    /// Recreate the swapchain after the window was resized
    ///
    /// Waits for the device to go idle. The image count may not change, since the
    /// frame ring was sized from it.
    pub fn recreate_swap_chain(&self, extent: [u32; 2]) -> GraphicsResult<()> {
        let Some(swapchain) = &self.swapchain else {
            return Err(GraphicsError::InvalidOperation {
                reason: "backend is not presenting".to_string(),
            });
        };
        self.wait_idle()?;

        let mut swapchain = swapchain.lock().unwrap_or_else(PoisonError::into_inner);
        let replacement = self.create_swapchain(
            vk::Extent2D {
                width: extent[0],
                height: extent[1],
            },
            swapchain.handle(),
        )?;
        if replacement.image_count() != swapchain.image_count() {
            return Err(GraphicsError::InvalidOperation {
                reason: format!(
                    "swapchain image count changed from {} to {}",
                    swapchain.image_count(),
                    replacement.image_count()
                ),
            });
        }
        *swapchain = replacement;
        Ok(())
    }

    /// Swapchain images with descriptions, ready to be registered as textures
    pub fn swap_chain_textures(&self) -> Vec<(VulkanTexture, TextureDesc)> {
        let Some(swapchain) = &self.swapchain else {
            return Vec::new();
        };
        let swapchain = swapchain.lock().unwrap_or_else(PoisonError::into_inner);
        let extent = swapchain.extent();
        let format = swapchain.format().format;

        swapchain
            .images()
            .iter()
            .enumerate()
            .map(|(index, &image)| {
                let texture = VulkanTexture {
                    image,
                    memory: None,
                    format,
                };
                let desc = TextureDesc {
                    dimensions: [extent.width, extent.height, 1],
                    format: from_vk_format(format).unwrap_or_default(),
                    array_size: 1,
                    mip_count: 1,
                    usage: TextureUsage::COLOR_ATTACHMENT | TextureUsage::TRANSFER_DST,
                    memory: MemoryUsage::GpuOnly,
                    debug_name: format!("swapchain image {}", index),
                };
                (texture, desc)
            })
            .collect()
    }

    /// Logical device, for recording commands the core does not wrap
    pub fn device(&self) -> &ash::Device {
        &self.device.device
    }

    /// Selected physical device
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Instance the device was created from
    pub fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    fn queue(&self, role: QueueRole) -> GraphicsResult<&QueueInfo> {
        self.queues[role_slot(role)]
            .as_ref()
            .ok_or(GraphicsError::QueueUnavailable { queue: role })
    }

    fn swapchain(&self) -> GraphicsResult<MutexGuard<'_, Swapchain>> {
        self.swapchain
            .as_ref()
            .map(|swapchain| swapchain.lock().unwrap_or_else(PoisonError::into_inner))
            .ok_or_else(|| GraphicsError::InvalidOperation {
                reason: "backend is not presenting".to_string(),
            })
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        idle_before_teardown(unsafe { self.device.device.device_wait_idle() }, "Vulkan backend");
        self.swapchain.take();
        if let Some(surface) = self.surface.take() {
            unsafe { surface.loader.destroy_surface(surface.surface, None) };
        }
        log::info!("Vulkan backend destroyed");
        // Remaining fields drop in declaration order: device before instance
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("queue_families", &self.physical_device.queue_families)
            .field("presenting", &self.swapchain.is_some())
            .finish()
    }
}

impl GraphicsBackend for VulkanBackend {
    type CommandPool = vk::CommandPool;
    type CommandBuffer = vk::CommandBuffer;
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;
    type QueryPool = vk::QueryPool;
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type TextureView = vk::ImageView;
    type Sampler = vk::Sampler;
    type DescriptorSetLayout = vk::DescriptorSetLayout;
    type DescriptorSet = VulkanDescriptorSet;
    type PipelineLayout = vk::PipelineLayout;
    type ShaderModule = vk::ShaderModule;
    type RenderTargetView = VulkanRenderTargetView;
    type RenderPass = VulkanRenderPass;
    type GraphicsPipeline = vk::Pipeline;
    type ComputePipeline = vk::Pipeline;

    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn has_queue(&self, role: QueueRole) -> bool {
        self.queues[role_slot(role)].is_some()
    }

    fn swap_chain_image_count(&self) -> Option<u8> {
        let swapchain = self.swapchain.as_ref()?;
        let count = swapchain.lock().unwrap_or_else(PoisonError::into_inner).image_count();
        Some(u8::try_from(count).unwrap_or(u8::MAX))
    }

    fn create_command_pool(&self, role: QueueRole) -> GraphicsResult<Self::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(self.queue(role)?.family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        unsafe { self.device.device.create_command_pool(&create_info, None) }.map_err(api_error)
    }

    fn destroy_command_pool(&self, pool: Self::CommandPool) {
        unsafe { self.device.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(
        &self,
        pool: Self::CommandPool,
    ) -> GraphicsResult<Self::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .map_err(api_error)?;
        buffers.first().copied().ok_or_else(|| {
            GraphicsError::Vulkan(VulkanError::InvalidOperation {
                reason: "driver returned no command buffer".to_string(),
            })
        })
    }

    fn free_command_buffers(&self, pool: Self::CommandPool, buffers: &[Self::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.device.free_command_buffers(pool, buffers) };
        }
    }

    fn begin_command_buffer(&self, buffer: Self::CommandBuffer) -> GraphicsResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.device.begin_command_buffer(buffer, &begin_info) }.map_err(api_error)
    }

    fn end_command_buffer(&self, buffer: Self::CommandBuffer) -> GraphicsResult<()> {
        unsafe { self.device.device.end_command_buffer(buffer) }.map_err(api_error)
    }

    fn reset_command_buffer(&self, buffer: Self::CommandBuffer) -> GraphicsResult<()> {
        unsafe {
            self.device
                .device
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(api_error)
    }

    fn create_fence(&self, signaled: bool) -> GraphicsResult<Self::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.device.create_fence(&create_info, None) }.map_err(api_error)
    }

    fn fence_status(&self, fence: Self::Fence) -> GraphicsResult<bool> {
        unsafe { self.device.device.get_fence_status(fence) }.map_err(api_error)
    }

    fn wait_for_fences(&self, fences: &[Self::Fence], timeout_ns: u64) -> GraphicsResult<()> {
        if fences.is_empty() {
            return Ok(());
        }
        unsafe { self.device.device.wait_for_fences(fences, true, timeout_ns) }.map_err(api_error)
    }

    fn reset_fence(&self, fence: Self::Fence) -> GraphicsResult<()> {
        unsafe { self.device.device.reset_fences(&[fence]) }.map_err(api_error)
    }

    fn destroy_fence(&self, fence: Self::Fence) {
        unsafe { self.device.device.destroy_fence(fence, None) };
    }

    fn create_semaphore(&self) -> GraphicsResult<Self::Semaphore> {
        unsafe {
            self.device
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(api_error)
    }

    fn destroy_semaphore(&self, semaphore: Self::Semaphore) {
        unsafe { self.device.device.destroy_semaphore(semaphore, None) };
    }

    fn submit(&self, role: QueueRole, submission: &Submission<'_, Self>) -> GraphicsResult<()> {
        let queue = self.queue(role)?;

        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submission
            .wait_semaphores
            .iter()
            .map(|&(semaphore, stage)| (semaphore, to_vk_wait_stage(stage)))
            .unzip();
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(submission.command_buffers)
            .signal_semaphores(submission.signal_semaphores)
            .build();

        let queue = queue.queue.lock().unwrap_or_else(PoisonError::into_inner);
        unsafe {
            self.device.device.queue_submit(
                *queue,
                &[submit_info],
                submission.fence.unwrap_or_else(vk::Fence::null),
            )
        }
        .map_err(api_error)
    }

    fn acquire_next_image(&self, frame_index: u8) -> GraphicsResult<()> {
        self.swapchain()?.acquire(frame_index)?;
        Ok(())
    }

    fn image_available_semaphore(&self, frame_index: u8) -> Option<Self::Semaphore> {
        let swapchain = self.swapchain.as_ref()?;
        swapchain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .semaphore(frame_index)
            .ok()
    }

    fn present(&self, frame_index: u8, wait_semaphores: &[Self::Semaphore]) -> GraphicsResult<()> {
        let queue = self.queue(QueueRole::Graphics)?;
        let mut swapchain = self.swapchain()?;
        let queue = queue.queue.lock().unwrap_or_else(PoisonError::into_inner);
        swapchain.present(*queue, frame_index, wait_semaphores)?;
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> GraphicsResult<Self::Buffer> {
        let device = &self.device.device;
        let create_info = vk::BufferCreateInfo::builder()
            .size(desc.size.max(1))
            .usage(to_vk_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&create_info, None) }.map_err(api_error)?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = match memory::allocate(
            device,
            requirements,
            desc.memory,
            &self.physical_device.memory_properties,
        )
        {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err.into());
            }
        };
        if let Err(err) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(api_error(err));
        }

        Ok(VulkanBuffer {
            buffer,
            memory,
            size: desc.size,
        })
    }

    fn destroy_buffer(&self, buffer: Self::Buffer) {
        unsafe {
            self.device.device.destroy_buffer(buffer.buffer, None);
            self.device.device.free_memory(buffer.memory, None);
        }
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        memory::write_mapped(&self.device.device, buffer.memory, offset, data)?;
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: &Self::Buffer,
        offset: u64,
        out: &mut [u8],
    ) -> GraphicsResult<()> {
        memory::read_mapped(&self.device.device, buffer.memory, offset, out)?;
        Ok(())
    }

    fn create_texture(&self, desc: &TextureDesc) -> GraphicsResult<Self::Texture> {
        let device = &self.device.device;
        let format = to_vk_format(desc.format);
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(to_vk_image_type(desc.dimensions))
            .format(format)
            .extent(vk::Extent3D {
                width: desc.dimensions[0].max(1),
                height: desc.dimensions[1].max(1),
                depth: desc.dimensions[2].max(1),
            })
            .mip_levels(u32::from(desc.mip_count.max(1)))
            .array_layers(u32::from(desc.array_size.max(1)))
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(to_vk_image_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&create_info, None) }.map_err(api_error)?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = match memory::allocate(
            device,
            requirements,
            desc.memory,
            &self.physical_device.memory_properties,
        )
        {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err.into());
            }
        };
        if let Err(err) = unsafe { device.bind_image_memory(image, memory, 0) } {
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            return Err(api_error(err));
        }

        Ok(VulkanTexture {
            image,
            memory: Some(memory),
            format,
        })
    }

    fn destroy_texture(&self, texture: Self::Texture, owns_memory: bool) {
        if !owns_memory {
            return;
        }
        unsafe {
            self.device.device.destroy_image(texture.image, None);
            if let Some(memory) = texture.memory {
                self.device.device.free_memory(memory, None);
            }
        }
    }

    fn create_texture_view(
        &self,
        texture: &Self::Texture,
        desc: &TextureViewDesc,
    ) -> GraphicsResult<Self::TextureView> {
        let level_count = if desc.mip_count == REMAINING_MIP_LEVELS {
            vk::REMAINING_MIP_LEVELS
        } else {
            u32::from(desc.mip_count)
        };
        let layer_count = if desc.array_count == REMAINING_ARRAY_LAYERS {
            vk::REMAINING_ARRAY_LAYERS
        } else {
            u32::from(desc.array_count)
        };

        let create_info = vk::ImageViewCreateInfo::builder()
            .image(texture.image)
            .view_type(to_vk_view_type(desc.view_type))
            .format(to_vk_format(desc.format))
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: to_vk_aspect_mask(desc.planes),
                base_mip_level: u32::from(desc.mip_start),
                level_count,
                base_array_layer: u32::from(desc.array_start),
                layer_count,
            });
        unsafe { self.device.device.create_image_view(&create_info, None) }.map_err(api_error)
    }

    fn destroy_texture_view(&self, view: Self::TextureView) {
        unsafe { self.device.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> GraphicsResult<Self::Sampler> {
        let create_info = vk::SamplerCreateInfo::builder()
            .min_filter(to_vk_filter(desc.min_filter))
            .mag_filter(to_vk_filter(desc.mag_filter))
            .mipmap_mode(to_vk_mipmap_mode(desc.mip_filter))
            .address_mode_u(to_vk_address_mode(desc.address_mode[0]))
            .address_mode_v(to_vk_address_mode(desc.address_mode[1]))
            .address_mode_w(to_vk_address_mode(desc.address_mode[2]))
            .mip_lod_bias(desc.lod_bias)
            .min_lod(desc.lod_min)
            .max_lod(clamp_lod_max(desc.lod_max))
            .anisotropy_enable(false)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false);
        unsafe { self.device.device.create_sampler(&create_info, None) }.map_err(api_error)
    }

    fn destroy_sampler(&self, sampler: Self::Sampler) {
        unsafe { self.device.device.destroy_sampler(sampler, None) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[ResolvedBinding],
    ) -> GraphicsResult<Self::DescriptorSetLayout> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(to_vk_descriptor_type(binding.binding_type))
                    .descriptor_count(u32::from(binding.count))
                    .stage_flags(to_vk_shader_stages(binding.visibility))
                    .build()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
        unsafe { self.device.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(api_error)
    }

    fn destroy_descriptor_set_layout(&self, layout: Self::DescriptorSetLayout) {
        unsafe { self.device.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_set(
        &self,
        layout: &Self::DescriptorSetLayout,
        pool_sizes: &[(DescriptorBindingType, u32)],
        frame_count: u8,
    ) -> GraphicsResult<Self::DescriptorSet> {
        let device = &self.device.device;
        let vk_pool_sizes: Vec<vk::DescriptorPoolSize> = pool_sizes
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|&(binding_type, count)| vk::DescriptorPoolSize {
                ty: to_vk_descriptor_type(binding_type),
                descriptor_count: count,
            })
            .collect();
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(u32::from(frame_count))
            .pool_sizes(&vk_pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(api_error)?;

        let layouts = vec![*layout; usize::from(frame_count)];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => Ok(VulkanDescriptorSet { pool, sets }),
            Err(err) => {
                unsafe { device.destroy_descriptor_pool(pool, None) };
                Err(api_error(err))
            }
        }
    }

    fn destroy_descriptor_set(&self, set: Self::DescriptorSet) {
        // Destroying the pool frees every copy
        unsafe { self.device.device.destroy_descriptor_pool(set.pool, None) };
    }

    fn write_descriptor_set(
        &self,
        set: &Self::DescriptorSet,
        frame_index: u8,
        writes: &[NativeDescriptorWrite<'_, Self>],
    ) {
        let Some(&dst_set) = set.sets.get(usize::from(frame_index)) else {
            log::error!("Descriptor set has no copy for frame context {}", frame_index);
            return;
        };

        enum Infos {
            Images(Vec<vk::DescriptorImageInfo>),
            Buffers(Vec<vk::DescriptorBufferInfo>),
        }

        let infos: Vec<Infos> = writes
            .iter()
            .map(|write| {
                if write.binding_type.is_buffer() {
                    Infos::Buffers(buffer_infos(&write.descriptors))
                } else {
                    let storage = matches!(
                        write.binding_type,
                        DescriptorBindingType::StorageReadOnlyTexture
                            | DescriptorBindingType::StorageReadWriteTexture
                    );
                    Infos::Images(image_infos(&write.descriptors, storage))
                }
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .zip(&infos)
            .filter(|(_, info)| match info {
                Infos::Images(images) => !images.is_empty(),
                Infos::Buffers(buffers) => !buffers.is_empty(),
            })
            .map(|(write, info)| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(dst_set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_offset)
                    .descriptor_type(to_vk_descriptor_type(write.binding_type));
                match info {
                    Infos::Images(images) => builder.image_info(images).build(),
                    Infos::Buffers(buffers) => builder.buffer_info(buffers).build(),
                }
            })
            .collect();

        if !vk_writes.is_empty() {
            unsafe { self.device.device.update_descriptor_sets(&vk_writes, &[]) };
        }
    }

    fn bind_descriptor_set(
        &self,
        buffer: Self::CommandBuffer,
        bind_point: BindPoint,
        layout: &Self::PipelineLayout,
        set_index: u32,
        set: &Self::DescriptorSet,
        frame_index: u8,
    ) {
        let Some(&native_set) = set.sets.get(usize::from(frame_index)) else {
            log::error!("Descriptor set has no copy for frame context {}", frame_index);
            return;
        };
        unsafe {
            self.device.device.cmd_bind_descriptor_sets(
                buffer,
                to_vk_bind_point(bind_point),
                *layout,
                set_index,
                &[native_set],
                &[],
            );
        }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[&Self::DescriptorSetLayout],
        push_constants: &[PushConstantDesc],
    ) -> GraphicsResult<Self::PipelineLayout> {
        let layouts: Vec<vk::DescriptorSetLayout> =
            set_layouts.iter().map(|layout| **layout).collect();
        let ranges: Vec<vk::PushConstantRange> = push_constants
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: to_vk_shader_stages(range.visibility),
                offset: u32::from(range.offset),
                size: u32::from(range.size_in_bytes),
            })
            .collect();
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&layouts)
            .push_constant_ranges(&ranges);
        unsafe { self.device.device.create_pipeline_layout(&create_info, None) }.map_err(api_error)
    }

    fn destroy_pipeline_layout(&self, layout: Self::PipelineLayout) {
        unsafe { self.device.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_shader_module(&self, desc: &ShaderModuleDesc) -> GraphicsResult<Self::ShaderModule> {
        log::debug!("Creating shader module '{}' from {} words", desc.debug_name, desc.code.len());
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&desc.code);
        unsafe { self.device.device.create_shader_module(&create_info, None) }.map_err(api_error)
    }

    fn destroy_shader_module(&self, module: Self::ShaderModule) {
        unsafe { self.device.device.destroy_shader_module(module, None) };
    }

    fn create_render_target_view(
        &self,
        texture: &Self::Texture,
        desc: &RenderTargetViewDesc,
    ) -> GraphicsResult<Self::RenderTargetView> {
        let format = to_vk_format(desc.format);
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(texture.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: to_vk_aspect_mask(desc.planes),
                base_mip_level: u32::from(desc.mip_level),
                level_count: 1,
                base_array_layer: u32::from(desc.array_layer),
                layer_count: 1,
            });
        let view = unsafe { self.device.device.create_image_view(&create_info, None) }
            .map_err(api_error)?;
        Ok(VulkanRenderTargetView { view, format })
    }

    fn destroy_render_target_view(&self, view: Self::RenderTargetView) {
        unsafe { self.device.device.destroy_image_view(view.view, None) };
    }

    fn create_render_pass(
        &self,
        desc: &NativeRenderPassDesc<'_, Self>,
    ) -> GraphicsResult<Self::RenderPass> {
        let device = &self.device.device;
        let attachments: Vec<&NativeAttachment<'_, Self>> =
            desc.color.iter().chain(desc.depth_stencil.as_ref()).collect();
        let descriptions: Vec<vk::AttachmentDescription> = attachments
            .iter()
            .map(|attachment| attachment_description(attachment))
            .collect();

        let color_count = desc.color.len() as u32;
        let color_refs: Vec<vk::AttachmentReference> = (0..color_count)
            .map(|attachment| vk::AttachmentReference {
                attachment,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();
        let depth_ref = vk::AttachmentReference {
            attachment: color_count,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if desc.depth_stencil.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass.build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&descriptions)
            .subpasses(&subpasses);
        let render_pass =
            unsafe { device.create_render_pass(&create_info, None) }.map_err(api_error)?;

        let views: Vec<vk::ImageView> =
            attachments.iter().map(|attachment| attachment.view.view).collect();
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&views)
            .width(desc.extent[0])
            .height(desc.extent[1])
            .layers(1);
        let framebuffer = match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffer,
            Err(err) => {
                unsafe { device.destroy_render_pass(render_pass, None) };
                return Err(api_error(err));
            }
        };

        Ok(VulkanRenderPass {
            render_pass,
            framebuffer,
            extent: vk::Extent2D {
                width: desc.extent[0],
                height: desc.extent[1],
            },
            color_attachments: color_count,
            depth_stencil: desc.depth_stencil.is_some(),
        })
    }

    fn destroy_render_pass(&self, pass: Self::RenderPass) {
        unsafe {
            self.device.device.destroy_framebuffer(pass.framebuffer, None);
            self.device.device.destroy_render_pass(pass.render_pass, None);
        }
    }

    fn create_graphics_pipeline(
        &self,
        desc: &NativeGraphicsPipelineDesc<'_, Self>,
    ) -> GraphicsResult<Self::GraphicsPipeline> {
        let vertex_entry = entry_point_name(desc.vertex.entry_point)?;
        let fragment_entry = desc
            .fragment
            .as_ref()
            .map(|stage| entry_point_name(stage.entry_point))
            .transpose()?;

        let mut shader_stages = vec![vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(*desc.vertex.module)
            .name(&vertex_entry)
            .build()];
        if let (Some(stage), Some(entry)) = (&desc.fragment, &fragment_entry) {
            shader_stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(*stage.module)
                    .name(entry)
                    .build(),
            );
        }

        // Vertices are pulled from storage buffers
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.render_pass.depth_stencil)
            .depth_write_enable(desc.render_pass.depth_stencil)
            .depth_compare_op(vk::CompareOp::LESS);
        let blend_attachments = vec![
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build();
            desc.render_pass.color_attachments as usize
        ];
        let color_blending =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(*desc.layout)
            .render_pass(desc.render_pass.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.device
                .device
                .create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    &[pipeline_info.build()],
                    None,
                )
        }
        .map_err(|(_, err)| api_error(err))?;
        pipelines.into_iter().next().ok_or_else(|| {
            GraphicsError::Vulkan(VulkanError::InvalidOperation {
                reason: "no graphics pipeline returned".to_string(),
            })
        })
    }

    fn destroy_graphics_pipeline(&self, pipeline: Self::GraphicsPipeline) {
        unsafe { self.device.device.destroy_pipeline(pipeline, None) };
    }

    fn create_compute_pipeline(
        &self,
        shader: &NativeShaderStage<'_, Self>,
        layout: &Self::PipelineLayout,
    ) -> GraphicsResult<Self::ComputePipeline> {
        let entry = entry_point_name(shader.entry_point)?;
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(*shader.module)
            .name(&entry)
            .build();
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(*layout);

        let pipelines = unsafe {
            self.device
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        }
        .map_err(|(_, err)| api_error(err))?;
        pipelines.into_iter().next().ok_or_else(|| {
            GraphicsError::Vulkan(VulkanError::InvalidOperation {
                reason: "no compute pipeline returned".to_string(),
            })
        })
    }

    fn destroy_compute_pipeline(&self, pipeline: Self::ComputePipeline) {
        unsafe { self.device.device.destroy_pipeline(pipeline, None) };
    }

    fn place_memory_barriers(
        &self,
        buffer: Self::CommandBuffer,
        barriers: &NativeBarriers<'_, Self>,
    ) {
        let buffers: Vec<_> = barriers
            .buffers
            .iter()
            .map(|(native, barrier)| (native.buffer, *barrier))
            .collect();
        let textures: Vec<_> = barriers
            .textures
            .iter()
            .map(|(native, barrier)| (native.image, *barrier))
            .collect();

        for batch in group_barriers(barriers.global, &buffers, &textures) {
            unsafe {
                self.device.device.cmd_pipeline_barrier(
                    buffer,
                    batch.src_stages,
                    batch.dst_stages,
                    vk::DependencyFlags::empty(),
                    &batch.memory,
                    &batch.buffers,
                    &batch.images,
                );
            }
        }
    }

    fn copy_buffer(
        &self,
        buffer: Self::CommandBuffer,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        region: BufferCopy,
    ) {
        let copy = vk::BufferCopy {
            src_offset: region.src_offset,
            dst_offset: region.dst_offset,
            size: region.size,
        };
        unsafe { self.device.device.cmd_copy_buffer(buffer, src.buffer, dst.buffer, &[copy]) };
    }

    fn create_query_pool(&self, count: u32) -> GraphicsResult<Self::QueryPool> {
        let create_info = vk::QueryPoolCreateInfo::builder()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count);
        unsafe { self.device.device.create_query_pool(&create_info, None) }.map_err(api_error)
    }

    fn destroy_query_pool(&self, pool: Self::QueryPool) {
        unsafe { self.device.device.destroy_query_pool(pool, None) };
    }

    fn reset_queries(&self, buffer: Self::CommandBuffer, pool: Self::QueryPool, count: u32) {
        unsafe { self.device.device.cmd_reset_query_pool(buffer, pool, 0, count) };
    }

    fn write_timestamp(&self, buffer: Self::CommandBuffer, pool: Self::QueryPool, index: u32) {
        unsafe {
            self.device
                .device
                .cmd_write_timestamp(buffer, vk::PipelineStageFlags::BOTTOM_OF_PIPE, pool, index);
        }
    }

    fn read_timestamps(&self, pool: Self::QueryPool, out: &mut [u64]) -> GraphicsResult<()> {
        if out.is_empty() {
            return Ok(());
        }
        unsafe {
            self.device.device.get_query_pool_results(
                pool,
                0,
                out.len() as u32,
                out,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
        }
        .map_err(api_error)
    }

    fn timestamp_period_ns(&self) -> f64 {
        f64::from(self.physical_device.properties.limits.timestamp_period)
    }

    fn wait_idle(&self) -> GraphicsResult<()> {
        unsafe { self.device.device.device_wait_idle() }.map_err(api_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_slots_follow_submission_order() {
        let slots: Vec<usize> =
            QueueRole::SUBMISSION_ORDER.iter().map(|&role| role_slot(role)).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn test_wait_stages() {
        assert_eq!(
            to_vk_wait_stage(WaitStage::COLOR_ATTACHMENT_OUTPUT),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            to_vk_wait_stage(WaitStage::ALL_COMMANDS),
            vk::PipelineStageFlags::ALL_COMMANDS
        );
    }

    #[test]
    fn test_presenting_without_a_window_is_rejected() {
        let config = GraphicsConfig {
            present: true,
            ..GraphicsConfig::default()
        };
        assert!(matches!(
            VulkanBackend::new(&config, None),
            Err(GraphicsError::InitializationFailed(_))
        ));
    }
}
