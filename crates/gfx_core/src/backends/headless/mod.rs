//! Simulated device
//!
//! [`HeadlessBackend`] implements [`GraphicsBackend`] without a GPU. Every native
//! call is validated against a small state model (fence and binary semaphore
//! states, command buffer recording flags) and appended to a [`DeviceEvent`]
//! log, so frame pacing can be checked deterministically.
//!
//! GPU completion is controlled by [`CompletionMode`]. In `Immediate` mode work
//! completes as it is submitted. In `Deferred` mode submitted fences stay pending
//! until the host waits on them (recorded as a stall), [`HeadlessBackend::complete_pending`]
//! is called, or the device is idled.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::GraphicsConfig;
use crate::graphics::backend::{
    BindPoint, GraphicsBackend, NativeBarriers, NativeDescriptorWrite, NativeGraphicsPipelineDesc,
    NativeRenderPassDesc, NativeShaderStage, QueueRole, Submission,
};
use crate::graphics::descriptors::{DescriptorBindingType, PushConstantDesc, ResolvedBinding};
use crate::graphics::error::{GraphicsError, GraphicsResult};
use crate::graphics::resources::{
    BufferCopy, BufferDesc, RenderTargetViewDesc, SamplerDesc, ShaderModuleDesc, TextureDesc,
    TextureViewDesc,
};

/// When submitted work is considered complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Fences signal as soon as the submission is made
    #[default]
    Immediate,
    /// Fences stay pending until waited on or explicitly completed
    Deferred,
}

/// Simulated device capabilities
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessConfig {
    /// Whether the device owns a swap chain
    pub present: bool,
    /// Swap chain images when presenting
    pub swap_chain_images: u8,
    /// Expose a compute-only queue
    pub dedicated_compute: bool,
    /// Expose a transfer-only queue
    pub dedicated_transfer: bool,
    /// GPU completion model
    pub completion: CompletionMode,
    /// Nanoseconds per timestamp tick
    pub timestamp_period_ns: f64,
    /// Ticks the simulated clock advances per timestamp written
    pub ticks_per_timestamp: u64,
    /// Fail every submission after this many succeeded, simulating a lost device
    pub lose_device_after_submits: Option<usize>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            present: false,
            swap_chain_images: 3,
            dedicated_compute: true,
            dedicated_transfer: true,
            completion: CompletionMode::Immediate,
            timestamp_period_ns: 1.0,
            ticks_per_timestamp: 1,
            lose_device_after_submits: None,
        }
    }
}

impl HeadlessConfig {
    /// Capabilities matching what a context created from `config` requests
    pub fn from_graphics_config(config: &GraphicsConfig) -> Self {
        Self {
            present: config.present,
            dedicated_compute: config.dedicated_compute_queue,
            dedicated_transfer: config.dedicated_transfer_queue,
            ..Self::default()
        }
    }
}

/// Native call observed by the simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Queue submission
    Submit {
        /// Target queue
        queue: QueueRole,
        /// Command buffers submitted
        command_buffers: Vec<u64>,
        /// Semaphores waited on
        waits: Vec<u64>,
        /// Semaphores signaled
        signals: Vec<u64>,
        /// Fence signaled
        fence: Option<u64>,
    },
    /// Fence returned to the unsignaled state
    FenceReset {
        /// Fence id
        fence: u64,
    },
    /// Host wait on fences
    FenceWait {
        /// Fence ids
        fences: Vec<u64>,
        /// Whether any fence was still pending, i.e. the host blocked
        stalled: bool,
    },
    /// Swap chain image acquisition
    Acquire {
        /// Frame context the image is acquired for
        frame_index: u8,
        /// Swap chain image index
        image: u8,
    },
    /// Presentation
    Present {
        /// Frame context presented
        frame_index: u8,
        /// Semaphores waited on
        waits: Vec<u64>,
    },
    /// Command buffer reset for reuse
    CommandBufferReset {
        /// Command buffer id
        buffer: u64,
    },
    /// Descriptor write into one physical copy of a set
    DescriptorWrite {
        /// Set id
        set: u64,
        /// Frame copy written
        frame_index: u8,
        /// Binding written
        binding: u32,
        /// First array element
        array_offset: u32,
        /// Descriptors written
        count: usize,
    },
    /// Descriptor set bound
    DescriptorBind {
        /// Pipeline kind bound for
        bind_point: BindPoint,
        /// Set id
        set: u64,
        /// Frame copy bound
        frame_index: u8,
        /// Set slot in the pipeline layout
        set_index: u32,
    },
    /// Barrier batch recorded
    Barrier {
        /// Global barriers
        global: usize,
        /// Buffer barriers
        buffers: usize,
        /// Texture barriers
        textures: usize,
    },
    /// Timestamp query written
    Timestamp {
        /// Query pool id
        pool: u64,
        /// Query index
        index: u32,
    },
}

macro_rules! headless_ids {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub u64);
        )*
    };
}

headless_ids! {
    /// Simulated command pool
    HeadlessCommandPool,
    /// Simulated command buffer
    HeadlessCommandBuffer,
    /// Simulated fence
    HeadlessFence,
    /// Simulated semaphore
    HeadlessSemaphore,
    /// Simulated timestamp query pool
    HeadlessQueryPool,
}

/// Simulated buffer with host memory
#[derive(Debug)]
pub struct HeadlessBuffer {
    /// Object id
    pub id: u64,
    data: Mutex<Vec<u8>>,
}

/// Simulated texture
#[derive(Debug)]
pub struct HeadlessTexture {
    /// Object id
    pub id: u64,
}

/// Simulated texture view
#[derive(Debug)]
pub struct HeadlessTextureView {
    /// Object id
    pub id: u64,
    /// Viewed texture id
    pub texture: u64,
}

/// Simulated sampler
#[derive(Debug)]
pub struct HeadlessSampler {
    /// Object id
    pub id: u64,
}

/// Simulated descriptor set layout
#[derive(Debug)]
pub struct HeadlessDescriptorSetLayout {
    /// Object id
    pub id: u64,
    /// Bindings the layout was created with
    pub bindings: Vec<ResolvedBinding>,
}

/// Simulated descriptor set with its physical copies
#[derive(Debug)]
pub struct HeadlessDescriptorSet {
    /// Object id
    pub id: u64,
    /// Physical copies
    pub frame_count: u8,
}

/// Simulated pipeline layout
#[derive(Debug)]
pub struct HeadlessPipelineLayout {
    /// Object id
    pub id: u64,
    /// Set layout ids
    pub set_layouts: Vec<u64>,
}

/// Simulated shader module
#[derive(Debug)]
pub struct HeadlessShaderModule {
    /// Object id
    pub id: u64,
    /// Code size in words
    pub words: usize,
}

/// Simulated render target view
#[derive(Debug)]
pub struct HeadlessRenderTargetView {
    /// Object id
    pub id: u64,
    /// Viewed texture id
    pub texture: u64,
}

/// Simulated render pass
#[derive(Debug)]
pub struct HeadlessRenderPass {
    /// Object id
    pub id: u64,
    /// Render target view ids, color attachments first
    pub attachments: Vec<u64>,
    /// Shared attachment extent
    pub extent: [u32; 2],
}

/// Simulated pipeline, graphics or compute
#[derive(Debug)]
pub struct HeadlessPipeline {
    /// Object id
    pub id: u64,
    /// Pipeline layout id
    pub layout: u64,
    /// Render pass id, `None` for compute pipelines
    pub render_pass: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_id: u64,
    fences: HashMap<u64, FenceState>,
    semaphores: usize,
    signaled_semaphores: HashSet<u64>,
    command_pools: usize,
    command_buffers: HashMap<u64, bool>,
    query_pools: HashMap<u64, Vec<u64>>,
    clock: u64,
    submits: usize,
    next_image: u8,
    freed_texture_memory: usize,
    pipeline_objects: usize,
    events: Vec<DeviceEvent>,
}

impl HeadlessState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn allocate_pipeline_object(&mut self) -> u64 {
        self.pipeline_objects += 1;
        self.allocate_id()
    }

    fn release_pipeline_object(&mut self) {
        self.pipeline_objects = self.pipeline_objects.saturating_sub(1);
    }

    /// Consume `waits` then signal `signals`, rejecting binary semaphore misuse
    fn transfer_semaphores(&mut self, waits: &[u64], signals: &[u64]) -> GraphicsResult<()> {
        if let Some(unsignaled) = waits
            .iter()
            .find(|semaphore| !self.signaled_semaphores.contains(semaphore))
        {
            return Err(headless_error(format!(
                "waiting on semaphore {} that nothing signaled",
                unsignaled
            )));
        }
        if let Some(resignaled) = signals
            .iter()
            .find(|semaphore| {
                self.signaled_semaphores.contains(semaphore) && !waits.contains(semaphore)
            })
        {
            return Err(headless_error(format!(
                "signaling semaphore {} that is still signaled",
                resignaled
            )));
        }

        for semaphore in waits {
            self.signaled_semaphores.remove(semaphore);
        }
        self.signaled_semaphores.extend(signals.iter().copied());
        Ok(())
    }
}

/// GPU-less implementation of [`GraphicsBackend`]
#[derive(Debug)]
pub struct HeadlessBackend {
    config: HeadlessConfig,
    image_available: Vec<HeadlessSemaphore>,
    state: Mutex<HeadlessState>,
}

fn headless_error(message: impl Into<String>) -> GraphicsError {
    GraphicsError::Headless(message.into())
}

impl HeadlessBackend {
    /// Create a simulated device
    pub fn new(config: HeadlessConfig) -> Self {
        let mut state = HeadlessState::default();
        let image_available = if config.present {
            (0..config.swap_chain_images)
                .map(|_| {
                    state.semaphores += 1;
                    HeadlessSemaphore(state.allocate_id())
                })
                .collect()
        } else {
            Vec::new()
        };

        log::debug!(
            "Created headless device (present: {}, completion: {:?})",
            config.present,
            config.completion
        );

        Self {
            config,
            image_available,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every event recorded so far
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state().events.clone()
    }

    /// Drain the event log
    pub fn take_events(&self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.state().events)
    }

    /// Host waits that found pending work
    pub fn stall_count(&self) -> usize {
        self.state()
            .events
            .iter()
            .filter(|event| matches!(event, DeviceEvent::FenceWait { stalled: true, .. }))
            .count()
    }

    /// Signal every pending fence, as if the GPU caught up
    pub fn complete_pending(&self) {
        for fence in self.state().fences.values_mut() {
            if *fence == FenceState::Pending {
                *fence = FenceState::Signaled;
            }
        }
    }

    /// Number of textures whose memory was released
    pub fn freed_texture_memory_count(&self) -> usize {
        self.state().freed_texture_memory
    }

    /// Shader modules, render target views, render passes and pipelines not yet destroyed
    pub fn live_pipeline_objects(&self) -> usize {
        self.state().pipeline_objects
    }

    /// Synchronization and command objects not yet destroyed
    pub fn live_sync_objects(&self) -> usize {
        let state = self.state();
        state.fences.len() + state.semaphores + state.command_pools + state.command_buffers.len()
            - self.image_available.len()
    }
}

impl GraphicsBackend for HeadlessBackend {
    type CommandPool = HeadlessCommandPool;
    type CommandBuffer = HeadlessCommandBuffer;
    type Fence = HeadlessFence;
    type Semaphore = HeadlessSemaphore;
    type QueryPool = HeadlessQueryPool;
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type TextureView = HeadlessTextureView;
    type Sampler = HeadlessSampler;
    type DescriptorSetLayout = HeadlessDescriptorSetLayout;
    type DescriptorSet = HeadlessDescriptorSet;
    type PipelineLayout = HeadlessPipelineLayout;
    type ShaderModule = HeadlessShaderModule;
    type RenderTargetView = HeadlessRenderTargetView;
    type RenderPass = HeadlessRenderPass;
    type GraphicsPipeline = HeadlessPipeline;
    type ComputePipeline = HeadlessPipeline;

    fn name(&self) -> &'static str {
        "headless"
    }

    fn has_queue(&self, role: QueueRole) -> bool {
        match role {
            QueueRole::Graphics => true,
            QueueRole::Compute => self.config.dedicated_compute,
            QueueRole::Transfer => self.config.dedicated_transfer,
        }
    }

    fn swap_chain_image_count(&self) -> Option<u8> {
        self.config.present.then_some(self.config.swap_chain_images)
    }

    fn create_command_pool(&self, _role: QueueRole) -> GraphicsResult<Self::CommandPool> {
        let mut state = self.state();
        state.command_pools += 1;
        Ok(HeadlessCommandPool(state.allocate_id()))
    }

    fn destroy_command_pool(&self, _pool: Self::CommandPool) {
        let mut state = self.state();
        state.command_pools = state.command_pools.saturating_sub(1);
    }

    fn allocate_command_buffer(
        &self,
        _pool: Self::CommandPool,
    ) -> GraphicsResult<Self::CommandBuffer> {
        let mut state = self.state();
        let id = state.allocate_id();
        state.command_buffers.insert(id, false);
        Ok(HeadlessCommandBuffer(id))
    }

    fn free_command_buffers(&self, _pool: Self::CommandPool, buffers: &[Self::CommandBuffer]) {
        let mut state = self.state();
        for buffer in buffers {
            state.command_buffers.remove(&buffer.0);
        }
    }

    fn begin_command_buffer(&self, buffer: Self::CommandBuffer) -> GraphicsResult<()> {
        let mut state = self.state();
        match state.command_buffers.get_mut(&buffer.0) {
            Some(recording @ false) => {
                *recording = true;
                Ok(())
            }
            Some(true) => Err(headless_error(format!(
                "command buffer {} already recording",
                buffer.0
            ))),
            None => Err(headless_error(format!("unknown command buffer {}", buffer.0))),
        }
    }

    fn end_command_buffer(&self, buffer: Self::CommandBuffer) -> GraphicsResult<()> {
        let mut state = self.state();
        match state.command_buffers.get_mut(&buffer.0) {
            Some(recording @ true) => {
                *recording = false;
                Ok(())
            }
            _ => Err(headless_error(format!("command buffer {} is not recording", buffer.0))),
        }
    }

    fn reset_command_buffer(&self, buffer: Self::CommandBuffer) -> GraphicsResult<()> {
        let mut state = self.state();
        if !state.command_buffers.contains_key(&buffer.0) {
            return Err(headless_error(format!("unknown command buffer {}", buffer.0)));
        }
        state.command_buffers.insert(buffer.0, false);
        state.events.push(DeviceEvent::CommandBufferReset { buffer: buffer.0 });
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> GraphicsResult<Self::Fence> {
        let mut state = self.state();
        let id = state.allocate_id();
        let fence_state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(id, fence_state);
        Ok(HeadlessFence(id))
    }

    fn fence_status(&self, fence: Self::Fence) -> GraphicsResult<bool> {
        match self.state().fences.get(&fence.0) {
            Some(fence_state) => Ok(*fence_state == FenceState::Signaled),
            None => Err(headless_error(format!("unknown fence {}", fence.0))),
        }
    }

    fn wait_for_fences(&self, fences: &[Self::Fence], _timeout_ns: u64) -> GraphicsResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        let mut stalled = false;
        for fence in fences {
            match state.fences.get_mut(&fence.0) {
                Some(FenceState::Signaled) => {}
                Some(fence_state @ FenceState::Pending) => {
                    *fence_state = FenceState::Signaled;
                    stalled = true;
                }
                Some(FenceState::Unsignaled) => {
                    return Err(headless_error(format!(
                        "waiting on fence {} that no submission will signal",
                        fence.0
                    )));
                }
                None => return Err(headless_error(format!("unknown fence {}", fence.0))),
            }
        }
        state.events.push(DeviceEvent::FenceWait {
            fences: fences.iter().map(|fence| fence.0).collect(),
            stalled,
        });
        Ok(())
    }

    fn reset_fence(&self, fence: Self::Fence) -> GraphicsResult<()> {
        let mut state = self.state();
        match state.fences.get(&fence.0).copied() {
            Some(FenceState::Pending) => {
                Err(headless_error(format!("resetting in-flight fence {}", fence.0)))
            }
            Some(_) => {
                state.fences.insert(fence.0, FenceState::Unsignaled);
                state.events.push(DeviceEvent::FenceReset { fence: fence.0 });
                Ok(())
            }
            None => Err(headless_error(format!("unknown fence {}", fence.0))),
        }
    }

    fn destroy_fence(&self, fence: Self::Fence) {
        self.state().fences.remove(&fence.0);
    }

    fn create_semaphore(&self) -> GraphicsResult<Self::Semaphore> {
        let mut state = self.state();
        state.semaphores += 1;
        Ok(HeadlessSemaphore(state.allocate_id()))
    }

    fn destroy_semaphore(&self, semaphore: Self::Semaphore) {
        let mut state = self.state();
        state.semaphores = state.semaphores.saturating_sub(1);
        state.signaled_semaphores.remove(&semaphore.0);
    }

    fn submit(&self, role: QueueRole, submission: &Submission<'_, Self>) -> GraphicsResult<()> {
        if !self.has_queue(role) {
            return Err(GraphicsError::QueueUnavailable { queue: role });
        }

        let mut state = self.state();
        if self
            .config
            .lose_device_after_submits
            .is_some_and(|limit| state.submits >= limit)
        {
            return Err(headless_error("device lost"));
        }
        for buffer in submission.command_buffers {
            if state.command_buffers.get(&buffer.0) != Some(&false) {
                return Err(headless_error(format!(
                    "submitting command buffer {} that is recording or unknown",
                    buffer.0
                )));
            }
        }

        let waits: Vec<u64> = submission
            .wait_semaphores
            .iter()
            .map(|(semaphore, _)| semaphore.0)
            .collect();
        let signals: Vec<u64> = submission
            .signal_semaphores
            .iter()
            .map(|semaphore| semaphore.0)
            .collect();
        if let Some(fence) = submission.fence {
            if state.fences.get(&fence.0) != Some(&FenceState::Unsignaled) {
                return Err(headless_error(format!(
                    "submitting with fence {} that is not reset",
                    fence.0
                )));
            }
        }
        state.transfer_semaphores(&waits, &signals)?;

        if let Some(fence) = submission.fence {
            let completion = match self.config.completion {
                CompletionMode::Immediate => FenceState::Signaled,
                CompletionMode::Deferred => FenceState::Pending,
            };
            state.fences.insert(fence.0, completion);
        }

        state.submits += 1;
        state.events.push(DeviceEvent::Submit {
            queue: role,
            command_buffers: submission.command_buffers.iter().map(|buffer| buffer.0).collect(),
            waits,
            signals,
            fence: submission.fence.map(|fence| fence.0),
        });
        Ok(())
    }

    fn acquire_next_image(&self, frame_index: u8) -> GraphicsResult<()> {
        if !self.config.present {
            return Err(headless_error("acquiring an image without a swap chain"));
        }
        let mut state = self.state();
        if let Some(semaphore) = self.image_available.get(usize::from(frame_index)) {
            state.transfer_semaphores(&[], &[semaphore.0])?;
        }
        let image = state.next_image;
        state.next_image = (image + 1) % self.config.swap_chain_images.max(1);
        state.events.push(DeviceEvent::Acquire { frame_index, image });
        Ok(())
    }

    fn image_available_semaphore(&self, frame_index: u8) -> Option<Self::Semaphore> {
        self.image_available.get(usize::from(frame_index)).copied()
    }

    fn present(&self, frame_index: u8, wait_semaphores: &[Self::Semaphore]) -> GraphicsResult<()> {
        if !self.config.present {
            return Err(headless_error("presenting without a swap chain"));
        }
        let waits: Vec<u64> = wait_semaphores.iter().map(|semaphore| semaphore.0).collect();
        let mut state = self.state();
        state.transfer_semaphores(&waits, &[])?;
        state.events.push(DeviceEvent::Present { frame_index, waits });
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> GraphicsResult<Self::Buffer> {
        let size = usize::try_from(desc.size)
            .map_err(|_| {
                headless_error(format!("buffer of {} bytes does not fit in memory", desc.size))
            })?;
        Ok(HeadlessBuffer {
            id: self.state().allocate_id(),
            data: Mutex::new(vec![0; size]),
        })
    }

    fn destroy_buffer(&self, _buffer: Self::Buffer) {}

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let mut memory = buffer.data.lock().unwrap_or_else(PoisonError::into_inner);
        let start = usize::try_from(offset).map_err(|_| headless_error("offset out of range"))?;
        let target = memory
            .get_mut(start..start + data.len())
            .ok_or_else(|| headless_error("write out of buffer bounds"))?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: &Self::Buffer,
        offset: u64,
        out: &mut [u8],
    ) -> GraphicsResult<()> {
        let memory = buffer.data.lock().unwrap_or_else(PoisonError::into_inner);
        let start = usize::try_from(offset).map_err(|_| headless_error("offset out of range"))?;
        let source = memory
            .get(start..start + out.len())
            .ok_or_else(|| headless_error("read out of buffer bounds"))?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn create_texture(&self, _desc: &TextureDesc) -> GraphicsResult<Self::Texture> {
        Ok(HeadlessTexture {
            id: self.state().allocate_id(),
        })
    }

    fn destroy_texture(&self, _texture: Self::Texture, owns_memory: bool) {
        if owns_memory {
            self.state().freed_texture_memory += 1;
        }
    }

    fn create_texture_view(
        &self,
        texture: &Self::Texture,
        _desc: &TextureViewDesc,
    ) -> GraphicsResult<Self::TextureView> {
        Ok(HeadlessTextureView {
            id: self.state().allocate_id(),
            texture: texture.id,
        })
    }

    fn destroy_texture_view(&self, _view: Self::TextureView) {}

    fn create_sampler(&self, _desc: &SamplerDesc) -> GraphicsResult<Self::Sampler> {
        Ok(HeadlessSampler {
            id: self.state().allocate_id(),
        })
    }

    fn destroy_sampler(&self, _sampler: Self::Sampler) {}

    fn create_descriptor_set_layout(
        &self,
        bindings: &[ResolvedBinding],
    ) -> GraphicsResult<Self::DescriptorSetLayout> {
        Ok(HeadlessDescriptorSetLayout {
            id: self.state().allocate_id(),
            bindings: bindings.to_vec(),
        })
    }

    fn destroy_descriptor_set_layout(&self, _layout: Self::DescriptorSetLayout) {}

    fn create_descriptor_set(
        &self,
        _layout: &Self::DescriptorSetLayout,
        _pool_sizes: &[(DescriptorBindingType, u32)],
        frame_count: u8,
    ) -> GraphicsResult<Self::DescriptorSet> {
        Ok(HeadlessDescriptorSet {
            id: self.state().allocate_id(),
            frame_count,
        })
    }

    fn destroy_descriptor_set(&self, _set: Self::DescriptorSet) {}

    fn write_descriptor_set(
        &self,
        set: &Self::DescriptorSet,
        frame_index: u8,
        writes: &[NativeDescriptorWrite<'_, Self>],
    ) {
        debug_assert!(frame_index < set.frame_count);
        let mut state = self.state();
        for write in writes {
            state.events.push(DeviceEvent::DescriptorWrite {
                set: set.id,
                frame_index,
                binding: write.binding,
                array_offset: write.array_offset,
                count: write.descriptors.len(),
            });
        }
    }

    fn bind_descriptor_set(
        &self,
        _buffer: Self::CommandBuffer,
        bind_point: BindPoint,
        _layout: &Self::PipelineLayout,
        set_index: u32,
        set: &Self::DescriptorSet,
        frame_index: u8,
    ) {
        self.state().events.push(DeviceEvent::DescriptorBind {
            bind_point,
            set: set.id,
            frame_index,
            set_index,
        });
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[&Self::DescriptorSetLayout],
        _push_constants: &[PushConstantDesc],
    ) -> GraphicsResult<Self::PipelineLayout> {
        Ok(HeadlessPipelineLayout {
            id: self.state().allocate_id(),
            set_layouts: set_layouts.iter().map(|layout| layout.id).collect(),
        })
    }

    fn destroy_pipeline_layout(&self, _layout: Self::PipelineLayout) {}

    fn create_shader_module(&self, desc: &ShaderModuleDesc) -> GraphicsResult<Self::ShaderModule> {
        if desc.code.is_empty() {
            return Err(headless_error("empty shader module"));
        }
        Ok(HeadlessShaderModule {
            id: self.state().allocate_pipeline_object(),
            words: desc.code.len(),
        })
    }

    fn destroy_shader_module(&self, _module: Self::ShaderModule) {
        self.state().release_pipeline_object();
    }

    fn create_render_target_view(
        &self,
        texture: &Self::Texture,
        _desc: &RenderTargetViewDesc,
    ) -> GraphicsResult<Self::RenderTargetView> {
        Ok(HeadlessRenderTargetView {
            id: self.state().allocate_pipeline_object(),
            texture: texture.id,
        })
    }

    fn destroy_render_target_view(&self, _view: Self::RenderTargetView) {
        self.state().release_pipeline_object();
    }

    fn create_render_pass(
        &self,
        desc: &NativeRenderPassDesc<'_, Self>,
    ) -> GraphicsResult<Self::RenderPass> {
        let attachments = desc
            .color
            .iter()
            .chain(desc.depth_stencil.as_ref())
            .map(|attachment| attachment.view.id)
            .collect();
        Ok(HeadlessRenderPass {
            id: self.state().allocate_pipeline_object(),
            attachments,
            extent: desc.extent,
        })
    }

    fn destroy_render_pass(&self, _pass: Self::RenderPass) {
        self.state().release_pipeline_object();
    }

    fn create_graphics_pipeline(
        &self,
        desc: &NativeGraphicsPipelineDesc<'_, Self>,
    ) -> GraphicsResult<Self::GraphicsPipeline> {
        let stages = std::iter::once(&desc.vertex).chain(desc.fragment.as_ref());
        for stage in stages {
            if stage.entry_point.is_empty() {
                return Err(headless_error(format!(
                    "shader module {} has no entry point",
                    stage.module.id
                )));
            }
        }
        Ok(HeadlessPipeline {
            id: self.state().allocate_pipeline_object(),
            layout: desc.layout.id,
            render_pass: Some(desc.render_pass.id),
        })
    }

    fn destroy_graphics_pipeline(&self, _pipeline: Self::GraphicsPipeline) {
        self.state().release_pipeline_object();
    }

    fn create_compute_pipeline(
        &self,
        shader: &NativeShaderStage<'_, Self>,
        layout: &Self::PipelineLayout,
    ) -> GraphicsResult<Self::ComputePipeline> {
        if shader.entry_point.is_empty() {
            return Err(headless_error(format!(
                "shader module {} has no entry point",
                shader.module.id
            )));
        }
        Ok(HeadlessPipeline {
            id: self.state().allocate_pipeline_object(),
            layout: layout.id,
            render_pass: None,
        })
    }

    fn destroy_compute_pipeline(&self, _pipeline: Self::ComputePipeline) {
        self.state().release_pipeline_object();
    }

    fn place_memory_barriers(
        &self,
        _buffer: Self::CommandBuffer,
        barriers: &NativeBarriers<'_, Self>,
    ) {
        self.state().events.push(DeviceEvent::Barrier {
            global: barriers.global.len(),
            buffers: barriers.buffers.len(),
            textures: barriers.textures.len(),
        });
    }

    fn copy_buffer(
        &self,
        _buffer: Self::CommandBuffer,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        region: BufferCopy,
    ) {
        // Copies land at record time; the simulation has no queue timeline.
        let (Ok(src_offset), Ok(dst_offset), Ok(size)) = (
            usize::try_from(region.src_offset),
            usize::try_from(region.dst_offset),
            usize::try_from(region.size),
        ) else {
            return;
        };

        if src.id == dst.id {
            let mut memory = src.data.lock().unwrap_or_else(PoisonError::into_inner);
            if src_offset + size <= memory.len() && dst_offset + size <= memory.len() {
                memory.copy_within(src_offset..src_offset + size, dst_offset);
            }
            return;
        }

        let source = src.data.lock().unwrap_or_else(PoisonError::into_inner);
        let mut target = dst.data.lock().unwrap_or_else(PoisonError::into_inner);
        if let (Some(from), Some(to)) = (
            source.get(src_offset..src_offset + size),
            target.get_mut(dst_offset..dst_offset + size),
        ) {
            to.copy_from_slice(from);
        }
    }

    fn create_query_pool(&self, count: u32) -> GraphicsResult<Self::QueryPool> {
        let mut state = self.state();
        let id = state.allocate_id();
        state.query_pools.insert(id, vec![0; count as usize]);
        Ok(HeadlessQueryPool(id))
    }

    fn destroy_query_pool(&self, pool: Self::QueryPool) {
        self.state().query_pools.remove(&pool.0);
    }

    fn reset_queries(&self, _buffer: Self::CommandBuffer, pool: Self::QueryPool, count: u32) {
        if let Some(queries) = self.state().query_pools.get_mut(&pool.0) {
            queries.iter_mut().take(count as usize).for_each(|query| *query = 0);
        }
    }

    fn write_timestamp(&self, _buffer: Self::CommandBuffer, pool: Self::QueryPool, index: u32) {
        let mut state = self.state();
        state.clock += self.config.ticks_per_timestamp;
        let clock = state.clock;
        if let Some(query) = state
            .query_pools
            .get_mut(&pool.0)
            .and_then(|queries| queries.get_mut(index as usize))
        {
            *query = clock;
        }
        state.events.push(DeviceEvent::Timestamp { pool: pool.0, index });
    }

    fn read_timestamps(&self, pool: Self::QueryPool, out: &mut [u64]) -> GraphicsResult<()> {
        let state = self.state();
        let queries = state
            .query_pools
            .get(&pool.0)
            .ok_or_else(|| headless_error(format!("unknown query pool {}", pool.0)))?;
        let source = queries
            .get(..out.len())
            .ok_or_else(|| headless_error("reading more queries than the pool holds"))?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn timestamp_period_ns(&self) -> f64 {
        self.config.timestamp_period_ns
    }

    fn wait_idle(&self) -> GraphicsResult<()> {
        self.complete_pending();
        Ok(())
    }
}
