//! Graphics context and frame ring
//!
//! [`GraphicsContext`] owns a fixed ring of [`FrameContext`]s. Frame `id` records
//! into slot `id % N`; before a slot is reused for frame `id + N`, the host waits
//! on the fences of frame `id`. At most `N` frames are therefore ever in flight,
//! and a slot's command buffers are only recycled once the GPU is done with them.
//!
//! Frame ids start at [`INITIAL_FRAME_ID`] and only increase. `end_frame` submits
//! the current frame, presents it when a swap chain exists, and advances the ring.
//!
//! ```text
//! end_frame(id):
//!   submit Transfer, Compute, Graphics (in that order, each with its own fence)
//!   present, waiting on every queue's semaphore (only signaled when presenting)
//!   wait on slot (id + 1) % N for frame id + 1 - N, then recycle it
//!   replay descriptor writes queued for the new slot
//!   acquire the next swap chain image
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytemuck::Pod;

use crate::config::graphics::MAX_FRAME_CONTEXTS;
use crate::config::GraphicsConfig;
use crate::foundation::{Diagnostics, DynamicArray};
use crate::graphics::backend::{GraphicsBackend, QueueRole, Submission, WaitStage};
use crate::graphics::command_list::CommandList;
use crate::graphics::descriptor_set_manager::DescriptorSetManager;
use crate::graphics::descriptors::{
    DescriptorSetDesc, DescriptorSetWriteInfo, PipelineLayoutDesc, ResolvedBinding,
};
use crate::graphics::error::{GraphicsError, GraphicsResult};
use crate::graphics::frame_context::FrameContext;
use crate::graphics::handles::{
    BufferHandle, BufferViewHandle, ComputePipelineHandle, DescriptorSetHandle,
    DescriptorSetLayoutHandle, GraphicsPipelineHandle, PipelineLayoutHandle, RenderPassHandle,
    RenderTargetViewHandle, SamplerHandle, ShaderModuleHandle, TextureHandle, TextureViewHandle,
    TimestampHandle,
};
use crate::graphics::resources::{
    BufferDesc, BufferViewDesc, ComputePipelineDesc, GraphicsPipelineDesc, RenderPassDesc,
    RenderTargetViewDesc, Resources, SamplerDesc, ShaderModuleDesc, TextureDesc, TextureViewDesc,
};

/// Id of the first frame recorded by a new context
pub const INITIAL_FRAME_ID: u64 = 1;

/// Frame whose completion gates reusing its slot for `next_frame_id`
///
/// `None` while the ring has not wrapped yet: the first `frame_count` frames find
/// their slot unused.
pub fn frame_to_wait_before(next_frame_id: u64, frame_count: u8) -> Option<u64> {
    let count = u64::from(frame_count.max(1));
    (next_frame_id >= INITIAL_FRAME_ID + count).then(|| next_frame_id - count)
}

/// Frame ring, resources and descriptor sets of one device
pub struct GraphicsContext<B: GraphicsBackend> {
    backend: Arc<B>,
    diagnostics: Arc<Diagnostics>,
    config: GraphicsConfig,
    frame_contexts: DynamicArray<FrameContext<B>>,
    resources: Resources<B>,
    descriptor_sets: DescriptorSetManager<B>,
    frame_id: u64,
    present: bool,
    lost: AtomicBool,
}

impl<B: GraphicsBackend> GraphicsContext<B> {
    /// Create the frame ring on `backend`
    ///
    /// The ring has one slot per swap chain image when presenting, otherwise
    /// [`GraphicsConfig::offscreen_frame_context_count`] slots.
    pub fn new(
        backend: Arc<B>,
        config: GraphicsConfig,
        diagnostics: Arc<Diagnostics>,
    ) -> GraphicsResult<Self> {
        let present = config.present;
        let count = if present {
            let images = backend.swap_chain_image_count().ok_or_else(|| {
                GraphicsError::InitializationFailed(format!(
                    "{} backend has no swap chain to present to",
                    backend.name()
                ))
            })?;
            images.clamp(1, MAX_FRAME_CONTEXTS)
        } else {
            config.offscreen_frame_context_count()
        };

        let mut created: Vec<FrameContext<B>> = Vec::with_capacity(usize::from(count));
        for index in 0..count {
            match FrameContext::new(&*backend, &diagnostics, index, config.timestamp_queries) {
                Ok(frame_context) => created.push(frame_context),
                Err(err) => {
                    for mut frame_context in created {
                        frame_context.destroy(&*backend, &diagnostics);
                    }
                    return Err(err);
                }
            }
        }
        let frame_contexts = DynamicArray::from(created);

        let current_index = (INITIAL_FRAME_ID % u64::from(count)) as u8;
        let context = Self {
            descriptor_sets: DescriptorSetManager::new(count, current_index),
            backend,
            diagnostics,
            config,
            frame_contexts,
            resources: Resources::new(),
            frame_id: INITIAL_FRAME_ID,
            present,
            lost: AtomicBool::new(false),
        };

        if present {
            context.backend.acquire_next_image(current_index)?;
        }

        log::info!(
            "Created {} graphics context with {} frame contexts \
             (present: {}, transfer queue: {}, compute queue: {})",
            context.backend.name(),
            count,
            present,
            context.has_dedicated_transfer_queue(),
            context.has_dedicated_compute_queue()
        );
        Ok(context)
    }

    /// Backend the context records into
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Soft failure sink shared with the caller
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Settings the context was created with
    pub fn config(&self) -> &GraphicsConfig {
        &self.config
    }

    /// Live resources
    pub fn resources(&self) -> &Resources<B> {
        &self.resources
    }

    pub(crate) fn descriptor_sets(&self) -> &DescriptorSetManager<B> {
        &self.descriptor_sets
    }

    pub(crate) fn frame_context(&self, index: u8) -> &FrameContext<B> {
        &self.frame_contexts[usize::from(index)]
    }

    /// Id of the frame currently being recorded
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Number of slots in the frame ring
    pub fn frame_context_count(&self) -> u8 {
        self.frame_contexts.len() as u8
    }

    /// Slot the current frame records into
    pub fn current_frame_context_index(&self) -> u8 {
        (self.frame_id % u64::from(self.frame_context_count())) as u8
    }

    /// Whether the backend exposes a transfer-only queue
    pub fn has_dedicated_transfer_queue(&self) -> bool {
        self.backend.has_queue(QueueRole::Transfer)
    }

    /// Whether the backend exposes a compute-only queue
    pub fn has_dedicated_compute_queue(&self) -> bool {
        self.backend.has_queue(QueueRole::Compute)
    }

    /// Whether the context presents to a swap chain
    pub fn is_presenting(&self) -> bool {
        self.present
    }

    /// Whether a native failure made the device unusable
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn check_lost(&self) -> GraphicsResult<()> {
        if self.is_lost() {
            return Err(GraphicsError::DeviceLost { frame_id: self.frame_id });
        }
        Ok(())
    }

    fn mark_lost(&self, err: &GraphicsError) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            log::error!("Device lost at frame {}: {}", self.frame_id, err);
        }
    }

    /// Begin recording on the graphics queue
    pub fn begin_graphics_command_list(&self) -> GraphicsResult<CommandList<'_, B>> {
        self.begin_command_list(QueueRole::Graphics)
    }

    /// Begin recording on the dedicated compute queue
    pub fn begin_compute_command_list(&self) -> GraphicsResult<CommandList<'_, B>> {
        self.begin_command_list(QueueRole::Compute)
    }

    /// Begin recording on the dedicated transfer queue
    pub fn begin_transfer_command_list(&self) -> GraphicsResult<CommandList<'_, B>> {
        self.begin_command_list(QueueRole::Transfer)
    }

    fn begin_command_list(&self, role: QueueRole) -> GraphicsResult<CommandList<'_, B>> {
        self.check_lost()?;
        let frame_index = self.current_frame_context_index();
        let buffer = self
            .frame_context(frame_index)
            .begin_command_buffer(&*self.backend, role)?
            .ok_or(GraphicsError::QueueUnavailable { queue: role })?;
        Ok(CommandList::new(self, role, frame_index, buffer))
    }

    /// Submit the current frame and advance to the next one
    ///
    /// Blocks when the next slot's previous frame is still executing. Any native
    /// failure marks the context lost.
    pub fn end_frame(&mut self) -> GraphicsResult<()> {
        self.check_lost()?;
        match self.submit_and_advance() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.mark_lost(&err);
                Err(err)
            }
        }
    }

    fn submit_and_advance(&mut self) -> GraphicsResult<()> {
        let count = self.frame_context_count();
        let frame_index = self.current_frame_context_index();
        let mut image_available = if self.present {
            self.backend.image_available_semaphore(frame_index)
        } else {
            None
        };

        let mut queue_semaphores = Vec::with_capacity(QueueRole::SUBMISSION_ORDER.len() + 1);
        let frame_context = &self.frame_contexts[usize::from(frame_index)];
        for role in QueueRole::SUBMISSION_ORDER {
            let Some(pool_set) = frame_context.pool_set(role) else {
                continue;
            };
            let command_buffers = pool_set.used_command_buffers();
            if command_buffers.is_empty() {
                continue;
            }

            let fence = pool_set.fence();
            if !self.diagnostics.verify(
                self.backend.fence_status(fence)?,
                "frame.submit",
                format_args!(
                    "{:?} fence of frame context {} is still in flight",
                    role,
                    frame_index
                ),
            ) {
                continue;
            }
            self.backend.reset_fence(fence)?;

            let waits: Vec<_> = if role == QueueRole::Graphics {
                image_available
                    .take()
                    .map(|semaphore| (semaphore, WaitStage::COLOR_ATTACHMENT_OUTPUT))
                    .into_iter()
                    .collect()
            } else {
                Vec::new()
            };
            // A binary semaphore may only be signaled again once waited on, and
            // only presentation waits on the per-queue semaphores.
            let signals: Vec<_> = if self.present {
                vec![pool_set.semaphore()]
            } else {
                Vec::new()
            };
            self.backend.submit(
                role,
                &Submission {
                    command_buffers: &command_buffers,
                    wait_semaphores: &waits,
                    signal_semaphores: &signals,
                    fence: Some(fence),
                },
            )?;
            queue_semaphores.extend(signals);
        }

        self.frame_contexts[usize::from(frame_index)].set_frame_id(self.frame_id);

        if self.present {
            // Nothing consumed the acquire semaphore: presentation waits on it directly.
            queue_semaphores.extend(image_available);
            self.backend.present(frame_index, &queue_semaphores)?;
        }

        let next_frame_id = self.frame_id + 1;
        let next_index = (next_frame_id % u64::from(count)) as u8;
        if let Some(previous_frame_id) = frame_to_wait_before(next_frame_id, count) {
            let next_context = &mut self.frame_contexts[usize::from(next_index)];
            next_context.wait_for_fences(&*self.backend, previous_frame_id)?;
            next_context.resolve_timestamps(&*self.backend)?;
            next_context.reset_pools(&*self.backend, &self.diagnostics)?;
        }

        self.descriptor_sets
            .next_frame(&*self.backend, &self.resources, &self.diagnostics, next_index);

        if self.present {
            self.backend.acquire_next_image(next_index)?;
        }

        log::trace!("Submitted frame {} from frame context {}", self.frame_id, frame_index);
        self.frame_id = next_frame_id;
        Ok(())
    }

    fn slot_of(&self, frame_id: u64) -> &FrameContext<B> {
        let index = (frame_id % u64::from(self.frame_context_count())) as u8;
        self.frame_context(index)
    }

    /// Block until `frame_id` has finished executing
    ///
    /// Returns immediately for frames whose slot has since been reused.
    pub fn wait_for_frame(&self, frame_id: u64) -> GraphicsResult<()> {
        self.check_lost()?;
        if !self.diagnostics.verify(
            frame_id < self.frame_id,
            "frame.wait",
            format_args!("frame {} has not been submitted yet", frame_id),
        ) {
            return Ok(());
        }

        self.slot_of(frame_id)
            .wait_for_fences(&*self.backend, frame_id)
            .map_err(|err| {
                self.mark_lost(&err);
                err
            })
    }

    /// Whether `frame_id` has finished executing, without blocking
    pub fn is_frame_executed(&self, frame_id: u64) -> GraphicsResult<bool> {
        self.check_lost()?;
        if frame_id >= self.frame_id {
            return Ok(false);
        }
        self.slot_of(frame_id).is_frame_executed(&*self.backend, frame_id)
    }

    /// Block until the last submitted frame has finished executing
    pub fn wait_for_last_frame(&self) -> GraphicsResult<()> {
        self.wait_for_frame(self.frame_id - 1)
    }

    /// GPU time of a timestamp in nanoseconds, once its frame slot was recycled
    ///
    /// `None` before the frame completed or after the slot moved on to a newer frame.
    pub fn resolved_timestamp(&self, timestamp: TimestampHandle) -> Option<u64> {
        self.slot_of(timestamp.frame_id)
            .resolved_timestamps(timestamp.frame_id)?
            .get(timestamp.index as usize)
            .copied()
    }

    /// Create a buffer
    pub fn create_buffer(&mut self, desc: &BufferDesc) -> GraphicsResult<BufferHandle> {
        self.resources.create_buffer(&*self.backend, desc)
    }

    /// Destroy a buffer, `false` if the handle is stale
    pub fn destroy_buffer(&mut self, buffer: BufferHandle) -> bool {
        self.resources.destroy_buffer(&*self.backend, buffer)
    }

    /// Copy bytes into a host-visible buffer, `false` if rejected
    pub fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> GraphicsResult<bool> {
        self.resources
            .write_buffer(&*self.backend, &self.diagnostics, buffer, offset, data)
    }

    /// Copy plain values into a host-visible buffer, `false` if rejected
    pub fn write_buffer_pod<T: Pod>(
        &self,
        buffer: BufferHandle,
        offset: u64,
        values: &[T],
    ) -> GraphicsResult<bool> {
        self.write_buffer(buffer, offset, bytemuck::cast_slice(values))
    }

    /// Copy bytes out of a host-visible buffer, `false` if rejected
    pub fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        out: &mut [u8],
    ) -> GraphicsResult<bool> {
        self.resources
            .read_buffer(&*self.backend, &self.diagnostics, buffer, offset, out)
    }

    /// Create a view on a buffer range
    pub fn create_buffer_view(&mut self, desc: &BufferViewDesc) -> BufferViewHandle {
        self.resources.create_buffer_view(&self.diagnostics, desc)
    }

    /// Destroy a buffer view, `false` if the handle is stale
    pub fn destroy_buffer_view(&mut self, view: BufferViewHandle) -> bool {
        self.resources.destroy_buffer_view(view)
    }

    /// Create a texture
    pub fn create_texture(&mut self, desc: &TextureDesc) -> GraphicsResult<TextureHandle> {
        self.resources.create_texture(&*self.backend, desc)
    }

    /// Register a swap chain image; destroying the handle leaves its memory alone
    pub fn register_swap_chain_texture(
        &mut self,
        texture: B::Texture,
        desc: TextureDesc,
    ) -> TextureHandle {
        self.resources.register_swap_chain_texture(texture, desc)
    }

    /// Destroy a texture, `false` if the handle is stale
    pub fn destroy_texture(&mut self, texture: TextureHandle) -> bool {
        self.resources.destroy_texture(&*self.backend, texture)
    }

    /// Create a texture view
    pub fn create_texture_view(
        &mut self,
        desc: &TextureViewDesc,
    ) -> GraphicsResult<TextureViewHandle> {
        self.resources
            .create_texture_view(&*self.backend, &self.diagnostics, desc)
    }

    /// Destroy a texture view, `false` if the handle is stale
    pub fn destroy_texture_view(&mut self, view: TextureViewHandle) -> bool {
        self.resources.destroy_texture_view(&*self.backend, view)
    }

    /// Create a sampler
    pub fn create_sampler(&mut self, desc: &SamplerDesc) -> GraphicsResult<SamplerHandle> {
        self.resources.create_sampler(&*self.backend, desc)
    }

    /// Destroy a sampler, `false` if the handle is stale
    pub fn destroy_sampler(&mut self, sampler: SamplerHandle) -> bool {
        self.resources.destroy_sampler(&*self.backend, sampler)
    }

    /// Create a descriptor set layout and the packed index of each binding
    pub fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetDesc,
    ) -> GraphicsResult<(DescriptorSetLayoutHandle, Vec<u32>)> {
        self.descriptor_sets
            .create_layout(&*self.backend, &self.diagnostics, desc)
    }

    /// Destroy a descriptor set layout, `false` if the handle is stale
    pub fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) -> bool {
        self.descriptor_sets.destroy_layout(&*self.backend, layout)
    }

    /// Bindings of a live descriptor set layout
    pub fn descriptor_set_layout_bindings(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> Option<&[ResolvedBinding]> {
        self.descriptor_sets.layout_bindings(layout)
    }

    /// Create a descriptor set with one copy per frame context
    pub fn create_descriptor_set(
        &mut self,
        layout: DescriptorSetLayoutHandle,
    ) -> GraphicsResult<DescriptorSetHandle> {
        self.descriptor_sets
            .create_set(&*self.backend, &self.diagnostics, layout)
    }

    /// Destroy a descriptor set, `false` if the handle is stale
    ///
    /// The set may still be read by frames in flight; destroy it once they completed.
    pub fn destroy_descriptor_set(&mut self, set: DescriptorSetHandle) -> bool {
        self.descriptor_sets.destroy_set(&*self.backend, set)
    }

    /// Update a descriptor set
    ///
    /// The current frame's copy is written now; other copies are written when their
    /// slot becomes current, unless `single_frame` is set.
    pub fn update_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorSetWriteInfo],
        single_frame: bool,
    ) {
        self.descriptor_sets.update(
            &*self.backend,
            &self.resources,
            &self.diagnostics,
            set,
            writes,
            single_frame,
        );
    }

    /// Create a pipeline layout from live descriptor set layouts
    ///
    /// Returns an invalid handle if a set layout is stale.
    pub fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDesc,
    ) -> GraphicsResult<PipelineLayoutHandle> {
        let mut set_layouts = Vec::with_capacity(desc.descriptor_sets.len());
        for layout in &desc.descriptor_sets {
            let Some(native) = self.descriptor_sets.native_layout(*layout) else {
                self.diagnostics.verify(
                    false,
                    "resources.create_pipeline_layout",
                    format_args!("stale descriptor set layout {:?}", layout),
                );
                return Ok(PipelineLayoutHandle::INVALID);
            };
            set_layouts.push(native);
        }

        let native = self.backend.create_pipeline_layout(&set_layouts, &desc.push_constants)?;
        Ok(self.resources.insert_pipeline_layout(native, desc.clone()))
    }

    /// Destroy a pipeline layout, `false` if the handle is stale
    pub fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) -> bool {
        self.resources.destroy_pipeline_layout(&*self.backend, layout)
    }

    /// Create a shader module from SPIR-V
    pub fn create_shader_module(
        &mut self,
        desc: &ShaderModuleDesc,
    ) -> GraphicsResult<ShaderModuleHandle> {
        self.resources
            .create_shader_module(&*self.backend, &self.diagnostics, desc)
    }

    /// Destroy a shader module, `false` if the handle is stale
    pub fn destroy_shader_module(&mut self, module: ShaderModuleHandle) -> bool {
        self.resources.destroy_shader_module(&*self.backend, module)
    }

    /// Create a render target view
    pub fn create_render_target_view(
        &mut self,
        desc: &RenderTargetViewDesc,
    ) -> GraphicsResult<RenderTargetViewHandle> {
        self.resources
            .create_render_target_view(&*self.backend, &self.diagnostics, desc)
    }

    /// Destroy a render target view, `false` if the handle is stale
    pub fn destroy_render_target_view(&mut self, view: RenderTargetViewHandle) -> bool {
        self.resources.destroy_render_target_view(&*self.backend, view)
    }

    /// Create a render pass
    pub fn create_render_pass(
        &mut self,
        desc: &RenderPassDesc,
    ) -> GraphicsResult<RenderPassHandle> {
        self.resources
            .create_render_pass(&*self.backend, &self.diagnostics, desc)
    }

    /// Destroy a render pass, `false` if the handle is stale
    ///
    /// Pipelines created for the pass must be destroyed first.
    pub fn destroy_render_pass(&mut self, pass: RenderPassHandle) -> bool {
        self.resources.destroy_render_pass(&*self.backend, pass)
    }

    /// Create a graphics pipeline
    pub fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
    ) -> GraphicsResult<GraphicsPipelineHandle> {
        self.resources
            .create_graphics_pipeline(&*self.backend, &self.diagnostics, desc)
    }

    /// Destroy a graphics pipeline, `false` if the handle is stale
    ///
    /// The pipeline may still be used by frames in flight; destroy it once they completed.
    pub fn destroy_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) -> bool {
        self.resources.destroy_graphics_pipeline(&*self.backend, pipeline)
    }

    /// Create a compute pipeline
    pub fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc,
    ) -> GraphicsResult<ComputePipelineHandle> {
        self.resources
            .create_compute_pipeline(&*self.backend, &self.diagnostics, desc)
    }

    /// Destroy a compute pipeline, `false` if the handle is stale
    pub fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) -> bool {
        self.resources.destroy_compute_pipeline(&*self.backend, pipeline)
    }
}

impl<B: GraphicsBackend> Drop for GraphicsContext<B> {
    fn drop(&mut self) {
        if self.is_lost() {
            if let Err(err) = self.backend.wait_idle() {
                log::error!("Failed to idle lost device: {}", err);
            }
        } else {
            for frame_context in self.frame_contexts.iter() {
                if let Err(err) = frame_context.wait_for_fences(
                    &*self.backend,
                    frame_context.frame_id(),
                ) {
                    log::error!("Failed to wait for frame {}: {}", frame_context.frame_id(), err);
                }
            }
        }

        self.descriptor_sets.destroy_all(&*self.backend);
        self.resources.destroy_all(&*self.backend);
        for frame_context in self.frame_contexts.iter_mut() {
            frame_context.destroy(&*self.backend, &self.diagnostics);
        }
        log::debug!("Destroyed graphics context after {} frames", self.frame_id - INITIAL_FRAME_ID);
    }
}

impl<B: GraphicsBackend> std::fmt::Debug for GraphicsContext<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsContext")
            .field("backend", &self.backend.name())
            .field("frame_id", &self.frame_id)
            .field("frame_contexts", &self.frame_contexts.len())
            .field("present", &self.present)
            .field("lost", &self.is_lost())
            .field("resources", &self.resources)
            .field("descriptor_sets", &self.descriptor_sets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use super::*;
    use crate::backends::headless::{CompletionMode, DeviceEvent, HeadlessBackend, HeadlessConfig};
    use crate::graphics::backend::BindPoint;
    use crate::graphics::descriptors::{
        DescriptorBindingDesc, DescriptorBindingType, DescriptorData, ShaderVisibility,
    };
    use crate::graphics::resources::{BufferUsage, MemoryUsage};

    fn offscreen(
        frames: u8,
        headless: HeadlessConfig,
    ) -> (Arc<HeadlessBackend>, GraphicsContext<HeadlessBackend>) {
        crate::foundation::logging::try_init();
        let backend = Arc::new(HeadlessBackend::new(headless));
        let config = GraphicsConfig {
            frame_context_count: Some(frames),
            timestamp_queries: 4,
            ..GraphicsConfig::default()
        };
        let context = GraphicsContext::new(
            Arc::clone(&backend),
            config,
            Arc::new(Diagnostics::new()),
        )
        .expect("Should create context");
        (backend, context)
    }

    fn deferred() -> HeadlessConfig {
        HeadlessConfig {
            completion: CompletionMode::Deferred,
            ..HeadlessConfig::default()
        }
    }

    fn record_graphics(context: &GraphicsContext<HeadlessBackend>) {
        context
            .begin_graphics_command_list()
            .expect("Should begin")
            .end()
            .expect("Should end");
    }

    #[test]
    fn test_pacing_rule_waits_once_the_ring_wraps() {
        assert_eq!(frame_to_wait_before(2, 2), None);
        assert_eq!(frame_to_wait_before(3, 2), Some(1));
        assert_eq!(frame_to_wait_before(10, 3), Some(7));
        assert_eq!(frame_to_wait_before(2, 1), Some(1));
    }

    #[test]
    fn test_first_stall_happens_when_the_ring_wraps() {
        let frames = 3;
        let (backend, mut context) = offscreen(frames, deferred());

        for frame in 1..u64::from(frames) {
            record_graphics(&context);
            context.end_frame().expect("Should end frame");
            assert_eq!(backend.stall_count(), 0, "frame {frame} must not block");
        }

        record_graphics(&context);
        context.end_frame().expect("Should end frame");
        assert_eq!(backend.stall_count(), 1);
        assert!(context.is_frame_executed(1).expect("Should query"));
        assert!(!context.is_frame_executed(2).expect("Should query"));
        assert_eq!(context.frame_id(), INITIAL_FRAME_ID + u64::from(frames));
    }

    #[test]
    fn test_waiting_on_a_recycled_frame_returns_immediately() {
        let (backend, mut context) = offscreen(2, HeadlessConfig::default());
        for _ in 0..4 {
            record_graphics(&context);
            context.end_frame().expect("Should end frame");
        }
        backend.take_events();

        context.wait_for_frame(1).expect("Should wait");
        assert!(backend.events().is_empty());

        context.wait_for_last_frame().expect("Should wait");
        assert!(matches!(backend.events().as_slice(), [DeviceEvent::FenceWait { .. }]));
    }

    #[test]
    fn test_queues_submit_in_order_after_fence_reset() {
        let (backend, mut context) = offscreen(2, HeadlessConfig::default());
        context.begin_graphics_command_list().expect("Should begin").end().expect("Should end");
        context.begin_compute_command_list().expect("Should begin").end().expect("Should end");
        context.begin_transfer_command_list().expect("Should begin").end().expect("Should end");
        backend.take_events();
        context.end_frame().expect("Should end frame");

        let events: Vec<DeviceEvent> = backend
            .events()
            .into_iter()
            .filter(|event| {
                matches!(event, DeviceEvent::FenceReset { .. } | DeviceEvent::Submit { .. })
            })
            .collect();
        assert_eq!(events.len(), 6);

        let mut queues = Vec::new();
        for pair in events.chunks(2) {
            match pair {
                [
                    DeviceEvent::FenceReset { fence: reset },
                    DeviceEvent::Submit {
                        queue,
                        fence,
                        waits,
                        ..
                    },
                ] => {
                    assert_eq!(Some(*reset), *fence);
                    assert!(waits.is_empty());
                    queues.push(*queue);
                }
                other => panic!("unexpected events {other:?}"),
            }
        }
        assert_eq!(queues, QueueRole::SUBMISSION_ORDER.to_vec());
    }

    #[test]
    fn test_present_waits_on_every_submitted_queue() {
        let backend = Arc::new(HeadlessBackend::new(HeadlessConfig {
            present: true,
            swap_chain_images: 3,
            ..HeadlessConfig::default()
        }));
        let config = GraphicsConfig {
            present: true,
            ..GraphicsConfig::default()
        };
        let mut context = GraphicsContext::new(
            Arc::clone(&backend),
            config,
            Arc::new(Diagnostics::new()),
        )
        .expect("Should create context");
        assert_eq!(context.frame_context_count(), 3);

        context.begin_transfer_command_list().expect("Should begin").end().expect("Should end");
        record_graphics(&context);
        context.end_frame().expect("Should end frame");

        let events = backend.events();
        let mut signals = Vec::new();
        let mut graphics_waits = Vec::new();
        for event in &events {
            if let DeviceEvent::Submit {
                queue, signals: signaled, waits, ..
            } = event
            {
                signals.extend(signaled.iter().copied());
                if *queue == QueueRole::Graphics {
                    graphics_waits = waits.clone();
                } else {
                    assert!(waits.is_empty(), "only graphics waits for the swap chain image");
                }
            }
        }
        assert_eq!(graphics_waits.len(), 1);

        let present_waits = events
            .iter()
            .find_map(|event| match event {
                DeviceEvent::Present { waits, .. } => Some(waits.clone()),
                _ => None,
            })
            .expect("Should present");
        assert_eq!(present_waits, signals);

        let acquires = events
            .iter()
            .filter(|event| matches!(event, DeviceEvent::Acquire { .. }))
            .count();
        assert_eq!(acquires, 2);
    }

    /// Replay the device log and check every binary semaphore alternates signal and wait
    fn assert_semaphores_pair(backend: &HeadlessBackend) {
        let mut signaled = std::collections::HashSet::new();
        for event in backend.events() {
            let (waits, signals) = match event {
                DeviceEvent::Submit { waits, signals, .. } => (waits, signals),
                DeviceEvent::Acquire { frame_index, .. } => {
                    let semaphore = backend
                        .image_available_semaphore(frame_index)
                        .expect("Should have an acquire semaphore");
                    (Vec::new(), vec![semaphore.0])
                }
                DeviceEvent::Present { waits, .. } => (waits, Vec::new()),
                _ => continue,
            };
            for semaphore in waits {
                assert!(
                    signaled.remove(&semaphore),
                    "semaphore {semaphore} waited on before being signaled"
                );
            }
            for semaphore in signals {
                assert!(
                    signaled.insert(semaphore),
                    "semaphore {semaphore} signaled twice without a wait"
                );
            }
        }
    }

    fn record_every_queue(context: &GraphicsContext<HeadlessBackend>) {
        context.begin_transfer_command_list().expect("Should begin").end().expect("Should end");
        context.begin_compute_command_list().expect("Should begin").end().expect("Should end");
        record_graphics(context);
    }

    #[test]
    fn test_offscreen_frames_never_resignal_a_semaphore() {
        let frames = 2;
        let (backend, mut context) = offscreen(frames, HeadlessConfig::default());
        for _ in 0..=u64::from(frames) * 2 {
            record_every_queue(&context);
            context.end_frame().expect("Should end frame");
        }

        let submits = backend
            .events()
            .iter()
            .filter(|event| matches!(event, DeviceEvent::Submit { .. }))
            .count();
        assert_eq!(submits, 3 * (usize::from(frames) * 2 + 1));
        assert_semaphores_pair(&backend);
    }

    #[test]
    fn test_presented_frames_pair_every_signal_with_a_wait() {
        let backend = Arc::new(HeadlessBackend::new(HeadlessConfig {
            present: true,
            swap_chain_images: 2,
            ..HeadlessConfig::default()
        }));
        let config = GraphicsConfig {
            present: true,
            ..GraphicsConfig::default()
        };
        let mut context = GraphicsContext::new(
            Arc::clone(&backend),
            config,
            Arc::new(Diagnostics::new()),
        )
        .expect("Should create context");
        let frames = context.frame_context_count();

        for frame in 0..=u64::from(frames) * 2 {
            // Alternate frames leave the graphics queue idle so present consumes the acquire
            if frame % 2 == 0 {
                record_every_queue(&context);
            } else {
                context
                    .begin_compute_command_list()
                    .expect("Should begin")
                    .end()
                    .expect("Should end");
            }
            context.end_frame().expect("Should end frame");
        }

        let presents = backend
            .events()
            .iter()
            .filter(|event| matches!(event, DeviceEvent::Present { .. }))
            .count();
        assert_eq!(presents, usize::from(frames) * 2 + 1);
        assert_semaphores_pair(&backend);
    }

    #[test]
    fn test_descriptor_update_reaches_every_frame_copy_once() {
        let (backend, mut context) = offscreen(3, HeadlessConfig::default());
        let (layout, indices) = context
            .create_descriptor_set_layout(&DescriptorSetDesc {
                bindings: vec![DescriptorBindingDesc::new(
                    DescriptorBindingType::ConstantBuffer,
                    ShaderVisibility::ALL,
                )],
            })
            .expect("Should create layout");
        let set = context.create_descriptor_set(layout).expect("Should create set");
        let buffer = context
            .create_buffer(&BufferDesc {
                size: 256,
                usage: BufferUsage::CONSTANT,
                memory: MemoryUsage::StageEveryFrame,
                debug_name: "constants".to_string(),
            })
            .expect("Should create buffer");
        let view = context.create_buffer_view(&BufferViewDesc {
            buffer,
            offset: 0,
            size: 256,
        });

        context.update_descriptor_set(
            set,
            &[DescriptorSetWriteInfo {
                index: indices[0],
                array_offset: 0,
                descriptors: vec![DescriptorData::new(view)],
            }],
            false,
        );
        for _ in 0..6 {
            context.end_frame().expect("Should end frame");
        }

        let mut frames: Vec<u8> = backend
            .events()
            .into_iter()
            .filter_map(|event| match event {
                DeviceEvent::DescriptorWrite { frame_index, .. } => Some(frame_index),
                _ => None,
            })
            .collect();
        frames.sort_unstable();
        assert_eq!(frames, vec![0, 1, 2]);
        assert_eq!(context.diagnostics().failure_count(), 0);
    }

    #[test]
    fn test_descriptor_sets_bind_per_frame_copy() {
        let (backend, mut context) = offscreen(2, HeadlessConfig::default());
        let (layout, _) = context
            .create_descriptor_set_layout(&DescriptorSetDesc {
                bindings: vec![DescriptorBindingDesc::new(
                    DescriptorBindingType::Sampler,
                    ShaderVisibility::FRAGMENT,
                )],
            })
            .expect("Should create layout");
        let first = context.create_descriptor_set(layout).expect("Should create set");
        let second = context.create_descriptor_set(layout).expect("Should create set");
        let pipeline_layout = context
            .create_pipeline_layout(&PipelineLayoutDesc {
                descriptor_sets: vec![layout, layout],
                push_constants: Vec::new(),
            })
            .expect("Should create pipeline layout");
        backend.take_events();

        let mut list = context.begin_graphics_command_list().expect("Should begin");
        list.set_graphics_descriptor_sets(pipeline_layout, &[first, second], &[true, false]);
        list.end().expect("Should end");

        let binds: Vec<(u8, u32)> = backend
            .events()
            .into_iter()
            .filter_map(|event| match event {
                DeviceEvent::DescriptorBind {
                    frame_index, set_index, ..
                } => Some((frame_index, set_index)),
                _ => None,
            })
            .collect();
        assert_eq!(binds, vec![(context.current_frame_context_index(), 1)]);
    }

    #[test]
    fn test_compute_list_binds_current_frame_copy() {
        let (backend, mut context) = offscreen(3, HeadlessConfig::default());
        let (layout, _) = context
            .create_descriptor_set_layout(&DescriptorSetDesc {
                bindings: vec![DescriptorBindingDesc::new(
                    DescriptorBindingType::StorageReadWriteBuffer,
                    ShaderVisibility::COMPUTE,
                )],
            })
            .expect("Should create layout");
        let set = context.create_descriptor_set(layout).expect("Should create set");
        let pipeline_layout = context
            .create_pipeline_layout(&PipelineLayoutDesc {
                descriptor_sets: vec![layout],
                push_constants: Vec::new(),
            })
            .expect("Should create pipeline layout");

        let mut bound = Vec::new();
        for _ in 0..3 {
            backend.take_events();
            let mut list = context.begin_compute_command_list().expect("Should begin");
            list.set_compute_descriptor_sets(pipeline_layout, &[set], &[]);
            list.end().expect("Should end");

            let frame_index = context.current_frame_context_index();
            for event in backend.events() {
                if let DeviceEvent::DescriptorBind {
                    bind_point,
                    frame_index: bound_copy,
                    ..
                } = event
                {
                    assert_eq!(bind_point, BindPoint::Compute);
                    assert_eq!(bound_copy, frame_index);
                    bound.push(bound_copy);
                }
            }
            context.end_frame().expect("Should end frame");
        }
        assert_eq!(bound.len(), 3);

        let failures = context.diagnostics().failure_count();
        let mut transfer = context.begin_transfer_command_list().expect("Should begin");
        transfer.set_compute_descriptor_sets(pipeline_layout, &[set], &[]);
        transfer.end().expect("Should end");
        assert_eq!(context.diagnostics().failure_count(), failures + 1);
    }

    #[test]
    fn test_second_recorder_blocks_until_first_ends() {
        let (_backend, context) = offscreen(2, HeadlessConfig::default());
        let first_ended = AtomicBool::new(false);
        let first_began = std::sync::Barrier::new(2);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let list = context.begin_graphics_command_list().expect("Should begin");
                first_began.wait();
                std::thread::sleep(Duration::from_millis(50));
                first_ended.store(true, Ordering::SeqCst);
                list.end().expect("Should end");
            });
            scope.spawn(|| {
                first_began.wait();
                let list = context.begin_graphics_command_list().expect("Should begin");
                assert!(first_ended.load(Ordering::SeqCst));
                list.end().expect("Should end");
            });
        });

        let pool_set = context
            .frame_context(context.current_frame_context_index())
            .pool_set(QueueRole::Graphics)
            .expect("Should have a graphics queue");
        assert_eq!(pool_set.used_command_buffers().len(), 2);
    }

    #[test]
    fn test_native_failure_marks_device_lost() {
        let (_backend, mut context) = offscreen(
            2,
            HeadlessConfig {
                lose_device_after_submits: Some(1),
                ..HeadlessConfig::default()
            },
        );
        record_graphics(&context);
        context.end_frame().expect("Should end frame");

        record_graphics(&context);
        assert!(context.end_frame().is_err());
        assert!(context.is_lost());
        assert!(matches!(context.end_frame(), Err(GraphicsError::DeviceLost { .. })));
        assert!(matches!(
            context.begin_graphics_command_list(),
            Err(GraphicsError::DeviceLost { .. })
        ));
    }

    #[test]
    fn test_timestamps_resolve_when_slot_is_recycled() {
        let (_backend, mut context) = offscreen(
            2,
            HeadlessConfig {
                timestamp_period_ns: 10.0,
                ..HeadlessConfig::default()
            },
        );

        let mut list = context.begin_graphics_command_list().expect("Should begin");
        let start = list.put_timestamp().expect("Should write timestamp");
        let end = list.put_timestamp().expect("Should write timestamp");
        list.end().expect("Should end");
        context.end_frame().expect("Should end frame");
        assert_eq!(context.resolved_timestamp(start), None);

        context.end_frame().expect("Should end frame");
        let start_ns = context.resolved_timestamp(start).expect("Should be resolved");
        let end_ns = context.resolved_timestamp(end).expect("Should be resolved");
        approx::assert_relative_eq!((end_ns - start_ns) as f64, 10.0);

        let mut compute = context.begin_compute_command_list().expect("Should begin");
        assert!(compute.put_timestamp().is_none());
        compute.end().expect("Should end");
        assert_eq!(context.diagnostics().failures_at("command_list.timestamp"), 1);
    }

    #[test]
    fn test_missing_queue_is_an_error() {
        let (_backend, context) = offscreen(
            2,
            HeadlessConfig {
                dedicated_compute: false,
                ..HeadlessConfig::default()
            },
        );
        assert!(!context.has_dedicated_compute_queue());
        assert!(matches!(
            context.begin_compute_command_list(),
            Err(GraphicsError::QueueUnavailable {
                queue: QueueRole::Compute
            })
        ));
    }

    #[test]
    fn test_drop_releases_every_native_object() {
        let backend = Arc::new(HeadlessBackend::new(deferred()));
        let diagnostics = Arc::new(Diagnostics::new());
        let config = GraphicsConfig {
            frame_context_count: Some(3),
            ..GraphicsConfig::default()
        };
        let mut context = GraphicsContext::new(
            Arc::clone(&backend),
            config,
            Arc::clone(&diagnostics),
        )
        .expect("Should create context");

        let buffer = context
            .create_buffer(&BufferDesc {
                size: 16,
                usage: BufferUsage::TRANSFER_SRC,
                memory: MemoryUsage::StageEveryFrame,
                debug_name: "upload".to_string(),
            })
            .expect("Should create buffer");
        assert!(context
            .write_buffer_pod(buffer, 0, &[1.0f32, 2.0, 3.0, 4.0])
            .expect("Should write"));

        let shader = context
            .create_shader_module(&ShaderModuleDesc {
                code: vec![crate::graphics::resources::SPIRV_MAGIC, 0x0001_0000, 0, 1, 0],
                debug_name: "skinning".to_string(),
            })
            .expect("Should create shader module");
        let layout = context
            .create_pipeline_layout(&PipelineLayoutDesc::default())
            .expect("Should create pipeline layout");
        let pipeline = context
            .create_compute_pipeline(&ComputePipelineDesc {
                shader: crate::graphics::resources::ShaderStageDesc::main(shader),
                layout,
                debug_name: "skinning".to_string(),
            })
            .expect("Should create pipeline");
        assert!(pipeline.is_valid());
        assert_eq!(backend.live_pipeline_objects(), 2);

        for _ in 0..5 {
            context
                .begin_transfer_command_list()
                .expect("Should begin")
                .end()
                .expect("Should end");
            record_graphics(&context);
            context.end_frame().expect("Should end frame");
        }
        drop(context);

        assert_eq!(diagnostics.failure_count(), 0);
        assert_eq!(backend.live_sync_objects(), 0);
        assert_eq!(backend.live_pipeline_objects(), 0);
    }
}
