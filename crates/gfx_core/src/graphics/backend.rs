//! Native capability interface implemented by each graphics backend
//!
//! The frame ring, descriptor tracking and resource pools are written once against
//! [`GraphicsBackend`]. A backend only provides the native calls: object creation
//! and destruction, command recording, queue submission, fence waits and
//! presentation.
//!
//! Synchronization and command objects are small `Copy` handles owned by the frame
//! contexts that create them. Resources are owned values moved into the generational
//! pools and handed back to the backend for destruction.

use std::fmt::Debug;

use crate::graphics::barriers::{
    BufferMemoryBarrier, GlobalMemoryBarrier, TextureLayout, TextureMemoryBarrier,
};
use crate::graphics::descriptors::{DescriptorBindingType, PushConstantDesc, ResolvedBinding};
use crate::graphics::error::GraphicsResult;
use crate::graphics::resources::{
    BufferCopy, BufferDesc, LoadOp, RenderTargetViewDesc, SamplerDesc, ShaderModuleDesc, StoreOp,
    TextureDesc, TextureFormat, TextureViewDesc,
};

/// Role of a hardware queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Copy-only queue
    Transfer,
    /// Compute-only queue
    Compute,
    /// Graphics queue, also accepts compute and copies
    Graphics,
}

impl QueueRole {
    /// Order in which a frame's command buffers are submitted
    pub const SUBMISSION_ORDER: [Self; 3] = [Self::Transfer, Self::Compute, Self::Graphics];
}

/// Pipeline kind descriptor sets are bound for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPoint {
    /// Draws
    Graphics,
    /// Dispatches
    Compute,
}

bitflags::bitflags! {
    /// Pipeline stages a submission waits at
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WaitStage: u32 {
        /// Color attachment output, the first use of an acquired swap chain image
        const COLOR_ATTACHMENT_OUTPUT = 1 << 0;
        /// Every stage
        const ALL_COMMANDS = 1 << 1;
    }
}

/// Everything submitted to a queue in one call
#[derive(Debug)]
pub struct Submission<'a, B: GraphicsBackend + ?Sized> {
    /// Command buffers, executed in order
    pub command_buffers: &'a [B::CommandBuffer],
    /// Semaphores waited on before the listed stage
    pub wait_semaphores: &'a [(B::Semaphore, WaitStage)],
    /// Semaphores signaled on completion
    pub signal_semaphores: &'a [B::Semaphore],
    /// Fence signaled on completion
    pub fence: Option<B::Fence>,
}

/// Native resource referenced by one descriptor of a resolved write
#[derive(Debug)]
pub enum NativeDescriptor<'a, B: GraphicsBackend + ?Sized> {
    /// Sampler state
    Sampler(&'a B::Sampler),
    /// Texture view read in `layout`
    Texture {
        /// Native view
        view: &'a B::TextureView,
        /// Layout the view is read in
        layout: TextureLayout,
    },
    /// Buffer range
    Buffer {
        /// Native buffer
        buffer: &'a B::Buffer,
        /// First byte
        offset: u64,
        /// Bytes covered
        size: u64,
    },
}

/// Descriptor write with every handle resolved to its native object
#[derive(Debug)]
pub struct NativeDescriptorWrite<'a, B: GraphicsBackend + ?Sized> {
    /// Native binding index
    pub binding: u32,
    /// Binding kind
    pub binding_type: DescriptorBindingType,
    /// First array element
    pub array_offset: u32,
    /// Descriptors, one per array element
    pub descriptors: Vec<NativeDescriptor<'a, B>>,
}

/// Barrier lists with every handle resolved to its native object
#[derive(Debug)]
pub struct NativeBarriers<'a, B: GraphicsBackend + ?Sized> {
    /// Global barriers
    pub global: &'a [GlobalMemoryBarrier],
    /// Buffer barriers with their native buffer
    pub buffers: &'a [(&'a B::Buffer, BufferMemoryBarrier)],
    /// Texture barriers with their native texture
    pub textures: &'a [(&'a B::Texture, TextureMemoryBarrier)],
}

/// Render pass attachment with its native view
#[derive(Debug)]
pub struct NativeAttachment<'a, B: GraphicsBackend + ?Sized> {
    /// Native view
    pub view: &'a B::RenderTargetView,
    /// Format of the view
    pub format: TextureFormat,
    /// Load behaviour
    pub load: LoadOp,
    /// Store behaviour
    pub store: StoreOp,
}

/// Render pass with every attachment resolved
#[derive(Debug)]
pub struct NativeRenderPassDesc<'a, B: GraphicsBackend + ?Sized> {
    /// Color attachments
    pub color: Vec<NativeAttachment<'a, B>>,
    /// Depth/stencil attachment
    pub depth_stencil: Option<NativeAttachment<'a, B>>,
    /// Extent shared by every attachment
    pub extent: [u32; 2],
}

/// Shader entry point in a native module
#[derive(Debug)]
pub struct NativeShaderStage<'a, B: GraphicsBackend + ?Sized> {
    /// Native module
    pub module: &'a B::ShaderModule,
    /// Entry point name
    pub entry_point: &'a str,
}

/// Graphics pipeline with every handle resolved
#[derive(Debug)]
pub struct NativeGraphicsPipelineDesc<'a, B: GraphicsBackend + ?Sized> {
    /// Vertex stage
    pub vertex: NativeShaderStage<'a, B>,
    /// Fragment stage
    pub fragment: Option<NativeShaderStage<'a, B>>,
    /// Resource layout
    pub layout: &'a B::PipelineLayout,
    /// Render pass the pipeline draws in
    pub render_pass: &'a B::RenderPass,
}

/// Native calls the backend-agnostic core is built on
///
/// Methods returning `GraphicsResult` report native failures, which the core treats
/// as fatal for the device. Destruction never fails.
pub trait GraphicsBackend: Send + Sync {
    /// Command buffer allocator, one per queue role and frame context
    type CommandPool: Copy + Eq + Debug + Send + Sync;
    /// Recordable command buffer
    type CommandBuffer: Copy + Eq + Debug + Send + Sync;
    /// GPU to CPU signal
    type Fence: Copy + Eq + Debug + Send + Sync;
    /// GPU to GPU signal
    type Semaphore: Copy + Eq + Debug + Send + Sync;
    /// Timestamp query pool
    type QueryPool: Copy + Eq + Debug + Send + Sync;
    /// Buffer with its memory
    type Buffer: Debug + Send + Sync;
    /// Texture with its memory, unless owned by the swap chain
    type Texture: Debug + Send + Sync;
    /// Texture view
    type TextureView: Debug + Send + Sync;
    /// Sampler state
    type Sampler: Debug + Send + Sync;
    /// Descriptor set layout
    type DescriptorSetLayout: Debug + Send + Sync;
    /// Descriptor set with one physical copy per frame context
    type DescriptorSet: Debug + Send + Sync;
    /// Pipeline layout
    type PipelineLayout: Debug + Send + Sync;
    /// Compiled shader code
    type ShaderModule: Debug + Send + Sync;
    /// Single-subresource view rendered to
    type RenderTargetView: Debug + Send + Sync;
    /// Attachment set rendered to by graphics pipelines
    type RenderPass: Debug + Send + Sync;
    /// Graphics pipeline state
    type GraphicsPipeline: Debug + Send + Sync;
    /// Compute pipeline state
    type ComputePipeline: Debug + Send + Sync;

    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Whether a queue exists for `role`
    ///
    /// Graphics is always available; transfer and compute only when dedicated queues
    /// were found.
    fn has_queue(&self, role: QueueRole) -> bool;

    /// Swap chain image count, `None` when not presenting
    fn swap_chain_image_count(&self) -> Option<u8>;

    /// Create a command pool for `role`
    fn create_command_pool(&self, role: QueueRole) -> GraphicsResult<Self::CommandPool>;
    /// Destroy a command pool; its buffers must have been freed
    fn destroy_command_pool(&self, pool: Self::CommandPool);
    /// Allocate one primary command buffer
    fn allocate_command_buffer(
        &self,
        pool: Self::CommandPool,
    ) -> GraphicsResult<Self::CommandBuffer>;
    /// Free command buffers back to their pool
    fn free_command_buffers(&self, pool: Self::CommandPool, buffers: &[Self::CommandBuffer]);
    /// Begin one-time-submit recording
    fn begin_command_buffer(&self, buffer: Self::CommandBuffer) -> GraphicsResult<()>;
    /// End recording
    fn end_command_buffer(&self, buffer: Self::CommandBuffer) -> GraphicsResult<()>;
    /// Reset a command buffer so it can be recorded again
    fn reset_command_buffer(&self, buffer: Self::CommandBuffer) -> GraphicsResult<()>;

    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> GraphicsResult<Self::Fence>;
    /// Whether the fence is signaled
    fn fence_status(&self, fence: Self::Fence) -> GraphicsResult<bool>;
    /// Block until every fence is signaled or `timeout_ns` elapses
    fn wait_for_fences(&self, fences: &[Self::Fence], timeout_ns: u64) -> GraphicsResult<()>;
    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: Self::Fence) -> GraphicsResult<()>;
    /// Destroy a fence
    fn destroy_fence(&self, fence: Self::Fence);
    /// Create a binary semaphore
    fn create_semaphore(&self) -> GraphicsResult<Self::Semaphore>;
    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: Self::Semaphore);

    /// Submit work to the queue of `role`
    fn submit(&self, role: QueueRole, submission: &Submission<'_, Self>) -> GraphicsResult<()>;

    /// Acquire the next swap chain image for frame context `frame_index`
    fn acquire_next_image(&self, frame_index: u8) -> GraphicsResult<()>;
    /// Semaphore signaled when the image acquired for `frame_index` is available
    fn image_available_semaphore(&self, frame_index: u8) -> Option<Self::Semaphore>;
    /// Present the image acquired for `frame_index` once every semaphore signals
    fn present(&self, frame_index: u8, wait_semaphores: &[Self::Semaphore]) -> GraphicsResult<()>;

    /// Create a buffer and bind memory to it
    fn create_buffer(&self, desc: &BufferDesc) -> GraphicsResult<Self::Buffer>;
    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, buffer: Self::Buffer);
    /// Copy `data` into host-visible buffer memory at `offset`
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> GraphicsResult<()>;
    /// Copy host-visible buffer memory at `offset` into `out`
    fn read_buffer(&self, buffer: &Self::Buffer, offset: u64, out: &mut [u8]) -> GraphicsResult<()>;
    /// Create a texture and bind memory to it
    fn create_texture(&self, desc: &TextureDesc) -> GraphicsResult<Self::Texture>;
    /// Destroy a texture; its memory is freed only if `owns_memory`
    fn destroy_texture(&self, texture: Self::Texture, owns_memory: bool);
    /// Create a view on `texture`
    fn create_texture_view(
        &self,
        texture: &Self::Texture,
        desc: &TextureViewDesc,
    ) -> GraphicsResult<Self::TextureView>;
    /// Destroy a texture view
    fn destroy_texture_view(&self, view: Self::TextureView);
    /// Create a sampler
    fn create_sampler(&self, desc: &SamplerDesc) -> GraphicsResult<Self::Sampler>;
    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: Self::Sampler);

    /// Create a descriptor set layout from resolved bindings
    fn create_descriptor_set_layout(
        &self,
        bindings: &[ResolvedBinding],
    ) -> GraphicsResult<Self::DescriptorSetLayout>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: Self::DescriptorSetLayout);
    /// Allocate `frame_count` physical copies of a set
    ///
    /// `pool_sizes` already accounts for every copy.
    fn create_descriptor_set(
        &self,
        layout: &Self::DescriptorSetLayout,
        pool_sizes: &[(DescriptorBindingType, u32)],
        frame_count: u8,
    ) -> GraphicsResult<Self::DescriptorSet>;
    /// Destroy every copy of a set
    fn destroy_descriptor_set(&self, set: Self::DescriptorSet);
    /// Write descriptors into the copy of `set` used by `frame_index`
    fn write_descriptor_set(
        &self,
        set: &Self::DescriptorSet,
        frame_index: u8,
        writes: &[NativeDescriptorWrite<'_, Self>],
    );
    /// Bind the `frame_index` copy of `set` at `set_index` for `bind_point` work
    fn bind_descriptor_set(
        &self,
        buffer: Self::CommandBuffer,
        bind_point: BindPoint,
        layout: &Self::PipelineLayout,
        set_index: u32,
        set: &Self::DescriptorSet,
        frame_index: u8,
    );

    /// Create a pipeline layout
    fn create_pipeline_layout(
        &self,
        set_layouts: &[&Self::DescriptorSetLayout],
        push_constants: &[PushConstantDesc],
    ) -> GraphicsResult<Self::PipelineLayout>;
    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: Self::PipelineLayout);

    /// Create a shader module
    fn create_shader_module(&self, desc: &ShaderModuleDesc) -> GraphicsResult<Self::ShaderModule>;
    /// Destroy a shader module
    fn destroy_shader_module(&self, module: Self::ShaderModule);
    /// Create a render target view on `texture`
    fn create_render_target_view(
        &self,
        texture: &Self::Texture,
        desc: &RenderTargetViewDesc,
    ) -> GraphicsResult<Self::RenderTargetView>;
    /// Destroy a render target view
    fn destroy_render_target_view(&self, view: Self::RenderTargetView);
    /// Create a render pass
    fn create_render_pass(
        &self,
        desc: &NativeRenderPassDesc<'_, Self>,
    ) -> GraphicsResult<Self::RenderPass>;
    /// Destroy a render pass
    fn destroy_render_pass(&self, pass: Self::RenderPass);
    /// Create a graphics pipeline
    fn create_graphics_pipeline(
        &self,
        desc: &NativeGraphicsPipelineDesc<'_, Self>,
    ) -> GraphicsResult<Self::GraphicsPipeline>;
    /// Destroy a graphics pipeline
    fn destroy_graphics_pipeline(&self, pipeline: Self::GraphicsPipeline);
    /// Create a compute pipeline
    fn create_compute_pipeline(
        &self,
        shader: &NativeShaderStage<'_, Self>,
        layout: &Self::PipelineLayout,
    ) -> GraphicsResult<Self::ComputePipeline>;
    /// Destroy a compute pipeline
    fn destroy_compute_pipeline(&self, pipeline: Self::ComputePipeline);

    /// Record memory barriers
    fn place_memory_barriers(
        &self,
        buffer: Self::CommandBuffer,
        barriers: &NativeBarriers<'_, Self>,
    );
    /// Record a buffer to buffer copy
    fn copy_buffer(
        &self,
        buffer: Self::CommandBuffer,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        region: BufferCopy,
    );

    /// Create a timestamp query pool of `count` queries
    fn create_query_pool(&self, count: u32) -> GraphicsResult<Self::QueryPool>;
    /// Destroy a query pool
    fn destroy_query_pool(&self, pool: Self::QueryPool);
    /// Record a reset of queries `0..count`
    fn reset_queries(&self, buffer: Self::CommandBuffer, pool: Self::QueryPool, count: u32);
    /// Record a timestamp write into query `index`
    fn write_timestamp(&self, buffer: Self::CommandBuffer, pool: Self::QueryPool, index: u32);
    /// Read raw ticks of queries `0..out.len()`, waiting for availability
    fn read_timestamps(&self, pool: Self::QueryPool, out: &mut [u64]) -> GraphicsResult<()>;
    /// Nanoseconds per timestamp tick
    fn timestamp_period_ns(&self) -> f64;

    /// Block until the device is idle
    fn wait_idle(&self) -> GraphicsResult<()>;
}
