//! # Graphics Core
//!
//! Backend-agnostic frame pipelining and resource lifetime management.
//!
//! ## Architecture
//!
//! - **GraphicsContext**: Frame ring owner and the only entry point for applications
//! - **FrameContext**: Command pools, fences and semaphores of one frame in flight
//! - **CommandList**: Scoped recording into the current frame
//! - **DescriptorSetManager**: Per-frame descriptor set copies kept in sync
//! - **Resources**: Generational pools of buffers, textures, views and samplers
//! - **GraphicsBackend**: Native calls each backend implements
//!
//! Handles returned by the context are plain values. Destroying an object makes
//! every copy of its handle stale; stale handles are reported through
//! [`crate::foundation::Diagnostics`] rather than by panicking.

// Native capability interface
pub mod backend;

// Descriptions shared by every backend
pub mod barriers;
pub mod descriptors;
pub mod handles;
pub mod resources;

// Frame pipelining
pub mod command_list;
pub mod context;
pub mod descriptor_set_manager;
pub mod frame_context;

/// Graphics error types
pub mod error;

pub use backend::{BindPoint, GraphicsBackend, QueueRole, Submission, WaitStage};
pub use barriers::{
    BarrierAccessFlags, BarrierSyncStageFlags, BufferMemoryBarrier, GlobalMemoryBarrier,
    TextureLayout, TextureMemoryBarrier, TexturePlane,
};
pub use command_list::CommandList;
pub use context::{frame_to_wait_before, GraphicsContext, INITIAL_FRAME_ID};
pub use descriptors::{
    DescriptorBindingDesc, DescriptorBindingType, DescriptorData, DescriptorSetDesc,
    DescriptorSetWriteInfo, PackedIndex, PipelineLayoutDesc, PushConstantDesc, ResolvedBinding,
    ShaderVisibility,
};
pub use error::{GraphicsError, GraphicsResult};
pub use handles::*;
pub use resources::{
    AddressMode, BufferCopy, BufferDesc, BufferUsage, BufferViewDesc, ComputePipelineDesc, Filter,
    GraphicsPipelineDesc, LoadOp, MemoryUsage, RenderPassAttachment, RenderPassDesc,
    RenderTargetViewDesc, SamplerDesc, ShaderModuleDesc, ShaderStageDesc, StoreOp, TextureDesc,
    TextureFormat, TextureUsage, TextureViewDesc, TextureViewType, SPIRV_MAGIC,
};
