//! # gfx_core
//!
//! Frame pipelining and GPU resource lifetime core.
//!
//! The CPU records frame N while frames N-1 .. N-k still execute on the GPU. A ring
//! of frame contexts owns the per-frame command pools, fences and semaphores, and
//! a slot is only recycled once the frame that last used it has completed.
//! Descriptor writes are replayed into every frame's copy of a set, so in-flight
//! work never observes a half-updated table.
//!
//! ## Features
//!
//! - **Frame ring**: `GraphicsContext::end_frame` submits, presents and paces
//! - **Generational handles**: stale handles are detected, never dereferenced
//! - **Descriptor replay**: per-frame descriptor copies kept in sync
//! - **Barrier translation**: one barrier model for Vulkan, DX12 and Metal
//! - **Backends**: Vulkan (ash) and a deterministic headless device
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gfx_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GraphicsConfig::default();
//!     let backend = Arc::new(HeadlessBackend::new(HeadlessConfig::from_graphics_config(&config)));
//!     let mut context = GraphicsContext::new(backend, config, Arc::new(Diagnostics::new()))?;
//!
//!     for _ in 0..10 {
//!         let commands = context.begin_graphics_command_list()?;
//!         commands.end()?;
//!         context.end_frame()?;
//!     }
//!     context.wait_for_last_frame()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::cast_possible_truncation
)]

pub mod backends;
pub mod config;
pub mod foundation;
pub mod graphics;

/// Common imports for library users
pub mod prelude {
    pub use crate::backends::headless::{CompletionMode, HeadlessBackend, HeadlessConfig};
    pub use crate::config::{Config, DescriptorHeapConfig, GraphicsConfig};
    pub use crate::foundation::{Diagnostics, Handle};
    pub use crate::graphics::{
        BarrierAccessFlags, BarrierSyncStageFlags, BufferDesc, BufferHandle, BufferMemoryBarrier,
        BufferUsage, CommandList, DescriptorBindingDesc, DescriptorBindingType, DescriptorData,
        DescriptorSetDesc, DescriptorSetHandle, DescriptorSetWriteInfo, GlobalMemoryBarrier,
        GraphicsBackend, GraphicsContext, GraphicsError, GraphicsResult, MemoryUsage,
        ShaderVisibility, TextureLayout, TextureMemoryBarrier, INITIAL_FRAME_ID,
    };
}
