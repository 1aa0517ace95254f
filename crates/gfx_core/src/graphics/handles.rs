//! Typed handles for every object owned by a graphics context
//!
//! Each handle wraps a pool [`Handle`]; the wrapper only prevents mixing up handles
//! from different pools at compile time.

use crate::foundation::Handle;

macro_rules! define_handles {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub Handle);

            impl $name {
                /// Handle that never refers to a live object
                pub const INVALID: Self = Self(Handle::INVALID);

                /// Whether this differs from [`Self::INVALID`]
                pub const fn is_valid(self) -> bool {
                    self.0.is_valid()
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::INVALID
                }
            }

            impl From<Handle> for $name {
                fn from(handle: Handle) -> Self {
                    Self(handle)
                }
            }

            impl From<$name> for Handle {
                fn from(handle: $name) -> Self {
                    handle.0
                }
            }
        )*
    };
}

define_handles! {
    /// GPU buffer
    BufferHandle,
    /// Range of a buffer bound as a constant or storage buffer
    BufferViewHandle,
    /// GPU texture
    TextureHandle,
    /// View on a texture, bound as a sampled or storage texture
    TextureViewHandle,
    /// Sampler state object
    SamplerHandle,
    /// Render target view on a texture
    RenderTargetViewHandle,
    /// Render pass
    RenderPassHandle,
    /// Compiled shader module
    ShaderModuleHandle,
    /// Descriptor set layout
    DescriptorSetLayoutHandle,
    /// Descriptor set, replicated once per frame context
    DescriptorSetHandle,
    /// Pipeline layout
    PipelineLayoutHandle,
    /// Graphics pipeline state
    GraphicsPipelineHandle,
    /// Compute pipeline state
    ComputePipelineHandle,
}

/// GPU timestamp written during a frame
///
/// Resolvable through [`crate::graphics::GraphicsContext::resolved_timestamp`] once
/// the frame has executed and until its frame context is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimestampHandle {
    /// Frame the timestamp was recorded in
    pub frame_id: u64,
    /// Query index within the frame context's pool
    pub index: u32,
}
