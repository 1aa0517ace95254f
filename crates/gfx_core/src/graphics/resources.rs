//! GPU resource registry
//!
//! [`Resources`] owns one generational pool per resource kind. Creating a resource
//! asks the backend for the native object and parks it in the pool; destroying it
//! frees the slot first (invalidating every outstanding handle) and then hands the
//! native object back to the backend.
//!
//! Nothing here waits for the GPU. Destroying a resource still referenced by an
//! in-flight frame is the caller's responsibility, typically solved by deferring
//! destruction until [`crate::graphics::GraphicsContext::is_frame_executed`].

use bitflags::bitflags;

use crate::foundation::{Diagnostics, GenerationalPool};
use crate::graphics::backend::{
    GraphicsBackend, NativeAttachment, NativeGraphicsPipelineDesc, NativeRenderPassDesc,
    NativeShaderStage,
};
use crate::graphics::barriers::TexturePlane;
use crate::graphics::descriptors::PipelineLayoutDesc;
use crate::graphics::error::GraphicsResult;
use crate::graphics::handles::{
    BufferHandle, BufferViewHandle, ComputePipelineHandle, GraphicsPipelineHandle,
    PipelineLayoutHandle, RenderPassHandle, RenderTargetViewHandle, SamplerHandle,
    ShaderModuleHandle, TextureHandle, TextureViewHandle,
};

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

bitflags! {
    /// Ways a buffer may be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Copy source
        const TRANSFER_SRC = 1 << 0;
        /// Copy destination
        const TRANSFER_DST = 1 << 1;
        /// Constant buffer
        const CONSTANT = 1 << 2;
        /// Storage buffer
        const STORAGE = 1 << 3;
        /// Vertex buffer
        const VERTEX = 1 << 4;
        /// Index buffer
        const INDEX = 1 << 5;
        /// Indirect arguments
        const INDIRECT = 1 << 6;
    }
}

bitflags! {
    /// Ways a texture may be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Copy source
        const TRANSFER_SRC = 1 << 0;
        /// Copy destination
        const TRANSFER_DST = 1 << 1;
        /// Sampled in shaders
        const SAMPLED = 1 << 2;
        /// Shader storage
        const STORAGE = 1 << 3;
        /// Color render target
        const COLOR_ATTACHMENT = 1 << 4;
        /// Depth/stencil render target
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

/// Where a resource's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryUsage {
    /// Device local, not mappable
    #[default]
    GpuOnly,
    /// Host visible, written by the CPU and read by the GPU
    StageEveryFrame,
    /// Host visible, written by the GPU and read back by the CPU
    Readback,
}

impl MemoryUsage {
    /// Whether the CPU can map the memory
    pub const fn is_host_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }
}

/// Texel formats the core creates resources with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    /// 8-bit RGBA, linear
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB
    Rgba8Srgb,
    /// 8-bit BGRA, linear
    Bgra8Unorm,
    /// 8-bit BGRA, sRGB
    Bgra8Srgb,
    /// 16-bit float RGBA
    Rgba16Float,
    /// 32-bit float single channel
    R32Float,
    /// 32-bit float depth
    D32Float,
    /// 24-bit depth with 8-bit stencil
    D24UnormS8Uint,
}

impl TextureFormat {
    /// Planes present in the format
    pub const fn planes(self) -> TexturePlane {
        match self {
            Self::D32Float => TexturePlane::DEPTH,
            Self::D24UnormS8Uint => TexturePlane::DEPTH.union(TexturePlane::STENCIL),
            _ => TexturePlane::COLOR,
        }
    }
}

/// Buffer creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Allowed usages
    pub usage: BufferUsage,
    /// Memory placement
    pub memory: MemoryUsage,
    /// Name shown in debuggers and logs
    pub debug_name: String,
}

/// Sub-range of a buffer, bound through descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferViewDesc {
    /// Viewed buffer
    pub buffer: BufferHandle,
    /// First byte
    pub offset: u64,
    /// Bytes covered
    pub size: u64,
}

/// Region of a buffer to buffer copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopy {
    /// Source offset in bytes
    pub src_offset: u64,
    /// Destination offset in bytes
    pub dst_offset: u64,
    /// Bytes copied
    pub size: u64,
}

/// Texture creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    /// Width, height and depth in texels
    pub dimensions: [u32; 3],
    /// Texel format
    pub format: TextureFormat,
    /// Array layers
    pub array_size: u16,
    /// Mip levels
    pub mip_count: u8,
    /// Allowed usages
    pub usage: TextureUsage,
    /// Memory placement
    pub memory: MemoryUsage,
    /// Name shown in debuggers and logs
    pub debug_name: String,
}

/// Dimensionality of a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureViewType {
    /// Single 2D image
    #[default]
    Single2D,
    /// Array of 2D images
    Array2D,
    /// Cube map
    Cube,
    /// Single 3D image
    Single3D,
}

/// Texture view creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureViewDesc {
    /// Viewed texture
    pub texture: TextureHandle,
    /// View format, compatible with the texture's
    pub format: TextureFormat,
    /// View dimensionality
    pub view_type: TextureViewType,
    /// Planes exposed
    pub planes: TexturePlane,
    /// First mip level
    pub mip_start: u8,
    /// Mip levels
    pub mip_count: u8,
    /// First array layer
    pub array_start: u16,
    /// Array layers
    pub array_count: u16,
}

/// Texel filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    /// Nearest texel
    Point,
    /// Linear blend
    #[default]
    Linear,
}

/// Out of range texture coordinate handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Wrap around
    #[default]
    Repeat,
    /// Wrap around, mirrored every other repetition
    MirroredRepeat,
    /// Use the border color
    Border,
    /// Clamp to the edge texel
    Clamp,
}

/// Sampler creation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// Minification filter
    pub min_filter: Filter,
    /// Magnification filter
    pub mag_filter: Filter,
    /// Filter between mip levels
    pub mip_filter: Filter,
    /// Address modes for U, V and W
    pub address_mode: [AddressMode; 3],
    /// Bias added to the computed LOD
    pub lod_bias: f32,
    /// Lowest LOD sampled
    pub lod_min: f32,
    /// Highest LOD sampled
    pub lod_max: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            mip_filter: Filter::Linear,
            address_mode: [AddressMode::Repeat; 3],
            lod_bias: 0.0,
            lod_min: 0.0,
            lod_max: f32::MAX,
        }
    }
}

/// Compiled shader code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderModuleDesc {
    /// SPIR-V words
    pub code: Vec<u32>,
    /// Name shown in debuggers and logs
    pub debug_name: String,
}

/// Render target view creation parameters
///
/// A render target view covers a single mip level and array layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetViewDesc {
    /// Viewed texture
    pub texture: TextureHandle,
    /// View format, compatible with the texture's
    pub format: TextureFormat,
    /// Planes rendered to
    pub planes: TexturePlane,
    /// Mip level rendered to
    pub mip_level: u8,
    /// Array layer rendered to
    pub array_layer: u16,
}

/// What an attachment holds when a render pass begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Previous contents
    #[default]
    Load,
    /// Cleared contents
    Clear,
    /// Undefined contents
    DontCare,
}

/// Whether an attachment's contents survive the end of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    /// Written contents are kept
    #[default]
    Store,
    /// Written contents may be discarded
    DontCare,
}

/// One attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassAttachment {
    /// Rendered view
    pub view: RenderTargetViewHandle,
    /// Load behaviour
    pub load: LoadOp,
    /// Store behaviour
    pub store: StoreOp,
}

/// Render pass creation parameters
///
/// Every attachment must have the same extent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderPassDesc {
    /// Color attachments, in shader output order
    pub color_attachments: Vec<RenderPassAttachment>,
    /// Depth/stencil attachment
    pub depth_stencil: Option<RenderPassAttachment>,
}

/// Shader entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStageDesc {
    /// Module holding the entry point
    pub module: ShaderModuleHandle,
    /// Entry point name
    pub entry_point: String,
}

impl ShaderStageDesc {
    /// The `main` entry point of `module`
    pub fn main(module: ShaderModuleHandle) -> Self {
        Self {
            module,
            entry_point: "main".to_string(),
        }
    }
}

/// Graphics pipeline creation parameters
///
/// Fixed-function state is left to the backend: triangle lists, no culling or
/// blending, depth testing when the render pass has a depth attachment, and
/// dynamic viewport and scissor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsPipelineDesc {
    /// Vertex stage
    pub vertex: ShaderStageDesc,
    /// Fragment stage, absent for depth-only passes
    pub fragment: Option<ShaderStageDesc>,
    /// Resource layout
    pub layout: PipelineLayoutHandle,
    /// Render pass the pipeline draws in
    pub render_pass: RenderPassHandle,
    /// Name shown in debuggers and logs
    pub debug_name: String,
}

/// Compute pipeline creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    /// Compute stage
    pub shader: ShaderStageDesc,
    /// Resource layout
    pub layout: PipelineLayoutHandle,
    /// Name shown in debuggers and logs
    pub debug_name: String,
}

/// Cold data kept for every render target view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetViewInfo {
    /// Creation parameters
    pub desc: RenderTargetViewDesc,
    /// Width and height of the viewed mip level
    pub extent: [u32; 2],
}

/// Cold data kept for every texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    /// Creation parameters
    pub desc: TextureDesc,
    /// Whether destroying the texture frees its memory
    ///
    /// False for swap chain images, whose memory belongs to the presentation engine.
    pub owns_memory: bool,
}

/// Resolved range of a buffer view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSpan {
    /// Viewed buffer
    pub buffer: BufferHandle,
    /// First byte
    pub offset: u64,
    /// Bytes covered
    pub size: u64,
}

/// Generational pools of every resource owned by a context
pub struct Resources<B: GraphicsBackend> {
    pub(crate) buffers: GenerationalPool<B::Buffer, BufferDesc>,
    pub(crate) buffer_views: GenerationalPool<BufferSpan>,
    pub(crate) textures: GenerationalPool<B::Texture, TextureInfo>,
    pub(crate) texture_views: GenerationalPool<B::TextureView, TextureViewDesc>,
    pub(crate) samplers: GenerationalPool<B::Sampler, SamplerDesc>,
    pub(crate) pipeline_layouts: GenerationalPool<B::PipelineLayout, PipelineLayoutDesc>,
    pub(crate) shader_modules: GenerationalPool<B::ShaderModule, String>,
    pub(crate) render_target_views: GenerationalPool<B::RenderTargetView, RenderTargetViewInfo>,
    pub(crate) render_passes: GenerationalPool<B::RenderPass, RenderPassDesc>,
    pub(crate) graphics_pipelines: GenerationalPool<B::GraphicsPipeline, GraphicsPipelineDesc>,
    pub(crate) compute_pipelines: GenerationalPool<B::ComputePipeline, ComputePipelineDesc>,
}

impl<B: GraphicsBackend> Resources<B> {
    /// Create empty pools
    pub fn new() -> Self {
        Self {
            buffers: GenerationalPool::new(),
            buffer_views: GenerationalPool::new(),
            textures: GenerationalPool::new(),
            texture_views: GenerationalPool::new(),
            samplers: GenerationalPool::new(),
            pipeline_layouts: GenerationalPool::new(),
            shader_modules: GenerationalPool::new(),
            render_target_views: GenerationalPool::new(),
            render_passes: GenerationalPool::new(),
            graphics_pipelines: GenerationalPool::new(),
            compute_pipelines: GenerationalPool::new(),
        }
    }

    /// Create a buffer
    pub fn create_buffer(
        &mut self,
        backend: &B,
        desc: &BufferDesc,
    ) -> GraphicsResult<BufferHandle> {
        let buffer = backend.create_buffer(desc)?;
        log::trace!("Created buffer '{}' ({} bytes)", desc.debug_name, desc.size);
        Ok(BufferHandle(self.buffers.allocate(buffer, desc.clone())))
    }

    /// Destroy a buffer, `false` if the handle is stale
    pub fn destroy_buffer(&mut self, backend: &B, handle: BufferHandle) -> bool {
        match self.buffers.free(handle.0) {
            Some((buffer, _)) => {
                backend.destroy_buffer(buffer);
                true
            }
            None => false,
        }
    }

    /// Creation parameters of a live buffer
    pub fn buffer_desc(&self, handle: BufferHandle) -> Option<&BufferDesc> {
        self.buffers.get_cold(handle.0)
    }

    /// Native buffer of a live handle
    pub fn buffer(&self, handle: BufferHandle) -> Option<&B::Buffer> {
        self.buffers.get(handle.0)
    }

    /// Copy `data` into a host-visible buffer
    ///
    /// Out of range writes and writes to device-local buffers are soft failures
    /// reported through `diagnostics`; the returned flag tells whether data was
    /// written.
    pub fn write_buffer(
        &self,
        backend: &B,
        diagnostics: &Diagnostics,
        handle: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> GraphicsResult<bool> {
        let Some((buffer, desc)) = self.buffers.get_all(handle.0) else {
            diagnostics.verify(
                false,
                "resources.write_buffer",
                format_args!("stale buffer {:?}", handle),
            );
            return Ok(false);
        };
        if !Self::check_host_range(
            diagnostics,
            "resources.write_buffer",
            desc,
            offset,
            data.len(),
        ) {
            return Ok(false);
        }
        backend.write_buffer(buffer, offset, data)?;
        Ok(true)
    }

    /// Copy a host-visible buffer's contents at `offset` into `out`
    pub fn read_buffer(
        &self,
        backend: &B,
        diagnostics: &Diagnostics,
        handle: BufferHandle,
        offset: u64,
        out: &mut [u8],
    ) -> GraphicsResult<bool> {
        let Some((buffer, desc)) = self.buffers.get_all(handle.0) else {
            diagnostics.verify(
                false,
                "resources.read_buffer",
                format_args!("stale buffer {:?}", handle),
            );
            return Ok(false);
        };
        if !Self::check_host_range(diagnostics, "resources.read_buffer", desc, offset, out.len()) {
            return Ok(false);
        }
        backend.read_buffer(buffer, offset, out)?;
        Ok(true)
    }

    fn check_host_range(
        diagnostics: &Diagnostics,
        site: &'static str,
        desc: &BufferDesc,
        offset: u64,
        len: usize,
    ) -> bool {
        if !diagnostics.verify(
            desc.memory.is_host_visible(),
            site,
            format_args!("buffer '{}' is not host visible", desc.debug_name),
        ) {
            return false;
        }
        let end = offset.checked_add(len as u64);
        diagnostics.verify(
            end.is_some_and(|end| end <= desc.size),
            site,
            format_args!(
                "range {}+{} exceeds buffer '{}' of {} bytes",
                offset, len, desc.debug_name, desc.size
            ),
        )
    }

    /// Create a view on a range of a live buffer
    ///
    /// Returns an invalid handle if the buffer is stale or the range does not fit.
    pub fn create_buffer_view(
        &mut self,
        diagnostics: &Diagnostics,
        desc: &BufferViewDesc,
    ) -> BufferViewHandle {
        let Some(buffer_desc) = self.buffers.get_cold(desc.buffer.0) else {
            diagnostics.verify(false, "resources.create_buffer_view", "stale buffer");
            return BufferViewHandle::INVALID;
        };
        let fits = desc
            .offset
            .checked_add(desc.size)
            .is_some_and(|end| end <= buffer_desc.size);
        if !diagnostics.verify(fits, "resources.create_buffer_view", "view range exceeds buffer") {
            return BufferViewHandle::INVALID;
        }

        let span = BufferSpan {
            buffer: desc.buffer,
            offset: desc.offset,
            size: desc.size,
        };
        BufferViewHandle(self.buffer_views.allocate(span, ()))
    }

    /// Destroy a buffer view, `false` if the handle is stale
    pub fn destroy_buffer_view(&mut self, handle: BufferViewHandle) -> bool {
        self.buffer_views.free(handle.0).is_some()
    }

    /// Range covered by a live buffer view
    pub fn buffer_view(&self, handle: BufferViewHandle) -> Option<&BufferSpan> {
        self.buffer_views.get(handle.0)
    }

    /// Create a texture
    pub fn create_texture(
        &mut self,
        backend: &B,
        desc: &TextureDesc,
    ) -> GraphicsResult<TextureHandle> {
        let texture = backend.create_texture(desc)?;
        let info = TextureInfo {
            desc: desc.clone(),
            owns_memory: true,
        };
        Ok(TextureHandle(self.textures.allocate(texture, info)))
    }

    /// Register a texture whose memory is owned by the presentation engine
    pub fn register_swap_chain_texture(
        &mut self,
        texture: B::Texture,
        desc: TextureDesc,
    ) -> TextureHandle {
        let info = TextureInfo {
            desc,
            owns_memory: false,
        };
        TextureHandle(self.textures.allocate(texture, info))
    }

    /// Destroy a texture, `false` if the handle is stale
    ///
    /// Swap chain textures only lose their slot; their memory is left alone.
    pub fn destroy_texture(&mut self, backend: &B, handle: TextureHandle) -> bool {
        match self.textures.free(handle.0) {
            Some((texture, info)) => {
                backend.destroy_texture(texture, info.owns_memory);
                true
            }
            None => false,
        }
    }

    /// Native texture of a live handle
    pub fn texture(&self, handle: TextureHandle) -> Option<&B::Texture> {
        self.textures.get(handle.0)
    }

    /// Cold data of a live texture
    pub fn texture_info(&self, handle: TextureHandle) -> Option<&TextureInfo> {
        self.textures.get_cold(handle.0)
    }

    /// Create a view on a live texture
    ///
    /// Returns an invalid handle if the texture is stale.
    pub fn create_texture_view(
        &mut self,
        backend: &B,
        diagnostics: &Diagnostics,
        desc: &TextureViewDesc,
    ) -> GraphicsResult<TextureViewHandle> {
        let Some(texture) = self.textures.get(desc.texture.0) else {
            diagnostics.verify(false, "resources.create_texture_view", "stale texture");
            return Ok(TextureViewHandle::INVALID);
        };
        let view = backend.create_texture_view(texture, desc)?;
        Ok(TextureViewHandle(self.texture_views.allocate(view, *desc)))
    }

    /// Destroy a texture view, `false` if the handle is stale
    pub fn destroy_texture_view(&mut self, backend: &B, handle: TextureViewHandle) -> bool {
        match self.texture_views.free(handle.0) {
            Some((view, _)) => {
                backend.destroy_texture_view(view);
                true
            }
            None => false,
        }
    }

    /// Create a sampler
    pub fn create_sampler(
        &mut self,
        backend: &B,
        desc: &SamplerDesc,
    ) -> GraphicsResult<SamplerHandle> {
        let sampler = backend.create_sampler(desc)?;
        Ok(SamplerHandle(self.samplers.allocate(sampler, *desc)))
    }

    /// Destroy a sampler, `false` if the handle is stale
    pub fn destroy_sampler(&mut self, backend: &B, handle: SamplerHandle) -> bool {
        match self.samplers.free(handle.0) {
            Some((sampler, _)) => {
                backend.destroy_sampler(sampler);
                true
            }
            None => false,
        }
    }

    pub(crate) fn insert_pipeline_layout(
        &mut self,
        layout: B::PipelineLayout,
        desc: PipelineLayoutDesc,
    ) -> PipelineLayoutHandle {
        PipelineLayoutHandle(self.pipeline_layouts.allocate(layout, desc))
    }

    /// Destroy a pipeline layout, `false` if the handle is stale
    pub fn destroy_pipeline_layout(&mut self, backend: &B, handle: PipelineLayoutHandle) -> bool {
        match self.pipeline_layouts.free(handle.0) {
            Some((layout, _)) => {
                backend.destroy_pipeline_layout(layout);
                true
            }
            None => false,
        }
    }

    /// Native pipeline layout of a live handle
    pub fn pipeline_layout(&self, handle: PipelineLayoutHandle) -> Option<&B::PipelineLayout> {
        self.pipeline_layouts.get(handle.0)
    }

    /// Create a shader module
    ///
    /// Returns an invalid handle if the code is not SPIR-V.
    pub fn create_shader_module(
        &mut self,
        backend: &B,
        diagnostics: &Diagnostics,
        desc: &ShaderModuleDesc,
    ) -> GraphicsResult<ShaderModuleHandle> {
        if !diagnostics.verify(
            desc.code.first() == Some(&SPIRV_MAGIC),
            "resources.create_shader_module",
            format_args!("shader '{}' is not SPIR-V", desc.debug_name),
        ) {
            return Ok(ShaderModuleHandle::INVALID);
        }

        let module = backend.create_shader_module(desc)?;
        log::trace!("Created shader module '{}' ({} words)", desc.debug_name, desc.code.len());
        Ok(ShaderModuleHandle(self.shader_modules.allocate(module, desc.debug_name.clone())))
    }

    /// Destroy a shader module, `false` if the handle is stale
    ///
    /// Pipelines created from the module stay valid.
    pub fn destroy_shader_module(&mut self, backend: &B, handle: ShaderModuleHandle) -> bool {
        match self.shader_modules.free(handle.0) {
            Some((module, _)) => {
                backend.destroy_shader_module(module);
                true
            }
            None => false,
        }
    }

    /// Create a render target view on a live texture
    ///
    /// Returns an invalid handle if the texture is stale, cannot be rendered to,
    /// or lacks the requested mip level or layer.
    pub fn create_render_target_view(
        &mut self,
        backend: &B,
        diagnostics: &Diagnostics,
        desc: &RenderTargetViewDesc,
    ) -> GraphicsResult<RenderTargetViewHandle> {
        const SITE: &str = "resources.create_render_target_view";

        let Some((texture, info)) = self.textures.get_all(desc.texture.0) else {
            diagnostics.verify(false, SITE, format_args!("stale texture {:?}", desc.texture));
            return Ok(RenderTargetViewHandle::INVALID);
        };
        let texture_desc = &info.desc;

        let attachment_usage = if desc.planes.contains(TexturePlane::COLOR) {
            TextureUsage::COLOR_ATTACHMENT
        } else {
            TextureUsage::DEPTH_STENCIL_ATTACHMENT
        };
        if !diagnostics.verify(
            texture_desc.usage.contains(attachment_usage),
            SITE,
            format_args!(
                "texture '{}' lacks {:?} usage",
                texture_desc.debug_name,
                attachment_usage
            ),
        ) {
            return Ok(RenderTargetViewHandle::INVALID);
        }
        if !diagnostics.verify(
            desc.mip_level < texture_desc.mip_count && desc.array_layer < texture_desc.array_size,
            SITE,
            format_args!(
                "mip {} layer {} outside texture '{}'",
                desc.mip_level, desc.array_layer, texture_desc.debug_name
            ),
        ) {
            return Ok(RenderTargetViewHandle::INVALID);
        }

        let extent = [
            (texture_desc.dimensions[0] >> desc.mip_level).max(1),
            (texture_desc.dimensions[1] >> desc.mip_level).max(1),
        ];
        let view = backend.create_render_target_view(texture, desc)?;
        let info = RenderTargetViewInfo { desc: *desc, extent };
        Ok(RenderTargetViewHandle(self.render_target_views.allocate(view, info)))
    }

    /// Destroy a render target view, `false` if the handle is stale
    pub fn destroy_render_target_view(
        &mut self,
        backend: &B,
        handle: RenderTargetViewHandle,
    ) -> bool {
        match self.render_target_views.free(handle.0) {
            Some((view, _)) => {
                backend.destroy_render_target_view(view);
                true
            }
            None => false,
        }
    }

    /// Cold data of a live render target view
    pub fn render_target_view_info(
        &self,
        handle: RenderTargetViewHandle,
    ) -> Option<&RenderTargetViewInfo> {
        self.render_target_views.get_cold(handle.0)
    }

    fn resolve_attachment(
        &self,
        diagnostics: &Diagnostics,
        extent: &mut Option<[u32; 2]>,
        attachment: &RenderPassAttachment,
    ) -> Option<NativeAttachment<'_, B>> {
        const SITE: &str = "resources.create_render_pass";

        let Some((view, info)) = self.render_target_views.get_all(attachment.view.0) else {
            diagnostics.verify(
                false,
                SITE,
                format_args!("stale render target view {:?}", attachment.view),
            );
            return None;
        };
        let expected = *extent.get_or_insert(info.extent);
        if !diagnostics.verify(
            expected == info.extent,
            SITE,
            format_args!("attachment extent {:?} differs from {:?}", info.extent, expected),
        ) {
            return None;
        }
        Some(NativeAttachment {
            view,
            format: info.desc.format,
            load: attachment.load,
            store: attachment.store,
        })
    }

    /// Create a render pass over live render target views
    ///
    /// Returns an invalid handle if a view is stale, the pass has no attachment, or
    /// the attachments differ in extent.
    pub fn create_render_pass(
        &mut self,
        backend: &B,
        diagnostics: &Diagnostics,
        desc: &RenderPassDesc,
    ) -> GraphicsResult<RenderPassHandle> {
        const SITE: &str = "resources.create_render_pass";

        if !diagnostics.verify(
            !desc.color_attachments.is_empty() || desc.depth_stencil.is_some(),
            SITE,
            "render pass without attachments",
        ) {
            return Ok(RenderPassHandle::INVALID);
        }

        let mut extent = None;
        let mut color = Vec::with_capacity(desc.color_attachments.len());
        for attachment in &desc.color_attachments {
            let Some(native) = self.resolve_attachment(diagnostics, &mut extent, attachment) else {
                return Ok(RenderPassHandle::INVALID);
            };
            color.push(native);
        }
        let depth_stencil = match &desc.depth_stencil {
            Some(attachment) => match self.resolve_attachment(
                diagnostics,
                &mut extent,
                attachment,
            ) {
                Some(native) => Some(native),
                None => return Ok(RenderPassHandle::INVALID),
            },
            None => None,
        };

        let native = backend.create_render_pass(&NativeRenderPassDesc {
            color,
            depth_stencil,
            extent: extent.unwrap_or([1, 1]),
        })?;
        Ok(RenderPassHandle(self.render_passes.allocate(native, desc.clone())))
    }

    /// Destroy a render pass, `false` if the handle is stale
    pub fn destroy_render_pass(&mut self, backend: &B, handle: RenderPassHandle) -> bool {
        match self.render_passes.free(handle.0) {
            Some((pass, _)) => {
                backend.destroy_render_pass(pass);
                true
            }
            None => false,
        }
    }

    /// Native render pass of a live handle
    pub fn render_pass(&self, handle: RenderPassHandle) -> Option<&B::RenderPass> {
        self.render_passes.get(handle.0)
    }

    fn shader_stage<'a>(
        &'a self,
        diagnostics: &Diagnostics,
        site: &'static str,
        stage: &'a ShaderStageDesc,
    ) -> Option<NativeShaderStage<'a, B>> {
        let Some(module) = self.shader_modules.get(stage.module.0) else {
            diagnostics.verify(false, site, format_args!("stale shader module {:?}", stage.module));
            return None;
        };
        Some(NativeShaderStage {
            module,
            entry_point: &stage.entry_point,
        })
    }

    fn live_pipeline_layout(
        &self,
        diagnostics: &Diagnostics,
        site: &'static str,
        handle: PipelineLayoutHandle,
    ) -> Option<&B::PipelineLayout> {
        let layout = self.pipeline_layouts.get(handle.0);
        diagnostics.verify(
            layout.is_some(),
            site,
            format_args!("stale pipeline layout {:?}", handle),
        );
        layout
    }

    /// Create a graphics pipeline
    ///
    /// Returns an invalid handle if a shader module, the layout or the render pass
    /// is stale.
    pub fn create_graphics_pipeline(
        &mut self,
        backend: &B,
        diagnostics: &Diagnostics,
        desc: &GraphicsPipelineDesc,
    ) -> GraphicsResult<GraphicsPipelineHandle> {
        const SITE: &str = "resources.create_graphics_pipeline";

        let native = {
            let Some(vertex) = self.shader_stage(diagnostics, SITE, &desc.vertex) else {
                return Ok(GraphicsPipelineHandle::INVALID);
            };
            let fragment = match &desc.fragment {
                Some(stage) => match self.shader_stage(diagnostics, SITE, stage) {
                    Some(native) => Some(native),
                    None => return Ok(GraphicsPipelineHandle::INVALID),
                },
                None => None,
            };
            let Some(layout) = self.live_pipeline_layout(diagnostics, SITE, desc.layout) else {
                return Ok(GraphicsPipelineHandle::INVALID);
            };
            let Some(render_pass) = self.render_passes.get(desc.render_pass.0) else {
                diagnostics.verify(
                    false,
                    SITE,
                    format_args!("stale render pass {:?}", desc.render_pass),
                );
                return Ok(GraphicsPipelineHandle::INVALID);
            };

            backend.create_graphics_pipeline(&NativeGraphicsPipelineDesc {
                vertex,
                fragment,
                layout,
                render_pass,
            })?
        };
        log::debug!("Created graphics pipeline '{}'", desc.debug_name);
        Ok(GraphicsPipelineHandle(self.graphics_pipelines.allocate(native, desc.clone())))
    }

    /// Destroy a graphics pipeline, `false` if the handle is stale
    pub fn destroy_graphics_pipeline(
        &mut self,
        backend: &B,
        handle: GraphicsPipelineHandle,
    ) -> bool {
        match self.graphics_pipelines.free(handle.0) {
            Some((pipeline, _)) => {
                backend.destroy_graphics_pipeline(pipeline);
                true
            }
            None => false,
        }
    }

    /// Native graphics pipeline of a live handle
    pub fn graphics_pipeline(
        &self,
        handle: GraphicsPipelineHandle,
    ) -> Option<&B::GraphicsPipeline> {
        self.graphics_pipelines.get(handle.0)
    }

    /// Create a compute pipeline
    ///
    /// Returns an invalid handle if the shader module or the layout is stale.
    pub fn create_compute_pipeline(
        &mut self,
        backend: &B,
        diagnostics: &Diagnostics,
        desc: &ComputePipelineDesc,
    ) -> GraphicsResult<ComputePipelineHandle> {
        const SITE: &str = "resources.create_compute_pipeline";

        let native = {
            let Some(shader) = self.shader_stage(diagnostics, SITE, &desc.shader) else {
                return Ok(ComputePipelineHandle::INVALID);
            };
            let Some(layout) = self.live_pipeline_layout(diagnostics, SITE, desc.layout) else {
                return Ok(ComputePipelineHandle::INVALID);
            };
            backend.create_compute_pipeline(&shader, layout)?
        };
        log::debug!("Created compute pipeline '{}'", desc.debug_name);
        Ok(ComputePipelineHandle(self.compute_pipelines.allocate(native, desc.clone())))
    }

    /// Destroy a compute pipeline, `false` if the handle is stale
    pub fn destroy_compute_pipeline(&mut self, backend: &B, handle: ComputePipelineHandle) -> bool {
        match self.compute_pipelines.free(handle.0) {
            Some((pipeline, _)) => {
                backend.destroy_compute_pipeline(pipeline);
                true
            }
            None => false,
        }
    }

    /// Native compute pipeline of a live handle
    pub fn compute_pipeline(&self, handle: ComputePipelineHandle) -> Option<&B::ComputePipeline> {
        self.compute_pipelines.get(handle.0)
    }

    /// Destroy every remaining resource, users before what they use
    pub fn destroy_all(&mut self, backend: &B) {
        let leaked = self.graphics_pipelines.len()
            + self.compute_pipelines.len()
            + self.shader_modules.len()
            + self.render_passes.len()
            + self.render_target_views.len()
            + self.texture_views.len()
            + self.textures.len()
            + self.buffers.len()
            + self.samplers.len()
            + self.pipeline_layouts.len();
        if leaked > 0 {
            log::warn!("Destroying {} resources still alive at shutdown", leaked);
        }

        for (_, pipeline, _) in self.graphics_pipelines.drain() {
            backend.destroy_graphics_pipeline(pipeline);
        }
        for (_, pipeline, _) in self.compute_pipelines.drain() {
            backend.destroy_compute_pipeline(pipeline);
        }
        for (_, module, _) in self.shader_modules.drain() {
            backend.destroy_shader_module(module);
        }
        for (_, pass, _) in self.render_passes.drain() {
            backend.destroy_render_pass(pass);
        }
        for (_, view, _) in self.render_target_views.drain() {
            backend.destroy_render_target_view(view);
        }
        for (_, layout, _) in self.pipeline_layouts.drain() {
            backend.destroy_pipeline_layout(layout);
        }
        for (_, view, _) in self.texture_views.drain() {
            backend.destroy_texture_view(view);
        }
        for (_, texture, info) in self.textures.drain() {
            backend.destroy_texture(texture, info.owns_memory);
        }
        self.buffer_views.drain();
        for (_, buffer, _) in self.buffers.drain() {
            backend.destroy_buffer(buffer);
        }
        for (_, sampler, _) in self.samplers.drain() {
            backend.destroy_sampler(sampler);
        }
    }
}

impl<B: GraphicsBackend> Default for Resources<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GraphicsBackend> std::fmt::Debug for Resources<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("buffers", &self.buffers.len())
            .field("buffer_views", &self.buffer_views.len())
            .field("textures", &self.textures.len())
            .field("texture_views", &self.texture_views.len())
            .field("samplers", &self.samplers.len())
            .field("pipeline_layouts", &self.pipeline_layouts.len())
            .field("shader_modules", &self.shader_modules.len())
            .field("render_target_views", &self.render_target_views.len())
            .field("render_passes", &self.render_passes.len())
            .field("graphics_pipelines", &self.graphics_pipelines.len())
            .field("compute_pipelines", &self.compute_pipelines.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::headless::HeadlessBackend;
    use crate::foundation::Handle;

    fn staging_desc(size: u64) -> BufferDesc {
        BufferDesc {
            size,
            usage: BufferUsage::TRANSFER_SRC,
            memory: MemoryUsage::StageEveryFrame,
            debug_name: "staging".to_string(),
        }
    }

    #[test]
    fn test_buffer_handles_reuse_index_with_new_generation() {
        let backend = HeadlessBackend::new(Default::default());
        let mut resources: Resources<HeadlessBackend> = Resources::new();

        let first = resources
            .create_buffer(&backend, &staging_desc(64))
            .expect("Should create buffer");
        assert_eq!(first.0, Handle::new(0, 0));

        assert!(resources.destroy_buffer(&backend, first));
        assert!(resources.buffer(first).is_none());
        assert!(!resources.destroy_buffer(&backend, first));

        let second = resources
            .create_buffer(&backend, &staging_desc(64))
            .expect("Should create buffer");
        assert_eq!(second.0, Handle::new(0, 1));
        assert!(resources.buffer(first).is_none());
        assert!(resources.buffer(second).is_some());
    }

    #[test]
    fn test_write_then_read_host_visible_buffer() {
        let backend = HeadlessBackend::new(Default::default());
        let diagnostics = Diagnostics::new();
        let mut resources: Resources<HeadlessBackend> = Resources::new();
        let buffer = resources
            .create_buffer(&backend, &staging_desc(16))
            .expect("Should create buffer");

        let written = resources
            .write_buffer(&backend, &diagnostics, buffer, 4, &[1, 2, 3, 4])
            .expect("Should write");
        assert!(written);

        let mut out = [0u8; 8];
        resources
            .read_buffer(&backend, &diagnostics, buffer, 0, &mut out)
            .expect("Should read");
        assert_eq!(out, [0, 0, 0, 0, 1, 2, 3, 4]);

        let overflow = resources
            .write_buffer(&backend, &diagnostics, buffer, 14, &[0; 4])
            .expect("Should not fail natively");
        assert!(!overflow);
        assert_eq!(diagnostics.failures_at("resources.write_buffer"), 1);
    }

    #[test]
    fn test_device_local_buffers_are_not_mappable() {
        let backend = HeadlessBackend::new(Default::default());
        let diagnostics = Diagnostics::new();
        let mut resources: Resources<HeadlessBackend> = Resources::new();
        let buffer = resources
            .create_buffer(
                &backend,
                &BufferDesc {
                    memory: MemoryUsage::GpuOnly,
                    ..staging_desc(16)
                },
            )
            .expect("Should create buffer");

        let written = resources
            .write_buffer(&backend, &diagnostics, buffer, 0, &[1])
            .expect("Should not fail natively");
        assert!(!written);
    }

    #[test]
    fn test_buffer_view_range_is_checked() {
        let backend = HeadlessBackend::new(Default::default());
        let diagnostics = Diagnostics::new();
        let mut resources: Resources<HeadlessBackend> = Resources::new();
        let buffer = resources
            .create_buffer(&backend, &staging_desc(256))
            .expect("Should create buffer");

        let view = resources.create_buffer_view(
            &diagnostics,
            &BufferViewDesc {
                buffer,
                offset: 128,
                size: 128,
            },
        );
        assert!(view.is_valid());
        assert_eq!(resources.buffer_view(view).map(|span| span.offset), Some(128));

        let too_big = resources.create_buffer_view(
            &diagnostics,
            &BufferViewDesc {
                buffer,
                offset: 200,
                size: 128,
            },
        );
        assert!(!too_big.is_valid());
    }

    #[test]
    fn test_swap_chain_texture_does_not_free_memory() {
        let backend = HeadlessBackend::new(Default::default());
        let mut resources: Resources<HeadlessBackend> = Resources::new();
        let desc = TextureDesc {
            dimensions: [64, 64, 1],
            format: TextureFormat::Bgra8Srgb,
            array_size: 1,
            mip_count: 1,
            usage: TextureUsage::COLOR_ATTACHMENT,
            memory: MemoryUsage::GpuOnly,
            debug_name: "back buffer".to_string(),
        };

        let native = backend.create_texture(&desc).expect("Should create texture");
        let handle = resources.register_swap_chain_texture(native, desc);
        assert_eq!(resources.texture_info(handle).map(|info| info.owns_memory), Some(false));

        assert!(resources.destroy_texture(&backend, handle));
        assert_eq!(backend.freed_texture_memory_count(), 0);
    }

    fn render_target(
        dimensions: [u32; 3],
        format: TextureFormat,
        usage: TextureUsage,
    ) -> TextureDesc {
        TextureDesc {
            dimensions,
            format,
            array_size: 1,
            mip_count: 2,
            usage,
            memory: MemoryUsage::GpuOnly,
            debug_name: "target".to_string(),
        }
    }

    fn color_view(texture: TextureHandle, mip_level: u8) -> RenderTargetViewDesc {
        RenderTargetViewDesc {
            texture,
            format: TextureFormat::Rgba8Unorm,
            planes: TexturePlane::COLOR,
            mip_level,
            array_layer: 0,
        }
    }

    fn spirv(debug_name: &str) -> ShaderModuleDesc {
        ShaderModuleDesc {
            code: vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0],
            debug_name: debug_name.to_string(),
        }
    }

    fn attachment(view: RenderTargetViewHandle) -> RenderPassAttachment {
        RenderPassAttachment {
            view,
            load: LoadOp::Clear,
            store: StoreOp::Store,
        }
    }

    #[test]
    fn test_render_target_views_check_usage_and_mip_extent() {
        let backend = HeadlessBackend::new(Default::default());
        let diagnostics = Diagnostics::new();
        let mut resources: Resources<HeadlessBackend> = Resources::new();
        let sampled = resources
            .create_texture(
                &backend,
                &render_target([64, 32, 1], TextureFormat::Rgba8Unorm, TextureUsage::SAMPLED),
            )
            .expect("Should create texture");
        let target = resources
            .create_texture(
                &backend,
                &render_target(
                    [64, 32, 1],
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::COLOR_ATTACHMENT,
                ),
            )
            .expect("Should create texture");

        let rejected = resources
            .create_render_target_view(&backend, &diagnostics, &color_view(sampled, 0))
            .expect("Should not fail natively");
        assert!(!rejected.is_valid());

        let out_of_range = resources
            .create_render_target_view(&backend, &diagnostics, &color_view(target, 2))
            .expect("Should not fail natively");
        assert!(!out_of_range.is_valid());
        assert_eq!(diagnostics.failures_at("resources.create_render_target_view"), 2);

        let mip = resources
            .create_render_target_view(&backend, &diagnostics, &color_view(target, 1))
            .expect("Should create view");
        assert_eq!(resources.render_target_view_info(mip).map(|info| info.extent), Some([32, 16]));
    }

    #[test]
    fn test_render_pass_rejects_stale_or_mismatched_attachments() {
        let backend = HeadlessBackend::new(Default::default());
        let diagnostics = Diagnostics::new();
        let mut resources: Resources<HeadlessBackend> = Resources::new();
        let texture = resources
            .create_texture(
                &backend,
                &render_target(
                    [64, 64, 1],
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::COLOR_ATTACHMENT,
                ),
            )
            .expect("Should create texture");
        let full = resources
            .create_render_target_view(&backend, &diagnostics, &color_view(texture, 0))
            .expect("Should create view");
        let half = resources
            .create_render_target_view(&backend, &diagnostics, &color_view(texture, 1))
            .expect("Should create view");

        let mismatched = resources
            .create_render_pass(
                &backend,
                &diagnostics,
                &RenderPassDesc {
                    color_attachments: vec![attachment(full), attachment(half)],
                    depth_stencil: None,
                },
            )
            .expect("Should not fail natively");
        assert!(!mismatched.is_valid());

        let pass = resources
            .create_render_pass(
                &backend,
                &diagnostics,
                &RenderPassDesc {
                    color_attachments: vec![attachment(half)],
                    depth_stencil: None,
                },
            )
            .expect("Should create render pass");
        assert_eq!(resources.render_pass(pass).map(|native| native.extent), Some([32, 32]));

        assert!(resources.destroy_render_target_view(&backend, half));
        let stale = resources
            .create_render_pass(
                &backend,
                &diagnostics,
                &RenderPassDesc {
                    color_attachments: vec![attachment(half)],
                    depth_stencil: None,
                },
            )
            .expect("Should not fail natively");
        assert!(!stale.is_valid());
        assert_eq!(diagnostics.failures_at("resources.create_render_pass"), 2);
    }

    #[test]
    fn test_pipelines_outlive_their_shader_module_but_not_its_handle() {
        let backend = HeadlessBackend::new(Default::default());
        let diagnostics = Diagnostics::new();
        let mut resources: Resources<HeadlessBackend> = Resources::new();

        let not_spirv = resources
            .create_shader_module(
                &backend,
                &diagnostics,
                &ShaderModuleDesc {
                    code: vec![0xDEAD_BEEF],
                    debug_name: "garbage".to_string(),
                },
            )
            .expect("Should not fail natively");
        assert!(!not_spirv.is_valid());

        let module = resources
            .create_shader_module(&backend, &diagnostics, &spirv("cull"))
            .expect("Should create shader module");
        let native_layout = backend
            .create_pipeline_layout(&[], &[])
            .expect("Should create pipeline layout");
        let layout = resources.insert_pipeline_layout(native_layout, PipelineLayoutDesc::default());
        let desc = ComputePipelineDesc {
            shader: ShaderStageDesc::main(module),
            layout,
            debug_name: "cull".to_string(),
        };

        let pipeline = resources
            .create_compute_pipeline(&backend, &diagnostics, &desc)
            .expect("Should create pipeline");
        assert!(resources.compute_pipeline(pipeline).is_some());

        assert!(resources.destroy_shader_module(&backend, module));
        assert!(resources.compute_pipeline(pipeline).is_some());
        let rebuilt = resources
            .create_compute_pipeline(&backend, &diagnostics, &desc)
            .expect("Should not fail natively");
        assert!(!rebuilt.is_valid());
        assert_eq!(diagnostics.failures_at("resources.create_compute_pipeline"), 1);

        assert!(resources.destroy_compute_pipeline(&backend, pipeline));
        assert!(!resources.destroy_compute_pipeline(&backend, pipeline));
        assert!(resources.compute_pipeline(pipeline).is_none());
    }

    #[test]
    fn test_graphics_pipeline_needs_a_live_render_pass() {
        let backend = HeadlessBackend::new(Default::default());
        let diagnostics = Diagnostics::new();
        let mut resources: Resources<HeadlessBackend> = Resources::new();
        let color = resources
            .create_texture(
                &backend,
                &render_target(
                    [16, 16, 1],
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::COLOR_ATTACHMENT,
                ),
            )
            .expect("Should create texture");
        let depth = resources
            .create_texture(
                &backend,
                &render_target(
                    [16, 16, 1],
                    TextureFormat::D32Float,
                    TextureUsage::DEPTH_STENCIL_ATTACHMENT,
                ),
            )
            .expect("Should create texture");
        let color_target = resources
            .create_render_target_view(&backend, &diagnostics, &color_view(color, 0))
            .expect("Should create view");
        let depth_target = resources
            .create_render_target_view(
                &backend,
                &diagnostics,
                &RenderTargetViewDesc {
                    texture: depth,
                    format: TextureFormat::D32Float,
                    planes: TexturePlane::DEPTH,
                    mip_level: 0,
                    array_layer: 0,
                },
            )
            .expect("Should create view");
        let pass = resources
            .create_render_pass(
                &backend,
                &diagnostics,
                &RenderPassDesc {
                    color_attachments: vec![attachment(color_target)],
                    depth_stencil: Some(attachment(depth_target)),
                },
            )
            .expect("Should create render pass");
        let vertex = resources
            .create_shader_module(&backend, &diagnostics, &spirv("vertex"))
            .expect("Should create shader module");
        let fragment = resources
            .create_shader_module(&backend, &diagnostics, &spirv("fragment"))
            .expect("Should create shader module");
        let native_layout = backend
            .create_pipeline_layout(&[], &[])
            .expect("Should create pipeline layout");
        let layout = resources.insert_pipeline_layout(native_layout, PipelineLayoutDesc::default());

        let desc = GraphicsPipelineDesc {
            vertex: ShaderStageDesc::main(vertex),
            fragment: Some(ShaderStageDesc::main(fragment)),
            layout,
            render_pass: pass,
            debug_name: "opaque".to_string(),
        };
        let pipeline = resources
            .create_graphics_pipeline(&backend, &diagnostics, &desc)
            .expect("Should create pipeline");
        let native = resources.graphics_pipeline(pipeline).expect("Should be live");
        assert_eq!(native.render_pass, resources.render_pass(pass).map(|native| native.id));
        assert_eq!(
            resources.render_pass(pass).map(|native| native.attachments.len()),
            Some(2)
        );

        assert!(resources.destroy_graphics_pipeline(&backend, pipeline));
        assert!(resources.destroy_render_pass(&backend, pass));
        let orphan = resources
            .create_graphics_pipeline(&backend, &diagnostics, &desc)
            .expect("Should not fail natively");
        assert!(!orphan.is_valid());
        assert_eq!(diagnostics.failures_at("resources.create_graphics_pipeline"), 1);

        resources.destroy_all(&backend);
        assert_eq!(backend.live_pipeline_objects(), 0);
    }
}
