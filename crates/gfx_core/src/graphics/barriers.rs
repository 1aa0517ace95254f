//! Backend-agnostic memory barrier description
//!
//! A barrier names the pipeline stages and memory accesses on both sides of a
//! dependency, plus a layout transition for textures. Backends translate these into
//! pipeline barriers (Vulkan), resource state transitions (DX12) or resource usage
//! declarations (Metal).

use bitflags::bitflags;

use crate::graphics::handles::{BufferHandle, TextureHandle};

bitflags! {
    /// Pipeline stages a barrier synchronizes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BarrierSyncStageFlags: u32 {
        /// No stage; direction dependent once translated
        const NONE = 1 << 0;
        /// Every stage
        const ALL = 1 << 1;
        /// Indirect argument fetch
        const EXECUTE_INDIRECT = 1 << 2;
        /// Index fetch
        const INDEX_INPUT_ASSEMBLY = 1 << 3;
        /// Vertex fetch
        const VERTEX_INPUT_ASSEMBLY = 1 << 4;
        /// Vertex, tessellation and geometry shaders
        const VERTEX_SHADING = 1 << 5;
        /// Fragment shaders
        const FRAGMENT_SHADING = 1 << 6;
        /// Color attachment output
        const COLOR_BLENDING = 1 << 7;
        /// Early and late fragment tests
        const DEPTH_STENCIL_TESTING = 1 << 8;
        /// Copies
        const TRANSFER = 1 << 9;
        /// Multisample resolve
        const MULTI_SAMPLE_RESOLVE = 1 << 10;
        /// Compute shaders
        const COMPUTE_SHADING = 1 << 11;
        /// Every shader stage
        const ALL_SHADING = 1 << 12;
        /// Ray tracing shaders
        const RAYTRACING = 1 << 13;
        /// Acceleration structure builds
        const ACCELERATION_STRUCTURE_BUILD = 1 << 14;
        /// Acceleration structure copies
        const ACCELERATION_STRUCTURE_COPY = 1 << 15;
    }
}

bitflags! {
    /// Memory accesses a barrier makes visible or available
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BarrierAccessFlags: u32 {
        /// Vertex buffer reads
        const VERTEX_BUFFER = 1 << 0;
        /// Index buffer reads
        const INDEX_BUFFER = 1 << 1;
        /// Constant buffer reads
        const CONSTANT_BUFFER = 1 << 2;
        /// Indirect argument reads
        const INDIRECT_BUFFER = 1 << 3;
        /// Color attachment writes
        const COLOR_ATTACHMENT = 1 << 4;
        /// Depth/stencil attachment reads
        const DEPTH_STENCIL_READ = 1 << 5;
        /// Depth/stencil attachment writes
        const DEPTH_STENCIL_WRITE = 1 << 6;
        /// Shader reads
        const SHADER_RESOURCE = 1 << 7;
        /// Shader writes
        const UNORDERED_ACCESS = 1 << 8;
        /// Resolve source reads
        const RESOLVE_SRC = 1 << 9;
        /// Resolve destination writes
        const RESOLVE_DST = 1 << 10;
        /// Copy source reads
        const TRANSFER_SRC = 1 << 11;
        /// Copy destination writes
        const TRANSFER_DST = 1 << 12;
        /// Acceleration structure reads
        const ACCELERATION_STRUCTURE_READ = 1 << 13;
        /// Acceleration structure writes
        const ACCELERATION_STRUCTURE_WRITE = 1 << 14;
        /// Shading rate image reads
        const SHADING_RATE = 1 << 15;
        /// Any read
        const ALL_READ = 1 << 16;
        /// Any write
        const ALL_WRITE = 1 << 17;
        /// Any access
        const ALL = Self::ALL_READ.bits() | Self::ALL_WRITE.bits();
        /// No access
        const NONE = 1 << 18;
    }
}

impl BarrierAccessFlags {
    /// Accesses that only read memory
    pub const READ_MASK: Self = Self::VERTEX_BUFFER
        .union(Self::INDEX_BUFFER)
        .union(Self::CONSTANT_BUFFER)
        .union(Self::INDIRECT_BUFFER)
        .union(Self::DEPTH_STENCIL_READ)
        .union(Self::SHADER_RESOURCE)
        .union(Self::RESOLVE_SRC)
        .union(Self::TRANSFER_SRC)
        .union(Self::ACCELERATION_STRUCTURE_READ)
        .union(Self::SHADING_RATE)
        .union(Self::ALL_READ);

    /// Accesses that write memory
    pub const WRITE_MASK: Self = Self::COLOR_ATTACHMENT
        .union(Self::DEPTH_STENCIL_WRITE)
        .union(Self::UNORDERED_ACCESS)
        .union(Self::RESOLVE_DST)
        .union(Self::TRANSFER_DST)
        .union(Self::ACCELERATION_STRUCTURE_WRITE)
        .union(Self::ALL_WRITE);
}

/// Layout a texture is in, or transitions to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureLayout {
    /// Contents undefined, may be discarded
    #[default]
    Unknown,
    /// Usable by any access, possibly slower
    Common,
    /// Presentable swap chain image
    Present,
    /// Read by any stage
    GenericRead,
    /// Color render target
    ColorAttachment,
    /// Writable depth/stencil target
    DepthStencilAttachment,
    /// Read-only depth/stencil target
    DepthStencilReadOnly,
    /// Shader read/write storage
    UnorderedAccess,
    /// Shader sampled read
    ShaderResource,
    /// Copy source
    TransferSrc,
    /// Copy destination
    TransferDst,
    /// Resolve source
    ResolveSrc,
    /// Resolve destination
    ResolveDst,
    /// Shading rate image
    ShadingRate,
}

bitflags! {
    /// Texture planes a barrier applies to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TexturePlane: u8 {
        /// Color plane
        const COLOR = 1 << 0;
        /// Depth plane
        const DEPTH = 1 << 1;
        /// Stencil plane
        const STENCIL = 1 << 2;
    }
}

/// Array layer count meaning "every remaining layer"
pub const REMAINING_ARRAY_LAYERS: u16 = 0xFFFF;
/// Mip count meaning "every remaining mip level"
pub const REMAINING_MIP_LEVELS: u8 = 0xFF;

/// Execution and memory dependency over all resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalMemoryBarrier {
    /// Stages that must complete
    pub stages_src: BarrierSyncStageFlags,
    /// Stages that wait
    pub stages_dst: BarrierSyncStageFlags,
    /// Accesses made available
    pub access_src: BarrierAccessFlags,
    /// Accesses made visible
    pub access_dst: BarrierAccessFlags,
}

/// Dependency over a range of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMemoryBarrier {
    /// Stages that must complete
    pub stages_src: BarrierSyncStageFlags,
    /// Stages that wait
    pub stages_dst: BarrierSyncStageFlags,
    /// Accesses made available
    pub access_src: BarrierAccessFlags,
    /// Accesses made visible
    pub access_dst: BarrierAccessFlags,
    /// First byte covered
    pub offset: u64,
    /// Bytes covered, `u64::MAX` for the whole buffer
    pub size: u64,
    /// Target buffer
    pub buffer: BufferHandle,
}

impl BufferMemoryBarrier {
    /// Barrier over the whole of `buffer`
    pub const fn whole(
        buffer: BufferHandle,
        stages_src: BarrierSyncStageFlags,
        stages_dst: BarrierSyncStageFlags,
        access_src: BarrierAccessFlags,
        access_dst: BarrierAccessFlags,
    ) -> Self {
        Self {
            stages_src,
            stages_dst,
            access_src,
            access_dst,
            offset: 0,
            size: u64::MAX,
            buffer,
        }
    }
}

/// Dependency and layout transition over a texture subresource range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureMemoryBarrier {
    /// Stages that must complete
    pub stages_src: BarrierSyncStageFlags,
    /// Stages that wait
    pub stages_dst: BarrierSyncStageFlags,
    /// Accesses made available
    pub access_src: BarrierAccessFlags,
    /// Accesses made visible
    pub access_dst: BarrierAccessFlags,
    /// Target texture
    pub texture: TextureHandle,
    /// First array layer
    pub array_start: u16,
    /// Array layers, [`REMAINING_ARRAY_LAYERS`] for all remaining
    pub array_count: u16,
    /// Layout before the barrier
    pub layout_src: TextureLayout,
    /// Layout after the barrier
    pub layout_dst: TextureLayout,
    /// First mip level
    pub mip_start: u8,
    /// Mip levels, [`REMAINING_MIP_LEVELS`] for all remaining
    pub mip_count: u8,
    /// Planes covered
    pub planes: TexturePlane,
}

impl TextureMemoryBarrier {
    /// Layout transition of the first mip and layer of a color texture
    pub const fn transition(
        texture: TextureHandle,
        stages_src: BarrierSyncStageFlags,
        stages_dst: BarrierSyncStageFlags,
        access_src: BarrierAccessFlags,
        access_dst: BarrierAccessFlags,
        layout_src: TextureLayout,
        layout_dst: TextureLayout,
    ) -> Self {
        Self {
            stages_src,
            stages_dst,
            access_src,
            access_dst,
            texture,
            array_start: 0,
            array_count: 1,
            layout_src,
            layout_dst,
            mip_start: 0,
            mip_count: 1,
            planes: TexturePlane::COLOR,
        }
    }

    /// Whether the barrier covers every layer from `array_start`
    pub const fn covers_remaining_layers(&self) -> bool {
        self.array_count == REMAINING_ARRAY_LAYERS
    }

    /// Whether the barrier covers every mip from `mip_start`
    pub const fn covers_remaining_mips(&self) -> bool {
        self.mip_count == REMAINING_MIP_LEVELS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_stencil_access_bits_are_distinct() {
        assert_ne!(
            BarrierAccessFlags::DEPTH_STENCIL_READ,
            BarrierAccessFlags::DEPTH_STENCIL_WRITE
        );
        assert!(BarrierAccessFlags::READ_MASK.contains(BarrierAccessFlags::DEPTH_STENCIL_READ));
        assert!(!BarrierAccessFlags::READ_MASK.contains(BarrierAccessFlags::DEPTH_STENCIL_WRITE));
        assert!(BarrierAccessFlags::WRITE_MASK.contains(BarrierAccessFlags::DEPTH_STENCIL_WRITE));
    }

    #[test]
    fn test_read_and_write_masks_do_not_overlap() {
        assert!(BarrierAccessFlags::READ_MASK
            .intersection(BarrierAccessFlags::WRITE_MASK)
            .is_empty());
        assert_eq!(
            BarrierAccessFlags::ALL,
            BarrierAccessFlags::ALL_READ | BarrierAccessFlags::ALL_WRITE
        );
    }

    #[test]
    fn test_constructors_use_documented_defaults() {
        let buffer = BufferMemoryBarrier::whole(
            BufferHandle::INVALID,
            BarrierSyncStageFlags::TRANSFER,
            BarrierSyncStageFlags::VERTEX_SHADING,
            BarrierAccessFlags::TRANSFER_DST,
            BarrierAccessFlags::CONSTANT_BUFFER,
        );
        assert_eq!(buffer.size, u64::MAX);

        let texture = TextureMemoryBarrier::transition(
            TextureHandle::INVALID,
            BarrierSyncStageFlags::NONE,
            BarrierSyncStageFlags::COLOR_BLENDING,
            BarrierAccessFlags::NONE,
            BarrierAccessFlags::COLOR_ATTACHMENT,
            TextureLayout::Unknown,
            TextureLayout::ColorAttachment,
        );
        assert_eq!(texture.array_count, 1);
        assert!(!texture.covers_remaining_mips());
        assert_eq!(texture.planes, TexturePlane::COLOR);
    }
}
