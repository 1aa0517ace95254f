//! Enhanced barrier and legacy resource state translation
//!
//! The flag types below carry the numeric values of their `D3D12_*` counterparts so
//! a native layer can pass `bits()` straight through.

use bitflags::bitflags;

use crate::graphics::barriers::{BarrierAccessFlags, BarrierSyncStageFlags, TextureLayout};

bitflags! {
    /// `D3D12_BARRIER_SYNC`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BarrierSync: u32 {
        /// Every stage
        const ALL = 0x1;
        /// Draw commands
        const DRAW = 0x2;
        /// Input assembler
        const INDEX_INPUT = 0x4;
        /// Vertex, hull, domain and geometry shaders
        const VERTEX_SHADING = 0x8;
        /// Pixel shaders
        const PIXEL_SHADING = 0x10;
        /// Depth/stencil tests
        const DEPTH_STENCIL = 0x20;
        /// Render target output
        const RENDER_TARGET = 0x40;
        /// Compute shaders
        const COMPUTE_SHADING = 0x80;
        /// Ray tracing shaders
        const RAYTRACING = 0x100;
        /// Copies
        const COPY = 0x200;
        /// Resolves
        const RESOLVE = 0x400;
        /// Indirect argument reads
        const EXECUTE_INDIRECT = 0x800;
        /// Every shader stage
        const ALL_SHADING = 0x1000;
        /// Acceleration structure builds
        const BUILD_RAYTRACING_ACCELERATION_STRUCTURE = 0x80_0000;
        /// Acceleration structure copies
        const COPY_RAYTRACING_ACCELERATION_STRUCTURE = 0x100_0000;
    }
}

impl BarrierSync {
    /// `D3D12_BARRIER_SYNC_NONE`
    pub const NONE: Self = Self::empty();
}

bitflags! {
    /// `D3D12_BARRIER_ACCESS`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BarrierAccess: u32 {
        /// Vertex buffer reads
        const VERTEX_BUFFER = 0x1;
        /// Constant buffer reads
        const CONSTANT_BUFFER = 0x2;
        /// Index buffer reads
        const INDEX_BUFFER = 0x4;
        /// Render target writes
        const RENDER_TARGET = 0x8;
        /// Unordered access
        const UNORDERED_ACCESS = 0x10;
        /// Depth/stencil writes
        const DEPTH_STENCIL_WRITE = 0x20;
        /// Depth/stencil reads
        const DEPTH_STENCIL_READ = 0x40;
        /// Shader resource reads
        const SHADER_RESOURCE = 0x80;
        /// Indirect argument reads
        const INDIRECT_ARGUMENT = 0x200;
        /// Copy destination
        const COPY_DEST = 0x400;
        /// Copy source
        const COPY_SOURCE = 0x800;
        /// Resolve destination
        const RESOLVE_DEST = 0x1000;
        /// Resolve source
        const RESOLVE_SOURCE = 0x2000;
        /// Acceleration structure reads
        const RAYTRACING_ACCELERATION_STRUCTURE_READ = 0x4000;
        /// Acceleration structure writes
        const RAYTRACING_ACCELERATION_STRUCTURE_WRITE = 0x8000;
        /// Shading rate image reads
        const SHADING_RATE_SOURCE = 0x1_0000;
        /// No access at all
        const NO_ACCESS = 0x8000_0000;
    }
}

impl BarrierAccess {
    /// `D3D12_BARRIER_ACCESS_COMMON`
    pub const COMMON: Self = Self::empty();
}

/// `D3D12_BARRIER_LAYOUT`
///
/// Several layouts share a value (`COMMON` and `PRESENT`), hence a newtype rather
/// than an enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarrierLayout(pub u32);

impl BarrierLayout {
    /// Contents undefined
    pub const UNDEFINED: Self = Self(0xFFFF_FFFF);
    /// Common layout
    pub const COMMON: Self = Self(0);
    /// Presentable, alias of [`Self::COMMON`]
    pub const PRESENT: Self = Self(0);
    /// Any read
    pub const GENERIC_READ: Self = Self(1);
    /// Render target
    pub const RENDER_TARGET: Self = Self(2);
    /// Unordered access
    pub const UNORDERED_ACCESS: Self = Self(3);
    /// Writable depth/stencil
    pub const DEPTH_STENCIL_WRITE: Self = Self(4);
    /// Read-only depth/stencil
    pub const DEPTH_STENCIL_READ: Self = Self(5);
    /// Shader resource
    pub const SHADER_RESOURCE: Self = Self(6);
    /// Copy source
    pub const COPY_SOURCE: Self = Self(7);
    /// Copy destination
    pub const COPY_DEST: Self = Self(8);
    /// Resolve source
    pub const RESOLVE_SOURCE: Self = Self(9);
    /// Resolve destination
    pub const RESOLVE_DEST: Self = Self(10);
    /// Shading rate image
    pub const SHADING_RATE_SOURCE: Self = Self(11);
}

bitflags! {
    /// `D3D12_RESOURCE_STATES`, for queues without enhanced barriers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        /// Vertex or constant buffer
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        /// Index buffer
        const INDEX_BUFFER = 0x2;
        /// Render target
        const RENDER_TARGET = 0x4;
        /// Unordered access
        const UNORDERED_ACCESS = 0x8;
        /// Depth writes
        const DEPTH_WRITE = 0x10;
        /// Depth reads
        const DEPTH_READ = 0x20;
        /// Read by non-pixel shaders
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        /// Read by pixel shaders
        const PIXEL_SHADER_RESOURCE = 0x80;
        /// Indirect arguments
        const INDIRECT_ARGUMENT = 0x200;
        /// Copy destination
        const COPY_DEST = 0x400;
        /// Copy source
        const COPY_SOURCE = 0x800;
        /// Resolve destination
        const RESOLVE_DEST = 0x1000;
        /// Resolve source
        const RESOLVE_SOURCE = 0x2000;
        /// Acceleration structure
        const RAYTRACING_ACCELERATION_STRUCTURE = 0x40_0000;
        /// Shading rate image
        const SHADING_RATE_SOURCE = 0x100_0000;
    }
}

impl ResourceStates {
    /// `D3D12_RESOURCE_STATE_COMMON`
    pub const COMMON: Self = Self::empty();
    /// `D3D12_RESOURCE_STATE_PRESENT`, alias of [`Self::COMMON`]
    pub const PRESENT: Self = Self::empty();
    /// Read by any shader stage
    pub const ALL_SHADER_RESOURCE: Self =
        Self::NON_PIXEL_SHADER_RESOURCE.union(Self::PIXEL_SHADER_RESOURCE);
    /// Every read-only state
    pub const GENERIC_READ: Self = Self::VERTEX_AND_CONSTANT_BUFFER
        .union(Self::INDEX_BUFFER)
        .union(Self::NON_PIXEL_SHADER_RESOURCE)
        .union(Self::PIXEL_SHADER_RESOURCE)
        .union(Self::INDIRECT_ARGUMENT)
        .union(Self::COPY_SOURCE);
}

const SYNC_MAPPING: [(BarrierSyncStageFlags, BarrierSync); 15] = [
    (BarrierSyncStageFlags::ALL, BarrierSync::ALL),
    (BarrierSyncStageFlags::EXECUTE_INDIRECT, BarrierSync::EXECUTE_INDIRECT),
    (BarrierSyncStageFlags::INDEX_INPUT_ASSEMBLY, BarrierSync::INDEX_INPUT),
    (BarrierSyncStageFlags::VERTEX_INPUT_ASSEMBLY, BarrierSync::INDEX_INPUT),
    (BarrierSyncStageFlags::VERTEX_SHADING, BarrierSync::VERTEX_SHADING),
    (BarrierSyncStageFlags::FRAGMENT_SHADING, BarrierSync::PIXEL_SHADING),
    (BarrierSyncStageFlags::COLOR_BLENDING, BarrierSync::RENDER_TARGET),
    (BarrierSyncStageFlags::DEPTH_STENCIL_TESTING, BarrierSync::DEPTH_STENCIL),
    (BarrierSyncStageFlags::TRANSFER, BarrierSync::COPY),
    (BarrierSyncStageFlags::MULTI_SAMPLE_RESOLVE, BarrierSync::RESOLVE),
    (BarrierSyncStageFlags::COMPUTE_SHADING, BarrierSync::COMPUTE_SHADING),
    (BarrierSyncStageFlags::ALL_SHADING, BarrierSync::ALL_SHADING),
    (BarrierSyncStageFlags::RAYTRACING, BarrierSync::RAYTRACING),
    (
        BarrierSyncStageFlags::ACCELERATION_STRUCTURE_BUILD,
        BarrierSync::BUILD_RAYTRACING_ACCELERATION_STRUCTURE,
    ),
    (
        BarrierSyncStageFlags::ACCELERATION_STRUCTURE_COPY,
        BarrierSync::COPY_RAYTRACING_ACCELERATION_STRUCTURE,
    ),
];

const ACCESS_MAPPING: [(BarrierAccessFlags, BarrierAccess); 16] = [
    (BarrierAccessFlags::VERTEX_BUFFER, BarrierAccess::VERTEX_BUFFER),
    (BarrierAccessFlags::INDEX_BUFFER, BarrierAccess::INDEX_BUFFER),
    (BarrierAccessFlags::CONSTANT_BUFFER, BarrierAccess::CONSTANT_BUFFER),
    (BarrierAccessFlags::INDIRECT_BUFFER, BarrierAccess::INDIRECT_ARGUMENT),
    (BarrierAccessFlags::COLOR_ATTACHMENT, BarrierAccess::RENDER_TARGET),
    (BarrierAccessFlags::DEPTH_STENCIL_READ, BarrierAccess::DEPTH_STENCIL_READ),
    (BarrierAccessFlags::DEPTH_STENCIL_WRITE, BarrierAccess::DEPTH_STENCIL_WRITE),
    (BarrierAccessFlags::SHADER_RESOURCE, BarrierAccess::SHADER_RESOURCE),
    (BarrierAccessFlags::UNORDERED_ACCESS, BarrierAccess::UNORDERED_ACCESS),
    (BarrierAccessFlags::RESOLVE_SRC, BarrierAccess::RESOLVE_SOURCE),
    (BarrierAccessFlags::RESOLVE_DST, BarrierAccess::RESOLVE_DEST),
    (BarrierAccessFlags::TRANSFER_SRC, BarrierAccess::COPY_SOURCE),
    (BarrierAccessFlags::TRANSFER_DST, BarrierAccess::COPY_DEST),
    (
        BarrierAccessFlags::ACCELERATION_STRUCTURE_READ,
        BarrierAccess::RAYTRACING_ACCELERATION_STRUCTURE_READ,
    ),
    (
        BarrierAccessFlags::ACCELERATION_STRUCTURE_WRITE,
        BarrierAccess::RAYTRACING_ACCELERATION_STRUCTURE_WRITE,
    ),
    (BarrierAccessFlags::SHADING_RATE, BarrierAccess::SHADING_RATE_SOURCE),
];

/// Translate sync stages; `NONE` anywhere in `flags` wins
pub fn to_barrier_sync(flags: BarrierSyncStageFlags) -> BarrierSync {
    if flags.contains(BarrierSyncStageFlags::NONE) {
        return BarrierSync::NONE;
    }
    SYNC_MAPPING
        .iter()
        .filter(|(generic, _)| flags.contains(*generic))
        .fold(BarrierSync::NONE, |acc, (_, native)| acc | *native)
}

/// Translate accesses
///
/// `NONE` wins over everything. Otherwise `ALL_READ` or `ALL_WRITE` collapse the
/// result to `COMMON`.
pub fn to_barrier_access(flags: BarrierAccessFlags) -> BarrierAccess {
    if flags.contains(BarrierAccessFlags::NONE) {
        return BarrierAccess::NO_ACCESS;
    }
    if flags.intersects(BarrierAccessFlags::ALL) {
        return BarrierAccess::COMMON;
    }
    ACCESS_MAPPING
        .iter()
        .filter(|(generic, _)| flags.contains(*generic))
        .fold(BarrierAccess::COMMON, |acc, (_, native)| acc | *native)
}

/// Translate a texture layout
pub fn to_barrier_layout(layout: TextureLayout) -> BarrierLayout {
    match layout {
        TextureLayout::Unknown => BarrierLayout::UNDEFINED,
        TextureLayout::Common => BarrierLayout::COMMON,
        TextureLayout::Present => BarrierLayout::PRESENT,
        TextureLayout::GenericRead => BarrierLayout::GENERIC_READ,
        TextureLayout::ColorAttachment => BarrierLayout::RENDER_TARGET,
        TextureLayout::DepthStencilAttachment => BarrierLayout::DEPTH_STENCIL_WRITE,
        TextureLayout::DepthStencilReadOnly => BarrierLayout::DEPTH_STENCIL_READ,
        TextureLayout::UnorderedAccess => BarrierLayout::UNORDERED_ACCESS,
        TextureLayout::ShaderResource => BarrierLayout::SHADER_RESOURCE,
        TextureLayout::TransferSrc => BarrierLayout::COPY_SOURCE,
        TextureLayout::TransferDst => BarrierLayout::COPY_DEST,
        TextureLayout::ResolveSrc => BarrierLayout::RESOLVE_SOURCE,
        TextureLayout::ResolveDst => BarrierLayout::RESOLVE_DEST,
        TextureLayout::ShadingRate => BarrierLayout::SHADING_RATE_SOURCE,
    }
}

/// Legacy resource state a texture in `layout` is in
pub fn to_resource_state(layout: TextureLayout) -> ResourceStates {
    match layout {
        TextureLayout::Unknown | TextureLayout::Common => ResourceStates::COMMON,
        TextureLayout::Present => ResourceStates::PRESENT,
        TextureLayout::GenericRead => ResourceStates::GENERIC_READ,
        TextureLayout::ColorAttachment => ResourceStates::RENDER_TARGET,
        TextureLayout::DepthStencilAttachment => ResourceStates::DEPTH_WRITE,
        TextureLayout::DepthStencilReadOnly => ResourceStates::DEPTH_READ,
        TextureLayout::UnorderedAccess => ResourceStates::UNORDERED_ACCESS,
        TextureLayout::ShaderResource => ResourceStates::ALL_SHADER_RESOURCE,
        TextureLayout::TransferSrc => ResourceStates::COPY_SOURCE,
        TextureLayout::TransferDst => ResourceStates::COPY_DEST,
        TextureLayout::ResolveSrc => ResourceStates::RESOLVE_SOURCE,
        TextureLayout::ResolveDst => ResourceStates::RESOLVE_DEST,
        TextureLayout::ShadingRate => ResourceStates::SHADING_RATE_SOURCE,
    }
}

/// Combined legacy states implied by an access mask and a layout
///
/// Accesses that translate to `COMMON` (the catch-all read and write masks) make
/// the whole result `COMMON`, whatever the layout.
pub fn retrieve_state(access: BarrierAccessFlags, layout: TextureLayout) -> ResourceStates {
    let access = to_barrier_access(access);
    if access == BarrierAccess::COMMON {
        return ResourceStates::COMMON;
    }

    let mut states = ResourceStates::COMMON;
    let mut add = |condition: bool, state: ResourceStates| {
        if condition {
            states |= state;
        }
    };

    add(
        access.intersects(BarrierAccess::VERTEX_BUFFER | BarrierAccess::CONSTANT_BUFFER),
        ResourceStates::VERTEX_AND_CONSTANT_BUFFER,
    );
    add(access.contains(BarrierAccess::INDEX_BUFFER), ResourceStates::INDEX_BUFFER);
    add(layout == TextureLayout::ColorAttachment, ResourceStates::RENDER_TARGET);
    add(
        access.contains(BarrierAccess::UNORDERED_ACCESS)
            || layout == TextureLayout::UnorderedAccess,
        ResourceStates::UNORDERED_ACCESS,
    );
    add(layout == TextureLayout::DepthStencilAttachment, ResourceStates::DEPTH_WRITE);
    add(layout == TextureLayout::DepthStencilReadOnly, ResourceStates::DEPTH_READ);
    add(
        access.contains(BarrierAccess::SHADER_RESOURCE) || layout == TextureLayout::ShaderResource,
        ResourceStates::ALL_SHADER_RESOURCE,
    );
    add(
        access.contains(BarrierAccess::INDIRECT_ARGUMENT),
        ResourceStates::INDIRECT_ARGUMENT,
    );
    add(
        access.contains(BarrierAccess::COPY_SOURCE) || layout == TextureLayout::TransferSrc,
        ResourceStates::COPY_SOURCE,
    );
    add(
        access.contains(BarrierAccess::COPY_DEST) || layout == TextureLayout::TransferDst,
        ResourceStates::COPY_DEST,
    );
    add(
        access.contains(BarrierAccess::RESOLVE_SOURCE) || layout == TextureLayout::ResolveSrc,
        ResourceStates::RESOLVE_SOURCE,
    );
    add(
        access.contains(BarrierAccess::RESOLVE_DEST) || layout == TextureLayout::ResolveDst,
        ResourceStates::RESOLVE_DEST,
    );
    add(
        access.intersects(
            BarrierAccess::RAYTRACING_ACCELERATION_STRUCTURE_READ
                | BarrierAccess::RAYTRACING_ACCELERATION_STRUCTURE_WRITE,
        ),
        ResourceStates::RAYTRACING_ACCELERATION_STRUCTURE,
    );
    add(
        access.contains(BarrierAccess::SHADING_RATE_SOURCE),
        ResourceStates::SHADING_RATE_SOURCE,
    );

    states
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_none_wins() {
        assert_eq!(
            to_barrier_sync(BarrierSyncStageFlags::NONE | BarrierSyncStageFlags::TRANSFER),
            BarrierSync::NONE
        );
        assert_eq!(to_barrier_sync(BarrierSyncStageFlags::empty()), BarrierSync::NONE);
    }

    #[test]
    fn test_sync_flags_are_ored() {
        let sync = to_barrier_sync(
            BarrierSyncStageFlags::VERTEX_INPUT_ASSEMBLY
                | BarrierSyncStageFlags::COLOR_BLENDING
                | BarrierSyncStageFlags::ACCELERATION_STRUCTURE_COPY,
        );
        assert_eq!(
            sync,
            BarrierSync::INDEX_INPUT
                | BarrierSync::RENDER_TARGET
                | BarrierSync::COPY_RAYTRACING_ACCELERATION_STRUCTURE
        );
        assert_eq!(sync.bits(), 0x4 | 0x40 | 0x100_0000);
    }

    #[test]
    fn test_access_none_and_catch_all() {
        assert_eq!(to_barrier_access(BarrierAccessFlags::NONE), BarrierAccess::NO_ACCESS);
        assert_eq!(
            to_barrier_access(BarrierAccessFlags::ALL_READ | BarrierAccessFlags::SHADER_RESOURCE),
            BarrierAccess::COMMON
        );
        assert_eq!(to_barrier_access(BarrierAccessFlags::ALL_WRITE), BarrierAccess::COMMON);
        assert_eq!(
            to_barrier_access(
                BarrierAccessFlags::DEPTH_STENCIL_READ | BarrierAccessFlags::TRANSFER_DST
            ),
            BarrierAccess::DEPTH_STENCIL_READ | BarrierAccess::COPY_DEST
        );
    }

    #[test]
    fn test_layouts_translate_one_to_one() {
        assert_eq!(to_barrier_layout(TextureLayout::Unknown), BarrierLayout::UNDEFINED);
        assert_eq!(to_barrier_layout(TextureLayout::Present), BarrierLayout::COMMON);
        assert_eq!(to_barrier_layout(TextureLayout::ShadingRate).0, 11);
        assert_eq!(to_resource_state(TextureLayout::Unknown), ResourceStates::COMMON);
        assert_eq!(to_resource_state(TextureLayout::GenericRead).bits(), 0xAC3);
        assert_eq!(to_resource_state(TextureLayout::ShaderResource).bits(), 0xC0);
    }

    #[test]
    fn test_retrieve_state_combines_access_and_layout() {
        assert_eq!(
            retrieve_state(BarrierAccessFlags::ALL_READ, TextureLayout::ColorAttachment),
            ResourceStates::COMMON
        );
        assert_eq!(
            retrieve_state(BarrierAccessFlags::CONSTANT_BUFFER, TextureLayout::Unknown),
            ResourceStates::VERTEX_AND_CONSTANT_BUFFER
        );
        assert_eq!(
            retrieve_state(
                BarrierAccessFlags::SHADER_RESOURCE,
                TextureLayout::DepthStencilReadOnly,
            ),
            ResourceStates::ALL_SHADER_RESOURCE | ResourceStates::DEPTH_READ
        );
        assert_eq!(
            retrieve_state(BarrierAccessFlags::COLOR_ATTACHMENT, TextureLayout::ColorAttachment),
            ResourceStates::RENDER_TARGET
        );
        assert_eq!(
            retrieve_state(BarrierAccessFlags::NONE, TextureLayout::TransferDst),
            ResourceStates::COPY_DEST
        );
    }
}
