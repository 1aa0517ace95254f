//! Barrier planning for Metal encoders
//!
//! Metal tracks hazards per encoder, so most barriers reduce to declaring how a
//! resource is used next. Only compute encoders accept explicit memory barriers,
//! either by scope or per resource.

use bitflags::bitflags;

use crate::foundation::Diagnostics;
use crate::graphics::barriers::{
    BarrierAccessFlags, BarrierSyncStageFlags, BufferMemoryBarrier, GlobalMemoryBarrier,
    TextureMemoryBarrier,
};
use crate::graphics::handles::{BufferHandle, TextureHandle};

bitflags! {
    /// `MTLBarrierScope`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BarrierScope: u32 {
        /// Buffers
        const BUFFERS = 1 << 0;
        /// Textures
        const TEXTURES = 1 << 1;
        /// Render targets
        const RENDER_TARGETS = 1 << 2;
    }
}

bitflags! {
    /// `MTLResourceUsage`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceUsage: u32 {
        /// Read by the encoder
        const READ = 1 << 0;
        /// Written by the encoder
        const WRITE = 1 << 1;
    }
}

const BUFFER_ACCESS: BarrierAccessFlags = BarrierAccessFlags::VERTEX_BUFFER
    .union(BarrierAccessFlags::INDEX_BUFFER)
    .union(BarrierAccessFlags::CONSTANT_BUFFER)
    .union(BarrierAccessFlags::INDIRECT_BUFFER)
    .union(BarrierAccessFlags::SHADER_RESOURCE)
    .union(BarrierAccessFlags::UNORDERED_ACCESS)
    .union(BarrierAccessFlags::TRANSFER_SRC)
    .union(BarrierAccessFlags::TRANSFER_DST)
    .union(BarrierAccessFlags::ACCELERATION_STRUCTURE_READ)
    .union(BarrierAccessFlags::ACCELERATION_STRUCTURE_WRITE);

const TEXTURE_ACCESS: BarrierAccessFlags = BarrierAccessFlags::DEPTH_STENCIL_READ
    .union(BarrierAccessFlags::SHADER_RESOURCE)
    .union(BarrierAccessFlags::UNORDERED_ACCESS)
    .union(BarrierAccessFlags::TRANSFER_SRC)
    .union(BarrierAccessFlags::TRANSFER_DST)
    .union(BarrierAccessFlags::SHADING_RATE);

const RENDER_TARGET_ACCESS: BarrierAccessFlags = BarrierAccessFlags::COLOR_ATTACHMENT
    .union(BarrierAccessFlags::DEPTH_STENCIL_WRITE)
    .union(BarrierAccessFlags::RESOLVE_SRC)
    .union(BarrierAccessFlags::RESOLVE_DST);

/// Kind of encoder a barrier is recorded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    /// Render command encoder
    Render,
    /// Compute command encoder
    Compute,
    /// Blit command encoder
    Blit,
}

/// Resource named by a per-resource barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetalResource {
    /// Buffer
    Buffer(BufferHandle),
    /// Texture
    Texture(TextureHandle),
}

/// Native form of one per-resource barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBarrier {
    /// `memoryBarrier(resources:)` on a compute encoder
    MemoryBarrier,
    /// `useResources(_:usage:)`
    Usage(ResourceUsage),
}

/// Encoder calls a set of barriers turns into
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetalBarrierPlan {
    /// `memoryBarrier(scope:)`, compute encoders only
    pub global_scope: Option<BarrierScope>,
    /// Resources declared read
    pub read: Vec<MetalResource>,
    /// Resources declared written
    pub write: Vec<MetalResource>,
    /// Resources declared read and written
    pub read_write: Vec<MetalResource>,
    /// Resources given a memory barrier, compute encoders only
    pub memory_barriers: Vec<MetalResource>,
}

/// Scopes touched by an access mask
pub fn barrier_scope(access: BarrierAccessFlags) -> BarrierScope {
    let mut scope = BarrierScope::empty();
    if access.intersects(BUFFER_ACCESS) {
        scope |= BarrierScope::BUFFERS;
    }
    if access.intersects(TEXTURE_ACCESS) {
        scope |= BarrierScope::TEXTURES;
    }
    if access.intersects(RENDER_TARGET_ACCESS) {
        scope |= BarrierScope::RENDER_TARGETS;
    }
    scope
}

/// Classify one per-resource barrier
///
/// Compute to compute dependencies need a memory barrier. Anything else declares
/// the destination usage; `None` when the destination neither reads nor writes.
pub fn classify_barrier(
    stages_src: BarrierSyncStageFlags,
    stages_dst: BarrierSyncStageFlags,
    access_dst: BarrierAccessFlags,
) -> Option<ResourceBarrier> {
    if stages_src.contains(BarrierSyncStageFlags::COMPUTE_SHADING)
        && stages_dst.contains(BarrierSyncStageFlags::COMPUTE_SHADING)
    {
        return Some(ResourceBarrier::MemoryBarrier);
    }

    let mut usage = ResourceUsage::empty();
    if access_dst.intersects(BarrierAccessFlags::READ_MASK) {
        usage |= ResourceUsage::READ;
    }
    if access_dst.intersects(BarrierAccessFlags::WRITE_MASK) {
        usage |= ResourceUsage::WRITE;
    }
    (!usage.is_empty()).then_some(ResourceBarrier::Usage(usage))
}

/// Plan the encoder calls for a set of barriers recorded into `encoder`
///
/// Scoped and per-resource memory barriers outside a compute encoder are soft
/// failures and dropped. Usage declarations are dropped without failure when no
/// render or compute encoder is open, since blit encoders track no usage.
pub fn plan_barriers(
    diagnostics: &Diagnostics,
    encoder: Option<EncoderKind>,
    globals: &[GlobalMemoryBarrier],
    buffers: &[BufferMemoryBarrier],
    textures: &[TextureMemoryBarrier],
) -> MetalBarrierPlan {
    let is_compute = encoder == Some(EncoderKind::Compute);
    let tracks_usage = matches!(encoder, Some(EncoderKind::Compute | EncoderKind::Render));
    let mut plan = MetalBarrierPlan::default();

    if !globals.is_empty()
        && diagnostics.verify(
            is_compute,
            "metal.barriers",
            format_args!("global memory barriers need a compute encoder, not {:?}", encoder),
        )
    {
        let scope = globals
            .iter()
            .fold(BarrierScope::empty(), |scope, barrier| {
                scope | barrier_scope(barrier.access_src | barrier.access_dst)
            });
        plan.global_scope = Some(scope);
    }

    let resources = buffers
        .iter()
        .map(|barrier| {
            (
                MetalResource::Buffer(barrier.buffer),
                classify_barrier(barrier.stages_src, barrier.stages_dst, barrier.access_dst),
            )
        })
        .chain(textures.iter().map(|barrier| {
            (
                MetalResource::Texture(barrier.texture),
                classify_barrier(barrier.stages_src, barrier.stages_dst, barrier.access_dst),
            )
        }));

    for (resource, barrier) in resources {
        match barrier {
            Some(ResourceBarrier::MemoryBarrier) => plan.memory_barriers.push(resource),
            Some(ResourceBarrier::Usage(usage)) if tracks_usage => {
                if usage == (ResourceUsage::READ | ResourceUsage::WRITE) {
                    plan.read_write.push(resource);
                } else if usage == ResourceUsage::READ {
                    plan.read.push(resource);
                } else {
                    plan.write.push(resource);
                }
            }
            Some(ResourceBarrier::Usage(_)) | None => {}
        }
    }

    if !plan.memory_barriers.is_empty()
        && !diagnostics.verify(
            is_compute,
            "metal.barriers",
            format_args!(
                "{} resource memory barriers need a compute encoder, not {:?}",
                plan.memory_barriers.len(),
                encoder
            ),
        )
    {
        plan.memory_barriers.clear();
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::Handle;
    use crate::graphics::barriers::TextureLayout;

    fn buffer_barrier(
        stages_src: BarrierSyncStageFlags,
        stages_dst: BarrierSyncStageFlags,
        access_dst: BarrierAccessFlags,
    ) -> BufferMemoryBarrier {
        BufferMemoryBarrier::whole(
            BufferHandle(Handle::new(1, 0)),
            stages_src,
            stages_dst,
            BarrierAccessFlags::UNORDERED_ACCESS,
            access_dst,
        )
    }

    #[test]
    fn test_scope_follows_the_access_union() {
        assert_eq!(barrier_scope(BarrierAccessFlags::CONSTANT_BUFFER), BarrierScope::BUFFERS);
        assert_eq!(
            barrier_scope(BarrierAccessFlags::SHADER_RESOURCE),
            BarrierScope::BUFFERS | BarrierScope::TEXTURES
        );
        assert_eq!(
            barrier_scope(
                BarrierAccessFlags::COLOR_ATTACHMENT | BarrierAccessFlags::DEPTH_STENCIL_READ
            ),
            BarrierScope::RENDER_TARGETS | BarrierScope::TEXTURES
        );
        assert!(barrier_scope(BarrierAccessFlags::NONE).is_empty());
    }

    #[test]
    fn test_compute_to_compute_is_a_memory_barrier() {
        assert_eq!(
            classify_barrier(
                BarrierSyncStageFlags::COMPUTE_SHADING,
                BarrierSyncStageFlags::COMPUTE_SHADING | BarrierSyncStageFlags::VERTEX_SHADING,
                BarrierAccessFlags::SHADER_RESOURCE,
            ),
            Some(ResourceBarrier::MemoryBarrier)
        );
    }

    #[test]
    fn test_usage_is_the_or_of_read_and_write() {
        let classify = |access| {
            classify_barrier(
                BarrierSyncStageFlags::TRANSFER,
                BarrierSyncStageFlags::FRAGMENT_SHADING,
                access,
            )
        };
        assert_eq!(
            classify(BarrierAccessFlags::SHADER_RESOURCE),
            Some(ResourceBarrier::Usage(ResourceUsage::READ))
        );
        assert_eq!(
            classify(BarrierAccessFlags::UNORDERED_ACCESS),
            Some(ResourceBarrier::Usage(ResourceUsage::WRITE))
        );
        assert_eq!(
            classify(BarrierAccessFlags::SHADER_RESOURCE | BarrierAccessFlags::UNORDERED_ACCESS),
            Some(ResourceBarrier::Usage(ResourceUsage::READ | ResourceUsage::WRITE))
        );
        assert_eq!(classify(BarrierAccessFlags::NONE), None);
    }

    #[test]
    fn test_global_barrier_outside_compute_is_rejected() {
        let diagnostics = Diagnostics::new();
        let global = GlobalMemoryBarrier {
            stages_src: BarrierSyncStageFlags::COMPUTE_SHADING,
            stages_dst: BarrierSyncStageFlags::COMPUTE_SHADING,
            access_src: BarrierAccessFlags::UNORDERED_ACCESS,
            access_dst: BarrierAccessFlags::SHADER_RESOURCE,
        };

        let plan = plan_barriers(&diagnostics, Some(EncoderKind::Render), &[global], &[], &[]);
        assert_eq!(plan.global_scope, None);
        assert_eq!(diagnostics.failures_at("metal.barriers"), 1);

        let plan = plan_barriers(&diagnostics, Some(EncoderKind::Compute), &[global], &[], &[]);
        assert_eq!(plan.global_scope, Some(BarrierScope::BUFFERS | BarrierScope::TEXTURES));
        assert_eq!(diagnostics.failures_at("metal.barriers"), 1);
    }

    #[test]
    fn test_render_encoder_declares_usage() {
        let diagnostics = Diagnostics::new();
        let texture = TextureMemoryBarrier::transition(
            TextureHandle(Handle::new(2, 0)),
            BarrierSyncStageFlags::COLOR_BLENDING,
            BarrierSyncStageFlags::FRAGMENT_SHADING,
            BarrierAccessFlags::COLOR_ATTACHMENT,
            BarrierAccessFlags::SHADER_RESOURCE,
            TextureLayout::ColorAttachment,
            TextureLayout::ShaderResource,
        );
        let buffer = buffer_barrier(
            BarrierSyncStageFlags::TRANSFER,
            BarrierSyncStageFlags::VERTEX_SHADING,
            BarrierAccessFlags::UNORDERED_ACCESS | BarrierAccessFlags::CONSTANT_BUFFER,
        );

        let plan = plan_barriers(
            &diagnostics,
            Some(EncoderKind::Render),
            &[],
            &[buffer],
            &[texture],
        );
        assert_eq!(plan.read, vec![MetalResource::Texture(TextureHandle(Handle::new(2, 0)))]);
        assert_eq!(plan.read_write, vec![MetalResource::Buffer(BufferHandle(Handle::new(1, 0)))]);
        assert!(plan.write.is_empty());
        assert_eq!(diagnostics.failure_count(), 0);

        let plan = plan_barriers(&diagnostics, None, &[], &[buffer], &[texture]);
        assert_eq!(plan, MetalBarrierPlan::default());
    }

    #[test]
    fn test_resource_memory_barrier_needs_compute() {
        let diagnostics = Diagnostics::new();
        let buffer = buffer_barrier(
            BarrierSyncStageFlags::COMPUTE_SHADING,
            BarrierSyncStageFlags::COMPUTE_SHADING,
            BarrierAccessFlags::SHADER_RESOURCE,
        );

        let plan = plan_barriers(&diagnostics, Some(EncoderKind::Compute), &[], &[buffer], &[]);
        assert_eq!(plan.memory_barriers.len(), 1);

        let plan = plan_barriers(&diagnostics, Some(EncoderKind::Render), &[], &[buffer], &[]);
        assert!(plan.memory_barriers.is_empty());
        assert_eq!(diagnostics.failures_at("metal.barriers"), 1);
    }
}
