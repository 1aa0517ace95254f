//! Barrier translation to `vkCmdPipelineBarrier`
//!
//! Barriers are grouped into batches sharing one (source, destination) stage pair,
//! since a single pipeline barrier call takes one stage mask per side. Batching is
//! greedy: each batch takes the consecutive run of global, then buffer, then texture
//! barriers matching the stages of the first pending barrier.

use ash::vk;

use crate::graphics::barriers::{
    BarrierAccessFlags, BarrierSyncStageFlags, BufferMemoryBarrier, GlobalMemoryBarrier,
    TextureLayout, TextureMemoryBarrier, TexturePlane,
};

/// Pipeline stage mask for one side of a barrier
///
/// An empty source waits on nothing (top of pipe); an empty destination blocks
/// nothing (bottom of pipe). A mask containing `NONE` counts as empty, as it does
/// for access masks.
pub fn to_vk_pipeline_stage_flags(
    flags: BarrierSyncStageFlags,
    is_src: bool,
) -> vk::PipelineStageFlags {
    if flags.contains(BarrierSyncStageFlags::NONE) || flags.is_empty() {
        return if is_src {
            vk::PipelineStageFlags::TOP_OF_PIPE
        } else {
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        };
    }
    if flags.contains(BarrierSyncStageFlags::ALL) {
        return vk::PipelineStageFlags::ALL_COMMANDS;
    }

    let all_shading = flags.contains(BarrierSyncStageFlags::ALL_SHADING);
    let mut stages = vk::PipelineStageFlags::empty();

    if flags.contains(BarrierSyncStageFlags::EXECUTE_INDIRECT) {
        stages |= vk::PipelineStageFlags::DRAW_INDIRECT;
    }
    if flags.intersects(
        BarrierSyncStageFlags::INDEX_INPUT_ASSEMBLY | BarrierSyncStageFlags::VERTEX_INPUT_ASSEMBLY,
    ) {
        stages |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if all_shading || flags.contains(BarrierSyncStageFlags::VERTEX_SHADING) {
        stages |= vk::PipelineStageFlags::VERTEX_SHADER
            | vk::PipelineStageFlags::GEOMETRY_SHADER
            | vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
            | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER;
    }
    if all_shading || flags.contains(BarrierSyncStageFlags::FRAGMENT_SHADING) {
        stages |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if flags.contains(BarrierSyncStageFlags::COLOR_BLENDING) {
        stages |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    }
    if flags.contains(BarrierSyncStageFlags::DEPTH_STENCIL_TESTING) {
        stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    }
    if flags.contains(BarrierSyncStageFlags::TRANSFER) {
        stages |= vk::PipelineStageFlags::TRANSFER;
    }
    if flags.contains(BarrierSyncStageFlags::MULTI_SAMPLE_RESOLVE) {
        stages |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    }
    if all_shading || flags.contains(BarrierSyncStageFlags::COMPUTE_SHADING) {
        stages |= vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if all_shading || flags.contains(BarrierSyncStageFlags::RAYTRACING) {
        stages |= vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR;
    }
    if flags.contains(BarrierSyncStageFlags::ACCELERATION_STRUCTURE_BUILD) {
        stages |= vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR;
    }
    if flags.contains(BarrierSyncStageFlags::ACCELERATION_STRUCTURE_COPY) {
        stages |= vk::PipelineStageFlags::ALL_COMMANDS;
    }

    if stages.is_empty() {
        vk::PipelineStageFlags::ALL_COMMANDS
    } else {
        stages
    }
}

/// Access mask for one side of a barrier
pub fn to_vk_access_flags(flags: BarrierAccessFlags) -> vk::AccessFlags {
    const MAPPING: [(BarrierAccessFlags, vk::AccessFlags); 18] = [
        (BarrierAccessFlags::VERTEX_BUFFER, vk::AccessFlags::VERTEX_ATTRIBUTE_READ),
        (BarrierAccessFlags::INDEX_BUFFER, vk::AccessFlags::INDEX_READ),
        (BarrierAccessFlags::CONSTANT_BUFFER, vk::AccessFlags::UNIFORM_READ),
        (BarrierAccessFlags::INDIRECT_BUFFER, vk::AccessFlags::INDIRECT_COMMAND_READ),
        (BarrierAccessFlags::COLOR_ATTACHMENT, vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
        (BarrierAccessFlags::DEPTH_STENCIL_READ, vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ),
        (BarrierAccessFlags::DEPTH_STENCIL_WRITE, vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE),
        (BarrierAccessFlags::SHADER_RESOURCE, vk::AccessFlags::SHADER_READ),
        (BarrierAccessFlags::UNORDERED_ACCESS, vk::AccessFlags::SHADER_WRITE),
        (BarrierAccessFlags::RESOLVE_SRC, vk::AccessFlags::COLOR_ATTACHMENT_READ),
        (BarrierAccessFlags::RESOLVE_DST, vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
        (BarrierAccessFlags::TRANSFER_SRC, vk::AccessFlags::TRANSFER_READ),
        (BarrierAccessFlags::TRANSFER_DST, vk::AccessFlags::TRANSFER_WRITE),
        (
            BarrierAccessFlags::ACCELERATION_STRUCTURE_READ,
            vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR,
        ),
        (
            BarrierAccessFlags::ACCELERATION_STRUCTURE_WRITE,
            vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
        ),
        (
            BarrierAccessFlags::SHADING_RATE,
            vk::AccessFlags::FRAGMENT_SHADING_RATE_ATTACHMENT_READ_KHR,
        ),
        (BarrierAccessFlags::ALL_READ, vk::AccessFlags::MEMORY_READ),
        (BarrierAccessFlags::ALL_WRITE, vk::AccessFlags::MEMORY_WRITE),
    ];

    if flags.contains(BarrierAccessFlags::NONE) {
        return vk::AccessFlags::empty();
    }
    MAPPING
        .iter()
        .filter(|(access, _)| flags.contains(*access))
        .fold(vk::AccessFlags::empty(), |acc, (_, vk_access)| acc | *vk_access)
}

/// Image layout of a texture layout
pub fn to_vk_image_layout(layout: TextureLayout) -> vk::ImageLayout {
    match layout {
        TextureLayout::Unknown => vk::ImageLayout::UNDEFINED,
        TextureLayout::Common | TextureLayout::UnorderedAccess => vk::ImageLayout::GENERAL,
        TextureLayout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        TextureLayout::GenericRead => vk::ImageLayout::READ_ONLY_OPTIMAL,
        TextureLayout::ColorAttachment | TextureLayout::ResolveSrc | TextureLayout::ResolveDst => {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        }
        TextureLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        TextureLayout::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        TextureLayout::ShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        TextureLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        TextureLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        TextureLayout::ShadingRate => vk::ImageLayout::FRAGMENT_SHADING_RATE_ATTACHMENT_OPTIMAL_KHR,
    }
}

/// Image aspects covered by a set of planes
pub fn to_vk_aspect_mask(planes: TexturePlane) -> vk::ImageAspectFlags {
    let mut aspects = vk::ImageAspectFlags::empty();
    if planes.contains(TexturePlane::COLOR) {
        aspects |= vk::ImageAspectFlags::COLOR;
    }
    if planes.contains(TexturePlane::DEPTH) {
        aspects |= vk::ImageAspectFlags::DEPTH;
    }
    if planes.contains(TexturePlane::STENCIL) {
        aspects |= vk::ImageAspectFlags::STENCIL;
    }
    aspects
}

/// Barriers recorded by one `vkCmdPipelineBarrier` call
#[derive(Debug, Default)]
pub struct BarrierBatch {
    /// Source stage mask
    pub src_stages: vk::PipelineStageFlags,
    /// Destination stage mask
    pub dst_stages: vk::PipelineStageFlags,
    /// Global memory barriers
    pub memory: Vec<vk::MemoryBarrier>,
    /// Buffer memory barriers
    pub buffers: Vec<vk::BufferMemoryBarrier>,
    /// Image memory barriers
    pub images: Vec<vk::ImageMemoryBarrier>,
}

impl BarrierBatch {
    /// Total barriers in the batch
    pub fn len(&self) -> usize {
        self.memory.len() + self.buffers.len() + self.images.len()
    }

    /// Whether the batch holds no barrier
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type StagePair = (vk::PipelineStageFlags, vk::PipelineStageFlags);

fn stage_pair(src: BarrierSyncStageFlags, dst: BarrierSyncStageFlags) -> StagePair {
    (to_vk_pipeline_stage_flags(src, true), to_vk_pipeline_stage_flags(dst, false))
}

fn take_matching<T>(
    items: &[T],
    cursor: &mut usize,
    key: StagePair,
    stages: impl Fn(&T) -> StagePair,
) -> usize {
    let start = *cursor;
    while *cursor < items.len() && stages(&items[*cursor]) == key {
        *cursor += 1;
    }
    *cursor - start
}

/// Group barriers into pipeline barrier calls
pub fn group_barriers(
    global: &[GlobalMemoryBarrier],
    buffers: &[(vk::Buffer, BufferMemoryBarrier)],
    textures: &[(vk::Image, TextureMemoryBarrier)],
) -> Vec<BarrierBatch> {
    let global_stages =
        |barrier: &GlobalMemoryBarrier| stage_pair(barrier.stages_src, barrier.stages_dst);
    let buffer_stages = |(_, barrier): &(vk::Buffer, BufferMemoryBarrier)| {
        stage_pair(barrier.stages_src, barrier.stages_dst)
    };
    let texture_stages = |(_, barrier): &(vk::Image, TextureMemoryBarrier)| {
        stage_pair(barrier.stages_src, barrier.stages_dst)
    };

    let (mut g, mut b, mut t) = (0, 0, 0);
    let mut batches = Vec::new();

    loop {
        let key = if let Some(barrier) = global.get(g) {
            global_stages(barrier)
        } else if let Some(barrier) = buffers.get(b) {
            buffer_stages(barrier)
        } else if let Some(barrier) = textures.get(t) {
            texture_stages(barrier)
        } else {
            break;
        };

        let (g_start, b_start, t_start) = (g, b, t);
        take_matching(global, &mut g, key, global_stages);
        take_matching(buffers, &mut b, key, buffer_stages);
        take_matching(textures, &mut t, key, texture_stages);

        batches.push(BarrierBatch {
            src_stages: key.0,
            dst_stages: key.1,
            memory: global[g_start..g].iter().map(to_vk_memory_barrier).collect(),
            buffers: buffers[b_start..b]
                .iter()
                .map(|(buffer, barrier)| to_vk_buffer_barrier(*buffer, barrier))
                .collect(),
            images: textures[t_start..t]
                .iter()
                .map(|(image, barrier)| to_vk_image_barrier(*image, barrier))
                .collect(),
        });
    }

    batches
}

fn to_vk_memory_barrier(barrier: &GlobalMemoryBarrier) -> vk::MemoryBarrier {
    vk::MemoryBarrier::builder()
        .src_access_mask(to_vk_access_flags(barrier.access_src))
        .dst_access_mask(to_vk_access_flags(barrier.access_dst))
        .build()
}

fn to_vk_buffer_barrier(
    buffer: vk::Buffer,
    barrier: &BufferMemoryBarrier,
) -> vk::BufferMemoryBarrier {
    vk::BufferMemoryBarrier::builder()
        .src_access_mask(to_vk_access_flags(barrier.access_src))
        .dst_access_mask(to_vk_access_flags(barrier.access_dst))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(barrier.offset)
        .size(barrier.size)
        .build()
}

fn to_vk_image_barrier(image: vk::Image, barrier: &TextureMemoryBarrier) -> vk::ImageMemoryBarrier {
    let level_count = if barrier.covers_remaining_mips() {
        vk::REMAINING_MIP_LEVELS
    } else {
        u32::from(barrier.mip_count)
    };
    let layer_count = if barrier.covers_remaining_layers() {
        vk::REMAINING_ARRAY_LAYERS
    } else {
        u32::from(barrier.array_count)
    };

    vk::ImageMemoryBarrier::builder()
        .src_access_mask(to_vk_access_flags(barrier.access_src))
        .dst_access_mask(to_vk_access_flags(barrier.access_dst))
        .old_layout(to_vk_image_layout(barrier.layout_src))
        .new_layout(to_vk_image_layout(barrier.layout_dst))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: to_vk_aspect_mask(barrier.planes),
            base_mip_level: u32::from(barrier.mip_start),
            level_count,
            base_array_layer: u32::from(barrier.array_start),
            layer_count,
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::barriers::REMAINING_MIP_LEVELS;
    use crate::graphics::handles::{BufferHandle, TextureHandle};
    use ash::vk::Handle;

    fn global(src: BarrierSyncStageFlags, dst: BarrierSyncStageFlags) -> GlobalMemoryBarrier {
        GlobalMemoryBarrier {
            stages_src: src,
            stages_dst: dst,
            access_src: BarrierAccessFlags::UNORDERED_ACCESS,
            access_dst: BarrierAccessFlags::SHADER_RESOURCE,
        }
    }

    fn buffer(
        src: BarrierSyncStageFlags,
        dst: BarrierSyncStageFlags,
    ) -> (vk::Buffer, BufferMemoryBarrier) {
        (
            vk::Buffer::from_raw(1),
            BufferMemoryBarrier::whole(
                BufferHandle::INVALID,
                src,
                dst,
                BarrierAccessFlags::TRANSFER_DST,
                BarrierAccessFlags::VERTEX_BUFFER,
            ),
        )
    }

    #[test]
    fn test_empty_stages_map_to_pipe_ends() {
        assert_eq!(
            to_vk_pipeline_stage_flags(BarrierSyncStageFlags::NONE, true),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            to_vk_pipeline_stage_flags(BarrierSyncStageFlags::NONE, false),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        );
        assert_eq!(
            to_vk_pipeline_stage_flags(BarrierSyncStageFlags::ALL, true),
            vk::PipelineStageFlags::ALL_COMMANDS
        );
    }

    #[test]
    fn test_none_mixed_with_other_flags_reads_as_none() {
        assert_eq!(
            to_vk_pipeline_stage_flags(
                BarrierSyncStageFlags::NONE | BarrierSyncStageFlags::TRANSFER,
                true,
            ),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            to_vk_pipeline_stage_flags(
                BarrierSyncStageFlags::NONE | BarrierSyncStageFlags::TRANSFER,
                false,
            ),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        );
        assert_eq!(
            to_vk_access_flags(BarrierAccessFlags::NONE | BarrierAccessFlags::TRANSFER_DST),
            vk::AccessFlags::empty()
        );
    }

    #[test]
    fn test_all_shading_expands_to_every_shader_stage() {
        let stages = to_vk_pipeline_stage_flags(BarrierSyncStageFlags::ALL_SHADING, false);
        assert!(stages.contains(
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER
        ));
        assert!(stages.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        assert!(stages.contains(vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR));
        assert!(!stages.contains(vk::PipelineStageFlags::TRANSFER));
    }

    #[test]
    fn test_depth_stencil_testing_covers_both_fragment_tests() {
        assert_eq!(
            to_vk_pipeline_stage_flags(BarrierSyncStageFlags::DEPTH_STENCIL_TESTING, true),
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        );
        assert_eq!(
            to_vk_pipeline_stage_flags(BarrierSyncStageFlags::ACCELERATION_STRUCTURE_COPY, true),
            vk::PipelineStageFlags::ALL_COMMANDS
        );
    }

    #[test]
    fn test_access_flags() {
        assert_eq!(to_vk_access_flags(BarrierAccessFlags::NONE), vk::AccessFlags::empty());
        assert_eq!(
            to_vk_access_flags(
                BarrierAccessFlags::DEPTH_STENCIL_READ | BarrierAccessFlags::DEPTH_STENCIL_WRITE
            ),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert_eq!(
            to_vk_access_flags(BarrierAccessFlags::ALL),
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE
        );
    }

    #[test]
    fn test_layouts() {
        assert_eq!(to_vk_image_layout(TextureLayout::Unknown), vk::ImageLayout::UNDEFINED);
        assert_eq!(to_vk_image_layout(TextureLayout::UnorderedAccess), vk::ImageLayout::GENERAL);
        assert_eq!(
            to_vk_image_layout(TextureLayout::ResolveDst),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            to_vk_image_layout(TextureLayout::GenericRead),
            vk::ImageLayout::READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_barriers_are_batched_by_stage_pair() {
        use BarrierSyncStageFlags as S;

        let globals = [global(S::COMPUTE_SHADING, S::FRAGMENT_SHADING)];
        let buffers = [
            buffer(S::COMPUTE_SHADING, S::FRAGMENT_SHADING),
            buffer(S::TRANSFER, S::VERTEX_INPUT_ASSEMBLY),
            buffer(S::TRANSFER, S::VERTEX_INPUT_ASSEMBLY),
        ];

        let batches = group_barriers(&globals, &buffers, &[]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].memory.len(), 1);
        assert_eq!(batches[0].buffers.len(), 1);
        assert_eq!(batches[0].dst_stages, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(batches[1].buffers.len(), 2);
        assert_eq!(batches[1].src_stages, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(batches[1].dst_stages, vk::PipelineStageFlags::VERTEX_INPUT);
        assert_eq!(batches[1].buffers[0].size, vk::WHOLE_SIZE);
    }

    #[test]
    fn test_texture_barrier_subresource_range() {
        let mut barrier = TextureMemoryBarrier::transition(
            TextureHandle::INVALID,
            BarrierSyncStageFlags::NONE,
            BarrierSyncStageFlags::DEPTH_STENCIL_TESTING,
            BarrierAccessFlags::NONE,
            BarrierAccessFlags::DEPTH_STENCIL_WRITE,
            TextureLayout::Unknown,
            TextureLayout::DepthStencilAttachment,
        );
        barrier.planes = TexturePlane::DEPTH | TexturePlane::STENCIL;
        barrier.mip_count = REMAINING_MIP_LEVELS;

        let batches = group_barriers(&[], &[], &[(vk::Image::from_raw(7), barrier)]);
        assert_eq!(batches.len(), 1);
        let image = &batches[0].images[0];
        assert_eq!(batches[0].src_stages, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(image.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            image.subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(image.subresource_range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(image.subresource_range.layer_count, 1);
    }
}
