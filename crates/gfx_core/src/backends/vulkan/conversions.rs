//! Conversions from core descriptions to Vulkan enums and flags

use ash::vk;

use crate::graphics::backend::BindPoint;
use crate::graphics::descriptors::{DescriptorBindingType, ShaderVisibility};
use crate::graphics::resources::{
    AddressMode, BufferUsage, Filter, LoadOp, MemoryUsage, StoreOp, TextureFormat, TextureUsage,
    TextureViewType,
};

/// Native format of a texel format
pub const fn to_vk_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::D32Float => vk::Format::D32_SFLOAT,
        TextureFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
    }
}

/// Texel format of a swap chain format, if the core knows it
pub fn from_vk_format(format: vk::Format) -> Option<TextureFormat> {
    match format {
        vk::Format::R8G8B8A8_UNORM => Some(TextureFormat::Rgba8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(TextureFormat::Rgba8Srgb),
        vk::Format::B8G8R8A8_UNORM => Some(TextureFormat::Bgra8Unorm),
        vk::Format::B8G8R8A8_SRGB => Some(TextureFormat::Bgra8Srgb),
        vk::Format::R16G16B16A16_SFLOAT => Some(TextureFormat::Rgba16Float),
        _ => None,
    }
}

/// Buffer usage flags
pub fn to_vk_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::CONSTANT) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    flags
}

/// Image usage flags
pub fn to_vk_image_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::TRANSFER_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::TRANSFER_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::COLOR_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    flags
}

/// Memory properties to try, most preferred first
pub fn memory_property_candidates(usage: MemoryUsage) -> &'static [vk::MemoryPropertyFlags] {
    const DEVICE_LOCAL: [vk::MemoryPropertyFlags; 1] = [vk::MemoryPropertyFlags::DEVICE_LOCAL];
    const UPLOAD: [vk::MemoryPropertyFlags; 1] = [vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    )];
    const READBACK: [vk::MemoryPropertyFlags; 2] = [
        vk::MemoryPropertyFlags::from_raw(
            vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
                | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw()
                | vk::MemoryPropertyFlags::HOST_CACHED.as_raw(),
        ),
        vk::MemoryPropertyFlags::from_raw(
            vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
                | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
        ),
    ];

    match usage {
        MemoryUsage::GpuOnly => &DEVICE_LOCAL,
        MemoryUsage::StageEveryFrame => &UPLOAD,
        MemoryUsage::Readback => &READBACK,
    }
}

/// Descriptor type of a binding type
pub const fn to_vk_descriptor_type(binding_type: DescriptorBindingType) -> vk::DescriptorType {
    match binding_type {
        DescriptorBindingType::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorBindingType::SampledTexture => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorBindingType::StorageReadOnlyTexture
        | DescriptorBindingType::StorageReadWriteTexture => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorBindingType::ConstantBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorBindingType::StorageReadOnlyBuffer
        | DescriptorBindingType::StorageReadWriteBuffer => vk::DescriptorType::STORAGE_BUFFER,
    }
}

/// Shader stages of a visibility mask
///
/// Task and mesh stages need an extension this backend does not enable and are
/// left out.
pub fn to_vk_shader_stages(visibility: ShaderVisibility) -> vk::ShaderStageFlags {
    if visibility == ShaderVisibility::ALL {
        return vk::ShaderStageFlags::ALL;
    }

    const MAPPING: [(ShaderVisibility, vk::ShaderStageFlags); 6] = [
        (ShaderVisibility::VERTEX, vk::ShaderStageFlags::VERTEX),
        (ShaderVisibility::TESSELATION_CONTROL, vk::ShaderStageFlags::TESSELLATION_CONTROL),
        (ShaderVisibility::TESSELATION_EVALUATION, vk::ShaderStageFlags::TESSELLATION_EVALUATION),
        (ShaderVisibility::GEOMETRY, vk::ShaderStageFlags::GEOMETRY),
        (ShaderVisibility::FRAGMENT, vk::ShaderStageFlags::FRAGMENT),
        (ShaderVisibility::COMPUTE, vk::ShaderStageFlags::COMPUTE),
    ];
    MAPPING
        .iter()
        .filter(|(stage, _)| visibility.contains(*stage))
        .fold(vk::ShaderStageFlags::empty(), |acc, (_, vk_stage)| acc | *vk_stage)
}

/// Pipeline bind point
pub const fn to_vk_bind_point(bind_point: BindPoint) -> vk::PipelineBindPoint {
    match bind_point {
        BindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        BindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

/// Attachment load operation
pub const fn to_vk_load_op(load: LoadOp) -> vk::AttachmentLoadOp {
    match load {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

/// Attachment store operation
pub const fn to_vk_store_op(store: StoreOp) -> vk::AttachmentStoreOp {
    match store {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

/// Texel filter
pub const fn to_vk_filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Point => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

/// Mip filter
pub const fn to_vk_mipmap_mode(filter: Filter) -> vk::SamplerMipmapMode {
    match filter {
        Filter::Point => vk::SamplerMipmapMode::NEAREST,
        Filter::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

/// Address mode
pub const fn to_vk_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::Border => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        AddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

/// Image view type
pub const fn to_vk_view_type(view_type: TextureViewType) -> vk::ImageViewType {
    match view_type {
        TextureViewType::Single2D => vk::ImageViewType::TYPE_2D,
        TextureViewType::Array2D => vk::ImageViewType::TYPE_2D_ARRAY,
        TextureViewType::Cube => vk::ImageViewType::CUBE,
        TextureViewType::Single3D => vk::ImageViewType::TYPE_3D,
    }
}

/// Image type from the depth of a texture
pub const fn to_vk_image_type(dimensions: [u32; 3]) -> vk::ImageType {
    if dimensions[2] > 1 {
        vk::ImageType::TYPE_3D
    } else {
        vk::ImageType::TYPE_2D
    }
}

/// Highest LOD, with unbounded values mapped to the native sentinel
pub fn clamp_lod_max(lod_max: f32) -> f32 {
    lod_max.min(vk::LOD_CLAMP_NONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_bindings_share_native_types() {
        assert_eq!(
            to_vk_descriptor_type(DescriptorBindingType::StorageReadOnlyTexture),
            to_vk_descriptor_type(DescriptorBindingType::StorageReadWriteTexture)
        );
        assert_eq!(
            to_vk_descriptor_type(DescriptorBindingType::StorageReadOnlyBuffer),
            vk::DescriptorType::STORAGE_BUFFER
        );
        assert_eq!(
            to_vk_descriptor_type(DescriptorBindingType::ConstantBuffer),
            vk::DescriptorType::UNIFORM_BUFFER
        );
    }

    #[test]
    fn test_visibility_drops_task_and_mesh() {
        assert_eq!(to_vk_shader_stages(ShaderVisibility::ALL), vk::ShaderStageFlags::ALL);
        assert_eq!(
            to_vk_shader_stages(ShaderVisibility::VERTEX | ShaderVisibility::MESH),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            to_vk_shader_stages(ShaderVisibility::FRAGMENT | ShaderVisibility::COMPUTE),
            vk::ShaderStageFlags::FRAGMENT | vk::ShaderStageFlags::COMPUTE
        );
    }

    #[test]
    fn test_formats_round_trip_for_color_formats() {
        for format in [
            TextureFormat::Rgba8Unorm,
            TextureFormat::Bgra8Srgb,
            TextureFormat::Rgba16Float,
        ] {
            assert_eq!(from_vk_format(to_vk_format(format)), Some(format));
        }
        assert_eq!(to_vk_format(TextureFormat::D24UnormS8Uint), vk::Format::D24_UNORM_S8_UINT);
    }

    #[test]
    fn test_readback_prefers_cached_memory() {
        let candidates = memory_property_candidates(MemoryUsage::Readback);
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].contains(vk::MemoryPropertyFlags::HOST_CACHED));
        assert!(!candidates[1].contains(vk::MemoryPropertyFlags::HOST_CACHED));
        assert_eq!(
            memory_property_candidates(MemoryUsage::GpuOnly),
            &[vk::MemoryPropertyFlags::DEVICE_LOCAL]
        );
    }

    #[test]
    fn test_compute_binds_use_the_compute_bind_point() {
        assert_eq!(to_vk_bind_point(BindPoint::Compute), vk::PipelineBindPoint::COMPUTE);
        assert_eq!(to_vk_bind_point(BindPoint::Graphics), vk::PipelineBindPoint::GRAPHICS);
    }

    #[test]
    fn test_attachment_operations() {
        assert_eq!(to_vk_load_op(LoadOp::Clear), vk::AttachmentLoadOp::CLEAR);
        assert_eq!(to_vk_load_op(LoadOp::DontCare), vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(to_vk_store_op(StoreOp::DontCare), vk::AttachmentStoreOp::DONT_CARE);
    }

    #[test]
    fn test_sampler_conversions() {
        assert_eq!(
            to_vk_address_mode(AddressMode::Border),
            vk::SamplerAddressMode::CLAMP_TO_BORDER
        );
        assert_eq!(to_vk_address_mode(AddressMode::Clamp), vk::SamplerAddressMode::CLAMP_TO_EDGE);
        assert_eq!(clamp_lod_max(f32::MAX), vk::LOD_CLAMP_NONE);
        assert_eq!(clamp_lod_max(4.0), 4.0);
    }

    #[test]
    fn test_usage_flags() {
        assert_eq!(
            to_vk_buffer_usage(BufferUsage::CONSTANT | BufferUsage::TRANSFER_DST),
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        );
        assert_eq!(
            to_vk_image_usage(TextureUsage::SAMPLED | TextureUsage::DEPTH_STENCIL_ATTACHMENT),
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        );
        assert_eq!(to_vk_image_type([4, 4, 1]), vk::ImageType::TYPE_2D);
        assert_eq!(to_vk_image_type([4, 4, 4]), vk::ImageType::TYPE_3D);
    }
}
