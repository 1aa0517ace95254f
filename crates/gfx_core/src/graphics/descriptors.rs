//! Descriptor set and pipeline layout descriptions

use bitflags::bitflags;

use crate::foundation::Handle;
use crate::graphics::barriers::TextureLayout;
use crate::graphics::handles::DescriptorSetLayoutHandle;

bitflags! {
    /// Shader stages a binding or push constant range is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderVisibility: u8 {
        /// Vertex shader
        const VERTEX = 1 << 0;
        /// Tessellation control shader
        const TESSELATION_CONTROL = 1 << 1;
        /// Tessellation evaluation shader
        const TESSELATION_EVALUATION = 1 << 2;
        /// Geometry shader
        const GEOMETRY = 1 << 3;
        /// Fragment shader
        const FRAGMENT = 1 << 4;
        /// Compute shader
        const COMPUTE = 1 << 5;
        /// Task shader
        const TASK = 1 << 6;
        /// Mesh shader
        const MESH = 1 << 7;
        /// Every stage
        const ALL = 0xFF;
    }
}

/// Kind of resource bound at a descriptor binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorBindingType {
    /// Sampler state
    Sampler,
    /// Sampled texture
    SampledTexture,
    /// Storage texture, read only
    StorageReadOnlyTexture,
    /// Storage texture, read/write
    StorageReadWriteTexture,
    /// Constant (uniform) buffer
    ConstantBuffer,
    /// Storage buffer, read only
    StorageReadOnlyBuffer,
    /// Storage buffer, read/write
    StorageReadWriteBuffer,
}

impl DescriptorBindingType {
    /// Every binding type, in discriminant order
    pub const ALL: [Self; 7] = [
        Self::Sampler,
        Self::SampledTexture,
        Self::StorageReadOnlyTexture,
        Self::StorageReadWriteTexture,
        Self::ConstantBuffer,
        Self::StorageReadOnlyBuffer,
        Self::StorageReadWriteBuffer,
    ];

    /// Whether descriptors of this type reference a texture view
    pub const fn is_texture(self) -> bool {
        matches!(
            self,
            Self::SampledTexture | Self::StorageReadOnlyTexture | Self::StorageReadWriteTexture
        )
    }

    /// Whether descriptors of this type reference a buffer view
    pub const fn is_buffer(self) -> bool {
        matches!(
            self,
            Self::ConstantBuffer | Self::StorageReadOnlyBuffer | Self::StorageReadWriteBuffer
        )
    }

    /// Inverse of `self as u32`
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Sampler),
            1 => Some(Self::SampledTexture),
            2 => Some(Self::StorageReadOnlyTexture),
            3 => Some(Self::StorageReadWriteTexture),
            4 => Some(Self::ConstantBuffer),
            5 => Some(Self::StorageReadOnlyBuffer),
            6 => Some(Self::StorageReadWriteBuffer),
            _ => None,
        }
    }
}

/// One binding of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBindingDesc {
    /// Resource kind
    pub binding_type: DescriptorBindingType,
    /// Stages that read the binding
    pub visibility: ShaderVisibility,
    /// Array size, 1 for a single descriptor
    pub count: u16,
    /// Explicit binding index, `None` to derive it from the position in the set
    pub binding_index: Option<u16>,
}

impl DescriptorBindingDesc {
    /// Single implicit binding of `binding_type`
    pub const fn new(binding_type: DescriptorBindingType, visibility: ShaderVisibility) -> Self {
        Self {
            binding_type,
            visibility,
            count: 1,
            binding_index: None,
        }
    }

    /// Same binding with `count` array elements
    #[must_use]
    pub const fn with_count(mut self, count: u16) -> Self {
        self.count = count;
        self
    }

    /// Same binding at an explicit index
    #[must_use]
    pub const fn at_index(mut self, binding_index: u16) -> Self {
        self.binding_index = Some(binding_index);
        self
    }
}

/// Bindings making up a descriptor set layout
///
/// Bindings of the same group are expected to be sorted by binding index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorSetDesc {
    /// Bindings, in declaration order
    pub bindings: Vec<DescriptorBindingDesc>,
}

/// Binding with its final index, as stored in a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBinding {
    /// Native binding index
    pub binding: u32,
    /// Resource kind
    pub binding_type: DescriptorBindingType,
    /// Array size
    pub count: u16,
    /// Stages that read the binding
    pub visibility: ShaderVisibility,
}

/// Resource referenced by one descriptor of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorData {
    /// Layout the texture is in when read; ignored for samplers and buffers
    pub texture_layout: TextureLayout,
    /// Sampler, texture view or buffer view handle, depending on the binding type
    pub handle: Handle,
}

impl DescriptorData {
    /// Descriptor for a non-texture resource
    pub fn new(handle: impl Into<Handle>) -> Self {
        Self {
            texture_layout: TextureLayout::Unknown,
            handle: handle.into(),
        }
    }

    /// Descriptor for a texture view read in `layout`
    pub fn texture(handle: impl Into<Handle>, layout: TextureLayout) -> Self {
        Self {
            texture_layout: layout,
            handle: handle.into(),
        }
    }
}

/// Write of consecutive array elements of one binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetWriteInfo {
    /// Packed binding index returned at layout creation
    pub index: u32,
    /// First array element written
    pub array_offset: u16,
    /// Descriptors, one per array element
    pub descriptors: Vec<DescriptorData>,
}

/// Binding index and type packed in one word
///
/// The type occupies the low [`PackedIndex::TYPE_BITS`] bits and the binding the
/// rest. Returned by layout creation and passed back in
/// [`DescriptorSetWriteInfo::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackedIndex(pub u32);

impl PackedIndex {
    /// Bits reserved for the binding type
    pub const TYPE_BITS: u32 = 10;
    const TYPE_MASK: u32 = (1 << Self::TYPE_BITS) - 1;

    /// Pack a binding type and index
    pub const fn new(binding_type: DescriptorBindingType, binding: u32) -> Self {
        Self((binding << Self::TYPE_BITS) | (binding_type as u32 & Self::TYPE_MASK))
    }

    /// Binding index
    pub const fn binding(self) -> u32 {
        self.0 >> Self::TYPE_BITS
    }

    /// Binding type, `None` for a corrupt value
    pub const fn binding_type(self) -> Option<DescriptorBindingType> {
        DescriptorBindingType::from_raw(self.0 & Self::TYPE_MASK)
    }
}

/// Push constant range of a pipeline layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantDesc {
    /// Size in bytes
    pub size_in_bytes: u8,
    /// Offset in bytes
    pub offset: u8,
    /// Stages reading the range
    pub visibility: ShaderVisibility,
}

/// Descriptor set layouts and push constants of a pipeline layout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineLayoutDesc {
    /// Set layouts, in set index order
    pub descriptor_sets: Vec<DescriptorSetLayoutHandle>,
    /// Push constant ranges
    pub push_constants: Vec<PushConstantDesc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_index_round_trips_every_type() {
        for binding_type in DescriptorBindingType::ALL {
            let packed = PackedIndex::new(binding_type, 1234);
            assert_eq!(packed.binding(), 1234);
            assert_eq!(packed.binding_type(), Some(binding_type));
        }
    }

    #[test]
    fn test_packed_index_layout() {
        let packed = PackedIndex::new(DescriptorBindingType::ConstantBuffer, 3);
        assert_eq!(packed.0, (3 << 10) | 4);
    }

    #[test]
    fn test_binding_type_groups() {
        assert!(DescriptorBindingType::StorageReadOnlyTexture.is_texture());
        assert!(DescriptorBindingType::StorageReadOnlyBuffer.is_buffer());
        assert!(!DescriptorBindingType::Sampler.is_texture());
        assert!(!DescriptorBindingType::Sampler.is_buffer());
    }
}
