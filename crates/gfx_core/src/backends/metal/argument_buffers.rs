//! Argument buffer planning
//!
//! A descriptor set maps to one argument buffer holding `frame_count` copies of the
//! encoded arguments back to back. Frame `i` encodes into and binds the copy at
//! `encoded_length * i`. Writes are expanded into one [`ArgumentWrite`] per array
//! element so replaying them into another frame's copy needs no layout lookup.

use crate::foundation::{Diagnostics, GenerationalPool, Handle, MultiFrameDataTracker};
use crate::graphics::descriptors::{
    DescriptorBindingType, DescriptorSetDesc, DescriptorSetWriteInfo, PackedIndex,
    PipelineLayoutDesc, ShaderVisibility,
};
use crate::graphics::handles::{
    BufferViewHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, PipelineLayoutHandle,
    SamplerHandle, TextureViewHandle,
};

/// Bytes one argument occupies in an encoded argument buffer
pub const ARGUMENT_SLOT_SIZE: u64 = 8;

/// `MTLDataType` of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentDataType {
    /// Sampler state
    Sampler,
    /// Texture
    Texture,
    /// Buffer pointer
    Struct,
}

/// `MTLBindingAccess` of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentAccess {
    /// Read only
    ReadOnly,
    /// Read and write
    ReadWrite,
}

/// `MTLArgumentDescriptor` equivalent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentDescriptor {
    /// First argument index
    pub index: u32,
    /// Data type
    pub data_type: ArgumentDataType,
    /// Shader access
    pub access: ArgumentAccess,
    /// Array length
    pub array_length: u16,
}

impl ArgumentDescriptor {
    fn new(binding_type: DescriptorBindingType, index: u32, array_length: u16) -> Self {
        let data_type = match binding_type {
            DescriptorBindingType::Sampler => ArgumentDataType::Sampler,
            DescriptorBindingType::SampledTexture
            | DescriptorBindingType::StorageReadOnlyTexture
            | DescriptorBindingType::StorageReadWriteTexture => ArgumentDataType::Texture,
            DescriptorBindingType::ConstantBuffer
            | DescriptorBindingType::StorageReadOnlyBuffer
            | DescriptorBindingType::StorageReadWriteBuffer => ArgumentDataType::Struct,
        };
        let access = match binding_type {
            DescriptorBindingType::StorageReadWriteTexture
            | DescriptorBindingType::StorageReadWriteBuffer => ArgumentAccess::ReadWrite,
            _ => ArgumentAccess::ReadOnly,
        };
        Self {
            index,
            data_type,
            access,
            array_length,
        }
    }
}

/// Arguments of a layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentLayout {
    /// One descriptor per binding, in declaration order
    pub descriptors: Vec<ArgumentDescriptor>,
    /// Union of every binding's visibility
    pub visibility: ShaderVisibility,
    /// Argument slots spanned, gaps left by explicit indices included
    pub slot_count: u32,
}

impl ArgumentLayout {
    /// Bytes one frame's copy of the arguments occupies
    pub fn encoded_length(&self) -> u64 {
        u64::from(self.slot_count) * ARGUMENT_SLOT_SIZE
    }
}

/// Storage mode of argument buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageMode {
    /// CPU and GPU share the memory
    #[default]
    Shared,
    /// Separate copies; CPU writes must be flushed with `didModifyRange`
    Managed,
}

/// Size of an argument buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentBufferInfo {
    /// Bytes of one frame's copy
    pub encoded_length: u64,
    /// Bytes of the whole buffer, every frame's copy included
    pub length: u64,
    /// Storage mode
    pub storage: StorageMode,
}

impl ArgumentBufferInfo {
    /// Offset of `frame_index`'s copy
    pub fn frame_offset(&self, frame_index: u8) -> u64 {
        self.encoded_length * u64::from(frame_index)
    }
}

/// One argument write, queued for replay into other frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentWrite {
    /// Argument buffer written
    pub buffer: DescriptorSetHandle,
    /// Packed type and argument index
    pub index: u32,
    /// Sampler, texture view or buffer view
    pub object: Handle,
}

/// Object an argument is encoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    /// `setSamplerState`
    Sampler(SamplerHandle),
    /// `setTexture`
    Texture(TextureViewHandle),
    /// `setBuffer`, at the view's offset
    Buffer(BufferViewHandle),
}

/// Encoding of one argument into one frame's copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentEncodeOp {
    /// Argument buffer encoded into
    pub buffer: DescriptorSetHandle,
    /// Offset of the frame's copy in the buffer
    pub offset: u64,
    /// Argument index
    pub index: u32,
    /// Object encoded
    pub kind: ArgumentKind,
}

/// Byte range of an argument buffer modified by the CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRange {
    /// Argument buffer modified
    pub buffer: DescriptorSetHandle,
    /// First byte
    pub offset: u64,
    /// Bytes modified
    pub length: u64,
}

/// Encodings to perform, and the ranges to flush afterwards for managed storage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentFlush {
    /// Encodings, grouped by buffer
    pub encodes: Vec<ArgumentEncodeOp>,
    /// Ranges to pass to `didModifyRange`; empty for shared storage
    pub dirty_ranges: Vec<DirtyRange>,
}

impl ArgumentFlush {
    /// Whether there is nothing to encode
    pub fn is_empty(&self) -> bool {
        self.encodes.is_empty()
    }
}

/// Push constant buffer index for one shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantBinding {
    /// Stage
    pub stage: ShaderVisibility,
    /// Buffer index the stage reads the push constants from
    pub buffer_index: u8,
}

const PUSH_CONSTANT_STAGES: [ShaderVisibility; 7] = [
    ShaderVisibility::VERTEX,
    ShaderVisibility::TESSELATION_CONTROL,
    ShaderVisibility::TESSELATION_EVALUATION,
    ShaderVisibility::FRAGMENT,
    ShaderVisibility::COMPUTE,
    ShaderVisibility::MESH,
    ShaderVisibility::TASK,
];

/// Planner for per-frame argument buffer copies
pub struct ArgumentBufferPlanner {
    frame_count: u8,
    storage: StorageMode,
    layouts: GenerationalPool<ArgumentLayout>,
    buffers: GenerationalPool<ArgumentBufferInfo>,
    pipeline_layouts: GenerationalPool<Vec<Vec<PushConstantBinding>>>,
    tracker: MultiFrameDataTracker<ArgumentWrite>,
}

impl ArgumentBufferPlanner {
    /// Create a planner for `frame_count` frames, `current_index` being current
    pub fn new(frame_count: u8, current_index: u8, storage: StorageMode) -> Self {
        Self {
            frame_count: frame_count.max(1),
            storage,
            layouts: GenerationalPool::new(),
            buffers: GenerationalPool::new(),
            pipeline_layouts: GenerationalPool::new(),
            tracker: MultiFrameDataTracker::new(frame_count, current_index),
        }
    }

    /// Create an argument layout and return the packed index of each binding
    ///
    /// An implicit binding takes the next argument index after every argument
    /// placed so far, arrays included.
    pub fn create_argument_descriptor(
        &mut self,
        desc: &DescriptorSetDesc,
    ) -> (DescriptorSetLayoutHandle, Vec<u32>) {
        let mut layout = ArgumentLayout {
            descriptors: Vec::with_capacity(desc.bindings.len()),
            visibility: ShaderVisibility::empty(),
            slot_count: 0,
        };
        let mut indices = Vec::with_capacity(desc.bindings.len());
        let mut flattened_size = 0;

        for binding in &desc.bindings {
            let index = binding.binding_index.map_or(flattened_size, u32::from);
            layout
                .descriptors
                .push(ArgumentDescriptor::new(binding.binding_type, index, binding.count));
            indices.push(PackedIndex::new(binding.binding_type, index).0);

            flattened_size = index + u32::from(binding.count);
            layout.slot_count = layout.slot_count.max(flattened_size);
            layout.visibility |= binding.visibility;
        }

        (self.layouts.allocate(layout, ()).into(), indices)
    }

    /// Destroy an argument layout; buffers created from it stay valid
    pub fn destroy_argument_descriptor(&mut self, layout: DescriptorSetLayoutHandle) -> bool {
        self.layouts.free(layout.0).is_some()
    }

    /// Arguments of a live layout
    pub fn argument_layout(&self, layout: DescriptorSetLayoutHandle) -> Option<&ArgumentLayout> {
        self.layouts.get(layout.0)
    }

    /// Create an argument buffer sized for every frame's copy
    pub fn create_argument_buffer(
        &mut self,
        diagnostics: &Diagnostics,
        layout: DescriptorSetLayoutHandle,
    ) -> DescriptorSetHandle {
        let Some(arguments) = self.layouts.get(layout.0) else {
            diagnostics.verify(
                false,
                "metal.create_argument_buffer",
                format_args!("stale layout {:?}", layout),
            );
            return DescriptorSetHandle::INVALID;
        };

        let encoded_length = arguments.encoded_length();
        let info = ArgumentBufferInfo {
            encoded_length,
            length: encoded_length * u64::from(self.frame_count),
            storage: self.storage,
        };
        let handle: DescriptorSetHandle = self.buffers.allocate(info, ()).into();
        log::trace!("Argument buffer {:?}: {} bytes", handle, info.length);
        handle
    }

    /// Destroy an argument buffer; writes still queued for it are dropped
    pub fn destroy_argument_buffer(&mut self, buffer: DescriptorSetHandle) -> bool {
        self.buffers.free(buffer.0).is_some()
    }

    /// Size of a live argument buffer
    pub fn argument_buffer_info(&self, buffer: DescriptorSetHandle) -> Option<ArgumentBufferInfo> {
        self.buffers.get(buffer.0).copied()
    }

    /// Create a pipeline layout and derive the push constant buffer index of each stage
    ///
    /// A stage reads its push constants from the buffer after the last set it sees,
    /// or from buffer 0 when it sees no set.
    pub fn create_pipeline_layout(
        &mut self,
        diagnostics: &Diagnostics,
        desc: &PipelineLayoutDesc,
    ) -> PipelineLayoutHandle {
        let mut set_visibilities = Vec::with_capacity(desc.descriptor_sets.len());
        for set in &desc.descriptor_sets {
            let Some(layout) = self.layouts.get(set.0) else {
                diagnostics.verify(
                    false,
                    "metal.create_pipeline_layout",
                    format_args!("stale layout {:?}", set),
                );
                return PipelineLayoutHandle::INVALID;
            };
            set_visibilities.push(layout.visibility);
        }

        let push_constants: Vec<Vec<PushConstantBinding>> = desc
            .push_constants
            .iter()
            .map(|push_constant| {
                PUSH_CONSTANT_STAGES
                    .iter()
                    .filter(|stage| push_constant.visibility.intersects(**stage))
                    .map(|stage| PushConstantBinding {
                        stage: *stage,
                        buffer_index: set_visibilities
                            .iter()
                            .rposition(|visibility| visibility.intersects(*stage))
                            .map_or(0, |set_index| set_index as u8 + 1),
                    })
                    .collect()
            })
            .collect();

        self.pipeline_layouts.allocate(push_constants, ()).into()
    }

    /// Destroy a pipeline layout
    pub fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) -> bool {
        self.pipeline_layouts.free(layout.0).is_some()
    }

    /// Buffer index `stage` reads push constant range `push_constant` from
    pub fn push_constant_buffer_index(
        &self,
        layout: PipelineLayoutHandle,
        push_constant: usize,
        stage: ShaderVisibility,
    ) -> Option<u8> {
        self.pipeline_layouts
            .get(layout.0)?
            .get(push_constant)?
            .iter()
            .find(|binding| binding.stage == stage)
            .map(|binding| binding.buffer_index)
    }

    /// Plan the encodings of `writes` into the current frame's copy
    ///
    /// Unless `single_frame`, each element is also queued for the other frames.
    pub fn update_argument_buffer(
        &mut self,
        diagnostics: &Diagnostics,
        buffer: DescriptorSetHandle,
        writes: &[DescriptorSetWriteInfo],
        single_frame: bool,
    ) -> ArgumentFlush {
        if !diagnostics.verify(
            self.buffers.contains(buffer.0),
            "metal.update",
            format_args!("stale argument buffer {:?}", buffer),
        ) {
            return ArgumentFlush::default();
        }

        let mut updates = Vec::new();
        for write in writes {
            let packed = PackedIndex(write.index);
            let Some(binding_type) = packed.binding_type() else {
                diagnostics.verify(
                    false,
                    "metal.update",
                    format_args!("packed index {:#x} carries no binding type", write.index),
                );
                continue;
            };

            for (element, data) in write.descriptors.iter().enumerate() {
                let index = packed.binding() + u32::from(write.array_offset) + element as u32;
                let update = ArgumentWrite {
                    buffer,
                    index: PackedIndex::new(binding_type, index).0,
                    object: data.handle,
                };
                if !single_frame {
                    self.tracker.track_for_other_frames(update);
                }
                updates.push(update);
            }
        }

        self.flush_updates(&updates, self.tracker.current_index())
    }

    /// Make `frame_index` current and plan the writes queued for its copies
    pub fn update_and_flush_argument_buffers(&mut self, frame_index: u8) -> ArgumentFlush {
        self.tracker.advance_to_next_frame();
        debug_assert_eq!(self.tracker.current_index(), frame_index);

        let updates = self.tracker.take_data();
        self.flush_updates(&updates, frame_index)
    }

    fn flush_updates(&self, updates: &[ArgumentWrite], frame_index: u8) -> ArgumentFlush {
        let mut flush = ArgumentFlush::default();

        for update in updates {
            // Buffers destroyed since the write was queued are skipped silently.
            let Some(info) = self.buffers.get(update.buffer.0) else {
                continue;
            };
            let packed = PackedIndex(update.index);
            let Some(binding_type) = packed.binding_type() else {
                continue;
            };

            let offset = info.frame_offset(frame_index);
            if info.storage == StorageMode::Managed
                && flush.dirty_ranges.last().map(|range| range.buffer) != Some(update.buffer)
            {
                flush.dirty_ranges.push(DirtyRange {
                    buffer: update.buffer,
                    offset,
                    length: info.encoded_length,
                });
            }

            let kind = match binding_type {
                DescriptorBindingType::Sampler => ArgumentKind::Sampler(update.object.into()),
                DescriptorBindingType::SampledTexture
                | DescriptorBindingType::StorageReadOnlyTexture
                | DescriptorBindingType::StorageReadWriteTexture => {
                    ArgumentKind::Texture(update.object.into())
                }
                DescriptorBindingType::ConstantBuffer
                | DescriptorBindingType::StorageReadOnlyBuffer
                | DescriptorBindingType::StorageReadWriteBuffer => {
                    ArgumentKind::Buffer(update.object.into())
                }
            };
            flush.encodes.push(ArgumentEncodeOp {
                buffer: update.buffer,
                offset,
                index: packed.binding(),
                kind,
            });
        }

        flush
    }

    /// Writes queued for replay across every frame
    pub fn pending_writes(&self) -> usize {
        self.tracker.pending()
    }
}

impl std::fmt::Debug for ArgumentBufferPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentBufferPlanner")
            .field("frame_count", &self.frame_count)
            .field("storage", &self.storage)
            .field("layouts", &self.layouts.len())
            .field("buffers", &self.buffers.len())
            .field("pending_writes", &self.tracker.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::descriptors::{DescriptorBindingDesc, DescriptorData, PushConstantDesc};

    fn material_layout() -> DescriptorSetDesc {
        DescriptorSetDesc {
            bindings: vec![
                DescriptorBindingDesc::new(
                    DescriptorBindingType::ConstantBuffer,
                    ShaderVisibility::VERTEX,
                ),
                DescriptorBindingDesc::new(
                    DescriptorBindingType::SampledTexture,
                    ShaderVisibility::FRAGMENT,
                )
                .with_count(3),
                DescriptorBindingDesc::new(
                    DescriptorBindingType::Sampler,
                    ShaderVisibility::FRAGMENT,
                ),
            ],
        }
    }

    #[test]
    fn test_implicit_indices_follow_the_flattened_size() {
        let mut planner = ArgumentBufferPlanner::new(2, 0, StorageMode::Shared);
        let (layout, indices) = planner.create_argument_descriptor(&material_layout());

        let bindings: Vec<u32> =
            indices.iter().map(|index| PackedIndex(*index).binding()).collect();
        assert_eq!(bindings, vec![0, 1, 4]);

        let arguments = planner.argument_layout(layout).expect("Should be live");
        assert_eq!(arguments.visibility, ShaderVisibility::VERTEX | ShaderVisibility::FRAGMENT);
        assert_eq!(arguments.encoded_length(), 5 * ARGUMENT_SLOT_SIZE);
        assert_eq!(arguments.descriptors[1].data_type, ArgumentDataType::Texture);
        assert_eq!(arguments.descriptors[0].access, ArgumentAccess::ReadOnly);
    }

    #[test]
    fn test_buffer_holds_one_copy_per_frame() {
        let diagnostics = Diagnostics::new();
        let mut planner = ArgumentBufferPlanner::new(3, 0, StorageMode::Shared);
        let (layout, _) = planner.create_argument_descriptor(&material_layout());
        let buffer = planner.create_argument_buffer(&diagnostics, layout);

        let info = planner.argument_buffer_info(buffer).expect("Should be live");
        assert_eq!(info.encoded_length, 40);
        assert_eq!(info.length, 120);
        assert_eq!(info.frame_offset(2), 80);

        assert!(planner.destroy_argument_descriptor(layout));
        assert!(!planner.create_argument_buffer(&diagnostics, layout).is_valid());
        assert_eq!(diagnostics.failures_at("metal.create_argument_buffer"), 1);
    }

    #[test]
    fn test_update_expands_arrays_and_replays() {
        let diagnostics = Diagnostics::new();
        let mut planner = ArgumentBufferPlanner::new(2, 0, StorageMode::Managed);
        let (layout, indices) = planner.create_argument_descriptor(&material_layout());
        let buffer = planner.create_argument_buffer(&diagnostics, layout);

        let write = DescriptorSetWriteInfo {
            index: indices[1],
            array_offset: 1,
            descriptors: vec![
                DescriptorData::new(Handle::new(4, 0)),
                DescriptorData::new(Handle::new(5, 0)),
            ],
        };
        let flush = planner.update_argument_buffer(&diagnostics, buffer, &[write], false);
        let arguments: Vec<(u64, u32)> =
            flush.encodes.iter().map(|op| (op.offset, op.index)).collect();
        assert_eq!(arguments, vec![(0, 2), (0, 3)]);
        assert_eq!(
            flush.encodes[0].kind,
            ArgumentKind::Texture(TextureViewHandle(Handle::new(4, 0)))
        );
        assert_eq!(
            flush.dirty_ranges,
            vec![DirtyRange {
                buffer,
                offset: 0,
                length: 40
            }]
        );

        let replay = planner.update_and_flush_argument_buffers(1);
        let arguments: Vec<(u64, u32)> =
            replay.encodes.iter().map(|op| (op.offset, op.index)).collect();
        assert_eq!(arguments, vec![(40, 2), (40, 3)]);
        assert_eq!(replay.dirty_ranges[0].offset, 40);

        assert!(planner.update_and_flush_argument_buffers(0).is_empty());
    }

    #[test]
    fn test_shared_storage_reports_no_dirty_range() {
        let diagnostics = Diagnostics::new();
        let mut planner = ArgumentBufferPlanner::new(2, 0, StorageMode::Shared);
        let (layout, indices) = planner.create_argument_descriptor(&material_layout());
        let buffer = planner.create_argument_buffer(&diagnostics, layout);

        let write = DescriptorSetWriteInfo {
            index: indices[2],
            array_offset: 0,
            descriptors: vec![DescriptorData::new(Handle::new(0, 0))],
        };
        let flush = planner.update_argument_buffer(&diagnostics, buffer, &[write], true);
        assert_eq!(flush.encodes.len(), 1);
        assert!(flush.dirty_ranges.is_empty());
        assert_eq!(planner.pending_writes(), 0);
    }

    #[test]
    fn test_destroyed_buffer_is_skipped_at_replay() {
        let diagnostics = Diagnostics::new();
        let mut planner = ArgumentBufferPlanner::new(2, 0, StorageMode::Shared);
        let (layout, indices) = planner.create_argument_descriptor(&material_layout());
        let buffer = planner.create_argument_buffer(&diagnostics, layout);

        let write = DescriptorSetWriteInfo {
            index: indices[0],
            array_offset: 0,
            descriptors: vec![DescriptorData::new(Handle::new(0, 0))],
        };
        planner.update_argument_buffer(&diagnostics, buffer, &[write], false);
        assert!(planner.destroy_argument_buffer(buffer));

        assert!(planner.update_and_flush_argument_buffers(1).is_empty());
        assert_eq!(diagnostics.failure_count(), 0);
    }

    #[test]
    fn test_push_constants_follow_the_last_visible_set() {
        let diagnostics = Diagnostics::new();
        let mut planner = ArgumentBufferPlanner::new(2, 0, StorageMode::Shared);
        let (material, _) = planner.create_argument_descriptor(&material_layout());
        let (compute_only, _) = planner.create_argument_descriptor(&DescriptorSetDesc {
            bindings: vec![DescriptorBindingDesc::new(
                DescriptorBindingType::StorageReadWriteBuffer,
                ShaderVisibility::COMPUTE,
            )],
        });

        let layout = planner.create_pipeline_layout(
            &diagnostics,
            &PipelineLayoutDesc {
                descriptor_sets: vec![material, compute_only],
                push_constants: vec![PushConstantDesc {
                    size_in_bytes: 16,
                    offset: 0,
                    visibility: ShaderVisibility::VERTEX
                        | ShaderVisibility::COMPUTE
                        | ShaderVisibility::MESH,
                }],
            },
        );

        assert_eq!(
            planner.push_constant_buffer_index(layout, 0, ShaderVisibility::VERTEX),
            Some(1)
        );
        assert_eq!(
            planner.push_constant_buffer_index(layout, 0, ShaderVisibility::COMPUTE),
            Some(2)
        );
        assert_eq!(planner.push_constant_buffer_index(layout, 0, ShaderVisibility::MESH), Some(0));
        assert_eq!(planner.push_constant_buffer_index(layout, 0, ShaderVisibility::FRAGMENT), None);
        assert!(planner.destroy_pipeline_layout(layout));
    }
}
