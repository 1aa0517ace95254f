//! Shader-visible descriptor heap planning
//!
//! Every frame context owns one CBV/SRV/UAV heap and one sampler heap. A descriptor
//! set reserves the same linear ranges in each frame's heaps; updating the set
//! plans descriptor copies into those ranges. Copies land in the current frame's
//! heaps immediately and are replayed into the other frames' heaps when each
//! becomes current, the same way the core descriptor set manager replays writes.
//!
//! Heap ranges are bump allocated and never reclaimed. Destroying a set only
//! invalidates its handle.

use crate::config::DescriptorHeapConfig;
use crate::foundation::{Diagnostics, GenerationalPool, MultiFrameDataTracker};
use crate::graphics::barriers::TextureLayout;
use crate::graphics::descriptors::{
    DescriptorBindingType, DescriptorSetDesc, DescriptorSetWriteInfo, ShaderVisibility,
};
use crate::graphics::handles::{
    BufferViewHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, SamplerHandle,
    TextureViewHandle,
};

/// Descriptor range kind of a root descriptor table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RangeType {
    /// Constant buffer views
    BufferCbv = 0,
    /// Read-only structured buffer views
    BufferSrv = 1,
    /// Read/write structured buffer views
    BufferUav = 2,
    /// Sampled or read-only texture views
    TextureSrv = 3,
    /// Read/write texture views
    TextureUav = 4,
    /// Samplers, in their own heap
    Sampler = 5,
}

impl RangeType {
    /// Bits of a packed index holding the range type
    pub const BITS: u32 = 3;
    const MASK: u32 = (1 << Self::BITS) - 1;
    /// Number of range types
    pub const COUNT: usize = 6;

    /// Every range type, in heap order
    pub const ALL: [Self; Self::COUNT] = [
        Self::BufferCbv,
        Self::BufferSrv,
        Self::BufferUav,
        Self::TextureSrv,
        Self::TextureUav,
        Self::Sampler,
    ];

    /// Range type a binding of `binding_type` is placed in
    pub const fn from_binding_type(binding_type: DescriptorBindingType) -> Self {
        match binding_type {
            DescriptorBindingType::ConstantBuffer => Self::BufferCbv,
            DescriptorBindingType::StorageReadOnlyBuffer => Self::BufferSrv,
            DescriptorBindingType::StorageReadWriteBuffer => Self::BufferUav,
            DescriptorBindingType::SampledTexture
            | DescriptorBindingType::StorageReadOnlyTexture => Self::TextureSrv,
            DescriptorBindingType::StorageReadWriteTexture => Self::TextureUav,
            DescriptorBindingType::Sampler => Self::Sampler,
        }
    }

    const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::BufferCbv),
            1 => Some(Self::BufferSrv),
            2 => Some(Self::BufferUav),
            3 => Some(Self::TextureSrv),
            4 => Some(Self::TextureUav),
            5 => Some(Self::Sampler),
            _ => None,
        }
    }

    /// Heap the range lives in
    pub const fn heap(self) -> HeapKind {
        match self {
            Self::Sampler => HeapKind::Sampler,
            _ => HeapKind::CbvSrvUav,
        }
    }

    /// Pack a range type and an offset within the range
    pub const fn pack(self, offset: u32) -> u32 {
        (offset << Self::BITS) | self as u32
    }

    /// Split a packed index into its range type and offset
    pub const fn unpack(packed: u32) -> (Option<Self>, u32) {
        (Self::from_raw(packed & Self::MASK), packed >> Self::BITS)
    }
}

/// Kind of shader-visible descriptor heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// CBV/SRV/UAV heap
    CbvSrvUav,
    /// Sampler heap
    Sampler,
}

/// `D3D12_SHADER_VISIBILITY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dx12ShaderVisibility {
    /// Every stage
    All = 0,
    /// Vertex shader
    Vertex = 1,
    /// Hull shader
    Hull = 2,
    /// Domain shader
    Domain = 3,
    /// Geometry shader
    Geometry = 4,
    /// Pixel shader
    Pixel = 5,
    /// Amplification shader
    Amplification = 6,
    /// Mesh shader
    Mesh = 7,
}

impl Dx12ShaderVisibility {
    /// Single stage visibility, or `All` when several stages (or compute) read the table
    pub fn from_visibility(visibility: ShaderVisibility) -> Self {
        if visibility.bits().count_ones() != 1 {
            return Self::All;
        }
        if visibility == ShaderVisibility::VERTEX {
            Self::Vertex
        } else if visibility == ShaderVisibility::TESSELATION_CONTROL {
            Self::Hull
        } else if visibility == ShaderVisibility::TESSELATION_EVALUATION {
            Self::Domain
        } else if visibility == ShaderVisibility::GEOMETRY {
            Self::Geometry
        } else if visibility == ShaderVisibility::FRAGMENT {
            Self::Pixel
        } else if visibility == ShaderVisibility::TASK {
            Self::Amplification
        } else if visibility == ShaderVisibility::MESH {
            Self::Mesh
        } else {
            Self::All
        }
    }
}

/// Per-range visibility and descriptor totals of a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dx12LayoutData {
    /// Union of the visibilities of the bindings in each range
    pub visibilities: [ShaderVisibility; RangeType::COUNT],
    /// Descriptors in each range
    pub totals: [u32; RangeType::COUNT],
}

impl Dx12LayoutData {
    const EMPTY: Self = Self {
        visibilities: [ShaderVisibility::empty(); RangeType::COUNT],
        totals: [0; RangeType::COUNT],
    };

    fn cbv_srv_uav_total(&self) -> u32 {
        self.totals[..RangeType::Sampler as usize].iter().sum()
    }

    fn sampler_total(&self) -> u32 {
        self.totals[RangeType::Sampler as usize]
    }
}

#[derive(Debug, Clone, Copy)]
struct SetRanges {
    offsets: [u32; RangeType::COUNT],
    sizes: [u32; RangeType::COUNT],
}

impl SetRanges {
    fn cbv_srv_uav_total(&self) -> u32 {
        self.sizes[..RangeType::Sampler as usize].iter().sum()
    }
}

/// Resource a planned descriptor is copied from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorSource {
    /// Sampler descriptor
    Sampler(SamplerHandle),
    /// Texture view, read in `layout`
    TextureView {
        /// Source view
        view: TextureViewHandle,
        /// Layout the texture is read in
        layout: TextureLayout,
    },
    /// Buffer view
    BufferView(BufferViewHandle),
}

/// Copy of one descriptor into a frame's shader-visible heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorCopy {
    /// Frame context whose heap is written
    pub frame_index: u8,
    /// Heap written
    pub heap: HeapKind,
    /// Destination slot in the heap
    pub dst_index: u32,
    /// Descriptor copied
    pub source: DescriptorSource,
}

/// `SetGraphicsRootDescriptorTable` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootTableBinding {
    /// Root parameter index
    pub table_index: u32,
    /// Heap the table points into
    pub heap: HeapKind,
    /// Frame context whose heap is bound
    pub frame_index: u8,
    /// First descriptor of the table in the heap
    pub descriptor_offset: u32,
}

/// Shader-visible heap of one frame context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderVisibleHeap {
    /// Heap kind
    pub kind: HeapKind,
    /// Frame context owning the heap
    pub frame_index: u8,
    /// Descriptor capacity
    pub capacity: u32,
}

/// Heaps to pass to `SetDescriptorHeaps` at the start of a command list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapPair {
    /// CBV/SRV/UAV heap
    pub cbv_srv_uav: ShaderVisibleHeap,
    /// Sampler heap
    pub samplers: ShaderVisibleHeap,
}

/// Descriptor range of a root descriptor table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRange {
    /// Range kind
    pub range_type: RangeType,
    /// Descriptors in the range
    pub count: u32,
    /// Offset from the start of the table
    pub offset_in_table: u32,
}

/// Root descriptor table parameter of a root signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootDescriptorTable {
    /// Root parameter index
    pub table_index: u32,
    /// Heap the table points into
    pub heap: HeapKind,
    /// Ranges, in heap order
    pub ranges: Vec<DescriptorRange>,
    /// Stages reading the table
    pub visibility: Dx12ShaderVisibility,
}

#[derive(Debug, Clone, Copy)]
struct LinearHeap {
    next: u32,
    capacity: u32,
}

impl LinearHeap {
    fn remaining(&self) -> u32 {
        self.capacity - self.next
    }

    fn allocate(&mut self, count: u32) -> u32 {
        let offset = self.next;
        self.next += count;
        offset
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackedCopy {
    set: DescriptorSetHandle,
    packed_index: u32,
    source: DescriptorSource,
}

/// Planner for per-frame shader-visible descriptor heaps
pub struct Dx12DescriptorHeapPlanner {
    frame_count: u8,
    cbv_srv_uav: LinearHeap,
    samplers: LinearHeap,
    layouts: GenerationalPool<Dx12LayoutData>,
    sets: GenerationalPool<SetRanges>,
    tracker: MultiFrameDataTracker<TrackedCopy>,
}

impl Dx12DescriptorHeapPlanner {
    /// Create a planner for `frame_count` frame contexts, `current_index` being current
    pub fn new(heaps: &DescriptorHeapConfig, frame_count: u8, current_index: u8) -> Self {
        log::debug!(
            "DX12 descriptor heaps: {} CBV/SRV/UAV and {} samplers per frame, {} frames",
            heaps.cbv_srv_uav,
            heaps.samplers,
            frame_count
        );
        Self {
            frame_count,
            cbv_srv_uav: LinearHeap {
                next: 0,
                capacity: heaps.cbv_srv_uav,
            },
            samplers: LinearHeap {
                next: 0,
                capacity: heaps.samplers,
            },
            layouts: GenerationalPool::new(),
            sets: GenerationalPool::new(),
            tracker: MultiFrameDataTracker::new(frame_count, current_index),
        }
    }

    /// Create a layout and return the packed index of each binding
    ///
    /// Implicit bindings are appended at the end of their range. An explicit binding
    /// may leave a gap but must not overlap a binding already placed in its range.
    pub fn create_layout(
        &mut self,
        diagnostics: &Diagnostics,
        desc: &DescriptorSetDesc,
    ) -> (DescriptorSetLayoutHandle, Vec<u32>) {
        let mut data = Dx12LayoutData::EMPTY;
        let mut indices = Vec::with_capacity(desc.bindings.len());

        for binding in &desc.bindings {
            let range = RangeType::from_binding_type(binding.binding_type);
            let slot = range as usize;
            data.visibilities[slot] |= binding.visibility;

            let offset = match binding.binding_index {
                None => data.totals[slot],
                Some(explicit) => {
                    let explicit = u32::from(explicit);
                    if !diagnostics.verify(
                        explicit >= data.totals[slot],
                        "dx12.create_layout",
                        format_args!(
                            "binding {} overlaps the {:?} range, already {} long",
                            explicit, range, data.totals[slot]
                        ),
                    ) {
                        return (DescriptorSetLayoutHandle::INVALID, Vec::new());
                    }
                    explicit
                }
            };

            data.totals[slot] = offset + u32::from(binding.count);
            indices.push(range.pack(offset));
        }

        (self.layouts.allocate(data, ()).into(), indices)
    }

    /// Destroy a layout; sets created from it stay valid
    pub fn destroy_layout(&mut self, layout: DescriptorSetLayoutHandle) -> bool {
        self.layouts.free(layout.0).is_some()
    }

    /// Range totals and visibilities of a live layout
    pub fn layout_data(&self, layout: DescriptorSetLayoutHandle) -> Option<&Dx12LayoutData> {
        self.layouts.get(layout.0)
    }

    /// Root descriptor tables of a pipeline layout made of `layouts`
    ///
    /// Table indices match the ones produced by
    /// [`Self::set_graphics_descriptor_sets`] for sets of the same layouts.
    pub fn root_tables(
        &self,
        diagnostics: &Diagnostics,
        layouts: &[DescriptorSetLayoutHandle],
    ) -> Vec<RootDescriptorTable> {
        let mut tables = Vec::new();
        let mut table_index = 0;

        for layout in layouts {
            let Some(data) = self.layouts.get(layout.0) else {
                diagnostics.verify(
                    false,
                    "dx12.root_tables",
                    format_args!("stale layout {:?}", layout),
                );
                return Vec::new();
            };

            let mut ranges = Vec::new();
            let mut visibility = ShaderVisibility::empty();
            let mut offset_in_table = 0;
            for range_type in &RangeType::ALL[..RangeType::Sampler as usize] {
                let count = data.totals[*range_type as usize];
                if count > 0 {
                    ranges.push(DescriptorRange {
                        range_type: *range_type,
                        count,
                        offset_in_table,
                    });
                    visibility |= data.visibilities[*range_type as usize];
                    offset_in_table += count;
                }
            }
            if !ranges.is_empty() {
                tables.push(RootDescriptorTable {
                    table_index,
                    heap: HeapKind::CbvSrvUav,
                    ranges,
                    visibility: Dx12ShaderVisibility::from_visibility(visibility),
                });
                table_index += 1;
            }

            if data.sampler_total() > 0 {
                tables.push(RootDescriptorTable {
                    table_index,
                    heap: HeapKind::Sampler,
                    ranges: vec![DescriptorRange {
                        range_type: RangeType::Sampler,
                        count: data.sampler_total(),
                        offset_in_table: 0,
                    }],
                    visibility: Dx12ShaderVisibility::from_visibility(
                        data.visibilities[RangeType::Sampler as usize],
                    ),
                });
                table_index += 1;
            }
        }

        tables
    }

    /// Reserve heap ranges for a set of `layout`
    ///
    /// The CBV/SRV/UAV ranges are contiguous, in [`RangeType`] order. Running out of
    /// either heap fails softly and reserves nothing.
    pub fn create_set(
        &mut self,
        diagnostics: &Diagnostics,
        layout: DescriptorSetLayoutHandle,
    ) -> DescriptorSetHandle {
        let Some(data) = self.layouts.get(layout.0).copied() else {
            diagnostics.verify(false, "dx12.create_set", format_args!("stale layout {:?}", layout));
            return DescriptorSetHandle::INVALID;
        };

        let cbv_srv_uav_total = data.cbv_srv_uav_total();
        let sampler_total = data.sampler_total();
        if !diagnostics.verify(
            cbv_srv_uav_total <= self.cbv_srv_uav.remaining(),
            "dx12.create_set",
            format_args!(
                "CBV/SRV/UAV heap exhausted: {} requested, {} left",
                cbv_srv_uav_total,
                self.cbv_srv_uav.remaining()
            ),
        ) || !diagnostics.verify(
            sampler_total <= self.samplers.remaining(),
            "dx12.create_set",
            format_args!(
                "sampler heap exhausted: {} requested, {} left",
                sampler_total,
                self.samplers.remaining()
            ),
        ) {
            return DescriptorSetHandle::INVALID;
        }

        let mut offsets = [0; RangeType::COUNT];
        let mut next = self.cbv_srv_uav.allocate(cbv_srv_uav_total);
        for range_type in &RangeType::ALL[..RangeType::Sampler as usize] {
            offsets[*range_type as usize] = next;
            next += data.totals[*range_type as usize];
        }
        offsets[RangeType::Sampler as usize] = self.samplers.allocate(sampler_total);

        self.sets
            .allocate(
                SetRanges {
                    offsets,
                    sizes: data.totals,
                },
                (),
            )
            .into()
    }

    /// Invalidate a set; copies still queued for it are dropped at replay
    pub fn destroy_set(&mut self, set: DescriptorSetHandle) -> bool {
        self.sets.free(set.0).is_some()
    }

    /// Plan the copies of `writes` into the current frame's heaps
    ///
    /// Unless `single_frame`, each copy is also queued for the other frames and
    /// returned by [`Self::next_frame`] when their turn comes.
    pub fn update(
        &mut self,
        diagnostics: &Diagnostics,
        set: DescriptorSetHandle,
        writes: &[DescriptorSetWriteInfo],
        single_frame: bool,
    ) -> Vec<DescriptorCopy> {
        if !diagnostics.verify(
            self.sets.contains(set.0),
            "dx12.update",
            format_args!("stale descriptor set {:?}", set),
        ) {
            return Vec::new();
        }

        let frame_index = self.tracker.current_index();
        let mut copies = Vec::new();
        for write in writes {
            let (Some(range_type), _) = RangeType::unpack(write.index) else {
                diagnostics.verify(
                    false,
                    "dx12.update",
                    format_args!("packed index {:#x} carries no range type", write.index),
                );
                continue;
            };

            for (element, data) in write.descriptors.iter().enumerate() {
                let array_index = u32::from(write.array_offset) + element as u32;
                let source = match range_type {
                    RangeType::Sampler => DescriptorSource::Sampler(data.handle.into()),
                    RangeType::TextureSrv | RangeType::TextureUav => DescriptorSource::TextureView {
                        view: data.handle.into(),
                        layout: data.texture_layout,
                    },
                    RangeType::BufferCbv | RangeType::BufferSrv | RangeType::BufferUav => {
                        DescriptorSource::BufferView(data.handle.into())
                    }
                };
                let tracked = TrackedCopy {
                    set,
                    packed_index: write.index + (array_index << RangeType::BITS),
                    source,
                };

                copies.extend(self.plan_copy(diagnostics, &tracked, frame_index));
                if !single_frame {
                    self.tracker.track_for_other_frames(tracked);
                }
            }
        }
        copies
    }

    fn plan_copy(
        &self,
        diagnostics: &Diagnostics,
        tracked: &TrackedCopy,
        frame_index: u8,
    ) -> Option<DescriptorCopy> {
        // Sets destroyed since the copy was queued are skipped silently.
        let ranges = self.sets.get(tracked.set.0)?;
        let (range_type, relative) = RangeType::unpack(tracked.packed_index);
        let range_type = range_type?;
        let slot = range_type as usize;

        if !diagnostics.verify(
            relative < ranges.sizes[slot],
            "dx12.update",
            format_args!(
                "descriptor {} is past the end of the {:?} range ({} long)",
                relative, range_type, ranges.sizes[slot]
            ),
        ) {
            return None;
        }

        Some(DescriptorCopy {
            frame_index,
            heap: range_type.heap(),
            dst_index: ranges.offsets[slot] + relative,
            source: tracked.source,
        })
    }

    /// Root table bindings for `sets` in the heaps of `frame_index`
    ///
    /// Each set takes one table for its CBV/SRV/UAV ranges and one for its samplers,
    /// when non-empty. `unchanged[i] == true` skips the bindings of set `i` but its
    /// tables still count towards the following table indices.
    pub fn set_graphics_descriptor_sets(
        &self,
        diagnostics: &Diagnostics,
        sets: &[DescriptorSetHandle],
        unchanged: &[bool],
        frame_index: u8,
    ) -> Vec<RootTableBinding> {
        let mut bindings = Vec::new();
        let mut table_index = 0;

        for (set_index, set) in sets.iter().enumerate() {
            let Some(ranges) = self.sets.get(set.0) else {
                diagnostics.verify(
                    false,
                    "dx12.bind",
                    format_args!("stale descriptor set {:?}", set),
                );
                return Vec::new();
            };
            let skip = unchanged.get(set_index).copied().unwrap_or(false);

            if ranges.cbv_srv_uav_total() > 0 {
                if !skip {
                    bindings.push(RootTableBinding {
                        table_index,
                        heap: HeapKind::CbvSrvUav,
                        frame_index,
                        descriptor_offset: ranges.offsets[RangeType::BufferCbv as usize],
                    });
                }
                table_index += 1;
            }

            let sampler = RangeType::Sampler as usize;
            if ranges.sizes[sampler] > 0 {
                if !skip {
                    bindings.push(RootTableBinding {
                        table_index,
                        heap: HeapKind::Sampler,
                        frame_index,
                        descriptor_offset: ranges.offsets[sampler],
                    });
                }
                table_index += 1;
            }
        }

        bindings
    }

    /// Heaps to bind when a graphics command list of `frame_index` begins
    pub fn on_begin_graphics_command_list(&self, frame_index: u8) -> HeapPair {
        HeapPair {
            cbv_srv_uav: ShaderVisibleHeap {
                kind: HeapKind::CbvSrvUav,
                frame_index,
                capacity: self.cbv_srv_uav.capacity,
            },
            samplers: ShaderVisibleHeap {
                kind: HeapKind::Sampler,
                frame_index,
                capacity: self.samplers.capacity,
            },
        }
    }

    /// Make `frame_index` current and return the copies queued for its heaps
    pub fn next_frame(
        &mut self,
        diagnostics: &Diagnostics,
        frame_index: u8,
    ) -> Vec<DescriptorCopy> {
        self.tracker.advance_to_next_frame();
        debug_assert_eq!(self.tracker.current_index(), frame_index);

        let tracked = self.tracker.take_data();
        tracked
            .iter()
            .filter_map(|copy| self.plan_copy(diagnostics, copy, frame_index))
            .collect()
    }

    /// Number of frame contexts the heaps are replicated for
    pub fn frame_count(&self) -> u8 {
        self.frame_count
    }

    /// Copies queued for replay across every frame
    pub fn pending_copies(&self) -> usize {
        self.tracker.pending()
    }
}

impl std::fmt::Debug for Dx12DescriptorHeapPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dx12DescriptorHeapPlanner")
            .field("frame_count", &self.frame_count)
            .field("cbv_srv_uav_used", &self.cbv_srv_uav.next)
            .field("samplers_used", &self.samplers.next)
            .field("layouts", &self.layouts.len())
            .field("sets", &self.sets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::Handle;
    use crate::graphics::descriptors::{DescriptorBindingDesc, DescriptorData};

    fn mixed_layout() -> DescriptorSetDesc {
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
                .with_count(2),
                DescriptorBindingDesc::new(
                    DescriptorBindingType::StorageReadOnlyTexture,
                    ShaderVisibility::FRAGMENT,
                ),
                DescriptorBindingDesc::new(
                    DescriptorBindingType::Sampler,
                    ShaderVisibility::FRAGMENT,
                ),
            ],
        }
    }

    fn planner(frame_count: u8) -> Dx12DescriptorHeapPlanner {
        Dx12DescriptorHeapPlanner::new(&DescriptorHeapConfig::default(), frame_count, 0)
    }

    #[test]
    fn test_read_only_storage_textures_share_the_texture_srv_range() {
        let diagnostics = Diagnostics::new();
        let mut planner = planner(2);

        let (layout, indices) = planner.create_layout(&diagnostics, &mixed_layout());
        assert_eq!(
            indices,
            vec![
                RangeType::BufferCbv.pack(0),
                RangeType::TextureSrv.pack(0),
                RangeType::TextureSrv.pack(2),
                RangeType::Sampler.pack(0),
            ]
        );

        let data = planner.layout_data(layout).expect("Should be live");
        assert_eq!(data.totals, [1, 0, 0, 3, 0, 1]);
        assert_eq!(data.visibilities[RangeType::TextureSrv as usize], ShaderVisibility::FRAGMENT);
    }

    #[test]
    fn test_explicit_bindings_may_gap_but_not_overlap() {
        let diagnostics = Diagnostics::new();
        let mut planner = planner(2);

        let gapped = DescriptorSetDesc {
            bindings: vec![
                DescriptorBindingDesc::new(
                    DescriptorBindingType::ConstantBuffer,
                    ShaderVisibility::ALL,
                ),
                DescriptorBindingDesc::new(
                    DescriptorBindingType::ConstantBuffer,
                    ShaderVisibility::ALL,
                )
                .at_index(4),
                DescriptorBindingDesc::new(
                    DescriptorBindingType::ConstantBuffer,
                    ShaderVisibility::ALL,
                ),
            ],
        };
        let (layout, indices) = planner.create_layout(&diagnostics, &gapped);
        assert!(layout.is_valid());
        assert_eq!(
            indices,
            vec![
                RangeType::BufferCbv.pack(0),
                RangeType::BufferCbv.pack(4),
                RangeType::BufferCbv.pack(5)
            ]
        );

        let overlapping = DescriptorSetDesc {
            bindings: vec![
                DescriptorBindingDesc::new(
                    DescriptorBindingType::Sampler,
                    ShaderVisibility::ALL,
                )
                .with_count(3),
                DescriptorBindingDesc::new(
                    DescriptorBindingType::Sampler,
                    ShaderVisibility::ALL,
                )
                .at_index(1),
            ],
        };
        let (layout, indices) = planner.create_layout(&diagnostics, &overlapping);
        assert!(!layout.is_valid());
        assert!(indices.is_empty());
        assert_eq!(diagnostics.failures_at("dx12.create_layout"), 1);
    }

    #[test]
    fn test_sets_allocate_contiguous_ranges() {
        let diagnostics = Diagnostics::new();
        let mut planner = planner(2);
        let (layout, indices) = planner.create_layout(&diagnostics, &mixed_layout());

        let first = planner.create_set(&diagnostics, layout);
        let second = planner.create_set(&diagnostics, layout);

        let write = DescriptorSetWriteInfo {
            index: indices[2],
            array_offset: 0,
            descriptors: vec![DescriptorData::texture(
                Handle::new(7, 0),
                TextureLayout::ShaderResource,
            )],
        };
        let copies = planner.update(&diagnostics, second, &[write], true);
        assert_eq!(
            copies,
            vec![DescriptorCopy {
                frame_index: 0,
                heap: HeapKind::CbvSrvUav,
                dst_index: 4 + 1 + 2,
                source: DescriptorSource::TextureView {
                    view: TextureViewHandle(Handle::new(7, 0)),
                    layout: TextureLayout::ShaderResource,
                },
            }]
        );

        let bindings = planner.set_graphics_descriptor_sets(&diagnostics, &[first, second], &[], 1);
        assert_eq!(
            bindings,
            vec![
                RootTableBinding {
                    table_index: 0,
                    heap: HeapKind::CbvSrvUav,
                    frame_index: 1,
                    descriptor_offset: 0
                },
                RootTableBinding {
                    table_index: 1,
                    heap: HeapKind::Sampler,
                    frame_index: 1,
                    descriptor_offset: 0
                },
                RootTableBinding {
                    table_index: 2,
                    heap: HeapKind::CbvSrvUav,
                    frame_index: 1,
                    descriptor_offset: 4
                },
                RootTableBinding {
                    table_index: 3,
                    heap: HeapKind::Sampler,
                    frame_index: 1,
                    descriptor_offset: 1
                },
            ]
        );
    }

    #[test]
    fn test_heap_exhaustion_is_a_soft_failure() {
        let diagnostics = Diagnostics::new();
        let config = DescriptorHeapConfig {
            cbv_srv_uav: 6,
            samplers: 64,
        };
        let mut planner = Dx12DescriptorHeapPlanner::new(&config, 2, 0);
        let (layout, _) = planner.create_layout(&diagnostics, &mixed_layout());

        assert!(planner.create_set(&diagnostics, layout).is_valid());
        assert!(!planner.create_set(&diagnostics, layout).is_valid());
        assert_eq!(diagnostics.failures_at("dx12.create_set"), 1);
    }

    #[test]
    fn test_updates_replay_into_other_frames() {
        let diagnostics = Diagnostics::new();
        let mut planner = planner(3);
        let (layout, indices) = planner.create_layout(&diagnostics, &mixed_layout());
        let set = planner.create_set(&diagnostics, layout);
        let sampler = Handle::new(2, 1);

        let write = DescriptorSetWriteInfo {
            index: indices[3],
            array_offset: 0,
            descriptors: vec![DescriptorData::new(sampler)],
        };
        let copies = planner.update(&diagnostics, set, &[write], false);
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].heap, HeapKind::Sampler);
        assert_eq!(planner.pending_copies(), 2);

        let replayed: Vec<u8> = [1, 2, 0]
            .into_iter()
            .flat_map(|frame| planner.next_frame(&diagnostics, frame))
            .map(|copy| copy.frame_index)
            .collect();
        assert_eq!(replayed, vec![1, 2]);
        assert_eq!(planner.pending_copies(), 0);
    }

    #[test]
    fn test_destroyed_set_is_skipped_at_replay() {
        let diagnostics = Diagnostics::new();
        let mut planner = planner(2);
        let (layout, indices) = planner.create_layout(&diagnostics, &mixed_layout());
        let set = planner.create_set(&diagnostics, layout);

        let write = DescriptorSetWriteInfo {
            index: indices[0],
            array_offset: 0,
            descriptors: vec![DescriptorData::new(Handle::new(0, 0))],
        };
        planner.update(&diagnostics, set, &[write], false);
        assert!(planner.destroy_set(set));

        assert!(planner.next_frame(&diagnostics, 1).is_empty());
        assert_eq!(diagnostics.failure_count(), 0);
    }

    #[test]
    fn test_write_past_the_range_fails() {
        let diagnostics = Diagnostics::new();
        let mut planner = planner(2);
        let (layout, indices) = planner.create_layout(&diagnostics, &mixed_layout());
        let set = planner.create_set(&diagnostics, layout);

        let write = DescriptorSetWriteInfo {
            index: indices[3],
            array_offset: 1,
            descriptors: vec![DescriptorData::new(Handle::new(0, 0))],
        };
        assert!(planner.update(&diagnostics, set, &[write], true).is_empty());
        assert_eq!(diagnostics.failures_at("dx12.update"), 1);
    }

    #[test]
    fn test_unchanged_sets_keep_their_table_indices() {
        let diagnostics = Diagnostics::new();
        let mut planner = planner(2);
        let (layout, _) = planner.create_layout(&diagnostics, &mixed_layout());
        let first = planner.create_set(&diagnostics, layout);
        let second = planner.create_set(&diagnostics, layout);

        let bindings = planner.set_graphics_descriptor_sets(
            &diagnostics,
            &[first, second],
            &[true, false],
            0,
        );
        let tables: Vec<u32> = bindings.iter().map(|binding| binding.table_index).collect();
        assert_eq!(tables, vec![2, 3]);

        let root_tables = planner.root_tables(&diagnostics, &[layout, layout]);
        assert_eq!(root_tables.len(), 4);
        assert_eq!(root_tables[2].table_index, 2);
        assert_eq!(root_tables[0].visibility, Dx12ShaderVisibility::All);
        assert_eq!(root_tables[1].visibility, Dx12ShaderVisibility::Pixel);
        assert_eq!(root_tables[0].ranges[1].offset_in_table, 1);
    }

    #[test]
    fn test_heap_pair_belongs_to_the_frame() {
        let planner = planner(2);
        let heaps = planner.on_begin_graphics_command_list(1);
        assert_eq!(heaps.cbv_srv_uav.frame_index, 1);
        assert_eq!(heaps.cbv_srv_uav.capacity, 1024);
        assert_eq!(heaps.samplers.kind, HeapKind::Sampler);
        assert_eq!(heaps.samplers.capacity, 64);
    }
}
