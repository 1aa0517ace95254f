//! Multi-frame descriptor set tracking
//!
//! Every descriptor set has one physical copy per frame context. An update lands in
//! the current frame's copy right away and is queued for the other copies, which may
//! still be read by in-flight work. Each queued write is replayed exactly once, when
//! its slot becomes current again.

use std::collections::BTreeMap;

use crate::foundation::{Diagnostics, GenerationalPool, MultiFrameDataTracker};
use crate::graphics::backend::{BindPoint, GraphicsBackend, NativeDescriptor, NativeDescriptorWrite};
use crate::graphics::descriptors::{
    DescriptorBindingType, DescriptorData, DescriptorSetDesc, DescriptorSetWriteInfo, PackedIndex,
    ResolvedBinding,
};
use crate::graphics::error::GraphicsResult;
use crate::graphics::handles::{
    BufferViewHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, PipelineLayoutHandle,
};
use crate::graphics::resources::Resources;

/// Bindings of a layout and the pool sizes a set of that layout needs
#[derive(Debug, Clone)]
struct LayoutInfo {
    bindings: Vec<ResolvedBinding>,
    pool_sizes: Vec<(DescriptorBindingType, u32)>,
}

#[derive(Debug, Clone)]
struct WriteOp {
    set: DescriptorSetHandle,
    index: u32,
    array_offset: u16,
    descriptors: Vec<DescriptorData>,
}

/// Owner of descriptor set layouts and sets
pub struct DescriptorSetManager<B: GraphicsBackend> {
    frame_count: u8,
    layouts: GenerationalPool<B::DescriptorSetLayout, LayoutInfo>,
    sets: GenerationalPool<B::DescriptorSet, DescriptorSetLayoutHandle>,
    tracker: MultiFrameDataTracker<WriteOp>,
}

impl<B: GraphicsBackend> DescriptorSetManager<B> {
    /// Create an empty manager for `frame_count` frame contexts, `current_index` being current
    pub fn new(frame_count: u8, current_index: u8) -> Self {
        Self {
            frame_count,
            layouts: GenerationalPool::new(),
            sets: GenerationalPool::new(),
            tracker: MultiFrameDataTracker::new(frame_count, current_index),
        }
    }

    /// Create a layout and return the packed index of each binding
    ///
    /// Bindings without an explicit index take their position in the set.
    pub fn create_layout(
        &mut self,
        backend: &B,
        diagnostics: &Diagnostics,
        desc: &DescriptorSetDesc,
    ) -> GraphicsResult<(DescriptorSetLayoutHandle, Vec<u32>)> {
        let bindings: Vec<ResolvedBinding> = desc
            .bindings
            .iter()
            .enumerate()
            .map(|(position, binding)| ResolvedBinding {
                binding: binding.binding_index.map_or(position as u32, u32::from),
                binding_type: binding.binding_type,
                count: binding.count,
                visibility: binding.visibility,
            })
            .collect();

        let mut seen = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            if !diagnostics.verify(
                !seen.contains(&binding.binding),
                "descriptors.create_layout",
                format_args!("binding {} declared twice", binding.binding),
            ) {
                return Ok((DescriptorSetLayoutHandle::INVALID, Vec::new()));
            }
            seen.push(binding.binding);
        }

        let mut totals: BTreeMap<DescriptorBindingType, u32> = BTreeMap::new();
        for binding in &bindings {
            *totals.entry(binding.binding_type).or_default() += u32::from(binding.count);
        }
        let pool_sizes = totals
            .into_iter()
            .map(|(binding_type, count)| (binding_type, count * u32::from(self.frame_count)))
            .collect();

        let native = backend.create_descriptor_set_layout(&bindings)?;
        let indices = bindings
            .iter()
            .map(|binding| PackedIndex::new(binding.binding_type, binding.binding).0)
            .collect();

        let handle = self.layouts.allocate(native, LayoutInfo { bindings, pool_sizes });
        Ok((handle.into(), indices))
    }

    /// Destroy a layout; sets created from it stay valid
    pub fn destroy_layout(&mut self, backend: &B, layout: DescriptorSetLayoutHandle) -> bool {
        match self.layouts.free(layout.0) {
            Some((native, _)) => {
                backend.destroy_descriptor_set_layout(native);
                true
            }
            None => false,
        }
    }

    /// Bindings of a live layout
    pub fn layout_bindings(&self, layout: DescriptorSetLayoutHandle) -> Option<&[ResolvedBinding]> {
        self.layouts.get_cold(layout.0).map(|info| info.bindings.as_slice())
    }

    pub(crate) fn native_layout(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> Option<&B::DescriptorSetLayout> {
        self.layouts.get(layout.0)
    }

    /// Create a set with one copy per frame context
    pub fn create_set(
        &mut self,
        backend: &B,
        diagnostics: &Diagnostics,
        layout: DescriptorSetLayoutHandle,
    ) -> GraphicsResult<DescriptorSetHandle> {
        let Some((native_layout, info)) = self.layouts.get_all(layout.0) else {
            diagnostics.verify(
                false,
                "descriptors.create_set",
                format_args!("stale layout {:?}", layout),
            );
            return Ok(DescriptorSetHandle::INVALID);
        };

        let native = backend.create_descriptor_set(
            native_layout,
            &info.pool_sizes,
            self.frame_count,
        )?;
        Ok(self.sets.allocate(native, layout).into())
    }

    /// Destroy a set; writes still queued for it are dropped at replay
    pub fn destroy_set(&mut self, backend: &B, set: DescriptorSetHandle) -> bool {
        match self.sets.free(set.0) {
            Some((native, _)) => {
                backend.destroy_descriptor_set(native);
                true
            }
            None => false,
        }
    }

    /// Whether `set` is live
    pub fn contains_set(&self, set: DescriptorSetHandle) -> bool {
        self.sets.contains(set.0)
    }

    /// Writes queued for replay across every frame slot
    pub fn pending_writes(&self) -> usize {
        self.tracker.pending()
    }

    /// Write into the current frame's copy, then queue for the others unless `single_frame`
    pub fn update(
        &mut self,
        backend: &B,
        resources: &Resources<B>,
        diagnostics: &Diagnostics,
        set: DescriptorSetHandle,
        writes: &[DescriptorSetWriteInfo],
        single_frame: bool,
    ) {
        if !diagnostics.verify(
            self.sets.contains(set.0),
            "descriptors.update",
            format_args!("stale descriptor set {:?}", set),
        ) {
            return;
        }

        let ops: Vec<WriteOp> = writes
            .iter()
            .map(|write| WriteOp {
                set,
                index: write.index,
                array_offset: write.array_offset,
                descriptors: write.descriptors.clone(),
            })
            .collect();

        self.apply(backend, resources, diagnostics, &ops, self.tracker.current_index());

        if !single_frame {
            for op in ops {
                self.tracker.track_for_other_frames(op);
            }
        }
    }

    /// Make `frame_index` current and replay every write queued for it
    pub fn next_frame(
        &mut self,
        backend: &B,
        resources: &Resources<B>,
        diagnostics: &Diagnostics,
        frame_index: u8,
    ) {
        self.tracker.advance_to_next_frame();
        debug_assert_eq!(self.tracker.current_index(), frame_index);

        let ops = self.tracker.take_data();
        if !ops.is_empty() {
            log::trace!("Replaying {} descriptor writes into frame {}", ops.len(), frame_index);
            self.apply(backend, resources, diagnostics, &ops, frame_index);
        }
    }

    fn apply(
        &self,
        backend: &B,
        resources: &Resources<B>,
        diagnostics: &Diagnostics,
        ops: &[WriteOp],
        frame_index: u8,
    ) {
        let mut start = 0;
        while start < ops.len() {
            let set = ops[start].set;
            let end = ops[start..]
                .iter()
                .position(|op| op.set != set)
                .map_or(ops.len(), |offset| start + offset);

            // Sets destroyed since the write was queued are skipped silently.
            if let Some(native_set) = self.sets.get(set.0) {
                let writes: Vec<NativeDescriptorWrite<'_, B>> = ops[start..end]
                    .iter()
                    .filter_map(|op| Self::resolve_write(resources, diagnostics, op))
                    .collect();
                if !writes.is_empty() {
                    backend.write_descriptor_set(native_set, frame_index, &writes);
                }
            }
            start = end;
        }
    }

    fn resolve_write<'a>(
        resources: &'a Resources<B>,
        diagnostics: &Diagnostics,
        op: &WriteOp,
    ) -> Option<NativeDescriptorWrite<'a, B>> {
        let packed = PackedIndex(op.index);
        let Some(binding_type) = packed.binding_type() else {
            diagnostics.verify(
                false,
                "descriptors.write",
                format_args!("packed index {:#x} carries no binding type", op.index),
            );
            return None;
        };

        let mut descriptors = Vec::with_capacity(op.descriptors.len());
        for data in &op.descriptors {
            let descriptor = match binding_type {
                DescriptorBindingType::Sampler => resources
                    .samplers
                    .get(data.handle)
                    .map(NativeDescriptor::Sampler),
                DescriptorBindingType::SampledTexture
                | DescriptorBindingType::StorageReadOnlyTexture
                | DescriptorBindingType::StorageReadWriteTexture => resources
                    .texture_views
                    .get(data.handle)
                    .map(|view| NativeDescriptor::Texture {
                        view,
                        layout: data.texture_layout,
                    }),
                DescriptorBindingType::ConstantBuffer
                | DescriptorBindingType::StorageReadOnlyBuffer
                | DescriptorBindingType::StorageReadWriteBuffer => resources
                    .buffer_view(BufferViewHandle(data.handle))
                    .and_then(|span| {
                        resources.buffer(span.buffer).map(|buffer| NativeDescriptor::Buffer {
                            buffer,
                            offset: span.offset,
                            size: span.size,
                        })
                    }),
            };

            match descriptor {
                Some(descriptor) => descriptors.push(descriptor),
                None => {
                    diagnostics.verify(
                        false,
                        "descriptors.write",
                        format_args!(
                            "binding {} references a stale {:?} resource",
                            packed.binding(),
                            binding_type
                        ),
                    );
                    return None;
                }
            }
        }

        Some(NativeDescriptorWrite {
            binding: packed.binding(),
            binding_type,
            array_offset: u32::from(op.array_offset),
            descriptors,
        })
    }

    /// Bind each changed set at its position for `frame_index`
    ///
    /// `unchanged[i] == true` skips set `i`; an empty slice binds every set.
    pub fn bind(
        &self,
        backend: &B,
        resources: &Resources<B>,
        diagnostics: &Diagnostics,
        command_buffer: B::CommandBuffer,
        bind_point: BindPoint,
        layout: PipelineLayoutHandle,
        sets: &[DescriptorSetHandle],
        unchanged: &[bool],
        frame_index: u8,
    ) {
        let Some(native_layout) = resources.pipeline_layout(layout) else {
            diagnostics.verify(
                false,
                "descriptors.bind",
                format_args!("stale pipeline layout {:?}", layout),
            );
            return;
        };

        for (set_index, set) in sets.iter().enumerate() {
            if unchanged.get(set_index).copied().unwrap_or(false) {
                continue;
            }
            let Some(native_set) = self.sets.get(set.0) else {
                diagnostics.verify(
                    false,
                    "descriptors.bind",
                    format_args!("stale descriptor set {:?}", set),
                );
                return;
            };
            backend.bind_descriptor_set(
                command_buffer,
                bind_point,
                native_layout,
                set_index as u32,
                native_set,
                frame_index,
            );
        }
    }

    /// Destroy every set and layout
    pub fn destroy_all(&mut self, backend: &B) {
        for (_, native, _) in self.sets.drain() {
            backend.destroy_descriptor_set(native);
        }
        for (_, native, _) in self.layouts.drain() {
            backend.destroy_descriptor_set_layout(native);
        }
        self.tracker = MultiFrameDataTracker::new(self.frame_count, self.tracker.current_index());
    }
}

impl<B: GraphicsBackend> std::fmt::Debug for DescriptorSetManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetManager")
            .field("frame_count", &self.frame_count)
            .field("layouts", &self.layouts.len())
            .field("sets", &self.sets.len())
            .field("pending_writes", &self.tracker.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::headless::{DeviceEvent, HeadlessBackend, HeadlessConfig};
    use crate::graphics::descriptors::{DescriptorBindingDesc, ShaderVisibility};
    use crate::graphics::resources::SamplerDesc;

    fn sampler_layout() -> DescriptorSetDesc {
        DescriptorSetDesc {
            bindings: vec![
                DescriptorBindingDesc::new(
                    DescriptorBindingType::Sampler,
                    ShaderVisibility::FRAGMENT,
                )
                .with_count(2),
                DescriptorBindingDesc::new(
                    DescriptorBindingType::ConstantBuffer,
                    ShaderVisibility::ALL,
                )
                .at_index(5),
            ],
        }
    }

    fn descriptor_writes(backend: &HeadlessBackend) -> Vec<(u8, u32)> {
        backend
            .events()
            .into_iter()
            .filter_map(|event| match event {
                DeviceEvent::DescriptorWrite {
                    frame_index, binding, ..
                } => Some((frame_index, binding)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_layout_packs_implicit_and_explicit_indices() {
        let backend = HeadlessBackend::new(HeadlessConfig::default());
        let diagnostics = Diagnostics::new();
        let mut manager = DescriptorSetManager::<HeadlessBackend>::new(3, 1);

        let (layout, indices) = manager
            .create_layout(&backend, &diagnostics, &sampler_layout())
            .expect("Should create layout");

        assert_eq!(indices[0], PackedIndex::new(DescriptorBindingType::Sampler, 0).0);
        assert_eq!(indices[1], PackedIndex::new(DescriptorBindingType::ConstantBuffer, 5).0);

        let bindings = manager.layout_bindings(layout).expect("Should be live");
        assert_eq!(bindings[1].binding, 5);
        assert_eq!(
            manager.layouts.get_cold(layout.0).expect("Should be live").pool_sizes,
            vec![
                (DescriptorBindingType::Sampler, 6),
                (DescriptorBindingType::ConstantBuffer, 3)
            ]
        );
    }

    #[test]
    fn test_duplicate_binding_is_rejected() {
        let backend = HeadlessBackend::new(HeadlessConfig::default());
        let diagnostics = Diagnostics::new();
        let mut manager = DescriptorSetManager::<HeadlessBackend>::new(2, 1);
        let desc = DescriptorSetDesc {
            bindings: vec![
                DescriptorBindingDesc::new(DescriptorBindingType::Sampler, ShaderVisibility::ALL),
                DescriptorBindingDesc::new(
                    DescriptorBindingType::Sampler,
                    ShaderVisibility::ALL,
                )
                .at_index(0),
            ],
        };

        let (layout, indices) = manager
            .create_layout(&backend, &diagnostics, &desc)
            .expect("Should not fail natively");
        assert!(!layout.is_valid());
        assert!(indices.is_empty());
        assert_eq!(diagnostics.failures_at("descriptors.create_layout"), 1);
    }

    #[test]
    fn test_update_replays_into_every_other_frame_once() {
        let backend = HeadlessBackend::new(HeadlessConfig::default());
        let diagnostics = Diagnostics::new();
        let mut resources = Resources::<HeadlessBackend>::new();
        let sampler = resources
            .create_sampler(&backend, &SamplerDesc::default())
            .expect("Should create sampler");

        let mut manager = DescriptorSetManager::<HeadlessBackend>::new(3, 1);
        let (layout, indices) = manager
            .create_layout(&backend, &diagnostics, &sampler_layout())
            .expect("Should create layout");
        let set = manager
            .create_set(&backend, &diagnostics, layout)
            .expect("Should create set");

        let write = DescriptorSetWriteInfo {
            index: indices[0],
            array_offset: 1,
            descriptors: vec![DescriptorData::new(sampler)],
        };
        manager.update(&backend, &resources, &diagnostics, set, &[write], false);
        assert_eq!(descriptor_writes(&backend), vec![(1, 0)]);

        for frame_index in [2, 0, 1, 2, 0] {
            manager.next_frame(&backend, &resources, &diagnostics, frame_index);
        }

        assert_eq!(descriptor_writes(&backend), vec![(1, 0), (2, 0), (0, 0)]);
        assert_eq!(manager.pending_writes(), 0);
        assert_eq!(diagnostics.failure_count(), 0);
    }

    #[test]
    fn test_single_frame_update_is_not_replayed() {
        let backend = HeadlessBackend::new(HeadlessConfig::default());
        let diagnostics = Diagnostics::new();
        let mut resources = Resources::<HeadlessBackend>::new();
        let sampler = resources
            .create_sampler(&backend, &SamplerDesc::default())
            .expect("Should create sampler");

        let mut manager = DescriptorSetManager::<HeadlessBackend>::new(2, 1);
        let (layout, indices) = manager
            .create_layout(&backend, &diagnostics, &sampler_layout())
            .expect("Should create layout");
        let set = manager
            .create_set(&backend, &diagnostics, layout)
            .expect("Should create set");

        let write = DescriptorSetWriteInfo {
            index: indices[0],
            array_offset: 0,
            descriptors: vec![DescriptorData::new(sampler)],
        };
        manager.update(&backend, &resources, &diagnostics, set, &[write], true);
        assert_eq!(manager.pending_writes(), 0);

        manager.next_frame(&backend, &resources, &diagnostics, 0);
        assert_eq!(descriptor_writes(&backend).len(), 1);
    }

    #[test]
    fn test_destroyed_set_is_skipped_at_replay() {
        let backend = HeadlessBackend::new(HeadlessConfig::default());
        let diagnostics = Diagnostics::new();
        let mut resources = Resources::<HeadlessBackend>::new();
        let sampler = resources
            .create_sampler(&backend, &SamplerDesc::default())
            .expect("Should create sampler");

        let mut manager = DescriptorSetManager::<HeadlessBackend>::new(2, 1);
        let (layout, indices) = manager
            .create_layout(&backend, &diagnostics, &sampler_layout())
            .expect("Should create layout");
        let set = manager
            .create_set(&backend, &diagnostics, layout)
            .expect("Should create set");

        let write = DescriptorSetWriteInfo {
            index: indices[0],
            array_offset: 0,
            descriptors: vec![DescriptorData::new(sampler)],
        };
        manager.update(&backend, &resources, &diagnostics, set, &[write], false);
        assert!(manager.destroy_set(&backend, set));

        manager.next_frame(&backend, &resources, &diagnostics, 0);
        assert_eq!(descriptor_writes(&backend).len(), 1);
        assert_eq!(diagnostics.failure_count(), 0);
    }

    #[test]
    fn test_stale_resource_fails_the_write() {
        let backend = HeadlessBackend::new(HeadlessConfig::default());
        let diagnostics = Diagnostics::new();
        let mut resources = Resources::<HeadlessBackend>::new();
        let sampler = resources
            .create_sampler(&backend, &SamplerDesc::default())
            .expect("Should create sampler");
        assert!(resources.destroy_sampler(&backend, sampler));

        let mut manager = DescriptorSetManager::<HeadlessBackend>::new(2, 1);
        let (layout, indices) = manager
            .create_layout(&backend, &diagnostics, &sampler_layout())
            .expect("Should create layout");
        let set = manager
            .create_set(&backend, &diagnostics, layout)
            .expect("Should create set");

        let write = DescriptorSetWriteInfo {
            index: indices[0],
            array_offset: 0,
            descriptors: vec![DescriptorData::new(sampler)],
        };
        manager.update(&backend, &resources, &diagnostics, set, &[write], true);

        assert!(descriptor_writes(&backend).is_empty());
        assert_eq!(diagnostics.failures_at("descriptors.write"), 1);
    }
}
