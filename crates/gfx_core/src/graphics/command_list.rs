//! Scoped command recording
//!
//! A [`CommandList`] is the only way to record into a frame's command buffers. It
//! borrows the [`GraphicsContext`], so the frame cannot be ended while a list is
//! still open, and ends its buffer when dropped.

use crate::graphics::backend::{BindPoint, GraphicsBackend, NativeBarriers, QueueRole};
use crate::graphics::barriers::{BufferMemoryBarrier, GlobalMemoryBarrier, TextureMemoryBarrier};
use crate::graphics::context::GraphicsContext;
use crate::graphics::error::GraphicsResult;
use crate::graphics::handles::{
    BufferHandle, DescriptorSetHandle, PipelineLayoutHandle, TimestampHandle,
};
use crate::graphics::resources::BufferCopy;

/// Command buffer being recorded for the current frame
pub struct CommandList<'a, B: GraphicsBackend> {
    context: &'a GraphicsContext<B>,
    role: QueueRole,
    frame_index: u8,
    buffer: B::CommandBuffer,
    ended: bool,
}

impl<'a, B: GraphicsBackend> CommandList<'a, B> {
    pub(crate) fn new(
        context: &'a GraphicsContext<B>,
        role: QueueRole,
        frame_index: u8,
        buffer: B::CommandBuffer,
    ) -> Self {
        Self {
            context,
            role,
            frame_index,
            buffer,
            ended: false,
        }
    }

    /// Queue role the list is submitted to
    pub fn role(&self) -> QueueRole {
        self.role
    }

    /// Frame context the list records into
    pub fn frame_index(&self) -> u8 {
        self.frame_index
    }

    /// Native command buffer, for backend-specific recording
    pub fn native(&self) -> B::CommandBuffer {
        self.buffer
    }

    /// Record memory barriers
    ///
    /// Barriers naming a stale buffer or texture are dropped; the rest are placed.
    pub fn place_memory_barriers(
        &mut self,
        global: &[GlobalMemoryBarrier],
        buffers: &[BufferMemoryBarrier],
        textures: &[TextureMemoryBarrier],
    ) {
        let resources = self.context.resources();
        let diagnostics = self.context.diagnostics();

        let native_buffers: Vec<_> = buffers
            .iter()
            .filter_map(|barrier| {
                let Some(buffer) = resources.buffer(barrier.buffer) else {
                    diagnostics.verify(
                        false,
                        "command_list.barriers",
                        format_args!("barrier on stale buffer {:?}", barrier.buffer),
                    );
                    return None;
                };
                Some((buffer, *barrier))
            })
            .collect();

        let native_textures: Vec<_> = textures
            .iter()
            .filter_map(|barrier| {
                let Some(texture) = resources.texture(barrier.texture) else {
                    diagnostics.verify(
                        false,
                        "command_list.barriers",
                        format_args!("barrier on stale texture {:?}", barrier.texture),
                    );
                    return None;
                };
                Some((texture, *barrier))
            })
            .collect();

        if global.is_empty() && native_buffers.is_empty() && native_textures.is_empty() {
            return;
        }

        self.context.backend().place_memory_barriers(
            self.buffer,
            &NativeBarriers {
                global,
                buffers: &native_buffers,
                textures: &native_textures,
            },
        );
    }

    /// Record a buffer to buffer copy, `false` if it was rejected
    pub fn copy_buffer(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        region: BufferCopy,
    ) -> bool {
        let resources = self.context.resources();
        let diagnostics = self.context.diagnostics();

        let (Some((src_buffer, src_desc)), Some((dst_buffer, dst_desc))) =
            (resources.buffers.get_all(src.0), resources.buffers.get_all(dst.0))
        else {
            diagnostics.verify(
                false,
                "command_list.copy_buffer",
                format_args!("copy between stale buffers {:?} -> {:?}", src, dst),
            );
            return false;
        };

        let in_range = region
            .src_offset
            .checked_add(region.size)
            .is_some_and(|end| end <= src_desc.size)
            && region
                .dst_offset
                .checked_add(region.size)
                .is_some_and(|end| end <= dst_desc.size);
        if !diagnostics.verify(
            in_range,
            "command_list.copy_buffer",
            format_args!("copy region {:?} out of range", region),
        ) {
            return false;
        }

        self.context
            .backend()
            .copy_buffer(self.buffer, src_buffer, dst_buffer, region);
        true
    }

    /// Write a GPU timestamp, `None` if disabled, exhausted or not on a graphics list
    pub fn put_timestamp(&mut self) -> Option<TimestampHandle> {
        if !self.context.diagnostics().verify(
            self.role == QueueRole::Graphics,
            "command_list.timestamp",
            format_args!("timestamps are only recorded on graphics lists, not {:?}", self.role),
        ) {
            return None;
        }

        let frame_context = self.context.frame_context(self.frame_index);
        let index = frame_context.put_timestamp(self.context.backend(), self.buffer)?;
        Some(TimestampHandle {
            frame_id: self.context.frame_id(),
            index,
        })
    }

    /// Bind descriptor sets for draws at indices `0..sets.len()`
    ///
    /// Sets flagged in `unchanged` are skipped; an empty slice binds every set.
    pub fn set_graphics_descriptor_sets(
        &mut self,
        layout: PipelineLayoutHandle,
        sets: &[DescriptorSetHandle],
        unchanged: &[bool],
    ) {
        self.bind_descriptor_sets(BindPoint::Graphics, layout, sets, unchanged);
    }

    /// Bind descriptor sets for dispatches at indices `0..sets.len()`
    ///
    /// Same skipping rule as [`Self::set_graphics_descriptor_sets`].
    pub fn set_compute_descriptor_sets(
        &mut self,
        layout: PipelineLayoutHandle,
        sets: &[DescriptorSetHandle],
        unchanged: &[bool],
    ) {
        self.bind_descriptor_sets(BindPoint::Compute, layout, sets, unchanged);
    }

    fn bind_descriptor_sets(
        &mut self,
        bind_point: BindPoint,
        layout: PipelineLayoutHandle,
        sets: &[DescriptorSetHandle],
        unchanged: &[bool],
    ) {
        let supported = match bind_point {
            BindPoint::Graphics => self.role == QueueRole::Graphics,
            BindPoint::Compute => self.role != QueueRole::Transfer,
        };
        if !self.context.diagnostics().verify(
            supported,
            "descriptors.bind",
            format_args!("{:?} sets cannot be bound on a {:?} command list", bind_point, self.role),
        ) {
            return;
        }

        self.context.descriptor_sets().bind(
            self.context.backend(),
            self.context.resources(),
            self.context.diagnostics(),
            self.buffer,
            bind_point,
            layout,
            sets,
            unchanged,
            self.frame_index,
        );
    }

    /// Finish recording
    pub fn end(mut self) -> GraphicsResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> GraphicsResult<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;

        match self.context.frame_context(self.frame_index).pool_set(self.role) {
            Some(pool_set) => {
                pool_set.end_command_buffer(
                    self.context.backend(),
                    self.context.diagnostics(),
                    self.buffer,
                )
            }
            None => Ok(()),
        }
    }
}

impl<B: GraphicsBackend> Drop for CommandList<'_, B> {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::error!("Failed to end {:?} command list: {}", self.role, err);
        }
    }
}

impl<B: GraphicsBackend> std::fmt::Debug for CommandList<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("role", &self.role)
            .field("frame_index", &self.frame_index)
            .field("buffer", &self.buffer)
            .finish()
    }
}
