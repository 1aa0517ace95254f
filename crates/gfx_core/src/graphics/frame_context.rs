//! Per-frame-slot command pools and synchronization
//!
//! A [`FrameContext`] owns everything one frame in flight needs: a
//! [`CommandPoolSet`] per queue role, the fence each role signals on completion, the
//! semaphore presentation waits on, and optionally a timestamp query pool.
//!
//! Command buffers cycle `available -> recording -> used -> available`. A buffer
//! returns to `available` only through [`CommandPoolSet::reset`], which the frame
//! ring calls after the slot's fences have been waited on.
//!
//! Only one buffer per pool set records at a time. A second recorder on the same
//! queue role blocks until the first one ends.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::foundation::Diagnostics;
use crate::graphics::backend::{GraphicsBackend, QueueRole};
use crate::graphics::error::GraphicsResult;

struct PoolState<B: GraphicsBackend> {
    available: Vec<B::CommandBuffer>,
    used: Vec<B::CommandBuffer>,
    recording: Option<B::CommandBuffer>,
}

/// Command pool, fence and semaphore of one queue role in one frame slot
pub struct CommandPoolSet<B: GraphicsBackend> {
    role: QueueRole,
    pool: B::CommandPool,
    state: Mutex<PoolState<B>>,
    recording_done: Condvar,
    fence: B::Fence,
    semaphore: B::Semaphore,
}

impl<B: GraphicsBackend> CommandPoolSet<B> {
    /// Create the native pool and sync objects; the fence starts signaled
    pub fn new(backend: &B, role: QueueRole) -> GraphicsResult<Self> {
        let pool = backend.create_command_pool(role)?;
        let fence = match backend.create_fence(true) {
            Ok(fence) => fence,
            Err(err) => {
                backend.destroy_command_pool(pool);
                return Err(err);
            }
        };
        let semaphore = match backend.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(err) => {
                backend.destroy_fence(fence);
                backend.destroy_command_pool(pool);
                return Err(err);
            }
        };

        Ok(Self {
            role,
            pool,
            state: Mutex::new(PoolState {
                available: Vec::new(),
                used: Vec::new(),
                recording: None,
            }),
            recording_done: Condvar::new(),
            fence,
            semaphore,
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue role served by this set
    pub fn role(&self) -> QueueRole {
        self.role
    }

    /// Fence signaled when this set's last submission completes
    pub fn fence(&self) -> B::Fence {
        self.fence
    }

    /// Semaphore signaled when this set's last submission completes
    pub fn semaphore(&self) -> B::Semaphore {
        self.semaphore
    }

    /// Start recording into a recycled or freshly allocated command buffer
    ///
    /// Blocks while another buffer of this set is recording.
    pub fn begin_command_buffer(&self, backend: &B) -> GraphicsResult<B::CommandBuffer> {
        let mut state = self
            .recording_done
            .wait_while(self.lock(), |state| state.recording.is_some())
            .unwrap_or_else(PoisonError::into_inner);

        let buffer = match state.available.pop() {
            Some(buffer) => buffer,
            None => backend.allocate_command_buffer(self.pool)?,
        };

        if let Err(err) = backend.begin_command_buffer(buffer) {
            state.available.push(buffer);
            drop(state);
            self.recording_done.notify_one();
            return Err(err);
        }

        state.used.push(buffer);
        state.recording = Some(buffer);
        Ok(buffer)
    }

    /// Finish recording `buffer` and let the next recorder in
    pub fn end_command_buffer(
        &self,
        backend: &B,
        diagnostics: &Diagnostics,
        buffer: B::CommandBuffer,
    ) -> GraphicsResult<()> {
        let mut state = self.lock();
        let is_current = state.recording == Some(buffer) && state.used.contains(&buffer);
        if !diagnostics.verify(
            is_current,
            "frame_context.end_command_buffer",
            format_args!("{:?} is not recording on the {:?} pool set", buffer, self.role),
        ) {
            return Ok(());
        }

        state.recording = None;
        let result = backend.end_command_buffer(buffer);
        drop(state);
        self.recording_done.notify_one();
        result
    }

    /// Snapshot of the buffers recorded since the last reset, in recording order
    pub fn used_command_buffers(&self) -> Vec<B::CommandBuffer> {
        self.lock().used.clone()
    }

    /// Whether anything was recorded since the last reset
    pub fn has_used_command_buffers(&self) -> bool {
        !self.lock().used.is_empty()
    }

    /// Recycle every used buffer
    ///
    /// Must only run once this set's fence is known to be signaled.
    pub fn reset(&mut self, backend: &B, diagnostics: &Diagnostics) -> GraphicsResult<()> {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !diagnostics.verify(
            state.recording.is_none(),
            "frame_context.reset",
            format_args!("resetting the {:?} pool set while recording", self.role),
        ) {
            return Ok(());
        }

        for buffer in &state.used {
            backend.reset_command_buffer(*buffer)?;
        }
        let used = std::mem::take(&mut state.used);
        state.available.extend(used);
        Ok(())
    }

    /// Release every native object
    pub fn destroy(mut self, backend: &B, diagnostics: &Diagnostics) {
        backend.destroy_semaphore(self.semaphore);

        let signaled = backend.fence_status(self.fence).unwrap_or(false);
        diagnostics.verify(
            signaled,
            "frame_context.destroy",
            format_args!("destroying the {:?} pool set while its work is in flight", self.role),
        );
        backend.destroy_fence(self.fence);

        if self.has_used_command_buffers() {
            if let Err(err) = self.reset(backend, diagnostics) {
                log::error!("Failed to reset {:?} command buffers on destroy: {}", self.role, err);
            }
        }

        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let buffers: Vec<B::CommandBuffer> =
            state.available.drain(..).chain(state.used.drain(..)).collect();
        if !buffers.is_empty() {
            backend.free_command_buffers(self.pool, &buffers);
        }
        backend.destroy_command_pool(self.pool);
    }
}

/// Per-slot timestamp query pool and its last resolved values
struct TimestampPool<B: GraphicsBackend> {
    pool: B::QueryPool,
    capacity: u32,
    next: AtomicU32,
    needs_reset: AtomicBool,
    resolved: Vec<u64>,
    resolved_frame: Option<u64>,
}

/// Everything one frame in flight owns
pub struct FrameContext<B: GraphicsBackend> {
    index: u8,
    transfer: Option<CommandPoolSet<B>>,
    compute: Option<CommandPoolSet<B>>,
    graphics: Option<CommandPoolSet<B>>,
    fences: Vec<B::Fence>,
    frame_id: u64,
    timestamps: Option<TimestampPool<B>>,
}

impl<B: GraphicsBackend> FrameContext<B> {
    /// Create pool sets for every queue the backend exposes
    ///
    /// On failure every object created so far is released again.
    pub fn new(
        backend: &B,
        diagnostics: &Diagnostics,
        index: u8,
        timestamp_queries: u32,
    ) -> GraphicsResult<Self> {
        let mut context = Self {
            index,
            transfer: None,
            compute: None,
            graphics: None,
            fences: Vec::with_capacity(3),
            frame_id: 0,
            timestamps: None,
        };

        if let Err(err) = context.create_objects(backend, timestamp_queries) {
            context.destroy(backend, diagnostics);
            return Err(err);
        }
        Ok(context)
    }

    fn create_objects(&mut self, backend: &B, timestamp_queries: u32) -> GraphicsResult<()> {
        for role in QueueRole::SUBMISSION_ORDER {
            if !backend.has_queue(role) {
                continue;
            }
            let pool_set = CommandPoolSet::new(backend, role)?;
            self.fences.push(pool_set.fence());
            match role {
                QueueRole::Transfer => self.transfer = Some(pool_set),
                QueueRole::Compute => self.compute = Some(pool_set),
                QueueRole::Graphics => self.graphics = Some(pool_set),
            }
        }

        if timestamp_queries > 0 {
            self.timestamps = Some(TimestampPool {
                pool: backend.create_query_pool(timestamp_queries)?,
                capacity: timestamp_queries,
                next: AtomicU32::new(0),
                needs_reset: AtomicBool::new(true),
                resolved: Vec::with_capacity(timestamp_queries as usize),
                resolved_frame: None,
            });
        }
        Ok(())
    }

    /// Position of this context in the ring
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Last frame submitted from this slot
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub(crate) fn set_frame_id(&mut self, frame_id: u64) {
        self.frame_id = frame_id;
    }

    /// Pool set of `role`, if the backend has that queue
    pub fn pool_set(&self, role: QueueRole) -> Option<&CommandPoolSet<B>> {
        match role {
            QueueRole::Transfer => self.transfer.as_ref(),
            QueueRole::Compute => self.compute.as_ref(),
            QueueRole::Graphics => self.graphics.as_ref(),
        }
    }

    fn pool_sets_mut(&mut self) -> impl Iterator<Item = &mut CommandPoolSet<B>> {
        [&mut self.transfer, &mut self.compute, &mut self.graphics]
            .into_iter()
            .flatten()
    }

    /// Fences of every pool set
    pub fn fences(&self) -> &[B::Fence] {
        &self.fences
    }

    /// Begin a command buffer on `role`
    ///
    /// The first graphics buffer after a timestamp resolve also records the query
    /// pool reset.
    pub fn begin_command_buffer(
        &self,
        backend: &B,
        role: QueueRole,
    ) -> GraphicsResult<Option<B::CommandBuffer>> {
        let Some(pool_set) = self.pool_set(role) else {
            return Ok(None);
        };
        let buffer = pool_set.begin_command_buffer(backend)?;

        if role == QueueRole::Graphics {
            if let Some(timestamps) = &self.timestamps {
                if timestamps.needs_reset.swap(false, Ordering::AcqRel) {
                    backend.reset_queries(buffer, timestamps.pool, timestamps.capacity);
                }
            }
        }
        Ok(Some(buffer))
    }

    /// Block until the submission of `frame_id` from this slot has completed
    ///
    /// Returns at once if the slot has already moved on to a later frame: its fences
    /// were waited on before that reuse.
    pub fn wait_for_fences(&self, backend: &B, frame_id: u64) -> GraphicsResult<()> {
        if self.frame_id > frame_id {
            return Ok(());
        }
        backend.wait_for_fences(&self.fences, u64::MAX)
    }

    /// Whether the submission of `frame_id` from this slot has completed
    pub fn is_frame_executed(&self, backend: &B, frame_id: u64) -> GraphicsResult<bool> {
        if self.frame_id > frame_id {
            return Ok(true);
        }
        if self.frame_id < frame_id {
            return Ok(false);
        }
        for fence in &self.fences {
            if !backend.fence_status(*fence)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Recycle the command buffers of every pool set
    pub fn reset_pools(&mut self, backend: &B, diagnostics: &Diagnostics) -> GraphicsResult<()> {
        for pool_set in self.pool_sets_mut() {
            pool_set.reset(backend, diagnostics)?;
        }
        Ok(())
    }

    /// Claim the next timestamp query, `None` when disabled or exhausted
    pub fn put_timestamp(&self, backend: &B, buffer: B::CommandBuffer) -> Option<u32> {
        let timestamps = self.timestamps.as_ref()?;
        let index = timestamps.next.fetch_add(1, Ordering::AcqRel);
        if index >= timestamps.capacity {
            timestamps.next.store(timestamps.capacity, Ordering::Release);
            return None;
        }
        backend.write_timestamp(buffer, timestamps.pool, index);
        Some(index)
    }

    /// Read back the timestamps of the slot's last frame, in nanoseconds
    ///
    /// Runs at most once per submitted frame; the fences must be signaled.
    pub fn resolve_timestamps(&mut self, backend: &B) -> GraphicsResult<()> {
        let frame_id = self.frame_id;
        let Some(timestamps) = self.timestamps.as_mut() else {
            return Ok(());
        };
        if timestamps.resolved_frame == Some(frame_id) {
            return Ok(());
        }

        let count = timestamps.next.load(Ordering::Acquire).min(timestamps.capacity);
        timestamps.resolved.clear();
        timestamps.resolved.resize(count as usize, 0);
        if count > 0 {
            backend.read_timestamps(timestamps.pool, &mut timestamps.resolved)?;
            let period = backend.timestamp_period_ns();
            for ticks in &mut timestamps.resolved {
                *ticks = (*ticks as f64 * period) as u64;
            }
        }

        timestamps.resolved_frame = Some(frame_id);
        timestamps.needs_reset.store(true, Ordering::Release);
        timestamps.next.store(0, Ordering::Release);
        Ok(())
    }

    /// Resolved timestamps of `frame_id`, if this slot still holds them
    pub fn resolved_timestamps(&self, frame_id: u64) -> Option<&[u64]> {
        let timestamps = self.timestamps.as_ref()?;
        (timestamps.resolved_frame == Some(frame_id)).then_some(timestamps.resolved.as_slice())
    }

    /// Release every native object; the slot's work must have completed
    pub fn destroy(&mut self, backend: &B, diagnostics: &Diagnostics) {
        for pool_set in [self.transfer.take(), self.compute.take(), self.graphics.take()]
            .into_iter()
            .flatten()
        {
            pool_set.destroy(backend, diagnostics);
        }
        self.fences.clear();

        if let Some(timestamps) = self.timestamps.take() {
            backend.destroy_query_pool(timestamps.pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::headless::{CompletionMode, DeviceEvent, HeadlessBackend, HeadlessConfig};

    #[test]
    fn test_reset_recycles_used_buffers() {
        let backend = HeadlessBackend::new(HeadlessConfig::default());
        let diagnostics = Diagnostics::new();
        let mut pool_set =
            CommandPoolSet::new(&backend, QueueRole::Graphics).expect("Should create pool set");

        let first = pool_set.begin_command_buffer(&backend).expect("Should begin");
        pool_set
            .end_command_buffer(&backend, &diagnostics, first)
            .expect("Should end");
        assert_eq!(pool_set.used_command_buffers(), vec![first]);

        pool_set.reset(&backend, &diagnostics).expect("Should reset");
        assert!(!pool_set.has_used_command_buffers());

        let second = pool_set.begin_command_buffer(&backend).expect("Should begin");
        assert_eq!(first, second, "reset buffers are reused before allocating");
        pool_set
            .end_command_buffer(&backend, &diagnostics, second)
            .expect("Should end");
        pool_set.destroy(&backend, &diagnostics);

        assert_eq!(diagnostics.failure_count(), 0);
        assert_eq!(backend.live_sync_objects(), 0);
    }

    #[test]
    fn test_ending_a_foreign_buffer_is_a_soft_failure() {
        let backend = HeadlessBackend::new(HeadlessConfig::default());
        let diagnostics = Diagnostics::new();
        let pool_set =
            CommandPoolSet::new(&backend, QueueRole::Graphics).expect("Should create pool set");
        let other =
            CommandPoolSet::new(&backend, QueueRole::Graphics).expect("Should create pool set");

        let buffer = other.begin_command_buffer(&backend).expect("Should begin");
        pool_set
            .end_command_buffer(&backend, &diagnostics, buffer)
            .expect("Should not fail natively");
        assert_eq!(diagnostics.failures_at("frame_context.end_command_buffer"), 1);

        other
            .end_command_buffer(&backend, &diagnostics, buffer)
            .expect("Should end");
    }

    #[test]
    fn test_wait_short_circuits_for_recycled_slot() {
        let backend = HeadlessBackend::new(HeadlessConfig {
            completion: CompletionMode::Deferred,
            ..HeadlessConfig::default()
        });
        let mut context = FrameContext::new(&backend, &Diagnostics::new(), 0, 0)
            .expect("Should create frame context");
        context.set_frame_id(7);
        backend.take_events();

        context.wait_for_fences(&backend, 4).expect("Should return immediately");
        assert!(context.is_frame_executed(&backend, 4).expect("Should query"));
        assert!(!context.is_frame_executed(&backend, 9).expect("Should query"));
        assert!(backend.events().is_empty(), "no native wait for an older frame");

        context.destroy(&backend, &Diagnostics::new());
    }

    #[test]
    fn test_timestamps_reset_once_and_resolve_to_nanoseconds() {
        let backend = HeadlessBackend::new(HeadlessConfig {
            timestamp_period_ns: 2.5,
            ticks_per_timestamp: 4,
            ..HeadlessConfig::default()
        });
        let diagnostics = Diagnostics::new();
        let mut context =
            FrameContext::new(&backend, &diagnostics, 0, 2).expect("Should create frame context");

        let buffer = context
            .begin_command_buffer(&backend, QueueRole::Graphics)
            .expect("Should begin")
            .expect("Should have a graphics queue");
        assert_eq!(context.put_timestamp(&backend, buffer), Some(0));
        assert_eq!(context.put_timestamp(&backend, buffer), Some(1));
        assert_eq!(context.put_timestamp(&backend, buffer), None);
        context
            .pool_set(QueueRole::Graphics)
            .expect("Should have a graphics queue")
            .end_command_buffer(&backend, &diagnostics, buffer)
            .expect("Should end");

        let fence = context.fences()[0];
        assert!(backend.fence_status(fence).expect("Should query"));
        context.set_frame_id(1);
        context.resolve_timestamps(&backend).expect("Should resolve");

        let resolved = context.resolved_timestamps(1).expect("Should hold frame 1");
        assert_eq!(resolved.len(), 2);
        approx::assert_relative_eq!(resolved[0] as f64, 10.0);
        approx::assert_relative_eq!(resolved[1] as f64, 20.0);
        assert!(context.resolved_timestamps(2).is_none());

        let writes = backend
            .events()
            .iter()
            .filter(|event| matches!(event, DeviceEvent::Timestamp { .. }))
            .count();
        assert_eq!(writes, 2);

        context.reset_pools(&backend, &diagnostics).expect("Should reset");
        context.destroy(&backend, &diagnostics);
        assert_eq!(diagnostics.failure_count(), 0);
    }
}
