//! Per-frame-slot replay queues
//!
//! Descriptor heaps and argument buffers are replicated once per frame context. A
//! write issued while slot `i` is current goes straight into copy `i`; the other
//! copies may still be read by in-flight GPU work, so the write is queued and
//! replayed into each of them the next time that slot becomes current.

/// Ring of per-slot queues replaying an item into every other frame slot
#[derive(Debug, Clone)]
pub struct MultiFrameDataTracker<T> {
    queues: Vec<Vec<T>>,
    current: usize,
}

impl<T> MultiFrameDataTracker<T> {
    /// Create `frame_count` empty queues with `current_index` as the current slot
    pub fn new(frame_count: u8, current_index: u8) -> Self {
        let frame_count = usize::from(frame_count.max(1));
        Self {
            queues: (0..frame_count).map(|_| Vec::new()).collect(),
            current: usize::from(current_index) % frame_count,
        }
    }

    /// Number of tracked frame slots
    pub fn frame_count(&self) -> u8 {
        self.queues.len() as u8
    }

    /// Index of the current frame slot
    pub fn current_index(&self) -> u8 {
        self.current as u8
    }

    /// Rotate the current slot forward by one
    pub fn advance_to_next_frame(&mut self) {
        self.current = (self.current + 1) % self.queues.len();
    }

    /// Items queued for the current slot, in tracking order
    pub fn data(&self) -> &[T] {
        &self.queues[self.current]
    }

    /// Drop the current slot's queue
    pub fn clear_data(&mut self) {
        self.queues[self.current].clear();
    }

    /// Move the current slot's queue out, leaving it empty
    pub fn take_data(&mut self) -> Vec<T> {
        std::mem::take(&mut self.queues[self.current])
    }

    /// Total number of queued items across all slots
    pub fn pending(&self) -> usize {
        self.queues.iter().map(Vec::len).sum()
    }
}

impl<T: Clone> MultiFrameDataTracker<T> {
    /// Queue `item` for every slot except the current one
    pub fn track_for_other_frames(&mut self, item: T) {
        let count = self.queues.len();
        for offset in 1..count {
            self.queues[(self.current + offset) % count].push(item.clone());
        }
    }
}
