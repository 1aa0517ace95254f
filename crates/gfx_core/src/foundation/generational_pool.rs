//! Generational slot pool backing every GPU object handle
//!
//! A [`GenerationalPool`] stores "hot" data (small, looked up on every use, e.g. the
//! native object) and "cold" data (descriptions, sizes) in two parallel vectors that
//! share one index space. Slots are recycled through a free list and never removed,
//! so a handle's index stays stable for the lifetime of the pool.
//!
//! Every slot carries a generation counter. Freeing a slot bumps it, which turns all
//! outstanding handles to that slot stale: `get` on a stale handle returns `None`
//! even after the index has been handed out again.
//!
//! The pool is not internally synchronized. Callers serialize creation and
//! destruction; in this crate that is always the owner of the graphics context.

use std::fmt;

/// Index + generation pair identifying a pool slot
///
/// Handles are plain values: copying one never keeps the underlying object alive.
/// Validity is only meaningful relative to the pool that produced the handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    /// Slot index in the pool
    pub index: u32,
    /// Generation of the slot when the handle was produced
    pub generation: u32,
}

impl Handle {
    /// Sentinel returned on failure; never produced by a successful allocation
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: u32::MAX,
    };

    /// Create a handle from raw parts
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Whether this handle differs from the invalid sentinel
    ///
    /// A "valid" handle may still be stale; only the owning pool can tell.
    pub const fn is_valid(self) -> bool {
        self.index != Self::INVALID.index
    }

    /// Pack into a single 64-bit word, generation in the high half
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpack a value produced by [`Handle::to_bits`]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({}v{})", self.index, self.generation)
        } else {
            f.write_str("Handle(invalid)")
        }
    }
}

/// Struct-of-arrays slot allocator with generation checking
pub struct GenerationalPool<Hot, Cold = ()> {
    hot: Vec<Option<Hot>>,
    cold: Vec<Option<Cold>>,
    generations: Vec<u32>,
    available: Vec<u32>,
    live: usize,
}

impl<Hot, Cold> GenerationalPool<Hot, Cold> {
    /// Number of slots reserved when the pool is created
    pub const INITIAL_SIZE: usize = 32;
    /// Hard upper bound on the slot count
    pub const MAX_SIZE: usize = 1 << 20;

    /// Create an empty pool with [`Self::INITIAL_SIZE`] free slots
    pub fn new() -> Self {
        let mut pool = Self {
            hot: Vec::new(),
            cold: Vec::new(),
            generations: Vec::new(),
            available: Vec::new(),
            live: 0,
        };
        pool.grow(Self::INITIAL_SIZE);
        pool
    }

    fn grow(&mut self, to_size: usize) {
        let from_size = self.generations.len();
        debug_assert!(to_size > from_size, "generational pools only grow");
        debug_assert!(to_size <= Self::MAX_SIZE);

        self.hot.resize_with(to_size, || None);
        self.cold.resize_with(to_size, || None);
        self.generations.resize(to_size, 0);

        // Reverse order so the next pops hand out ascending indices
        self.available.reserve(to_size - from_size);
        self.available
            .extend((from_size..to_size).rev().map(|index| index as u32));
    }

    /// Allocate a slot and move `hot`/`cold` into it
    ///
    /// Returns [`Handle::INVALID`] when the pool already holds [`Self::MAX_SIZE`]
    /// live slots.
    pub fn allocate(&mut self, hot: Hot, cold: Cold) -> Handle {
        if self.available.is_empty() {
            let size = self.generations.len();
            if size >= Self::MAX_SIZE {
                log::error!("Generational pool exhausted ({} slots)", size);
                return Handle::INVALID;
            }
            self.grow((size * 2).min(Self::MAX_SIZE));
        }

        let Some(index) = self.available.pop() else {
            return Handle::INVALID;
        };
        let slot = index as usize;
        self.hot[slot] = Some(hot);
        self.cold[slot] = Some(cold);
        self.live += 1;

        Handle::new(index, self.generations[slot])
    }

    fn slot_of(&self, handle: Handle) -> Option<usize> {
        let slot = handle.index as usize;
        if slot >= self.generations.len() || self.generations[slot] != handle.generation {
            return None;
        }
        self.hot[slot].as_ref().map(|_| slot)
    }

    /// Whether `handle` refers to a live slot of this pool
    pub fn contains(&self, handle: Handle) -> bool {
        self.slot_of(handle).is_some()
    }

    /// Hot data of a live slot
    pub fn get(&self, handle: Handle) -> Option<&Hot> {
        self.slot_of(handle).and_then(|slot| self.hot[slot].as_ref())
    }

    /// Mutable hot data of a live slot
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Hot> {
        let slot = self.slot_of(handle)?;
        self.hot[slot].as_mut()
    }

    /// Cold data of a live slot
    pub fn get_cold(&self, handle: Handle) -> Option<&Cold> {
        self.slot_of(handle).and_then(|slot| self.cold[slot].as_ref())
    }

    /// Hot and cold data of a live slot
    pub fn get_all(&self, handle: Handle) -> Option<(&Hot, &Cold)> {
        let slot = self.slot_of(handle)?;
        Some((self.hot[slot].as_ref()?, self.cold[slot].as_ref()?))
    }

    /// Free a slot, returning its prior contents
    ///
    /// Returns `None` if the handle is stale or out of range. On success the slot's
    /// generation is bumped and the index goes back on top of the free list.
    pub fn free(&mut self, handle: Handle) -> Option<(Hot, Cold)> {
        let slot = self.slot_of(handle)?;
        let hot = self.hot[slot].take()?;
        let cold = self.cold[slot].take()?;

        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.available.push(handle.index);
        self.live -= 1;

        Some((hot, cold))
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no slot is live
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots currently reserved
    pub fn capacity(&self) -> usize {
        self.generations.len()
    }

    /// Live handles with their hot data, in index order
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &Hot)> {
        self.hot.iter().enumerate().filter_map(|(slot, hot)| {
            hot.as_ref()
                .map(|hot| (Handle::new(slot as u32, self.generations[slot]), hot))
        })
    }

    /// Free every live slot, returning the contents in index order
    pub fn drain(&mut self) -> Vec<(Handle, Hot, Cold)> {
        let handles: Vec<Handle> = self.iter().map(|(handle, _)| handle).collect();
        handles
            .into_iter()
            .filter_map(|handle| self.free(handle).map(|(hot, cold)| (handle, hot, cold)))
            .collect()
    }
}

impl<Hot, Cold> Default for GenerationalPool<Hot, Cold> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Hot, Cold> fmt::Debug for GenerationalPool<Hot, Cold> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationalPool")
            .field("live", &self.live)
            .field("capacity", &self.capacity())
            .finish()
    }
}
