//! Foundation utilities shared by every graphics module
//!
//! Nothing in here talks to a GPU: these are the containers and bookkeeping types
//! the frame ring and resource registries are built from.

pub mod collections;
pub mod diagnostics;
pub mod generational_pool;
pub mod logging;
pub mod multi_frame;

pub use collections::DynamicArray;
pub use diagnostics::{Diagnostics, Failure, FailureHook};
pub use generational_pool::{GenerationalPool, Handle};
pub use multi_frame::MultiFrameDataTracker;
