//! Metal translation layer
//!
//! Argument buffers replace descriptor sets: one buffer per set, striding one copy
//! per frame context. Barriers reduce to resource usage declarations and compute
//! memory barriers. Frames are paced with the core ring rule,
//! [`frame_to_wait_before`]: a command buffer waits on the previous user of its
//! slot before encoding.

pub mod argument_buffers;
pub mod barriers;

pub use crate::graphics::context::frame_to_wait_before;
pub use argument_buffers::{
    ArgumentAccess, ArgumentBufferInfo, ArgumentBufferPlanner, ArgumentDataType, ArgumentDescriptor,
    ArgumentEncodeOp, ArgumentFlush, ArgumentKind, ArgumentLayout, ArgumentWrite, DirtyRange,
    PushConstantBinding, StorageMode, ARGUMENT_SLOT_SIZE,
};
pub use barriers::{
    barrier_scope, classify_barrier, plan_barriers, BarrierScope, EncoderKind, MetalBarrierPlan,
    MetalResource, ResourceBarrier, ResourceUsage,
};
