//! Direct3D 12 translation layer
//!
//! No native device is driven from here. The module translates backend-agnostic
//! barriers into enhanced barrier and legacy state values, and plans descriptor
//! heap layout and copies, so a D3D12 device layer only has to forward the results.

pub mod barriers;
pub mod descriptors;

pub use barriers::{
    retrieve_state, to_barrier_access, to_barrier_layout, to_barrier_sync, to_resource_state,
    BarrierAccess, BarrierLayout, BarrierSync, ResourceStates,
};
pub use descriptors::{
    DescriptorCopy, DescriptorRange, DescriptorSource, Dx12DescriptorHeapPlanner, Dx12LayoutData,
    Dx12ShaderVisibility, HeapKind, HeapPair, RangeType, RootDescriptorTable, RootTableBinding,
    ShaderVisibleHeap,
};
