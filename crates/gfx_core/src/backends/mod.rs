//! Native backends
//!
//! [`headless`] and [`vulkan`] implement [`crate::graphics::GraphicsBackend`] and can
//! drive a [`crate::graphics::GraphicsContext`]. [`dx12`] and [`metal`] translate
//! barriers and plan descriptor storage for their APIs without owning a device.

pub mod dx12;
pub mod headless;
pub mod metal;
pub mod vulkan;
