//! Graphics context creation settings

use serde::{Deserialize, Serialize};

use super::Config;

/// Upper bound on the number of frame contexts a ring may hold
pub const MAX_FRAME_CONTEXTS: u8 = 8;

/// Frame contexts used when not presenting and no override is set
pub const DEFAULT_FRAME_CONTEXT_COUNT: u8 = 2;

/// Settings consumed when creating a graphics context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Name reported to the driver
    pub application_name: String,
    /// Whether the context owns a swap chain and presents every frame
    pub present: bool,
    /// Enable API validation layers where the backend supports them
    pub validation_layers: bool,
    /// Frame contexts to create when not presenting
    ///
    /// Ignored when presenting: the ring then matches the swap chain image count.
    pub frame_context_count: Option<u8>,
    /// Request a compute-only queue family
    pub dedicated_compute_queue: bool,
    /// Request a transfer-only queue family
    pub dedicated_transfer_queue: bool,
    /// Timestamp queries per frame context, 0 disables them
    pub timestamp_queries: u32,
    /// Shader-visible descriptor heap sizes
    pub descriptor_heaps: DescriptorHeapConfig,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            application_name: "gfx_core".to_string(),
            present: false,
            validation_layers: cfg!(debug_assertions),
            frame_context_count: None,
            dedicated_compute_queue: true,
            dedicated_transfer_queue: true,
            timestamp_queries: 64,
            descriptor_heaps: DescriptorHeapConfig::default(),
        }
    }
}

impl GraphicsConfig {
    /// Frame context count for a context that does not present
    pub fn offscreen_frame_context_count(&self) -> u8 {
        self.frame_context_count
            .unwrap_or(DEFAULT_FRAME_CONTEXT_COUNT)
            .clamp(1, MAX_FRAME_CONTEXTS)
    }
}

impl Config for GraphicsConfig {}

/// Capacities of the per-frame shader-visible descriptor heaps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorHeapConfig {
    /// CBV/SRV/UAV descriptors per frame heap
    pub cbv_srv_uav: u32,
    /// Sampler descriptors per frame heap
    pub samplers: u32,
}

impl Default for DescriptorHeapConfig {
    fn default() -> Self {
        Self {
            cbv_srv_uav: 1024,
            samplers: 64,
        }
    }
}
