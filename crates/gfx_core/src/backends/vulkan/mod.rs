//! Vulkan backend
//!
//! Implements [`crate::graphics::GraphicsBackend`] on top of `ash`. Device creation,
//! swap chain management and memory allocation follow RAII wrappers; the frame ring
//! itself lives in the backend-agnostic core.

pub mod backend;
pub mod barriers;
pub mod conversions;
pub mod device;
pub mod memory;
pub mod swapchain;

pub use backend::{
    SurfaceTarget, VulkanBackend, VulkanBuffer, VulkanDescriptorSet, VulkanRenderPass,
    VulkanRenderTargetView, VulkanTexture,
};
pub use device::{LogicalDevice, PhysicalDeviceInfo, QueueFamilies, VulkanInstance};
pub use swapchain::Swapchain;

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Resource with specified ID could not be found
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// The unique identifier of the resource
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
