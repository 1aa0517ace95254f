//! Graphics error types

use crate::backends::vulkan::VulkanError;
use crate::config::ConfigError;
use crate::graphics::backend::QueueRole;

/// Errors surfaced by the graphics context and its backends
///
/// Every variant except [`GraphicsError::Config`] describes a native failure or a
/// device that can no longer make progress. Contract violations by the caller are
/// reported through [`crate::foundation::Diagnostics`] instead.
#[derive(thiserror::Error, Debug)]
pub enum GraphicsError {
    /// Native Vulkan failure
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// The simulated device rejected a request
    #[error("Headless device error: {0}")]
    Headless(String),

    /// Operation not allowed in the current state
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// What went wrong
        reason: String,
    },

    /// The backend exposes no queue for the role
    #[error("No {queue:?} queue available")]
    QueueUnavailable {
        /// Requested role
        queue: QueueRole,
    },

    /// A previous native failure left the device unusable
    #[error("Device lost while processing frame {frame_id}")]
    DeviceLost {
        /// Frame being submitted or waited on when the loss was detected
        frame_id: u64,
    },

    /// Context or backend creation failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for graphics operations
pub type GraphicsResult<T> = Result<T, GraphicsError>;
