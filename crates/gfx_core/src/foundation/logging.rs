//! Logging utilities
//!
//! The crate logs through the `log` facade; applications pick the backend.
//! [`init`] wires up `env_logger`, configured through `RUST_LOG`.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
///
/// Panics if a logger is already installed; see [`try_init`].
pub fn init() {
    env_logger::init();
}

/// Initialize the logging system unless a logger is already installed
///
/// Returns `false` when another logger was already set, which is the normal case
/// in test binaries where several tests race to initialize.
pub fn try_init() -> bool {
    env_logger::try_init().is_ok()
}
