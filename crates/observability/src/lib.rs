//! Tracing and logging setup shared by the binaries.

/// Initialize process-wide tracing/logging.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init(config: &LogConfig) {
    tracing::init(config);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::{LogConfig, LogFormat, UnknownLogFormat};
