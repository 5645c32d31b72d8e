//! Tracing and logging setup shared by binaries and tests.

/// Initialize process-wide tracing with settings taken from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with(&ObservabilityConfig::from_env());
}

/// Subscriber configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{
    LOG_FORMAT_ENV, LogFormat, ObservabilityConfig, UnknownLogFormat, init_with,
};
