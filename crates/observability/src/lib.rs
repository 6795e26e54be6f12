//! Process-wide logging setup shared by the binaries.

/// Install the global subscriber using `RUST_LOG` / `LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with(&tracing::LogConfig::from_env());
}

/// Subscriber configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogConfig, LogFormat, UnknownLogFormat};
