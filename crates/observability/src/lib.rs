//! Process-wide tracing setup shared by the stockflow binaries.

/// Tracing subscriber configuration.
pub mod tracing;

/// Initialize structured logging for the process.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Like [`init`] but with an explicit default directive, used when `RUST_LOG`
/// is unset.
pub fn init_with_default(directive: &str) {
    tracing::init_with_default(directive);
}
