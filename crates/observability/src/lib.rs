//! Process-wide tracing setup shared by the binaries.

/// Subscriber construction (filters, JSON formatting).
pub mod logging;

/// Initialize structured logging with the `info` default.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    logging::init_with_filter("info");
}

pub use logging::init_with_filter;
