//! Utilities module for logging, errors, and formatting helpers

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{CropCareError, Result};
pub use logging::{init_logging, LogConfig, LogLevel};

/// Format a millisecond duration for log lines
pub fn format_millis(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.0}µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{:.1}ms", ms)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}
