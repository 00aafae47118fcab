//! Zero-cost tracing helpers.
//!
//! When the `tracing` feature is enabled, `trace_log!` forwards to the `tracing` crate.
//! When disabled (default), it compiles to a no-op with zero runtime overhead.
//!
//! # Usage
//!
//! ```bash
//! # Normal build - no tracing overhead
//! cargo build --release
//!
//! # Debug build with tracing enabled
//! cargo test --features tracing
//!
//! # Watch the slow paths of a contended run
//! RUST_LOG=tidlock=trace cargo test --features tracing --test lock_stress
//! ```

#![allow(unused_macros, unused_imports)]

/// Trace-level logging (most verbose). Compiles to no-op without `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        // Completely empty - zero cost
    };
}

// Export macros for use within crate
pub(crate) use trace_log;
