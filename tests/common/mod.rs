//! Common test utilities with tracing setup.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     // ... test code with tracing::info!, tracing::debug!, etc.
//! }
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Filter directives (e.g., `tidlock=trace`)
//! - `TIDLOCK_LOG_JSON`: Set to a path to also write JSON events there

#![allow(dead_code)]

use std::env;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Ensures tracing is only initialized once across all tests.
static INIT: Once = Once::new();

/// Initialize the tracing subscriber with console and optional JSON output.
///
/// Safe to call multiple times - only the first call takes effect.
pub fn init_tracing() {
    INIT.call_once(setup_tracing);
}

/// Create an EnvFilter from RUST_LOG or fall back to INFO.
fn make_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("{}", Level::INFO)))
}

fn setup_tracing() {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NONE)
        .with_test_writer()
        .with_filter(make_filter());

    let json_layer = env::var("TIDLOCK_LOG_JSON").ok().and_then(|path| {
        let file = File::create(PathBuf::from(path)).ok()?;
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::sync::Mutex::new(file))
                .with_filter(make_filter()),
        )
    });

    Registry::default()
        .with(console_layer)
        .with(json_layer)
        .init();
}
