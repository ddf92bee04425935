//! Logging setup and the `log_*` macros used across the crate.

use tracing_subscriber::EnvFilter;

pub use tracing::{debug, info, warn};

const DEFAULT_FILTER: &str = "nova_migrate=info";

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Calling this more than once is harmless.
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logger::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::warn!($($arg)*)
    };
}
