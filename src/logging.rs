//! Compact timestamped logging with per-module levels.
//!
//! # Configuration
//!
//! ```yaml
//! logLevel: info       # default level
//! logging:
//!   modules:
//!     watcher: debug   # ownkeeper::watcher and below
//! ```
//!
//! # Environment Variable
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug ownkeeper run
//! RUST_LOG=ownkeeper::watcher=trace ownkeeper run
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter directives for a default level plus module overrides.
///
/// Bare module names are scoped to this crate, so `watcher` becomes
/// `ownkeeper::watcher`. Names containing `::` are used as given.
pub fn filter_directives(level: &str, config: &LoggingConfig) -> String {
    let mut directives = level.to_string();
    for (module, module_level) in &config.modules {
        if module.contains("::") {
            directives.push_str(&format!(",{module}={module_level}"));
        } else {
            directives.push_str(&format!(
                ",{}::{module}={module_level}",
                env!("CARGO_CRATE_NAME")
            ));
        }
    }
    directives
}

/// Initialize logging.
///
/// Call once at startup. Safe to call multiple times (only first call takes effect).
/// The `RUST_LOG` environment variable takes precedence over `level` and
/// `config`.
pub fn init_with_config(level: &str, config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(level, config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Initialize logging at `info` with no module overrides.
pub fn init() {
    init_with_config("info", &LoggingConfig::default());
}

/// Log an event with component context.
///
/// # Examples
/// ```ignore
/// log_event!("worker", "starting", "{}", path.display());
/// log_event!("supervisor", "stopped");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("router", "vanished", "{}", path.display());
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
