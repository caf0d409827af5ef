use crate::console::ConsoleBuffer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber: fmt output plus the in-window console.
///
/// `RUST_LOG` takes precedence over the configured directive; an invalid
/// directive falls back to `info`. Calling this more than once is harmless.
pub fn init(filter: &str, console: &ConsoleBuffer) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(console.layer())
        .try_init();
}
