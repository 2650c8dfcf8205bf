//! Logging initialization
//!
//! Console subscriber with `EnvFilter`. `RUST_LOG` wins when set; otherwise
//! the level follows the debug flag.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_logging(debug: bool) {
    let default_directive = if debug {
        "review_crawler=debug,crawler=debug,info"
    } else {
        "review_crawler=info,crawler=info,warn"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
