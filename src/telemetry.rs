//! Logging initialization for binaries and tests embedding the runtime.

use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Install the global tracing subscriber, honoring `RUST_LOG`. Safe to call
/// more than once; only the first call installs anything.
pub fn init() {
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,blockflow=debug")),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
