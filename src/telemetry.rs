//! Tracing initialization for embedding tools.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins when set;
/// otherwise the debug toggle selects the default filter. Safe to call
/// more than once; later calls are no-ops.
pub fn init(debug: bool) {
    let default_filter = if debug {
        "pkgtrust=debug"
    } else {
        "pkgtrust=info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_is_idempotent() {
        super::init(false);
        super::init(true);
    }
}
