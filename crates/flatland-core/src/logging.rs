//! Logging setup built on `tracing-subscriber`.

use tracing_subscriber::EnvFilter;

/// Directives used by [`init`] when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str =
    "info,flatland_sprite=debug,wgpu_core=info,wgpu_hal=info,naga=info";

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over [`DEFAULT_FILTER`].
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Install the global `fmt` subscriber with explicit filter directives.
///
/// Calling this after a subscriber is already installed is a no-op, which keeps
/// it safe to call from several tests.
pub fn init_with_filter(directives: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_with_filter("debug");
        init_with_filter("trace");
        init();
        tracing::debug!("logging installed");
    }
}
