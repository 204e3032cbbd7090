//! Tracing subscriber setup.

use crate::config::LiveConfig;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber. `RUST_LOG` takes precedence over the `debug` flag.
/// Returns `false` if a global subscriber was already installed.
pub fn init(config: &LiveConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "soli_live=debug"
    } else {
        "soli_live=info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(true), "soli_live=debug");
        assert_eq!(default_directive(false), "soli_live=info");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LiveConfig::default();
        let _ = init(&config);
        assert!(!init(&config));
    }
}
