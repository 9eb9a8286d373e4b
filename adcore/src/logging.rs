//! Tracing subscriber setup for apps and tools embedding AdCore.
//!
//! The library itself only emits `tracing` events; hosts that have no
//! subscriber of their own can call [`init`] once at startup.

use tracing_subscriber::{fmt, EnvFilter};

/// Directive used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_DIRECTIVE: &str = "adcore=info";

/// Installs a formatted subscriber filtered by `RUST_LOG`.
///
/// Returns `false` when a global subscriber was already installed, which
/// makes repeated calls harmless.
pub fn init() -> bool {
    init_with_default(DEFAULT_DIRECTIVE)
}

/// Like [`init`], with a custom fallback directive.
pub fn init_with_default(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let _ = init();

        assert!(!init());
    }
}
