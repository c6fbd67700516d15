// Logging setup for the kernel-link binary
//
// RUST_LOG wins when set; otherwise the configured level is used. Output goes
// to stderr so stdout stays clean for scan/resolve results.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: RUST_LOG if present and valid, else `default_level`,
/// else plain "info".
pub fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Calling this twice is harmless; the second
/// call is ignored.
pub fn init_logging(default_level: &str) {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let _ = tracing_subscriber::registry()
        .with(build_filter(default_level))
        .with(stderr_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_falls_back() {
        // Only meaningful when RUST_LOG is unset, but must never panic either way
        let filter = build_filter("not a [valid directive");
        let _ = filter.to_string();
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging("debug");
        init_logging("info");
    }
}
