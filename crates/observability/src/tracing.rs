//! JSON log output filtered through `RUST_LOG`.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";

pub fn init() {
    init_with_default(DEFAULT_DIRECTIVE);
}

pub fn init_with_default(directive: &str) {
    let filter = filter(std::env::var("RUST_LOG").ok().as_deref(), directive);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(true)
        .with_target(false)
        .try_init();
}

/// `RUST_LOG` when set and parseable, the default directive otherwise.
fn filter(env: Option<&str>, default_directive: &str) -> EnvFilter {
    env.filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_directive() {
        assert_eq!(filter(None, "warn").to_string(), "warn");
        assert_eq!(filter(Some("  "), "warn").to_string(), "warn");
    }

    #[test]
    fn honours_env_directive() {
        assert_eq!(filter(Some("stockflow_infra=debug"), "info").to_string(), "stockflow_infra=debug");
    }

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
