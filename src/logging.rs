use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "chatsync=info,warn";

/// Installs the global subscriber. `RUST_LOG` overrides `level` when set.
/// Logs go to stderr so they do not interleave with session output.
pub fn init(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match level {
        Some(level) => EnvFilter::new(format!("chatsync={level},warn")),
        None => EnvFilter::new(DEFAULT_FILTER),
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}
