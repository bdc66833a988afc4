use tracing_subscriber::{EnvFilter, fmt};

/// Initializes the global tracing subscriber. `env_filter` follows the
/// `RUST_LOG` syntax, e.g. `"info,indexer=debug"`. Must be called exactly
/// once, before any task is spawned.
pub fn initialize(env_filter: &str) {
    fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_ansi(atty())
        .init();
}

fn atty() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}
