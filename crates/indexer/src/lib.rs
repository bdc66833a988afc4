pub mod arguments;
pub mod bargain;
pub mod db;
pub mod families;
pub mod fleet;
pub mod genes;
pub mod inference;
pub mod progress;
pub mod run;
pub mod runtime;
pub mod scanner;
pub mod scheduler;
pub mod steal;
pub mod summoning;
pub mod worker;

use clap::Parser;

/// Entry point for the stock binary: no external engines wired in, the
/// bargain scorer stays disabled until an embedding binary injects one via
/// [`run::run`].
pub async fn start(args: impl Iterator<Item = String>) {
    let args = arguments::Arguments::parse_from(args);
    observe::tracing::initialize(&args.log_filter);
    observe::panic_hook::install();
    tracing::info!("running indexer with validated arguments:\n{args}");
    observe::metrics::setup_registry(Some("dfk_indexer".into()));
    run::run(args, run::ExternalEngines::none()).await;
}
