use clap::Parser;
use loom_cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    loom_cli::dispatch(cli).await
}

/// Structured logging to stderr so stdout stays clean for turn
/// responses — the same `tracing-subscriber` setup as the teacher's
/// `sa-gateway::init_tracing`, minus the forced JSON formatting (this
/// binary is read by a human terminal, not a log aggregator).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,loom_cli=info")))
        .with_writer(std::io::stderr)
        .init();
}
