// crates/weft-server/src/main.rs
// Weft - declarative control plane and request gateway for AI agents

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // LOG_LEVEL: debug | info | warn | error (default info)
    let level = match std::env::var("LOG_LEVEL")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        "info" | "" => Level::INFO,
        other => {
            eprintln!("[weft] Unknown LOG_LEVEL={other:?}, using info");
            Level::INFO
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();
    match cli.command {
        Commands::Operator(args) => cli::operator::run(args).await,
        Commands::Gateway(args) => cli::gateway::run(args).await,
        Commands::Dev(args) => cli::dev::run(args).await,
    }
}
