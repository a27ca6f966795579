use clap::{Parser, Subcommand};

mod commands;

use commands::{ReplayArgs, SizeArgs, StatusArgs};

#[derive(Parser)]
#[command(name = "odte-risk")]
#[command(about = "Risk gating and position sizing for short-dated option structures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a daily P&L log through the budget ledger and notch scale
    Replay(ReplayArgs),
    /// Evaluate one trade proposal and print the decision breakdown
    Size(SizeArgs),
    /// Print the risk status restored from a history log
    Status(StatusArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay(args) => commands::run_replay(args).await?,
        Commands::Size(args) => commands::run_size(args).await?,
        Commands::Status(args) => commands::run_status(args).await?,
    }

    Ok(())
}
