//! blockwarden daemon binary entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use blockwarden_core::config::WardenConfig;
use blockwarden_daemon::Daemon;

/// blockwarden - automated incident remediation.
#[derive(Parser, Debug)]
#[command(name = "blockwarden", version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "blockwarden.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon, reading JSON-lines events from stdin.
    Run,
    /// Manually lift the block for an IP.
    Unblock { ip: String },
    /// Print all block records.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_env("BLOCKWARDEN_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let config = WardenConfig::load(&args.config).context("loading configuration")?;
    let daemon = Daemon::new(config)?;

    match args.command {
        Some(Command::Run) | None => daemon.run().await,
        Some(Command::Unblock { ip }) => daemon.unblock(&ip).await,
        Some(Command::Status) => {
            for record in daemon.records()? {
                println!(
                    "{:<40} blocked_at={} unblock_after={} blocks={} triggers={} action_taken={}",
                    record.ip,
                    record.blocked_at,
                    record.unblock_after,
                    record.block_count,
                    record.trigger_count,
                    record.action_taken,
                );
            }
            Ok(())
        }
    }
}
