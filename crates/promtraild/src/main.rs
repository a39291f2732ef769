//! promtraild — captures PromQL queries and keeps metric inventories fresh.
//!
//! # Usage
//!
//! ```text
//! promtraild run --config /etc/promtrail/promtrail.toml
//! promtraild fingerprint 'sum by (job) (rate(http_requests_total{code="500"}[5m]))'
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use promtraild::DaemonConfig;

const DEFAULT_LOG_FILTER: &str = "info,promtrail=debug,promtraild=debug";

#[derive(Parser)]
#[command(
    name = "promtraild",
    about = "promtrail daemon — PromQL query analytics",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: capture API, inventory sync and retention.
    Run {
        /// Path to promtrail.toml. Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the fingerprint and canonical form of a query.
    Fingerprint {
        query: String,
        /// Zero matrix ranges before hashing.
        #[arg(long)]
        ignore_ranges: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => {
            let config = match config {
                Some(path) => DaemonConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => DaemonConfig::default(),
            };
            init_tracing(config.server.log_json);
            promtraild::daemon::run(config).await
        }
        Command::Fingerprint {
            query,
            ignore_ranges,
        } => {
            init_tracing(false);
            promtrail_fingerprint::parse(&query).context("query does not parse")?;
            let fp = promtrail_fingerprint::fingerprint(&query, ignore_ranges);
            println!("{}", fp.hash);
            println!("{}", fp.canonical);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
