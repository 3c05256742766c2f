//! replisyncd — the replisync daemon.
//!
//! Keeps the declared scale of a StatefulSet and the membership of the
//! replica set running inside it in step:
//! - Orchestrator client (Kubernetes `scale` subresource)
//! - Membership client (data store admin API)
//! - Reconciler loop
//! - Operator API
//!
//! # Usage
//!
//! ```text
//! replisyncd run --config /etc/replisync/replisync.toml
//! replisyncd check-config --config replisync.toml
//! replisyncd simulate --orchestrator 5 --members 3
//! ```

mod daemon;
mod simulate;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replisyncd", about = "Replica-set membership reconciler")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciler and the operator API.
    Run {
        /// Path to the TOML configuration.
        #[arg(long, default_value = "/etc/replisync/replisync.toml")]
        config: PathBuf,

        /// Operator API listen address, overriding `[api] listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Parse and validate a configuration, then print it with defaults filled in.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },

    /// Run the reconciler against in-memory doubles and print each tick.
    Simulate {
        /// Initial declared replicas.
        #[arg(long, default_value = "5")]
        orchestrator: u32,

        /// Initial member count.
        #[arg(long, default_value = "3")]
        members: u32,

        #[arg(long, default_value = "3")]
        floor: u32,

        #[arg(long, default_value = "10")]
        ticks: u32,

        /// Net scaling request queued before the first tick.
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        requests: i32,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,replisyncd=debug,replisync=debug"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config, listen } => daemon::run(&config, listen).await,
        Command::CheckConfig { config } => daemon::check_config(&config),
        Command::Simulate {
            orchestrator,
            members,
            floor,
            ticks,
            requests,
        } => {
            simulate::run(simulate::SimulateArgs {
                orchestrator,
                members,
                floor,
                ticks,
                requests,
            })
            .await
        }
    }
}
