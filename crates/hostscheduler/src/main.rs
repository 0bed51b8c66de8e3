//! hostscheduler — hibernate and wake test clusters.
//!
//! Builds one backend from the registry and runs a single lifecycle
//! command against one cluster.
//!
//! # Usage
//!
//! ```text
//! hostscheduler --config hostscheduler.toml stop --cluster demo
//! hostscheduler --backend gke --key key.json --project test-infra \
//!     --zone europe-west1-b start --cluster demo
//! hostscheduler --log-format json describe --cluster demo
//! ```
//!
//! Backend flags are declared by the registered backends at startup and
//! override the `[flags]` table of the config file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Arg, ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hostscheduler_core::{
    BackendRegistry, ClusterRef, FlagSpec, FlagValues, HostScheduler, OpContext, SchedulerConfig,
    SchedulerResult,
};

const DEFAULT_FILTER: &str = "info,hostscheduler=debug";

#[derive(Parser, Debug)]
#[command(name = "hostscheduler", about = "Hibernate and wake test clusters")]
struct Cli {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend to use (defaults to the config file's, then "gke").
    #[arg(long)]
    backend: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Give up waiting after this many seconds. Provider operations keep
    /// running.
    #[arg(long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record node pool sizes and scale every pool to zero.
    Stop {
        #[arg(long)]
        cluster: String,
    },
    /// Restore recorded node pool sizes.
    Start {
        #[arg(long)]
        cluster: String,
    },
    /// Print whether the cluster is hibernated.
    Status {
        #[arg(long)]
        cluster: String,
    },
    /// Print pool sizes, the hibernation record and the lifecycle phase as JSON.
    Describe {
        #[arg(long)]
        cluster: String,
    },
}

impl Command {
    fn cluster(&self) -> ClusterRef {
        match self {
            Command::Stop { cluster }
            | Command::Start { cluster }
            | Command::Status { cluster }
            | Command::Describe { cluster } => ClusterRef::new(cluster.as_str()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut registry = BackendRegistry::new();
    hostscheduler_gke::register(&mut registry)?;

    let mut flags: Vec<FlagSpec> = Vec::new();
    registry.declare_flags(&mut flags);
    let flags = dedup_flags(flags);

    let matches = cli_command(&flags).get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    init_tracing(cli.log_format);

    let config = match &cli.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SchedulerConfig::default(),
    };

    let backend = cli
        .backend
        .clone()
        .or_else(|| config.backend.clone())
        .unwrap_or_else(|| hostscheduler_gke::NAME.to_string());
    let mut values = config.flag_values();
    values.merge(&cli_flag_values(&matches, &flags));

    let scheduler = registry.build(&backend, &values).await?;
    let ctx = call_context(cli.timeout.map(Duration::from_secs).or(config.timeout()));

    let cluster = cli.command.cluster();
    match run(scheduler.as_ref(), &ctx, &cli.command).await {
        Ok(Output::None) => Ok(()),
        Ok(Output::Hibernated(hibernated)) => {
            println!("{}", if hibernated { "hibernated" } else { "active" });
            Ok(())
        }
        Ok(Output::Status(status)) => {
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Err(e) if e.is_benign() => {
            info!(cluster = %cluster, backend = scheduler.name(), "{e}");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("{} failed for cluster {cluster}", command_name(&cli.command))),
    }
}

enum Output {
    None,
    Hibernated(bool),
    Status(hostscheduler_core::ClusterStatus),
}

async fn run(scheduler: &dyn HostScheduler, ctx: &OpContext, command: &Command) -> SchedulerResult<Output> {
    let cluster = command.cluster();
    info!(cluster = %cluster, backend = scheduler.name(), command = command_name(command), "running");
    match command {
        Command::Stop { .. } => scheduler.stop(ctx, &cluster).await.map(|()| Output::None),
        Command::Start { .. } => scheduler.start(ctx, &cluster).await.map(|()| Output::None),
        Command::Status { .. } => scheduler.is_hibernated(ctx, &cluster).await.map(Output::Hibernated),
        Command::Describe { .. } => scheduler.describe(ctx, &cluster).await.map(Output::Status),
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Stop { .. } => "stop",
        Command::Start { .. } => "start",
        Command::Status { .. } => "status",
        Command::Describe { .. } => "describe",
    }
}

/// Deadline from `--timeout`/config, plus Ctrl-C as a shutdown signal.
fn call_context(timeout: Option<Duration>) -> OpContext {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, abandoning wait; provider operations keep running");
            let _ = shutdown_tx.send(true);
        }
    });
    let ctx = match timeout {
        Some(timeout) => OpContext::with_timeout(timeout),
        None => OpContext::background(),
    };
    ctx.with_shutdown(shutdown_rx)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

// ── Backend flags ─────────────────────────────────────────────────

/// One CLI flag per name; backends sharing a flag name share the value.
fn dedup_flags(flags: Vec<FlagSpec>) -> Vec<FlagSpec> {
    let mut seen: Vec<FlagSpec> = Vec::new();
    for flag in flags {
        match seen.iter_mut().find(|f| f.name == flag.name) {
            Some(existing) => {
                existing.help = format!("{} [{}]; {} [{}]", existing.help, existing.backend, flag.help, flag.backend)
            }
            None => seen.push(flag),
        }
    }
    seen
}

/// The derived CLI plus every declared backend flag.
fn cli_command(flags: &[FlagSpec]) -> clap::Command {
    let mut command = Cli::command();
    for flag in flags {
        if command.get_arguments().any(|a| a.get_id() == flag.name.as_str()) {
            continue;
        }
        command = command.arg(
            Arg::new(flag.name.clone())
                .long(flag.name.clone())
                .help(flag.help.clone())
                .value_name("VALUE")
                .help_heading("Backend options"),
        );
    }
    command
}

fn cli_flag_values(matches: &ArgMatches, flags: &[FlagSpec]) -> FlagValues {
    flags
        .iter()
        .filter_map(|f| {
            matches
                .try_get_one::<String>(&f.name)
                .ok()
                .flatten()
                .map(|v| (f.name.clone(), v.clone()))
        })
        .collect()
}
