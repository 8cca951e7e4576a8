mod cmd_analyze;
mod cmd_nightly;
mod cmd_queue;
mod cmd_start;
mod cmd_status;
mod cmd_stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "skald",
    version,
    about = "Background analysis of coding-agent session logs"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the analysis daemon
    Start {
        /// Stay attached to the terminal instead of detaching
        #[arg(long)]
        foreground: bool,
        /// Config file (default: ~/.config/skald/config.yaml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Stop a running daemon
    Stop {
        /// Kill immediately instead of draining in-flight work
        #[arg(long)]
        force: bool,
        /// Config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show daemon, queue, and store status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Inspect the job queue and repair dead-lettered jobs
    Queue {
        /// Show recent dead-lettered jobs with failure reasons
        #[arg(long)]
        failed: bool,
        /// Reset a dead-lettered job to pending
        #[arg(long, value_name = "JOB_ID")]
        reset: Option<String>,
        /// Config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Enqueue one session file for analysis at top priority
    Analyze {
        /// Session file (*.jsonl)
        path: PathBuf,
        /// Config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the nightly maintenance passes once, immediately
    RunNightly {
        /// Config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Command::Start { foreground, config } => cmd_start::execute(config.as_deref(), foreground),
        Command::Stop { force, config } => cmd_stop::execute(config.as_deref(), force),
        Command::Status { json, config } => cmd_status::execute(config.as_deref(), json),
        Command::Queue {
            failed,
            reset,
            config,
        } => cmd_queue::execute(config.as_deref(), failed, reset.as_deref()),
        Command::Analyze { path, config } => cmd_analyze::execute(config.as_deref(), &path),
        Command::RunNightly { config } => cmd_nightly::execute(config.as_deref()),
    }
}

/// Logs go to stderr so command output stays clean; after detaching,
/// stderr is the daemon log file.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// `SKALD_LOG` > `RUST_LOG` > info.
fn build_env_filter() -> EnvFilter {
    if let Ok(directives) = std::env::var("SKALD_LOG") {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new("info")
}
