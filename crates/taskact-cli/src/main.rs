mod cmd;
mod menu;
mod output;

use clap::{Parser, Subcommand};
use cmd::open::OpenArgs;
use std::path::PathBuf;
use taskact_core::cancel::CancelToken;

#[derive(Parser)]
#[command(
    name = "taskact",
    about = "Turn task annotations into executable actions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/taskact/config.yml)
    #[arg(long, global = true, env = "TASKACT_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    open: OpenArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the config, the action rules, and the required binaries
    Diagnostics,

    /// Show the configured actions
    Rules,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    // One token for the whole run; Ctrl-C stops waiting on children and
    // skips pending retries.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            tracing::warn!("cannot install interrupt handler: {e}");
        }
    }

    let config = cli.config.as_deref();
    let result = match cli.command {
        None => cmd::open::run(config, cli.open, cli.json, cancel),
        Some(Commands::Diagnostics) => cmd::diagnostics::run(config, cli.json),
        Some(Commands::Rules) => cmd::rules::run(config, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
