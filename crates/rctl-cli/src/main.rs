//! rctl: remote control for a media endpoint.
//!
//! Sends playback and volume commands over TCP or WebSocket, reconnecting
//! as needed, and shows whatever the endpoint prints back.

mod commands;
mod config;

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, warn};

/// rctl: remote control client
#[derive(Parser)]
#[command(
    name = "rctl",
    version = "0.1.0",
    about = "Remote control for a media endpoint over TCP or WebSocket"
)]
struct Cli {
    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print session events as JSON lines on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send commands and wait for their results
    Send {
        /// [address] followed by commands (play, prev, next, vol-up, vol-down, reconnect)
        #[arg(required = true, num_args = 1..)]
        args: Vec<String>,

        /// Keep printing endpoint output this long after the last result
        #[arg(long = "linger-ms", default_value_t = 500)]
        linger_ms: u64,
    },

    /// Interactive session reading commands from stdin
    Shell {
        /// Endpoint address (optional, uses config default)
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for output and --json.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("rctl=debug,rctl_cli=debug,rctl_client=debug,rctl_core=debug")
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("rctl=warn,rctl_cli=warn,rctl_client=warn")
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.clone().unwrap_or_else(config::Config::default_path);
    let cfg = match config::Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("{e:#}; using defaults");
            config::Config::default()
        }
    };
    let session_config = cfg.session.to_session_config();

    let result = match cli.command {
        Command::Send { args, linger_ms } => match commands::send::split_args(&args, &cfg) {
            Ok((address, kinds)) => {
                commands::send::run(
                    &address,
                    &kinds,
                    session_config,
                    Duration::from_millis(linger_ms),
                    cli.json,
                )
                .await
            }
            Err(e) => Err(e),
        },
        Command::Shell { address } => match cfg.resolve_address(address.as_deref()) {
            Ok(address) => commands::shell::run(&address, session_config, cli.json).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("rctl: {e:#}");
        std::process::exit(1);
    }
}
