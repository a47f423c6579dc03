//! `rctl shell [address]`: interactive session driven from stdin.
//!
//! Each input line is either a command word (`play`, `next`, `vol-up`, …,
//! `reconnect`) or one of the shell verbs below. Session events are printed
//! as they arrive.

use std::sync::Arc;

use anyhow::{Context, Result};
use rctl_client::{ChannelObserver, SessionConfig, SessionManager};
use rctl_core::CommandKind;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use super::print_event;

const SHELL_VERBS: &str = "connect  disconnect  status  log [n]  pending  help  quit";

fn help() -> String {
    let commands: Vec<&str> = CommandKind::ALL.iter().map(|kind| kind.name()).collect();
    format!(
        "commands:   {}\nshell:      {SHELL_VERBS}",
        commands.join("  ")
    )
}

/// What one line of input asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Submit(CommandKind),
    Connect,
    Disconnect,
    Status,
    Log(Option<usize>),
    Pending,
    Help,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Input::Empty;
    };
    match verb.to_ascii_lowercase().as_str() {
        "connect" => Input::Connect,
        "disconnect" => Input::Disconnect,
        "status" => Input::Status,
        "log" => Input::Log(words.next().and_then(|n| n.parse().ok())),
        "pending" => Input::Pending,
        "help" | "?" => Input::Help,
        "quit" | "exit" => Input::Quit,
        _ => match verb.parse::<CommandKind>() {
            Ok(kind) => Input::Submit(kind),
            Err(_) => Input::Unknown(verb.to_string()),
        },
    }
}

pub async fn run(address: &str, config: SessionConfig, json: bool) -> Result<()> {
    info!(address = %address, "shell");

    let (observer, mut events) = ChannelObserver::new();
    let session = SessionManager::new(address, config, Arc::new(observer))
        .with_context(|| format!("cannot use address '{address}'"))?;
    eprintln!("rctl: {address} (type `help` for commands)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if !handle_input(&session, parse_input(&line)).await {
                    break;
                }
            }
            Some(event) = events.recv() => print_event(&event, json)?,
        }
    }

    session.shutdown().await;
    while let Some(event) = events.recv().await {
        print_event(&event, json)?;
    }
    Ok(())
}

/// Act on one input line. Returns `false` when the shell should exit.
async fn handle_input(session: &SessionManager, input: Input) -> bool {
    match input {
        Input::Empty => {}
        Input::Submit(kind) => {
            let seq = session.submit(kind);
            eprintln!("-- #{seq} {kind} queued");
        }
        Input::Connect => session.reconnect(),
        Input::Disconnect => session.disconnect().await,
        Input::Status => println!(
            "{} {} (pending: {}, log: {} lines)",
            session.address(),
            session.state(),
            session.pending().len(),
            session.output().len()
        ),
        Input::Log(n) => {
            let lines = match n {
                Some(n) => session.output().tail(n),
                None => session.output().snapshot(),
            };
            for line in lines {
                println!("{}", line.text);
            }
        }
        Input::Pending => {
            for pending in session.pending() {
                println!(
                    "#{} {} {:?} (failures: {})",
                    pending.seq(),
                    pending.command.kind,
                    pending.state,
                    pending.failures
                );
            }
        }
        Input::Help => println!("{}", help()),
        Input::Quit => return false,
        Input::Unknown(word) => eprintln!("rctl: unknown input '{word}' (try `help`)"),
    }
    true
}
