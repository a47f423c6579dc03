//! `rctl send [address] <command>...`: one-shot command delivery.
//!
//! Submits every command up front, prints events until each has a result,
//! keeps printing received output for a short linger window, then shuts the
//! session down.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rctl_client::{ChannelObserver, CommandOutcome, SessionConfig, SessionEvent, SessionManager};
use rctl_core::{CommandKind, RctlError};
use tokio::time;
use tracing::{debug, info};

use super::print_event;
use crate::config::Config;

/// Split positional arguments into an address and the commands to send.
///
/// The first argument is taken as the address unless it already names a
/// command, in which case the configured address is used.
pub fn split_args(args: &[String], cfg: &Config) -> Result<(String, Vec<CommandKind>)> {
    let (given, words) = match args.split_first() {
        Some((first, rest)) if first.parse::<CommandKind>().is_err() => {
            (Some(first.as_str()), rest)
        }
        _ => (None, args),
    };
    let address = cfg.resolve_address(given)?;

    if words.is_empty() {
        anyhow::bail!("no commands given");
    }
    let commands = words
        .iter()
        .map(|word| word.parse::<CommandKind>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok((address, commands))
}

/// Deliver `commands` and report whether all of them were acknowledged.
pub async fn run(
    address: &str,
    commands: &[CommandKind],
    config: SessionConfig,
    linger: Duration,
    json: bool,
) -> Result<()> {
    info!(address = %address, count = commands.len(), "send");

    let (observer, mut events) = ChannelObserver::new();
    let session = SessionManager::new(address, config, Arc::new(observer))
        .with_context(|| format!("cannot use address '{address}'"))?;

    let mut waiting: HashSet<u64> = commands.iter().map(|kind| session.submit(*kind)).collect();
    let mut failed = Vec::new();
    let mut exhausted = None;

    while !waiting.is_empty() {
        let Some(event) = events.recv().await else {
            break;
        };
        print_event(&event, json)?;
        match event {
            SessionEvent::CommandResult { seq, outcome, .. } => {
                if waiting.remove(&seq) && outcome == CommandOutcome::Failed {
                    failed.push(seq);
                }
            }
            SessionEvent::ReconnectExhausted { attempts } => {
                exhausted = Some(attempts);
                break;
            }
            _ => {}
        }
    }

    if exhausted.is_none() {
        debug!(?linger, "lingering for output");
        let deadline = time::Instant::now() + linger;
        while let Ok(Some(event)) = time::timeout_at(deadline, events.recv()).await {
            print_event(&event, json)?;
        }
    }

    session.shutdown().await;
    while let Some(event) = events.recv().await {
        print_event(&event, json)?;
    }

    if let Some(attempts) = exhausted {
        return Err(RctlError::ReconnectExhausted { attempts }).with_context(|| {
            format!(
                "could not reach {address}; {} command(s) not delivered",
                waiting.len()
            )
        });
    }
    if let Some(&seq) = failed.first() {
        return Err(RctlError::CommandFailed { seq })
            .with_context(|| format!("{} command(s) failed", failed.len()));
    }
    Ok(())
}
