//! CLI subcommand implementations.

pub mod send;
pub mod shell;

use std::io::Write;

use anyhow::Result;
use rctl_client::{CommandOutcome, SessionEvent};

/// Print one session event.
///
/// Received lines go to stdout as-is; everything else goes to stderr. With
/// `json`, every event is written to stdout as one JSON object per line.
pub fn print_event(event: &SessionEvent, json: bool) -> Result<()> {
    if json {
        let mut stdout = std::io::stdout().lock();
        serde_json::to_writer(&mut stdout, event)?;
        writeln!(stdout)?;
        return Ok(());
    }

    match event {
        SessionEvent::OutputAppended { line } => println!("{}", line.text),
        SessionEvent::StateChanged { state } => eprintln!("-- {state}"),
        SessionEvent::CommandResult { seq, kind, outcome } => {
            let outcome = match outcome {
                CommandOutcome::Acknowledged => "ok",
                CommandOutcome::Failed => "FAILED",
            };
            eprintln!("-- #{seq} {kind}: {outcome}");
        }
        SessionEvent::ReconnectExhausted { attempts } => {
            eprintln!("-- gave up after {attempts} connect attempts")
        }
    }
    Ok(())
}
