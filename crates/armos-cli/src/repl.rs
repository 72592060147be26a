//! REPL – the operator console.
//!
//! Supported slash-commands:
//!   /help             – show this list
//!   /pickup <target>  – search for and grab `<target>`
//!   /place [location] – put the held object down
//!   /stop             – abort and return home
//!   /status           – show the reflex loop state
//!   /quit | /exit     – gracefully exit
//!
//! Any other line is handed to the language model as a spoken request.
//! Slash commands are turned into command objects, which the intent unit
//! forwards without a model round-trip.

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use armos_runtime::StatusBoard;
use armos_types::CommandMessage;
use tokio::sync::mpsc;

/// What one console line asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplAction {
    Empty,
    Help,
    Status,
    Quit,
    /// Forward to the intent unit.
    Utter(String),
    /// A slash command with missing arguments.
    Usage(&'static str),
    Unknown(String),
}

/// Classify one console line.
pub fn parse_line(line: &str) -> ReplAction {
    let line = line.trim();
    if line.is_empty() {
        return ReplAction::Empty;
    }
    if !line.starts_with('/') {
        return ReplAction::Utter(line.to_string());
    }

    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    let message = match cmd {
        "/help" => return ReplAction::Help,
        "/status" => return ReplAction::Status,
        "/quit" | "/exit" => return ReplAction::Quit,
        "/pickup" if rest.is_empty() => return ReplAction::Usage("/pickup <target>"),
        "/pickup" => CommandMessage::Pickup {
            target: Some(rest.to_string()),
        },
        "/place" => CommandMessage::Place {
            location: (!rest.is_empty()).then(|| rest.to_string()),
        },
        "/stop" => CommandMessage::Stop,
        other => return ReplAction::Unknown(other.to_string()),
    };
    match serde_json::to_string(&message) {
        Ok(json) => ReplAction::Utter(json),
        Err(e) => ReplAction::Unknown(e.to_string()),
    }
}

/// Entry point for the interactive REPL.
///
/// Returns when the operator quits, stdin closes, the intent unit goes away
/// or `shutdown` is raised.
pub fn run(utterances: mpsc::Sender<String>, status: StatusBoard, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "armos>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        match parse_line(&line) {
            ReplAction::Empty => {}
            ReplAction::Help => cmd_help(),
            ReplAction::Status => cmd_status(&status),
            ReplAction::Quit => {
                println!("{}", "Goodbye.".green());
                break;
            }
            ReplAction::Usage(usage) => {
                println!("{} {}", "Usage:".yellow(), usage.bold());
            }
            ReplAction::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
            ReplAction::Utter(text) => {
                if utterances.blocking_send(text).is_err() {
                    println!("{}", "Intent unit is gone; exiting.".red());
                    break;
                }
            }
        }
    }
    shutdown.store(true, Ordering::SeqCst);
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "ArmOS Commands".bold().underline());
    println!("  {}  – search for and grab an object", "/pickup <target>".bold().cyan());
    println!("  {} – put the held object down", "/place [location]".bold().cyan());
    println!("  {}             – abort and return home", "/stop".bold().cyan());
    println!("  {}           – reflex loop state", "/status".bold().cyan());
    println!("  {}      – exit", "/quit  /exit".bold().cyan());
    println!("  Anything else is sent to the language model, e.g. {}", "grab the red cup".italic());
    println!();
}

fn cmd_status(status: &StatusBoard) {
    let s = status.snapshot();
    let running = if s.running { "running".green() } else { "stopped".red() };
    println!("{}", "Reflex Unit".bold().underline());
    println!("  State     : {} ({})", s.task.label().yellow(), running);
    println!("  Rate      : {:.1} Hz", s.fps);
    println!("  Last loop : {:.2} ms", s.last_loop.as_secs_f64() * 1000.0);
    println!("  Ticks     : {}", s.ticks);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(json: &str) -> CommandMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn plain_text_goes_to_the_model() {
        assert_eq!(
            parse_line("  grab the apple \n"),
            ReplAction::Utter("grab the apple".into())
        );
        assert_eq!(parse_line("   "), ReplAction::Empty);
    }

    #[test]
    fn pickup_becomes_a_command_object() {
        let ReplAction::Utter(json) = parse_line("/pickup red cup") else {
            panic!("expected utterance");
        };
        assert_eq!(
            parsed(&json),
            CommandMessage::Pickup {
                target: Some("red cup".into())
            }
        );
        assert_eq!(parse_line("/pickup"), ReplAction::Usage("/pickup <target>"));
        assert_eq!(parse_line("/pickup   "), ReplAction::Usage("/pickup <target>"));
    }

    #[test]
    fn place_location_is_optional() {
        let ReplAction::Utter(json) = parse_line("/place") else {
            panic!("expected utterance");
        };
        assert_eq!(parsed(&json), CommandMessage::Place { location: None });

        let ReplAction::Utter(json) = parse_line("/place  the table") else {
            panic!("expected utterance");
        };
        assert_eq!(
            parsed(&json),
            CommandMessage::Place {
                location: Some("the table".into())
            }
        );
    }

    #[test]
    fn control_commands() {
        let ReplAction::Utter(json) = parse_line("/stop") else {
            panic!("expected utterance");
        };
        assert_eq!(parsed(&json), CommandMessage::Stop);
        assert_eq!(parse_line("/help"), ReplAction::Help);
        assert_eq!(parse_line("/status"), ReplAction::Status);
        assert_eq!(parse_line("/exit"), ReplAction::Quit);
        assert_eq!(parse_line("/dance"), ReplAction::Unknown("/dance".into()));
    }
}
