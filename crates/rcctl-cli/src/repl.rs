//! REPL – line-oriented operator console for the control loop.
//!
//! Every line is either an input event forwarded to the control loop or a
//! slash-command:
//!
//!   press <key> | release <key>   – keyboard keydown / keyup (`up`, `w`, `space`, …)
//!   hold <button> | let <button>  – on-screen hold button down / up
//!   say <text>                    – voice transcript
//!   pose <label> [confidence]     – one classifier frame
//!   blur                          – focus lost; stops the vehicle
//!   /speed <0-100>                – speed slider
//!   /mode <keyboard|pointer|voice|pose>
//!   /status                       – link, last command, held controls
//!   /log                          – telemetry log
//!   /save                         – write settings to `~/.rcctl/config.toml`
//!   /help
//!   /quit | /exit

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use rcctl_input::{InputEvent, InputMode};
use rcctl_runtime::{ControlRequest, ControlSnapshot};
use rcctl_types::LinkStatus;

use crate::config::{self, Config};

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Input(InputEvent),
    Mode(InputMode),
    Status,
    Log,
    Save,
    Help,
    Quit,
    Empty,
}

/// Map console key names onto DOM `KeyboardEvent.key` values.
fn key_name(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "up" => "ArrowUp".to_string(),
        "down" => "ArrowDown".to_string(),
        "left" => "ArrowLeft".to_string(),
        "right" => "ArrowRight".to_string(),
        "space" => " ".to_string(),
        _ => raw.to_string(),
    }
}

/// Parse one console line.
pub fn parse_line(line: &str) -> Result<ReplCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ReplCommand::Empty);
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (line, ""),
    };

    let need = |what: &str| -> Result<(), String> {
        if rest.is_empty() {
            Err(format!("usage: {head} <{what}>"))
        } else {
            Ok(())
        }
    };

    match head.to_ascii_lowercase().as_str() {
        "press" => {
            need("key")?;
            Ok(ReplCommand::Input(InputEvent::KeyDown(key_name(rest))))
        }
        "release" => {
            need("key")?;
            Ok(ReplCommand::Input(InputEvent::KeyUp(key_name(rest))))
        }
        "hold" => {
            need("button")?;
            Ok(ReplCommand::Input(InputEvent::PointerDown(rest.to_string())))
        }
        "let" => {
            need("button")?;
            Ok(ReplCommand::Input(InputEvent::PointerUp(rest.to_string())))
        }
        "say" => {
            need("text")?;
            Ok(ReplCommand::Input(InputEvent::Utterance(rest.to_string())))
        }
        "pose" => {
            need("label")?;
            let mut parts = rest.split_whitespace();
            let label = parts.next().unwrap_or_default().to_string();
            let confidence = match parts.next() {
                Some(c) => c
                    .parse::<f32>()
                    .map_err(|_| format!("invalid confidence '{c}'"))?,
                None => 1.0,
            };
            Ok(ReplCommand::Input(InputEvent::PoseFrame { label, confidence }))
        }
        "blur" => Ok(ReplCommand::Input(InputEvent::FocusLost)),
        "/speed" => {
            need("0-100")?;
            let raw = rest.strip_prefix("speed:").unwrap_or(rest);
            let value = raw
                .parse::<f64>()
                .map_err(|_| format!("invalid speed '{rest}'"))?;
            Ok(ReplCommand::Input(InputEvent::Speed(value)))
        }
        "/mode" => {
            need("keyboard|pointer|voice|pose")?;
            rest.parse::<InputMode>().map(ReplCommand::Mode)
        }
        "/status" => Ok(ReplCommand::Status),
        "/log" => Ok(ReplCommand::Log),
        "/save" => Ok(ReplCommand::Save),
        "/help" => Ok(ReplCommand::Help),
        "/quit" | "/exit" => Ok(ReplCommand::Quit),
        other => Err(format!("unknown command '{other}'")),
    }
}

/// Run the console on the current (non-async) thread until the operator
/// quits, input ends, or `shutdown` is raised elsewhere.
///
/// Dropping `requests` on return lets the control loop stop the vehicle.
pub fn run(
    requests: mpsc::Sender<ControlRequest>,
    shutdown: Arc<watch::Sender<bool>>,
    mut cfg: Config,
    config_path: &Path,
) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            shutdown.send_replace(true);
            return;
        }
    };

    loop {
        if *shutdown.borrow() {
            break;
        }
        let prompt = format!("{} ", format!("rcctl[{}]>", cfg.mode).bold().cyan());
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", "Interrupted – stopping vehicle.".yellow().bold());
                shutdown.send_replace(true);
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        let _ = editor.add_history_entry(line.as_str());

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(msg) => {
                println!(
                    "{} {}. Type {} for available commands.",
                    "Error:".red(),
                    msg,
                    "/help".bold()
                );
                continue;
            }
        };

        match command {
            ReplCommand::Empty => {}
            ReplCommand::Input(event) => {
                if requests.blocking_send(ControlRequest::Input(event)).is_err() {
                    break;
                }
            }
            ReplCommand::Mode(mode) => {
                if requests.blocking_send(ControlRequest::SetMode(mode)).is_err() {
                    break;
                }
                cfg.mode = mode;
                println!("  Mode set to {}.", mode.to_string().bold());
            }
            ReplCommand::Status => match snapshot(&requests) {
                Some(snap) => print_status(&snap),
                None => break,
            },
            ReplCommand::Log => match snapshot(&requests) {
                Some(snap) => print_log(&snap),
                None => break,
            },
            ReplCommand::Save => match config::save_to(&cfg, config_path) {
                Ok(()) => println!(
                    "  {} Settings saved to {}",
                    "✓".green(),
                    config_path.display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            },
            ReplCommand::Help => print_help(),
            ReplCommand::Quit => {
                println!("{}", "Stopping vehicle. Goodbye.".green());
                shutdown.send_replace(true);
                break;
            }
        }
    }
}

fn snapshot(requests: &mpsc::Sender<ControlRequest>) -> Option<ControlSnapshot> {
    let (tx, rx) = oneshot::channel();
    requests.blocking_send(ControlRequest::Snapshot(tx)).ok()?;
    rx.blocking_recv().ok()
}

fn print_status(snap: &ControlSnapshot) {
    let link = match snap.link {
        LinkStatus::Connected => snap.link.to_string().green(),
        LinkStatus::Connecting => snap.link.to_string().yellow(),
        LinkStatus::Disconnected => snap.link.to_string().red(),
    };
    let or_dash = |v: Option<String>| v.unwrap_or_else(|| "–".to_string());
    println!("  Link       : {}", link);
    println!("  Mode       : {}", snap.mode.to_string().bold());
    println!("  Last sent  : {}", or_dash(snap.last_sent.map(|c| c.to_string())));
    println!("  Speed      : {} (sent: {})",
        or_dash(snap.speed.map(|s| format!("{s}%"))),
        or_dash(snap.last_speed_sent.map(|s| format!("{s}%"))),
    );
    if snap.held.is_empty() {
        println!("  Held       : {}", "none".dimmed());
    } else {
        println!("  Held       : {}", snap.held.join(", "));
    }
}

fn print_log(snap: &ControlSnapshot) {
    if snap.telemetry.is_empty() {
        println!("  {}", "(telemetry log is empty)".dimmed());
        return;
    }
    for line in &snap.telemetry {
        println!("  {line}");
    }
}

fn print_help() {
    println!();
    println!("{}", "Input:".bold());
    println!("  {}  keyboard keydown / keyup (up, down, left, right, w/a/s/d, space)", "press|release <key>".cyan());
    println!("  {}     on-screen hold button (forward, backward, left, right, stop)", "hold|let <button>".cyan());
    println!("  {}            voice transcript", "say <text>".cyan());
    println!("  {}  classifier frame (confidence defaults to 1.0)", "pose <label> [conf]".cyan());
    println!("  {}                  focus lost; stops the vehicle", "blur".cyan());
    println!();
    println!("{}", "Commands:".bold());
    println!("  {}   speed slider", "/speed <0-100>".cyan());
    println!("  {}   switch input modality", "/mode <name>".cyan());
    println!("  {}          link state and last command", "/status".cyan());
    println!("  {}             telemetry log", "/log".cyan());
    println!("  {}            write settings to disk", "/save".cyan());
    println!("  {}     stop the vehicle and exit", "/quit | /exit".cyan());
    println!();
}
