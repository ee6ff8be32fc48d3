//! `rcctl` – terminal remote control for an MQTT robot car.
//!
//! The binary:
//!
//! 1. Loads `~/.rcctl/config.toml`, then applies `RCCTL_*` environment
//!    variables and command-line flags on top.
//! 2. Opens a transport session to the broker in the background; it keeps
//!    reconnecting for as long as the process runs.
//! 3. Runs the control loop on a Tokio runtime and an interactive REPL on
//!    its own thread.
//! 4. On Ctrl-C, SIGTERM, `/quit` or end of input, sends a final stop,
//!    disconnects and exits without waiting for the console.

mod cli;
mod config;
mod repl;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::sync::{mpsc, watch};
use tracing::{error, warn};

use rcctl_middleware::TransportSession;
use rcctl_runtime::{ControlLoop, init_tracing};

/// Queued console requests before the REPL blocks.
const REQUEST_CAPACITY: usize = 64;

fn main() -> ExitCode {
    let _otel_guard = init_tracing("rcctl");
    let cli = cli::Cli::parse();

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    let mut cfg = match config::load_from(&config_path) {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config_path.display().to_string().bold()
            );
            cfg
        }
        Ok(None) => config::Config::default(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    cli.apply(&mut cfg);

    let broker = match cfg.broker_config() {
        Ok(broker) => broker,
        Err(e) => {
            eprintln!("{}: {}", "Invalid settings".red(), e);
            return ExitCode::FAILURE;
        }
    };
    let loop_config = cfg.control_loop_config();

    println!(
        "  Broker {} ({})  device {}",
        broker.endpoint().bold(),
        broker.transport,
        broker.device_id.bold()
    );
    println!(
        "  Publishing to {}, listening on {}",
        broker.command_topic().dimmed(),
        broker.telemetry_topic().dimmed()
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    // ── Shutdown signal ───────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let stop_ctrlc = stop_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Signal received – stopping vehicle …".yellow().bold());
        stop_ctrlc.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to stop the vehicle");
    }

    // ── Control loop ──────────────────────────────────────────────────────
    let (req_tx, req_rx) = mpsc::channel(REQUEST_CAPACITY);
    let control = runtime.spawn(async move {
        let (mut session, events) = TransportSession::new(broker);
        session.connect();
        ControlLoop::new(loop_config, session, events)
            .run(req_rx, stop_rx)
            .await;
    });

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    // The console gets its own thread so a signal can end the process while
    // it is still blocked reading a line.
    let repl_stop = stop_tx.clone();
    let console = std::thread::Builder::new()
        .name("rcctl-repl".into())
        .spawn(move || {
            repl::run(req_tx, repl_stop.clone(), cfg, &config_path);
            repl_stop.send_replace(true);
        });
    if let Err(e) = console {
        error!(error = %e, "failed to start console thread");
        stop_tx.send_replace(true);
    }

    if let Err(e) = runtime.block_on(control) {
        error!(error = %e, "control loop task failed");
        return ExitCode::FAILURE;
    }
    println!("{}", "  ✓ Vehicle stopped, link closed.".green());
    ExitCode::SUCCESS
}

fn print_banner() {
    println!();
    println!("{}", r#"   _________  _______  __ "#.bold().cyan());
    println!("{}", r#"  / ___/ ___/ ___/ /_/ / "#.bold().cyan());
    println!("{}", r#" / /  / /__/ /__/ __/ /  "#.bold().cyan());
    println!("{}", r#"/_/   \___/\___/\__/_/   "#.bold().cyan());
    println!();
    println!("  {} {}", "rcctl".bold(), env!("CARGO_PKG_VERSION").dimmed());
    println!("  Robot car remote control over MQTT");
    println!();
}
