//! taskwire - follow a task's progress stream
//!
//! Entry point for the `taskwire` binary. `watch` opens a reconnecting
//! channel to `<url>/task/<id>` and prints every task message it receives.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use taskwire::config::{self, AppConfig};
use taskwire::logging;
use taskwire::protocol::{ControlFrame, TaskMessage};
use taskwire::version;
use taskwire::{task_endpoint, ConnectionState, Error, LogLevel, LogStore, TaskChannel};

use crate::cli::{Cli, Commands, ConfigSubcommand};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<Error>() {
            Some(err) => {
                eprint!("{}", err.format_for_terminal());
                std::process::exit(err.exit_code());
            }
            None => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            handle_config_command(subcommand)
        }
        Commands::Watch {
            task_id,
            config,
            url,
            raw,
        } => {
            let mut app_config = AppConfig::load(config.as_deref())?;
            if let Some(url) = url {
                app_config.channel.url = url;
                app_config.validate()?;
            }

            let _log_guards = logging::init_logging(&app_config.logging, cli.verbose, cli.quiet)?;
            let build = version::build_info();
            debug!(version = %build.full_version(), target = %build.target, "Starting taskwire");

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("taskwire")
                .build()
                .context("Failed to create async runtime")?;

            runtime.block_on(watch(app_config, &task_id, raw))?;
            Ok(())
        }
    }
}

fn handle_config_command(subcommand: ConfigSubcommand) -> anyhow::Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = AppConfig::load(config.as_deref())?;
            print!("{}", toml::to_string_pretty(&cfg).map_err(Error::from)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration file created: {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            AppConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}

/// What the channel callbacks forward to the watch loop
enum WatchEvent {
    Message(Value),
    State(ConnectionState),
}

/// Stream one task until Ctrl-C or until reconnection gives up
async fn watch(config: AppConfig, task_id: &str, raw: bool) -> taskwire::Result<()> {
    let endpoint = task_endpoint(&config.channel.url, task_id)?;
    let log = Arc::new(LogStore::new(config.logging.max_entries));

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let state_tx = events_tx.clone();

    let channel = TaskChannel::builder(config.channel.channel_config(endpoint.clone()), move |value| {
        let _ = events_tx.send(WatchEvent::Message(value));
    })
    .on_state_change(move |state| {
        let _ = state_tx.send(WatchEvent::State(state));
    })
    .log_sink(log.clone())
    .build();

    info!(endpoint = %endpoint, "Watching task");
    channel.connect();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break Ok(());
            }

            event = events_rx.recv() => match event {
                Some(WatchEvent::Message(value)) => {
                    if let Some(line) = render(&value, raw) {
                        println!("{}", line);
                    }
                }
                Some(WatchEvent::State(state)) => {
                    info!(state = %state, attempts = channel.reconnect_attempts(), "Channel state changed");
                    // Handshake errors with retries left are followed by a reconnect
                    if state == ConnectionState::Error && channel.is_exhausted() {
                        for entry in log.entries_at_least(LogLevel::Error).iter().rev().take(3) {
                            warn!(source = %entry.source, details = ?entry.details, "{}", entry.message);
                        }
                        break Err(Error::ReconnectExhausted {
                            url: endpoint.clone(),
                            attempts: channel.reconnect_attempts(),
                        });
                    }
                }
                None => break Ok(()),
            },
        }
    };

    channel.close();
    outcome
}

/// One display line for an inbound message; keep-alives print nothing
fn render(value: &Value, raw: bool) -> Option<String> {
    if let Some(frame) = ControlFrame::from_value(value) {
        debug!(?frame, "Keep-alive frame");
        return None;
    }
    if raw {
        return Some(value.to_string());
    }

    match TaskMessage::from_value(value.clone()) {
        Ok(message) => Some(format!(
            "{} {}",
            format_timestamp(message.meta().timestamp),
            message
        )),
        Err(_) => Some(value.to_string()),
    }
}

/// Wall-clock time of a float-seconds timestamp
fn format_timestamp(seconds: f64) -> String {
    let secs = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}
