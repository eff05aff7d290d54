//! # tally-chat
//!
//! Terminal group chat over the Tally realtime socket. Lines typed on stdin
//! are sent to the active group; slash commands switch groups, load
//! history, and manage the connection.

#![deny(unsafe_code)]

mod app;
mod command;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use tally_core::GroupId;
use tally_realtime::{
    FileTokenSupplier, HistoryClient, RealtimeSession, StaticTokenSupplier, TokenSupplier,
    WebSocketConfig, WebSocketConnector,
};
use tally_settings::TallySettings;

use crate::app::{ChatApp, render_frame};
use crate::command::Command;

/// Tally group chat client.
#[derive(Parser, Debug)]
#[command(name = "tally-chat", about = "Tally group chat client")]
struct Cli {
    /// Realtime socket URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Group to join once connected.
    #[arg(long)]
    group: Option<GroupId>,

    /// Access token (otherwise read from the token file).
    #[arg(long)]
    token: Option<String>,

    /// Settings file (defaults to `~/.tally/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

fn load_settings(cli: &Cli) -> Result<TallySettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(tally_settings::settings_path);
    tally_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn token_supplier(cli: &Cli, settings: &TallySettings) -> Arc<dyn TokenSupplier> {
    match &cli.token {
        Some(token) => Arc::new(StaticTokenSupplier::new(token.clone())),
        None => {
            let path = settings.token_file_path(&tally_settings::data_dir());
            tracing::debug!(path = %path.display(), "reading access token from file");
            Arc::new(FileTokenSupplier::new(path))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    tally_core::logging::init_subscriber(level);

    let tokens = token_supplier(&cli, &settings);
    let connector = WebSocketConnector::new(WebSocketConfig::from(&settings.realtime));
    let session = RealtimeSession::new(Arc::new(connector), Arc::clone(&tokens));
    let history = HistoryClient::from_settings(&settings.api, tokens)
        .context("Failed to build HTTP client")?;
    let url = cli
        .url
        .clone()
        .unwrap_or_else(|| settings.realtime.websocket_url.clone());

    let mut app = ChatApp::new(session, history, url);
    let mut state_rx = app.session().watch_state();
    app.start(cli.group);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(command) => {
                        if !app.handle(command).await {
                            break;
                        }
                    }
                    Err(e) => println!("* {e}"),
                }
            }
            frame = app.next_message() => println!("{}", render_frame(&frame)),
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                app.on_state(state);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    app.shutdown();
    Ok(())
}
