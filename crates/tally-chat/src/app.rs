//! The chat client: one realtime session, a history client, and the
//! commands a user can run against them.

use std::future;

use tokio::sync::mpsc;
use tracing::{info, warn};

use tally_core::GroupId;
use tally_realtime::{
    ChatMessage, ConnectionState, Expense, GroupHistory, HistoryClient, InboundFrame,
    RealtimeSession, TimelineItem,
};

use crate::command::Command;

/// Application root state.
pub struct ChatApp {
    session: RealtimeSession,
    history: HistoryClient,
    url: String,
    inbound: Option<mpsc::Receiver<InboundFrame>>,
    last_group: Option<GroupId>,
}

impl ChatApp {
    /// Wrap a session that has not been connected yet.
    pub fn new(session: RealtimeSession, history: HistoryClient, url: String) -> Self {
        Self {
            session,
            history,
            url,
            inbound: None,
            last_group: None,
        }
    }

    /// The session this app drives.
    pub fn session(&self) -> &RealtimeSession {
        &self.session
    }

    /// Attach the listener, connect, and join `group` once open.
    pub fn start(&mut self, group: Option<GroupId>) {
        self.inbound = Some(self.session.subscribe());
        if let Some(group) = group {
            self.last_group = Some(group);
            self.session.join_group(group);
        }
        self.session.connect(self.url.clone());
    }

    /// Next message for the active group. Pends while no listener is
    /// attached.
    pub async fn next_message(&mut self) -> InboundFrame {
        loop {
            let Some(rx) = self.inbound.as_mut() else {
                return future::pending().await;
            };
            let next = rx.recv().await;
            match next {
                Some(frame) => return frame,
                None => self.inbound = None,
            }
        }
    }

    /// React to a connection state change.
    pub fn on_state(&mut self, state: ConnectionState) {
        info!(%state, "connection state changed");
        match state {
            ConnectionState::Open => println!("* connected"),
            ConnectionState::Idle => {
                println!("* disconnected (type /reconnect to connect again)");
            }
            ConnectionState::Connecting => {}
        }
    }

    /// Run one command. Returns `false` when the user asked to quit.
    pub async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Empty => {}
            Command::Quit => return false,
            Command::Say(text) => {
                for line in self.say(text) {
                    println!("{line}");
                }
            }
            Command::Join(group) => {
                if self.inbound.is_none() {
                    self.inbound = Some(self.session.subscribe());
                }
                self.last_group = Some(group);
                self.session.join_group(group);
                if self.session.state() == ConnectionState::Open {
                    println!("* joined group {group}");
                } else {
                    println!("* will join group {group} once connected");
                }
            }
            Command::Leave => match self.session.active_group() {
                Some(group) => {
                    self.session.leave_group();
                    self.last_group = None;
                    println!("* left group {group}");
                }
                None => println!("* no active group"),
            },
            Command::History => self.print_history().await,
            Command::Reconnect => self.reconnect(),
            Command::State => {
                let group = self
                    .session
                    .active_group()
                    .map_or_else(|| "none".to_string(), |g| g.to_string());
                println!(
                    "* state: {}, active group: {group}, dropped frames: {}",
                    self.session.state(),
                    self.session.dropped_frames()
                );
            }
        }
        true
    }

    /// Leave the active group and close the connection.
    pub fn shutdown(&self) {
        self.session.leave_group();
        self.session.disconnect();
    }

    /// Echo `text` locally, then hand it to the session. A note follows the
    /// echo when the session could not send it.
    fn say(&self, text: String) -> Vec<String> {
        let mut lines = vec![format!("you: {text}")];
        if !self.session.send_message(text) {
            lines.push(format!("* not delivered: {}", self.unsendable_reason()));
        }
        lines
    }

    fn reconnect(&mut self) {
        self.session.disconnect();
        self.inbound = Some(self.session.subscribe());
        if let Some(group) = self.last_group {
            self.session.join_group(group);
        }
        self.session.connect(self.url.clone());
        println!("* reconnecting to {}", self.url);
    }

    async fn print_history(&self) {
        let Some(group) = self.session.active_group() else {
            println!("* no active group");
            return;
        };
        match self.history.fetch(group).await {
            Ok(history) => {
                for line in render_history(&history) {
                    println!("{line}");
                }
            }
            Err(e) => {
                warn!(group_id = %group, "history fetch failed: {e}");
                println!("* could not load history: {e}");
            }
        }
    }

    fn unsendable_reason(&self) -> &'static str {
        if self.session.state() != ConnectionState::Open {
            "not connected"
        } else if self.session.active_group().is_none() {
            "no active group (use /join <id>)"
        } else {
            "outbound buffer full"
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

/// One-line rendering of an inbound frame.
pub fn render_frame(frame: &InboundFrame) -> String {
    match ChatMessage::try_from(frame) {
        Ok(message) => render_message(&message),
        Err(_) => format!("[group {}] {}", frame.group_id(), frame.payload()),
    }
}

fn render_message(message: &ChatMessage) -> String {
    let who = message
        .sender
        .map_or_else(|| "someone".to_string(), |u| format!("user {u}"));
    format!("{}{who}: {}", stamp(message.created_at), message.body)
}

fn render_expense(expense: &Expense) -> String {
    format!(
        "{}expense \"{}\" {:.2} by user {}",
        stamp(expense.created_at),
        expense.title,
        expense.amount,
        expense.user_id
    )
}

fn stamp(at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    at.map(|t| format!("[{}] ", t.format("%-d %b %H:%M")))
        .unwrap_or_default()
}

/// Header plus timeline of a group's history.
pub fn render_history(history: &GroupHistory) -> Vec<String> {
    let mut lines = vec![format!(
        "── {} (group {}, {} members) ──",
        history.name, history.id, history.total_users
    )];
    lines.extend(history.timeline().into_iter().map(|item| match item {
        TimelineItem::Message(m) => render_message(m),
        TimelineItem::Expense(e) => render_expense(e),
    }));
    lines
}
