//! Minimal line-oriented stdin/stdout transport.
//!
//! SSH session handling and the full-screen terminal UI are out of scope
//! (SPEC_FULL.md §5) — a real deployment plugs a `russh`-backed transport and
//! a `ratatui`-backed renderer in at this seam instead. This module exists so
//! `main.rs` has something real to run: it implements `SessionUi` by printing
//! to stdout, and feeds stdin lines into a `Session` one at a time.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::directory::UserInfo;
use crate::message::ChatMessage;
use crate::session::{Session, SessionUi};

/// Prints every Session callback as a line on stdout.
pub struct StdioUi;

impl SessionUi for StdioUi {
    fn on_message(&self, message: &ChatMessage) {
        println!("[{}] {}: {}", message.room, message.nick, message.content);
    }

    fn on_system_message(&self, text: &str) {
        println!("* {text}");
    }

    fn on_user_list(&self, users: &[UserInfo]) {
        if users.is_empty() {
            return;
        }
        let names: Vec<String> = users.iter().map(|u| u.nick.clone()).collect();
        println!("* users: {}", names.join(", "));
    }

    fn on_room_change(&self, room: &str) {
        println!("* now in room: {room}");
    }

    fn on_disconnect(&self) {
        println!("* disconnected");
    }

    fn on_clear(&self) {
        print!("\x1B[2J\x1B[H");
    }
}

/// Reads lines from stdin and feeds them to `session.handle_input` until EOF
/// or the session disconnects.
pub async fn run_stdio_loop(session: Arc<Session>) -> anyhow::Result<()> {
    session.start().await;
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Some(line) = lines.next_line().await? {
        session.handle_input(&line).await;
    }
    session.destroy().await;
    Ok(())
}
