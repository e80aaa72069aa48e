//! The Session (spec.md §4.7): the state machine binding one connected user
//! to the Chat Directory, the Room Router, and the UI collaborator.
//!
//! The UI itself — rendering, input framing, the terminal — is out of scope
//! (SPEC_FULL.md §5); `SessionUi` is the seam the core is written against.
//! `transport.rs` provides the one concrete implementation this crate ships.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::command::{self, Command};
use crate::config::Config;
use crate::directory::{ChatDirectory, DirectoryEvent, UserInfo};
use crate::error::WhisperError;
use crate::identity::EphemeralIdentity;
use crate::message::{self, ChatMessage};
use crate::overlay::Overlay;
use crate::ratelimit::RateLimiter;
use crate::router::RoomRouter;

/// Output callbacks a UI collaborator implements to receive Session events.
/// Every method is a plain synchronous callback — the UI is responsible for
/// its own buffering/redraw scheduling.
pub trait SessionUi: Send + Sync {
    fn on_message(&self, message: &ChatMessage);
    fn on_system_message(&self, text: &str);
    fn on_user_list(&self, users: &[UserInfo]);
    fn on_room_change(&self, room: &str);
    fn on_disconnect(&self);
    fn on_clear(&self);
}

struct SharedState {
    nick: String,
    room: String,
    is_connected: bool,
}

/// One connected user. Constructed fresh per SSH connection with a brand new
/// `EphemeralIdentity` (spec.md §9) — nothing here survives past `destroy`.
pub struct Session {
    session_id: String,
    identity: EphemeralIdentity,
    directory: Arc<ChatDirectory>,
    router: RoomRouter,
    ui: Arc<dyn SessionUi>,
    config: Config,
    rate_limiter: Mutex<RateLimiter>,
    state: Mutex<SharedState>,
    directory_listener: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        identity: EphemeralIdentity,
        overlay: Arc<dyn Overlay>,
        directory: Arc<ChatDirectory>,
        config: Config,
        ui: Arc<dyn SessionUi>,
    ) -> Arc<Self> {
        let session_id = identity.fingerprint().to_string();
        let default_nick = identity.default_nick();
        let default_room = config.default_room.clone();
        let rate_limit = config.rate_limit;
        Arc::new(Self {
            session_id,
            identity,
            directory,
            router: RoomRouter::new(overlay),
            ui,
            config,
            rate_limiter: Mutex::new(RateLimiter::new(rate_limit)),
            state: Mutex::new(SharedState {
                nick: default_nick,
                room: default_room,
                is_connected: false,
            }),
            directory_listener: Mutex::new(None),
        })
    }

    pub fn fingerprint(&self) -> &str {
        self.identity.fingerprint()
    }

    fn nick(&self) -> String {
        self.state.lock().unwrap().nick.clone()
    }

    fn room(&self) -> String {
        self.state.lock().unwrap().room.clone()
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().is_connected
    }

    /// Registers in the Directory, attaches the Directory listener (filtered
    /// by room and self-fingerprint), joins the default room, and emits the
    /// welcome messages.
    pub async fn start(self: &Arc<Self>) {
        let room = self.room();
        let nick = self.nick();
        self.directory
            .add_user(&self.session_id, &nick, self.fingerprint(), &room);
        self.attach_directory_listener();
        self.state.lock().unwrap().is_connected = true;

        if let Err(e) = self.join_room_inner(&room, true).await {
            warn!(error = %e, "failed to join default room on start");
        }

        self.ui
            .on_system_message("Welcome to Whisper — anonymous, ephemeral chat.");
        self.ui
            .on_system_message(&format!("You are {nick} ({}).", self.fingerprint()));
        self.ui
            .on_system_message("Type /help to see available commands.");
    }

    /// Subscribes to `DirectoryEvent`s and re-emits the ones this session
    /// cares about to the UI: chat messages in its own room from other
    /// fingerprints, and user-list refresh triggers for its own room.
    fn attach_directory_listener(self: &Arc<Self>) {
        let mut rx = self.directory.subscribe();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                };
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.handle_directory_event(event);
            }
        });
        *self.directory_listener.lock().unwrap() = Some(handle);
    }

    fn handle_directory_event(&self, event: DirectoryEvent) {
        let my_room = self.room();
        match event {
            DirectoryEvent::Message(m) => {
                if m.room == my_room && m.fingerprint != self.fingerprint() {
                    self.ui.on_message(&m);
                }
            }
            DirectoryEvent::UserJoin(u) if u.room == my_room => self.refresh_user_list(),
            DirectoryEvent::UserLeave(u) if u.room == my_room => self.refresh_user_list(),
            DirectoryEvent::UserNick { user, .. } if user.room == my_room => {
                self.refresh_user_list()
            }
            DirectoryEvent::UserRoom { user, old_room } => {
                if user.room == my_room || old_room == my_room {
                    self.refresh_user_list();
                }
            }
            _ => {}
        }
    }

    fn refresh_user_list(&self) {
        let users = self.directory.get_users_in_room(&self.room());
        self.ui.on_user_list(&users);
    }

    fn require_connected(&self) -> bool {
        if !self.is_connected() {
            self.ui.on_system_message("Not connected.");
            return false;
        }
        true
    }

    pub async fn handle_input(self: &Arc<Self>, line: &str) {
        let trimmed = line.trim();
        if !self.require_connected() {
            return;
        }
        if trimmed.is_empty() {
            return;
        }
        if let Some(_rest) = trimmed.strip_prefix('/') {
            self.dispatch_command(trimmed).await;
        } else {
            self.send_message(trimmed).await;
        }
    }

    async fn dispatch_command(self: &Arc<Self>, line: &str) {
        match command::parse(line) {
            Command::Nick(raw) => {
                let sanitized = command::sanitize(&raw, self.config.max_nick_length);
                if !command::is_valid(&sanitized) {
                    self.ui.on_system_message("Invalid nickname.");
                    return;
                }
                self.change_nick(&sanitized).await;
            }
            Command::Join(raw) => {
                let sanitized = command::sanitize(&raw, self.config.max_room_name_length)
                    .to_lowercase();
                if !command::is_valid(&sanitized) {
                    self.ui.on_system_message("Invalid room name.");
                    return;
                }
                self.join_room(&sanitized).await;
            }
            Command::Users => self.show_user_list(),
            Command::Rooms => self.show_room_list(),
            Command::Help => self.ui.on_system_message(command::HELP_TEXT),
            Command::Quit => {
                self.ui.on_system_message("Goodbye!");
                self.disconnect().await;
            }
            Command::Me(text) => self.send_action(&text).await,
            Command::Clear => self.clear_messages(),
            Command::Unknown(name) => {
                self.ui
                    .on_system_message(&command::unknown_command_message(&name));
            }
        }
    }

    pub async fn send_message(self: &Arc<Self>, text: &str) {
        if !self.require_connected() {
            return;
        }
        if !self.rate_limiter.lock().unwrap().record() {
            self.ui
                .on_system_message("You are sending messages too quickly. Slow down.");
            return;
        }
        if !message::size_valid(text, self.config.max_message_size) {
            self.ui.on_system_message(&format!(
                "Message too long (max {} bytes).",
                self.config.max_message_size
            ));
            return;
        }
        let room = self.room();
        let nick = self.nick();
        let m = ChatMessage::text(&room, &nick, self.fingerprint(), text);
        match self.router.send_message(&room, &m).await {
            Ok(()) => {
                self.ui.on_message(&m);
                self.directory.add_message(m);
            }
            Err(e) => {
                debug!(error = %e, "publish failed");
                self.ui.on_system_message("Failed to send message.");
            }
        }
    }

    /// Same rate limit as `send_message`, but no size check (spec.md §4.7, §5).
    pub async fn send_action(self: &Arc<Self>, text: &str) {
        if !self.require_connected() {
            return;
        }
        if !self.rate_limiter.lock().unwrap().record() {
            self.ui
                .on_system_message("You are sending messages too quickly. Slow down.");
            return;
        }
        let room = self.room();
        let nick = self.nick();
        let m = ChatMessage::action(&room, &nick, self.fingerprint(), text);
        match self.router.send_message(&room, &m).await {
            Ok(()) => {
                self.ui.on_message(&m);
                self.directory.add_message(m);
            }
            Err(e) => {
                debug!(error = %e, "publish failed");
                self.ui.on_system_message("Failed to send message.");
            }
        }
    }

    pub async fn change_nick(self: &Arc<Self>, new_nick: &str) {
        if !self.require_connected() {
            return;
        }
        let current = self.nick();
        if new_nick == current {
            self.ui.on_system_message("That's already your nickname.");
            return;
        }
        let room = self.room();
        if self
            .directory
            .is_nick_taken(new_nick, &room, Some(&self.session_id))
        {
            self.ui
                .on_system_message(&format!("Nickname '{new_nick}' is already taken."));
            return;
        }
        let old_nick = current;
        self.state.lock().unwrap().nick = new_nick.to_string();
        self.directory.set_nick(&self.session_id, new_nick);
        let m = ChatMessage::nick(&room, &old_nick, new_nick, self.fingerprint());
        if let Err(e) = self.router.send_message(&room, &m).await {
            warn!(error = %e, "failed to publish nick change");
        }
        self.directory.add_message(m);
        self.ui
            .on_system_message(&format!("You are now known as {new_nick}."));
    }

    pub async fn join_room(self: &Arc<Self>, new_room: &str) {
        if !self.require_connected() {
            return;
        }
        if new_room == self.room() {
            self.ui
                .on_system_message(&format!("You are already in {new_room}."));
            return;
        }
        if let Err(e) = self.join_room_inner(new_room, false).await {
            warn!(error = %e, "failed to join room");
            self.ui.on_system_message("Failed to join room.");
        }
    }

    /// Shared by `start` (joining the default room) and `join_room`
    /// (switching rooms). `is_initial` is false only for the latter: there is
    /// no old room to leave on the very first join.
    async fn join_room_inner(self: &Arc<Self>, new_room: &str, is_initial: bool) -> Result<(), WhisperError> {
        let nick = self.nick();
        if !is_initial {
            let old_room = self.room();
            let leave_msg = ChatMessage::leave(&old_room, &nick, self.fingerprint());
            if let Err(e) = self.router.send_message(&old_room, &leave_msg).await {
                warn!(error = %e, room = %old_room, "failed to publish leave message");
            }
            self.router.leave_room(&old_room).await?;
        }

        self.state.lock().unwrap().room = new_room.to_string();
        self.directory.set_room(&self.session_id, new_room);

        let weak = Arc::downgrade(self);
        self.router
            .join_room(
                new_room,
                Box::new(move |m: ChatMessage| {
                    let Some(session) = weak.upgrade() else {
                        return;
                    };
                    if m.fingerprint == session.fingerprint() {
                        return;
                    }
                    // Persist only; the Directory's own broadcast is the sole
                    // local fan-out path to the UI (attach_directory_listener
                    // delivers it), so calling `ui.on_message` here too would
                    // double-deliver.
                    session.directory.add_message(m);
                }),
            )
            .await?;

        let join_msg = ChatMessage::join(new_room, &nick, self.fingerprint());
        if let Err(e) = self.router.send_message(new_room, &join_msg).await {
            warn!(error = %e, room = %new_room, "failed to publish join message");
        }
        self.directory.add_message(join_msg);

        self.ui.on_room_change(new_room);
        self.refresh_user_list();
        self.ui.on_system_message(&format!("Joined room: {new_room}"));

        self.ui.on_system_message("--- Recent messages ---");
        for m in self.directory.get_recent_messages(new_room, None) {
            if m.fingerprint != self.fingerprint() {
                self.ui.on_message(&m);
            }
        }
        self.ui.on_system_message("--- End of history ---");

        Ok(())
    }

    pub fn show_user_list(&self) {
        let users = self.directory.get_users_in_room(&self.room());
        let rendered = users
            .iter()
            .map(|u| format!("{} ({})", u.nick, u.fingerprint))
            .collect::<Vec<_>>()
            .join(", ");
        self.ui
            .on_system_message(&format!("Users in {}: {rendered}", self.room()));
    }

    pub fn show_room_list(&self) {
        let rooms = self.directory.get_known_rooms();
        self.ui
            .on_system_message(&format!("Known rooms: {}", rooms.join(", ")));
    }

    pub fn clear_messages(&self) {
        self.ui.on_clear();
    }

    pub fn show_system_message(&self, text: &str) {
        self.ui.on_system_message(text);
    }

    /// Idempotent: publishes a leave, unsubscribes, destroys the Router
    /// view, deregisters from the Directory, and flips `is_connected`.
    pub async fn disconnect(self: &Arc<Self>) {
        if !self.is_connected() {
            return;
        }
        let room = self.room();
        let nick = self.nick();
        let leave_msg = ChatMessage::leave(&room, &nick, self.fingerprint());
        if let Err(e) = self.router.send_message(&room, &leave_msg).await {
            warn!(error = %e, "failed to publish leave message on disconnect");
        }
        self.router.destroy().await;
        self.directory.remove_user(&self.session_id);
        self.state.lock().unwrap().is_connected = false;
        self.ui.on_disconnect();
    }

    pub async fn destroy(self: &Arc<Self>) {
        self.disconnect().await;
        if let Some(handle) = self.directory_listener.lock().unwrap().take() {
            handle.abort();
        }
    }
}
