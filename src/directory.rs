//! The Chat Directory (spec.md §4.5): the single in-process authority for
//! who is connected and what has been said in each room.
//!
//! A single `Mutex` covers both the user table and the per-room message
//! history, per spec.md §5's "single lock covering users and roomMessages is
//! sufficient" guidance. The lock is never held while invoking subscriber
//! callbacks — every mutating operation snapshots what it needs to hand out,
//! releases the lock, then broadcasts (spec.md §5: "must not hold the lock
//! while invoking subscribers").

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::buffer::BoundedBuffer;
use crate::message::ChatMessage;

/// A connected user's directory entry. `joined_at` is stamped once, at
/// `add_user` time, and never updated again (spec.md §3: "created on session
/// start, destroyed on session end").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub session_id: String,
    pub nick: String,
    pub fingerprint: String,
    pub room: String,
    pub joined_at: u64,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Events the Directory fans out to every subscribed Session. Ordering
/// within one variant follows the order of the mutating call that produced
/// it (spec.md §4.5).
#[derive(Debug, Clone)]
pub enum DirectoryEvent {
    UserJoin(UserInfo),
    UserLeave(UserInfo),
    UserNick { user: UserInfo, old_nick: String },
    UserRoom { user: UserInfo, old_room: String },
    Message(ChatMessage),
}

struct Inner {
    users: HashMap<String, UserInfo>,
    room_messages: HashMap<String, BoundedBuffer<ChatMessage>>,
}

/// Shared chat state: connected users plus bounded per-room history.
pub struct ChatDirectory {
    state: Mutex<Inner>,
    events: broadcast::Sender<DirectoryEvent>,
    max_messages_per_room: usize,
}

impl ChatDirectory {
    pub fn new(max_messages_per_room: usize) -> Self {
        let (events, _) = broadcast::channel(4096);
        Self {
            state: Mutex::new(Inner {
                users: HashMap::new(),
                room_messages: HashMap::new(),
            }),
            events,
            max_messages_per_room,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.events.subscribe()
    }

    /// Registers `session_id`, overwriting any prior entry for it — callers
    /// must not call this twice for the same session without an intervening
    /// `removeUser` (spec.md §4.5 treats double-registration as a precondition
    /// violation, not something this method detects).
    pub fn add_user(&self, session_id: &str, nick: &str, fingerprint: &str, room: &str) -> UserInfo {
        let user = UserInfo {
            session_id: session_id.to_string(),
            nick: nick.to_string(),
            fingerprint: fingerprint.to_string(),
            room: room.to_string(),
            joined_at: now_ms(),
        };
        self.state
            .lock()
            .unwrap()
            .users
            .insert(session_id.to_string(), user.clone());
        let _ = self.events.send(DirectoryEvent::UserJoin(user.clone()));
        user
    }

    pub fn remove_user(&self, session_id: &str) -> Option<UserInfo> {
        let removed = self.state.lock().unwrap().users.remove(session_id);
        if let Some(ref user) = removed {
            let _ = self.events.send(DirectoryEvent::UserLeave(user.clone()));
        }
        removed
    }

    pub fn set_nick(&self, session_id: &str, new_nick: &str) -> bool {
        let (updated, old_nick) = {
            let mut guard = self.state.lock().unwrap();
            match guard.users.get_mut(session_id) {
                Some(user) => {
                    let old = std::mem::replace(&mut user.nick, new_nick.to_string());
                    (Some(user.clone()), old)
                }
                None => (None, String::new()),
            }
        };
        match updated {
            Some(user) => {
                let _ = self
                    .events
                    .send(DirectoryEvent::UserNick { user, old_nick });
                true
            }
            None => false,
        }
    }

    pub fn set_room(&self, session_id: &str, new_room: &str) -> bool {
        let (updated, old_room) = {
            let mut guard = self.state.lock().unwrap();
            match guard.users.get_mut(session_id) {
                Some(user) => {
                    let old = std::mem::replace(&mut user.room, new_room.to_string());
                    (Some(user.clone()), old)
                }
                None => (None, String::new()),
            }
        };
        match updated {
            Some(user) => {
                let _ = self
                    .events
                    .send(DirectoryEvent::UserRoom { user, old_room });
                true
            }
            None => false,
        }
    }

    pub fn get_user(&self, session_id: &str) -> Option<UserInfo> {
        self.state.lock().unwrap().users.get(session_id).cloned()
    }

    pub fn get_user_by_fingerprint(&self, fingerprint: &str) -> Option<UserInfo> {
        self.state
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.fingerprint == fingerprint)
            .cloned()
    }

    pub fn get_users_in_room(&self, room: &str) -> Vec<UserInfo> {
        self.state
            .lock()
            .unwrap()
            .users
            .values()
            .filter(|u| u.room == room)
            .cloned()
            .collect()
    }

    /// Union of rooms with at least one occupant and rooms with recorded history.
    pub fn get_known_rooms(&self) -> Vec<String> {
        let guard = self.state.lock().unwrap();
        let mut rooms: HashSet<String> = guard.users.values().map(|u| u.room.clone()).collect();
        rooms.extend(guard.room_messages.keys().cloned());
        let mut rooms: Vec<String> = rooms.into_iter().collect();
        rooms.sort();
        rooms
    }

    pub fn get_user_count(&self) -> usize {
        self.state.lock().unwrap().users.len()
    }

    pub fn add_message(&self, message: ChatMessage) {
        let max = self.max_messages_per_room;
        {
            let mut guard = self.state.lock().unwrap();
            guard
                .room_messages
                .entry(message.room.clone())
                .or_insert_with(|| BoundedBuffer::new(max))
                .push(message.clone());
        }
        let _ = self.events.send(DirectoryEvent::Message(message));
    }

    pub fn get_recent_messages(&self, room: &str, count: Option<usize>) -> Vec<ChatMessage> {
        let guard = self.state.lock().unwrap();
        match guard.room_messages.get(room) {
            Some(buf) => match count {
                Some(n) => buf.get_last(n).into_iter().cloned().collect(),
                None => buf.get_all().into_iter().cloned().collect(),
            },
            None => Vec::new(),
        }
    }

    pub fn is_nick_taken(&self, nick: &str, room: &str, exclude_session_id: Option<&str>) -> bool {
        let needle = nick.to_lowercase();
        self.state.lock().unwrap().users.values().any(|u| {
            u.room == room
                && u.nick.to_lowercase() == needle
                && exclude_session_id != Some(u.session_id.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_user_emits_join_and_stores_entry() {
        let dir = ChatDirectory::new(10);
        let mut rx = dir.subscribe();
        let user = dir.add_user("s1", "alice", "DEADBEEF", "lobby");
        assert_eq!(dir.get_user("s1"), Some(user.clone()));
        match rx.try_recv().unwrap() {
            DirectoryEvent::UserJoin(u) => assert_eq!(u, user),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn remove_user_emits_leave_with_removed_value() {
        let dir = ChatDirectory::new(10);
        dir.add_user("s1", "alice", "DEADBEEF", "lobby");
        let mut rx = dir.subscribe();
        let removed = dir.remove_user("s1").unwrap();
        assert_eq!(removed.nick, "alice");
        match rx.try_recv().unwrap() {
            DirectoryEvent::UserLeave(u) => assert_eq!(u, removed),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(dir.get_user("s1").is_none());
    }

    #[test]
    fn set_nick_does_not_enforce_uniqueness() {
        let dir = ChatDirectory::new(10);
        dir.add_user("s1", "alice", "AAAAAAAA", "lobby");
        dir.add_user("s2", "bob", "BBBBBBBB", "lobby");
        assert!(dir.set_nick("s2", "alice"));
        assert_eq!(dir.get_user("s2").unwrap().nick, "alice");
    }

    #[test]
    fn is_nick_taken_excludes_the_given_session() {
        let dir = ChatDirectory::new(10);
        dir.add_user("s1", "alice", "AAAAAAAA", "lobby");
        assert!(dir.is_nick_taken("alice", "lobby", None));
        assert!(dir.is_nick_taken("ALICE", "lobby", None));
        assert!(!dir.is_nick_taken("alice", "lobby", Some("s1")));
        assert!(!dir.is_nick_taken("alice", "other-room", None));
    }

    #[test]
    fn add_message_creates_room_history_lazily_and_emits_after_insertion() {
        let dir = ChatDirectory::new(10);
        let mut rx = dir.subscribe();
        let m = ChatMessage::text("lobby", "alice", "AAAAAAAA", "hi");
        dir.add_message(m.clone());
        // Subscriber sees the buffer already updated by the time it observes the event.
        assert_eq!(dir.get_recent_messages("lobby", None), vec![m.clone()]);
        match rx.try_recv().unwrap() {
            DirectoryEvent::Message(got) => assert_eq!(got, m),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn get_recent_messages_is_empty_for_unknown_room() {
        let dir = ChatDirectory::new(10);
        assert!(dir.get_recent_messages("nowhere", None).is_empty());
    }

    #[test]
    fn get_known_rooms_unions_occupied_and_historied_rooms() {
        let dir = ChatDirectory::new(10);
        dir.add_user("s1", "alice", "AAAAAAAA", "lobby");
        dir.add_message(ChatMessage::text("archive", "bob", "BBBBBBBB", "hey"));
        assert_eq!(dir.get_known_rooms(), vec!["archive", "lobby"]);
    }

    #[test]
    fn room_history_respects_its_bound() {
        let dir = ChatDirectory::new(2);
        for i in 0..5 {
            dir.add_message(ChatMessage::text("lobby", "alice", "AAAAAAAA", &i.to_string()));
        }
        assert_eq!(dir.get_recent_messages("lobby", None).len(), 2);
    }
}
