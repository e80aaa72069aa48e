//! The Room Router (spec.md §4.6): wraps the overlay's gossip pub/sub and
//! demultiplexes inbound events by topic -> room -> per-room handler.
//!
//! Each `RoomRouter` is scoped to one session (spec.md §4.7: "a fresh Router
//! view"), but all sessions in the process share the same underlying
//! `Overlay`. The inbound dispatch loop in `new` is spawned once per router
//! and only invokes handlers this router itself has registered, so one
//! session's Router never calls another session's handler even though the
//! overlay's event bus is shared.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::WhisperError;
use crate::message::ChatMessage;
use crate::overlay::{room_from_topic, topic_name, Overlay, OverlayError, OverlayEvent};

/// Invoked for every inbound, successfully-decoded message on a subscribed room.
pub type RoomHandler = Box<dyn Fn(ChatMessage) + Send + Sync>;

struct Inner {
    overlay: Arc<dyn Overlay>,
    handlers: RwLock<HashMap<String, RoomHandler>>,
}

/// One session's view onto the shared overlay: which rooms it has joined and
/// what happens when a message for one of them arrives.
pub struct RoomRouter {
    inner: Arc<Inner>,
    dispatch_task: tokio::task::JoinHandle<()>,
}

impl RoomRouter {
    pub fn new(overlay: Arc<dyn Overlay>) -> Self {
        let inner = Arc::new(Inner {
            overlay: overlay.clone(),
            handlers: RwLock::new(HashMap::new()),
        });

        let mut events = overlay.subscribe_events();
        let dispatch_inner = inner.clone();
        let dispatch_task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "room router dispatch loop lagged");
                        continue;
                    }
                };
                let OverlayEvent::Message { topic, payload, .. } = event else {
                    continue;
                };
                let Some(room) = room_from_topic(&topic) else {
                    warn!(%topic, "dropping message on topic without the expected room prefix");
                    continue;
                };
                let handler_present = {
                    let guard = dispatch_inner.handlers.read().unwrap();
                    guard.contains_key(room)
                };
                if !handler_present {
                    continue;
                }
                let message = match ChatMessage::decode(&payload) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(%room, error = %e, "dropping malformed inbound message");
                        continue;
                    }
                };
                let guard = dispatch_inner.handlers.read().unwrap();
                if let Some(handler) = guard.get(room) {
                    handler(message);
                }
            }
        });

        Self {
            inner,
            dispatch_task,
        }
    }

    pub async fn join_room(&self, room: &str, handler: RoomHandler) -> Result<(), WhisperError> {
        let already_subscribed = self.inner.handlers.read().unwrap().contains_key(room);
        if already_subscribed {
            warn!(%room, "joinRoom called while already subscribed; ignoring");
            return Ok(());
        }
        self.inner
            .overlay
            .join(&topic_name(room))
            .await
            .map_err(WhisperError::from)?;
        self.inner
            .handlers
            .write()
            .unwrap()
            .insert(room.to_string(), handler);
        Ok(())
    }

    pub async fn leave_room(&self, room: &str) -> Result<(), WhisperError> {
        self.inner.handlers.write().unwrap().remove(room);
        self.inner
            .overlay
            .leave(&topic_name(room))
            .await
            .map_err(WhisperError::from)
    }

    /// Publish-to-empty-topic is success, not failure: the sender's own UI
    /// echo already happened in the Session, so an isolated room needs no
    /// special handling here.
    pub async fn send_message(&self, room: &str, message: &ChatMessage) -> Result<(), WhisperError> {
        match self
            .inner
            .overlay
            .publish(&topic_name(room), message.encode())
            .await
        {
            Ok(()) | Err(OverlayError::Isolated(_)) => Ok(()),
            Err(e) => Err(WhisperError::from(e)),
        }
    }

    pub fn get_subscribed_rooms(&self) -> Vec<String> {
        self.inner.handlers.read().unwrap().keys().cloned().collect()
    }

    pub fn get_room_peers(&self, room: &str) -> Vec<String> {
        self.inner.overlay.peers(&topic_name(room))
    }

    pub async fn destroy(&self) {
        let rooms: Vec<String> = self.get_subscribed_rooms();
        for room in rooms {
            let _ = self.leave_room(&room).await;
        }
    }
}

impl Drop for RoomRouter {
    fn drop(&mut self) {
        self.dispatch_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::InMemoryBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn join_room_is_a_no_op_warning_when_already_subscribed() {
        let bus = InMemoryBus::new();
        let overlay: Arc<dyn Overlay> = Arc::new(bus.node("alice"));
        let router = RoomRouter::new(overlay);
        router.join_room("lobby", Box::new(|_| {})).await.unwrap();
        router.join_room("lobby", Box::new(|_| {})).await.unwrap();
        assert_eq!(router.get_subscribed_rooms(), vec!["lobby".to_string()]);
    }

    #[tokio::test]
    async fn send_message_to_an_isolated_room_is_success() {
        let bus = InMemoryBus::new();
        let overlay: Arc<dyn Overlay> = Arc::new(bus.node("alice"));
        let router = RoomRouter::new(overlay);
        router.join_room("lobby", Box::new(|_| {})).await.unwrap();
        let m = ChatMessage::text("lobby", "alice", "AAAAAAAA", "hi");
        router.send_message("lobby", &m).await.unwrap();
    }

    #[tokio::test]
    async fn inbound_message_on_a_subscribed_room_invokes_the_handler() {
        let bus = InMemoryBus::new();
        let alice: Arc<dyn Overlay> = Arc::new(bus.node("alice"));
        let bob: Arc<dyn Overlay> = Arc::new(bus.node("bob"));

        let alice_router = RoomRouter::new(alice);
        let bob_router = RoomRouter::new(bob);

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        bob_router
            .join_room(
                "lobby",
                Box::new(move |_m| {
                    received_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        alice_router.join_room("lobby", Box::new(|_| {})).await.unwrap();

        let m = ChatMessage::text("lobby", "alice", "AAAAAAAA", "hi bob");
        alice_router.send_message("lobby", &m).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn destroy_unsubscribes_from_every_known_topic() {
        let bus = InMemoryBus::new();
        let overlay: Arc<dyn Overlay> = Arc::new(bus.node("alice"));
        let router = RoomRouter::new(overlay);
        router.join_room("lobby", Box::new(|_| {})).await.unwrap();
        router.join_room("dev", Box::new(|_| {})).await.unwrap();
        router.destroy().await;
        assert!(router.get_subscribed_rooms().is_empty());
    }
}
