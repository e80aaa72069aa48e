//! The P2P overlay interface and its implementations.
//!
//! spec.md §1 treats "the P2P overlay primitives themselves" as an external
//! collaborator the core is built against, not something the core
//! implements — the `Overlay` trait below *is* that interface. `IrohOverlay`
//! wires it to a real `iroh`/`iroh-gossip` network (see SPEC_FULL.md §2 for
//! how each libp2p-flavored requirement in spec.md §6 maps onto iroh's
//! equivalents); `InMemoryOverlay` is a same-process stand-in used by the
//! test suite so spec.md §8's end-to-end scenarios don't need a real
//! network to exercise.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use iroh::endpoint::{AfterHandshakeOutcome, ConnectionInfo, EndpointHooks};
use iroh::EndpointId;
use iroh_gossip::proto::TopicId;
use iroh_tickets::Ticket;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Errors an `Overlay` implementation can report back to the Room Router.
#[derive(Debug, Clone)]
pub enum OverlayError {
    /// The overlay's structured "no subscribers" signal for a topic — not a
    /// failure, the Room Router treats it as success (spec.md §4.6, §9).
    Isolated(String),
    /// Any other publish failure.
    PublishFailed { room: String, reason: String },
    /// join/leave/bind failures that don't fit the two variants above.
    Other(String),
}

/// One event observed on the overlay, tagged with the gossip topic it
/// occurred on. The Room Router's single dispatch loop (spec.md §4.6)
/// consumes a stream of these and demultiplexes by topic -> room.
#[derive(Debug, Clone)]
pub enum OverlayEvent {
    Message {
        topic: String,
        payload: Vec<u8>,
        from: String,
    },
    PeerUp {
        topic: String,
        peer: String,
    },
    PeerDown {
        topic: String,
        peer: String,
    },
    Lagged {
        topic: String,
    },
}

/// The capabilities the core's Room Router needs from a P2P overlay: topic
/// (un)subscription, publish, a peer count for isolation-tolerant publish,
/// and a broadcast stream of inbound events. `local_id` is the "identify"
/// capability in spec.md §6 — the overlay's notion of who we are.
#[async_trait::async_trait]
pub trait Overlay: Send + Sync {
    async fn join(&self, topic: &str) -> Result<(), OverlayError>;
    async fn leave(&self, topic: &str) -> Result<(), OverlayError>;
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), OverlayError>;
    fn peers(&self, topic: &str) -> Vec<String>;
    fn subscribe_events(&self) -> broadcast::Receiver<OverlayEvent>;
    fn local_id(&self) -> String;
}

// ── In-memory overlay (tests, and a single-process demo) ───────────────────

struct InMemoryOverlayInner {
    local_id: String,
    /// topic -> set of local_ids currently joined. Shared (via the `Arc`
    /// this field lives behind at the `InMemoryOverlay` level) across every
    /// node built from the same `InMemoryBus`.
    members: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    events: broadcast::Sender<OverlayEvent>,
}

/// An `Overlay` with no real networking: every "peer" is just another
/// `InMemoryOverlay` built from the same shared bus, all living in this
/// process. `emitSelf=false` (spec.md §6) is modeled explicitly: a
/// publisher's own node never receives its own `OverlayEvent::Message`.
pub struct InMemoryOverlay {
    inner: Arc<InMemoryOverlayInner>,
}

/// A shared bus that multiple `InMemoryOverlay` instances can join to
/// simulate a small gossip swarm in a single process.
#[derive(Clone)]
pub struct InMemoryBus {
    members: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    events: broadcast::Sender<OverlayEvent>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            members: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Create a new node on this bus with the given local id (the stand-in
    /// fingerprint/peer-id used to suppress self-delivery).
    pub fn node(&self, local_id: impl Into<String>) -> InMemoryOverlay {
        InMemoryOverlay {
            inner: Arc::new(InMemoryOverlayInner {
                local_id: local_id.into(),
                members: self.members.clone(),
                events: self.events.clone(),
            }),
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Overlay for InMemoryOverlay {
    async fn join(&self, topic: &str) -> Result<(), OverlayError> {
        self.inner
            .members
            .write()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .insert(self.inner.local_id.clone());
        let _ = self.inner.events.send(OverlayEvent::PeerUp {
            topic: topic.to_string(),
            peer: self.inner.local_id.clone(),
        });
        Ok(())
    }

    async fn leave(&self, topic: &str) -> Result<(), OverlayError> {
        if let Some(set) = self.inner.members.write().unwrap().get_mut(topic) {
            set.remove(&self.inner.local_id);
        }
        let _ = self.inner.events.send(OverlayEvent::PeerDown {
            topic: topic.to_string(),
            peer: self.inner.local_id.clone(),
        });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), OverlayError> {
        let remote_count = self.peers(topic).len();
        if remote_count == 0 {
            return Err(OverlayError::Isolated(topic.to_string()));
        }
        self.inner
            .events
            .send(OverlayEvent::Message {
                topic: topic.to_string(),
                payload,
                from: self.inner.local_id.clone(),
            })
            .map_err(|e| OverlayError::PublishFailed {
                room: topic.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn peers(&self, topic: &str) -> Vec<String> {
        self.inner
            .members
            .read()
            .unwrap()
            .get(topic)
            .map(|set| {
                set.iter()
                    .filter(|id| **id != self.inner.local_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The bus-wide sender delivers every event to every node, including the
    /// publisher's own, since `broadcast::Sender` has no per-subscriber
    /// exclusion. Spawn a small relay that reads the shared bus and forwards
    /// only events not self-originated into a fresh channel, so each node's
    /// view actually honors `emitSelf=false` (spec.md §6).
    fn subscribe_events(&self) -> broadcast::Receiver<OverlayEvent> {
        let mut upstream = self.inner.events.subscribe();
        let (downstream, rx) = broadcast::channel(1024);
        let local_id = self.inner.local_id.clone();
        tokio::spawn(async move {
            loop {
                match upstream.recv().await {
                    Ok(event) => {
                        let is_self = match &event {
                            OverlayEvent::Message { from, .. } => *from == local_id,
                            OverlayEvent::PeerUp { peer, .. } | OverlayEvent::PeerDown { peer, .. } => {
                                *peer == local_id
                            }
                            OverlayEvent::Lagged { .. } => false,
                        };
                        if is_self {
                            continue;
                        }
                        if downstream.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        rx
    }

    fn local_id(&self) -> String {
        self.inner.local_id.clone()
    }
}

// ── iroh-backed overlay ──────────────────────────────────────────────────

/// Ticket containing everything needed to join a chat room: which topic,
/// and a set of already-joined peers to bootstrap the gossip mesh from.
/// Grounded directly on the reference codebase's `ChatTicket`.
#[derive(Serialize, Deserialize, Clone)]
pub struct ChatTicket {
    pub topic_id: TopicId,
    pub bootstrap: BTreeSet<EndpointId>,
}

impl ChatTicket {
    pub fn new_random() -> Self {
        Self {
            topic_id: TopicId::from_bytes(rand::random()),
            bootstrap: BTreeSet::new(),
        }
    }

    /// Derive the topic for a named room deterministically, so any two
    /// processes that agree on a room name end up on the same gossip topic
    /// without needing to exchange a ticket out of band.
    pub fn for_room(room: &str) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(topic_name(room).as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self {
            topic_id: TopicId::from_bytes(bytes),
            bootstrap: BTreeSet::new(),
        }
    }
}

impl Ticket for ChatTicket {
    const KIND: &'static str = "chat";

    fn to_bytes(&self) -> Vec<u8> {
        postcard::to_stdvec(self).expect("ChatTicket always serializes")
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, iroh_tickets::ParseError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Topic name for a room, per spec.md §6: `"/whisper/room/" + room`.
pub fn topic_name(room: &str) -> String {
    format!("/whisper/room/{room}")
}

/// Inverse of `topic_name`: recover the room from a topic string, rejecting
/// anything without the expected prefix (spec.md §4.6).
pub fn room_from_topic(topic: &str) -> Option<&str> {
    topic.strip_prefix("/whisper/room/")
}

/// Records whether each peer's selected network path is direct (IP) or
/// relayed, updated on every QUIC handshake. Grounded on the reference
/// codebase's `ConnTracker`/`ConnTrackerHook` pair.
#[derive(Debug, Default)]
pub struct ConnTracker(Arc<RwLock<HashMap<EndpointId, ConnectionInfo>>>);

impl ConnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hook(&self) -> ConnTrackerHook {
        ConnTrackerHook(self.0.clone())
    }

    pub fn is_direct(&self, id: &EndpointId) -> Option<bool> {
        self.0
            .read()
            .unwrap()
            .get(id)
            .and_then(|c| c.selected_path())
            .map(|p| p.is_ip())
    }

    pub fn connected_count(&self) -> usize {
        self.0.read().unwrap().len()
    }
}

#[derive(Debug)]
pub struct ConnTrackerHook(Arc<RwLock<HashMap<EndpointId, ConnectionInfo>>>);

impl EndpointHooks for ConnTrackerHook {
    fn after_handshake<'a>(
        &'a self,
        conn: &'a ConnectionInfo,
    ) -> impl std::future::Future<Output = AfterHandshakeOutcome> + Send + 'a {
        let remote_id = conn.remote_id();
        let was_new = self
            .0
            .write()
            .unwrap()
            .insert(remote_id, conn.clone())
            .is_none();
        if was_new {
            tracing::info!(peer = %remote_id, "peer connected");
        }
        async { AfterHandshakeOutcome::accept() }
    }
}

/// The real overlay: one `iroh::Endpoint` + `iroh_gossip::net::Gossip` per
/// process, multiplexed through a `Router` that accepts inbound connections
/// speaking the gossip ALPN, fanning inbound events for every joined topic
/// into a single broadcast bus that the Room Router (one per session)
/// subscribes to.
pub struct IrohOverlay {
    endpoint: iroh::Endpoint,
    gossip: iroh_gossip::net::Gossip,
    router: iroh::protocol::Router,
    senders: RwLock<HashMap<String, Arc<tokio::sync::Mutex<iroh_gossip::api::GossipSender>>>>,
    /// topic -> neighbors currently up, per the gossip swarm membership
    /// events. Backs `peers()` since the split sender/receiver handle has no
    /// synchronous snapshot of its own.
    neighbors: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    events: broadcast::Sender<OverlayEvent>,
    /// Connection-level view (direct vs. relayed, live count), independent of
    /// gossip topic membership. Used by Bootstrap Mode's heartbeat and
    /// connect/disconnect logging (spec.md §4.9).
    conn_tracker: ConnTracker,
}

impl IrohOverlay {
    /// Binds an ephemeral-identity overlay: a fresh keypair, discarded when
    /// the process exits. Used for per-session SSH connections.
    pub async fn bind(port: u16) -> anyhow::Result<Arc<Self>> {
        Self::bind_with_key(port, None).await
    }

    /// Binds with an explicit secret key, for Bootstrap Mode's persistent
    /// identity (spec.md §4.9).
    pub async fn bind_with_key(
        port: u16,
        secret_key: Option<iroh::SecretKey>,
    ) -> anyhow::Result<Arc<Self>> {
        let conn_tracker = ConnTracker::new();
        let mut builder = iroh::Endpoint::builder()
            .alpns(vec![iroh_gossip::net::GOSSIP_ALPN.to_vec()])
            .hooks(conn_tracker.hook())
            .bind_addr_v4(std::net::SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, port));
        if let Some(key) = secret_key {
            builder = builder.secret_key(key);
        }
        let endpoint = builder.bind().await?;
        let gossip = iroh_gossip::net::Gossip::builder().spawn(endpoint.clone());
        let router = iroh::protocol::Router::builder(endpoint.clone())
            .accept(iroh_gossip::net::GOSSIP_ALPN, gossip.clone())
            .spawn();
        let (events, _) = broadcast::channel(1024);
        Ok(Arc::new(Self {
            endpoint,
            conn_tracker,
            gossip,
            router,
            senders: RwLock::new(HashMap::new()),
            neighbors: Arc::new(RwLock::new(HashMap::new())),
            events,
        }))
    }

    pub fn endpoint(&self) -> &iroh::Endpoint {
        &self.endpoint
    }

    /// Number of peers currently connected at the QUIC layer, independent of
    /// gossip topic membership. Backs Bootstrap Mode's heartbeat.
    pub fn connected_count(&self) -> usize {
        self.conn_tracker.connected_count()
    }

    /// Join a room identified by its deterministic topic, optionally seeded
    /// with bootstrap peers from a shared `ChatTicket`.
    pub async fn join_room(
        self: &Arc<Self>,
        room: &str,
        bootstrap: Vec<EndpointId>,
    ) -> Result<(), OverlayError> {
        let topic = topic_name(room);
        let ticket = ChatTicket::for_room(room);
        let handle = self
            .gossip
            .subscribe(ticket.topic_id, bootstrap)
            .await
            .map_err(|e| OverlayError::Other(e.to_string()))?;
        let (sender, mut receiver) = handle.split();
        self.senders
            .write()
            .unwrap()
            .insert(topic.clone(), Arc::new(tokio::sync::Mutex::new(sender)));

        let events = self.events.clone();
        let topic_for_task = topic.clone();
        let neighbors = self.neighbors.clone();
        tokio::spawn(async move {
            use n0_future::StreamExt;
            // iroh-gossip is already configured so a node never receives its
            // own publish back (the equivalent of libp2p gossipsub's
            // `emitSelf=false`, spec.md §6) — unlike `InMemoryOverlay`, there
            // is no local suppression step needed here.
            while let Some(event) = receiver.next().await {
                let mapped = match event {
                    Ok(iroh_gossip::api::Event::Received(msg)) => OverlayEvent::Message {
                        topic: topic_for_task.clone(),
                        payload: msg.content.to_vec(),
                        from: "remote".to_string(),
                    },
                    Ok(iroh_gossip::api::Event::NeighborUp(peer)) => {
                        neighbors
                            .write()
                            .unwrap()
                            .entry(topic_for_task.clone())
                            .or_default()
                            .insert(peer.to_string());
                        tracing::info!(%peer, topic = %topic_for_task, "neighbor connected");
                        OverlayEvent::PeerUp {
                            topic: topic_for_task.clone(),
                            peer: peer.to_string(),
                        }
                    }
                    Ok(iroh_gossip::api::Event::NeighborDown(peer)) => {
                        if let Some(set) = neighbors.write().unwrap().get_mut(&topic_for_task) {
                            set.remove(&peer.to_string());
                        }
                        tracing::info!(%peer, topic = %topic_for_task, "neighbor disconnected");
                        OverlayEvent::PeerDown {
                            topic: topic_for_task.clone(),
                            peer: peer.to_string(),
                        }
                    }
                    Ok(iroh_gossip::api::Event::Lagged) => OverlayEvent::Lagged {
                        topic: topic_for_task.clone(),
                    },
                    Err(_) => continue,
                };
                if events.send(mapped).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    /// Shuts down the router and closes the endpoint, per spec.md §6's
    /// bootstrap shutdown sequence.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.router.shutdown().await?;
        self.endpoint.close().await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Overlay for IrohOverlay {
    async fn join(&self, topic: &str) -> Result<(), OverlayError> {
        // Real joins happen via `join_room`, which needs `Arc<Self>` for the
        // background dispatch task; this inherent-trait split mirrors the
        // fact that the Overlay trait itself is topic-name oriented while
        // iroh's subscribe call is keyed by `TopicId` + bootstrap peers.
        if self.senders.read().unwrap().contains_key(topic) {
            return Ok(());
        }
        Err(OverlayError::Other(
            "IrohOverlay::join_room must be used to provide bootstrap peers".into(),
        ))
    }

    async fn leave(&self, topic: &str) -> Result<(), OverlayError> {
        self.senders.write().unwrap().remove(topic);
        self.neighbors.write().unwrap().remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), OverlayError> {
        let sender = {
            let guard = self.senders.read().unwrap();
            guard.get(topic).cloned()
        };
        let Some(sender) = sender else {
            return Err(OverlayError::Other(format!("not joined to {topic}")));
        };
        if self.peers(topic).is_empty() {
            return Err(OverlayError::Isolated(topic.to_string()));
        }
        sender
            .lock()
            .await
            .broadcast(payload.into())
            .await
            .map_err(|e| OverlayError::PublishFailed {
                room: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn peers(&self, topic: &str) -> Vec<String> {
        self.neighbors
            .read()
            .unwrap()
            .get(topic)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<OverlayEvent> {
        self.events.subscribe()
    }

    fn local_id(&self) -> String {
        self.endpoint.id().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_to_empty_topic_is_isolated() {
        let bus = InMemoryBus::new();
        let node = bus.node("alice");
        node.join("/whisper/room/lobby").await.unwrap();
        let err = node
            .publish("/whisper/room/lobby", b"hi".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, OverlayError::Isolated(_)));
    }

    #[tokio::test]
    async fn publish_does_not_echo_to_the_publisher() {
        let bus = InMemoryBus::new();
        let alice = bus.node("alice");
        let bob = bus.node("bob");
        alice.join("/whisper/room/lobby").await.unwrap();
        bob.join("/whisper/room/lobby").await.unwrap();

        let mut alice_events = alice.subscribe_events();
        let mut bob_events = bob.subscribe_events();
        alice
            .publish("/whisper/room/lobby", b"hi".to_vec())
            .await
            .unwrap();

        let bob_msg = bob_events.recv().await.unwrap();
        assert!(matches!(bob_msg, OverlayEvent::Message { .. }));

        // Alice should see no Message event attributed to herself.
        while let Ok(ev) = alice_events.try_recv() {
            if let OverlayEvent::Message { from, .. } = ev {
                assert_ne!(from, "alice");
            }
        }
    }

    #[test]
    fn room_from_topic_rejects_missing_prefix() {
        assert_eq!(room_from_topic("/whisper/room/lobby"), Some("lobby"));
        assert_eq!(room_from_topic("/other/lobby"), None);
    }

    #[test]
    fn topic_name_matches_the_wire_format() {
        assert_eq!(topic_name("lobby"), "/whisper/room/lobby");
    }
}
