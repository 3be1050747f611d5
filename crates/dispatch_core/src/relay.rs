//! Cross-node event relay.
//!
//! Two message shapes travel the shared publish/subscribe channel, both
//! tagged with the originating node so a node ignores its own broadcasts:
//!
//! - **Broadcast**: fan a client-emitted event to every process, keeping
//!   each process's driver registry eventually consistent.
//! - **Directed**: deliver an event to one socket that may live on another
//!   process, optionally awaiting an acknowledgment. Replies correlate
//!   back through a pending table; the first of (reply, timeout) wins and
//!   the loser can never fire a second completion.
//!
//! Per-origin publish order is preserved on the channel; nothing is
//! guaranteed across origins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::error::{DispatchError, Result};
use crate::events::{
    Configuration, DriverProfile, DriverState, NodeId, OfferResponse, PositionUpdate, PublicId,
    ServerEvent, SocketId,
};
use crate::geo::Coordinate;

/// Client-emitted events that are fanned out fleet-wide so every node can
/// mirror driver state or route an offer response to the owning node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BroadcastEvent {
    Setup {
        position: Coordinate,
        configuration: Configuration,
        profile: DriverProfile,
    },
    Position {
        update: PositionUpdate,
    },
    Configuration {
        configuration: Configuration,
    },
    State {
        state: DriverState,
    },
    Disconnect,
    OfferResponse {
        driver_id: PublicId,
        driver_socket_id: SocketId,
        response: OfferResponse,
    },
}

/// Envelope carried on the shared channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Broadcast {
        origin_node: NodeId,
        socket_id: SocketId,
        event: BroadcastEvent,
    },
    Directed {
        origin_node: NodeId,
        id: u64,
        target_socket_id: SocketId,
        event: ServerEvent,
        wants_ack: bool,
    },
    Reply {
        origin_node: NodeId,
        id: u64,
        target_node: NodeId,
        payload: Value,
    },
}

/// Seam over the shared pub/sub broker.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> Result<()>;
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
}

/// In-process bus for tests and single-host runs.
pub struct MemoryBus {
    tx: broadcast::Sender<Envelope>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryBus {
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        // A send error only means nobody is subscribed yet.
        let _ = self.tx.send(envelope);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

/// One delivery to a local socket. `ack` is present when the sender wants
/// the client's acknowledgment back.
#[derive(Debug)]
pub struct SocketMessage {
    pub event: ServerEvent,
    pub ack: Option<oneshot::Sender<Value>>,
}

pub type SocketSink = mpsc::UnboundedSender<SocketMessage>;

/// This node's endpoint on the relay: local socket sinks, the pending-ack
/// table, and the publish side of the shared channel.
pub struct RelayNode {
    node_id: NodeId,
    bus: Arc<dyn PubSub>,
    sinks: Mutex<HashMap<SocketId, SocketSink>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    ack_timeout: Duration,
}

impl RelayNode {
    pub fn new(node_id: NodeId, bus: Arc<dyn PubSub>, config: RelayConfig) -> Self {
        Self {
            node_id,
            bus,
            sinks: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            ack_timeout: config.ack_timeout,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.bus.subscribe()
    }

    /// Attach a socket terminating on this process.
    pub fn register_socket(&self, socket_id: SocketId, sink: SocketSink) {
        self.sinks.lock().insert(socket_id, sink);
    }

    pub fn unregister_socket(&self, socket_id: &str) {
        self.sinks.lock().remove(socket_id);
    }

    pub fn owns_socket(&self, socket_id: &str) -> bool {
        self.sinks.lock().contains_key(socket_id)
    }

    /// Deliver an event to a socket, locally when the socket is ours,
    /// otherwise via a directed envelope. Fire-and-forget.
    pub async fn emit(&self, socket_id: &str, event: ServerEvent) -> Result<()> {
        if self.deliver_local(socket_id, event.clone(), None) {
            return Ok(());
        }
        self.bus
            .publish(Envelope::Directed {
                origin_node: self.node_id.clone(),
                id: rand::random(),
                target_socket_id: socket_id.to_string(),
                event,
                wants_ack: false,
            })
            .await
    }

    /// Deliver an event and await its acknowledgment. The first of (reply,
    /// ack timeout) settles the call; a reply arriving after the timeout
    /// finds no pending entry and is dropped.
    pub async fn emit_with_ack(&self, socket_id: &str, event: ServerEvent) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        if self.deliver_local(socket_id, event.clone(), Some(tx)) {
            return match tokio::time::timeout(self.ack_timeout, rx).await {
                Ok(Ok(payload)) => Ok(payload),
                _ => Err(DispatchError::AckTimeout),
            };
        }

        let id: u64 = rand::random();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        self.bus
            .publish(Envelope::Directed {
                origin_node: self.node_id.clone(),
                id,
                target_socket_id: socket_id.to_string(),
                event,
                wants_ack: true,
            })
            .await?;

        let outcome = tokio::time::timeout(self.ack_timeout, rx).await;
        self.pending.lock().remove(&id);
        match outcome {
            Ok(Ok(payload)) => Ok(payload),
            _ => Err(DispatchError::AckTimeout),
        }
    }

    /// Fan a client-emitted event out to every process.
    pub async fn broadcast(&self, socket_id: &str, event: BroadcastEvent) -> Result<()> {
        self.bus
            .publish(Envelope::Broadcast {
                origin_node: self.node_id.clone(),
                socket_id: socket_id.to_string(),
                event,
            })
            .await
    }

    /// Process one envelope from the shared channel. Returns a broadcast
    /// from another node for the caller to apply to its registry/offer
    /// logic; everything else is handled here.
    pub fn handle_envelope(&self, envelope: Envelope) -> Option<(SocketId, BroadcastEvent)> {
        match envelope {
            Envelope::Broadcast {
                origin_node,
                socket_id,
                event,
            } => {
                if origin_node == self.node_id {
                    return None;
                }
                Some((socket_id, event))
            }
            Envelope::Directed {
                origin_node,
                id,
                target_socket_id,
                event,
                wants_ack,
            } => {
                if origin_node == self.node_id || !self.owns_socket(&target_socket_id) {
                    return None;
                }
                if !wants_ack {
                    self.deliver_local(&target_socket_id, event, None);
                    return None;
                }
                let (tx, rx) = oneshot::channel();
                if !self.deliver_local(&target_socket_id, event, Some(tx)) {
                    return None;
                }
                let bus = self.bus.clone();
                let node_id = self.node_id.clone();
                let ack_timeout = self.ack_timeout;
                tokio::spawn(async move {
                    // Forward the client's ack back to the origin node;
                    // if the client never answers, the origin times out.
                    if let Ok(Ok(payload)) = tokio::time::timeout(ack_timeout, rx).await {
                        let reply = Envelope::Reply {
                            origin_node: node_id,
                            id,
                            target_node: origin_node,
                            payload,
                        };
                        if let Err(error) = bus.publish(reply).await {
                            warn!(%error, "failed to publish relay reply");
                        }
                    }
                });
                None
            }
            Envelope::Reply {
                id, target_node, ..
            } if target_node != self.node_id => {
                debug!(id, "ignoring reply addressed to another node");
                None
            }
            Envelope::Reply { id, payload, .. } => {
                if let Some(tx) = self.pending.lock().remove(&id) {
                    let _ = tx.send(payload);
                }
                None
            }
        }
    }

    fn deliver_local(
        &self,
        socket_id: &str,
        event: ServerEvent,
        ack: Option<oneshot::Sender<Value>>,
    ) -> bool {
        let mut sinks = self.sinks.lock();
        let Some(sink) = sinks.get(socket_id) else {
            return false;
        };
        if sink.send(SocketMessage { event, ack }).is_err() {
            // Receiver dropped without a clean disconnect.
            sinks.remove(socket_id);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RideId;

    fn node(name: &str, bus: &Arc<MemoryBus>) -> RelayNode {
        RelayNode::new(
            name.to_string(),
            Arc::clone(bus) as Arc<dyn PubSub>,
            RelayConfig::default(),
        )
    }

    fn no_drivers(ride_id: &str) -> ServerEvent {
        ServerEvent::NoDriversAvailable {
            ride_id: RideId::from(ride_id),
        }
    }

    #[tokio::test]
    async fn emit_prefers_the_local_sink() {
        let bus = Arc::new(MemoryBus::new());
        let relay = node("node-a", &bus);
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.register_socket("sock-1".to_string(), tx);

        relay.emit("sock-1", no_drivers("r1")).await.expect("emit");
        let message = rx.recv().await.expect("delivered");
        assert_eq!(message.event, no_drivers("r1"));
        assert!(message.ack.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ack_to_an_unknown_socket_times_out() {
        let bus = Arc::new(MemoryBus::new());
        let relay = node("node-a", &bus);

        let error = relay
            .emit_with_ack("sock-ghost", no_drivers("r1"))
            .await
            .expect_err("no responder");
        assert!(matches!(error, DispatchError::AckTimeout));
    }

    #[tokio::test]
    async fn directed_ack_round_trips_between_nodes() {
        let bus = Arc::new(MemoryBus::new());
        let origin = Arc::new(node("node-a", &bus));
        let remote = Arc::new(node("node-b", &bus));

        let (tx, mut rx) = mpsc::unbounded_channel();
        remote.register_socket("sock-1".to_string(), tx);

        // Remote pump: answer the directed event with a client ack.
        let pump_remote = Arc::clone(&remote);
        let mut remote_sub = remote.subscribe();
        tokio::spawn(async move {
            while let Ok(envelope) = remote_sub.recv().await {
                pump_remote.handle_envelope(envelope);
            }
        });
        let pump_origin = Arc::clone(&origin);
        let mut origin_sub = origin.subscribe();
        tokio::spawn(async move {
            while let Ok(envelope) = origin_sub.recv().await {
                pump_origin.handle_envelope(envelope);
            }
        });
        tokio::spawn(async move {
            let message = rx.recv().await.expect("delivered");
            message
                .ack
                .expect("wants ack")
                .send(serde_json::json!({"seen": true}))
                .expect("reply");
        });

        let payload = origin
            .emit_with_ack("sock-1", no_drivers("r1"))
            .await
            .expect("ack");
        assert_eq!(payload, serde_json::json!({"seen": true}));
    }

    #[tokio::test]
    async fn own_broadcasts_are_ignored() {
        let bus = Arc::new(MemoryBus::new());
        let relay = node("node-a", &bus);
        let mut sub = relay.subscribe();

        relay
            .broadcast("sock-1", BroadcastEvent::Disconnect)
            .await
            .expect("broadcast");
        let envelope = sub.recv().await.expect("envelope");
        assert!(relay.handle_envelope(envelope).is_none());
    }
}
