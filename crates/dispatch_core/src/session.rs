//! Connection handling: the dispatcher context, role handlers, and the
//! relay pump that keeps this node's registry in sync with the fleet.
//!
//! There is no ambient global state. Every handler receives the
//! [`DispatcherContext`] it was constructed with; the handler variant
//! (driver or voyager) is fixed once at authentication time.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancellation;
use crate::clock::{Clock, SystemClock};
use crate::config::DispatchConfig;
use crate::directory::{Connection, ConnectionDirectory, KeyValueStore, Role};
use crate::error::{DispatchError, Result};
use crate::events::{
    CancelOutcome, ClientEvent, DriverState, NodeId, OfferResponse, PublicId, RideId, ServerEvent,
    SocketId,
};
use crate::matching::{self, DriverAnswer, OfferHandle, OfferSignal};
use crate::registry::{DriverEntry, DriverRegistry};
use crate::relay::{BroadcastEvent, PubSub, RelayNode, SocketSink};
use crate::storage::RideStore;

/// Everything one process needs to dispatch: registry, directory, relay,
/// offer table, store, and configuration.
pub struct DispatcherContext {
    pub config: DispatchConfig,
    pub registry: Mutex<DriverRegistry>,
    pub directory: ConnectionDirectory,
    pub relay: RelayNode,
    pub store: Arc<dyn RideStore>,
    pub offers: Mutex<HashMap<RideId, OfferHandle>>,
    clock: Arc<dyn Clock>,
}

impl DispatcherContext {
    pub fn new(
        node_id: NodeId,
        bus: Arc<dyn PubSub>,
        cache: Arc<dyn KeyValueStore>,
        store: Arc<dyn RideStore>,
        config: DispatchConfig,
    ) -> Arc<Self> {
        Self::with_clock(node_id, bus, cache, store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        node_id: NodeId,
        bus: Arc<dyn PubSub>,
        cache: Arc<dyn KeyValueStore>,
        store: Arc<dyn RideStore>,
        config: DispatchConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(DriverRegistry::new()),
            directory: ConnectionDirectory::new(cache, config.directory),
            relay: RelayNode::new(node_id, bus, config.relay),
            store,
            offers: Mutex::new(HashMap::new()),
            config,
            clock,
        })
    }

    /// Current time in unix milliseconds. Timestamps persisted to the
    /// shared store are read back by other nodes, so this is wall-clock
    /// time, never process uptime.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

/// Subscribe this node to the shared channel and apply fleet traffic until
/// the bus closes.
pub fn spawn_relay_pump(ctx: Arc<DispatcherContext>) -> JoinHandle<()> {
    let mut subscription = ctx.relay.subscribe();
    tokio::spawn(async move {
        loop {
            match subscription.recv().await {
                Ok(envelope) => {
                    if let Some((socket_id, event)) = ctx.relay.handle_envelope(envelope) {
                        apply_broadcast(&ctx, &socket_id, event);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "relay subscriber lagged, registry may be stale");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Mirror a broadcast from another node into this node's registry, or
/// route an offer response to the offer task if this node owns it.
fn apply_broadcast(ctx: &Arc<DispatcherContext>, socket_id: &str, event: BroadcastEvent) {
    match event {
        BroadcastEvent::Setup {
            position,
            configuration,
            profile,
        } => {
            ctx.registry.lock().setup(DriverEntry {
                public_id: profile.public_id,
                socket_id: socket_id.to_string(),
                rating: profile.rating,
                p2p_capable: profile.p2p_capable,
                position,
                configuration,
                state: DriverState::Searching,
            });
        }
        BroadcastEvent::Position { update } => {
            ctx.registry.lock().set_position(socket_id, update.lat_lng);
        }
        BroadcastEvent::Configuration { configuration } => {
            ctx.registry.lock().set_configuration(socket_id, configuration);
        }
        BroadcastEvent::State { state } => {
            ctx.registry.lock().set_state(socket_id, state);
        }
        BroadcastEvent::Disconnect => {
            ctx.registry.lock().remove_socket(socket_id);
        }
        BroadcastEvent::OfferResponse {
            driver_id,
            driver_socket_id,
            response,
        } => {
            route_offer_response(ctx, driver_id, driver_socket_id, response);
        }
    }
}

/// Hand a driver's answer to the offer task if this node owns the offer.
/// Returns whether a local offer was found.
pub fn route_offer_response(
    ctx: &Arc<DispatcherContext>,
    driver_id: PublicId,
    driver_socket_id: SocketId,
    response: OfferResponse,
) -> bool {
    let offers = ctx.offers.lock();
    let Some(handle) = offers.get(&response.ride_id) else {
        return false;
    };
    let answer = DriverAnswer {
        driver_id,
        driver_socket_id,
        accepted: response.accepted,
    };
    // A closed channel only means the offer task just finished.
    let _ = handle.signal_tx.send(OfferSignal::Response(answer));
    true
}

/// Who authenticated on a socket. The session verifier itself is external;
/// this is the identity it vouched for.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub public_id: PublicId,
    pub socket_id: SocketId,
    pub p2p_capable: bool,
    pub rating: f64,
}

/// Per-connection event handler, fixed at authentication time.
pub enum ParticipantHandler {
    Driver(SessionIdentity),
    Voyager(SessionIdentity),
}

impl ParticipantHandler {
    /// Attach an authenticated participant to this node: register the
    /// socket sink and publish the directory record.
    pub async fn connect(
        ctx: &Arc<DispatcherContext>,
        role: Role,
        identity: SessionIdentity,
        sink: SocketSink,
    ) -> Result<Self> {
        if identity.public_id.is_empty() || identity.socket_id.is_empty() {
            return Err(DispatchError::Unauthorized);
        }
        ctx.relay
            .register_socket(identity.socket_id.clone(), sink);
        let active_ride_ids = ctx.store.active_ride_ids(&identity.public_id).await?;
        let connection = Connection {
            internal_id: format!("conn-{:016x}", rand::random::<u64>()),
            public_id: identity.public_id.clone(),
            role,
            p2p_capable: identity.p2p_capable,
            observers: Vec::new(),
            socket_id: identity.socket_id.clone(),
            active_ride_ids,
        };
        ctx.directory.upsert(&connection).await?;
        debug!(
            public_id = %identity.public_id,
            socket_id = %identity.socket_id,
            ?role,
            "participant connected"
        );
        Ok(match role {
            Role::Driver => Self::Driver(identity),
            Role::Voyager => Self::Voyager(identity),
        })
    }

    pub fn identity(&self) -> &SessionIdentity {
        match self {
            Self::Driver(identity) | Self::Voyager(identity) => identity,
        }
    }

    /// Handle one client event. `Some(value)` is the acknowledgment
    /// payload for events that carry one.
    pub async fn handle_event(
        &self,
        ctx: &Arc<DispatcherContext>,
        event: ClientEvent,
    ) -> Result<Option<Value>> {
        match self {
            Self::Driver(identity) => handle_driver_event(ctx, identity, event).await,
            Self::Voyager(identity) => handle_voyager_event(ctx, identity, event).await,
        }
    }

    /// Tear the connection down. The directory record is only removed when
    /// it still points at this socket; a quick reconnect elsewhere has
    /// already overwritten it and must survive.
    pub async fn disconnect(&self, ctx: &Arc<DispatcherContext>) -> Result<()> {
        let identity = self.identity();
        ctx.relay.unregister_socket(&identity.socket_id);
        if let Self::Driver(_) = self {
            ctx.registry.lock().remove_socket(&identity.socket_id);
            ctx.relay
                .broadcast(&identity.socket_id, BroadcastEvent::Disconnect)
                .await?;
        }
        if let Some(connection) = ctx.directory.get(&identity.public_id).await? {
            if connection.socket_id == identity.socket_id {
                ctx.directory.remove(&connection).await?;
            }
        }
        Ok(())
    }
}

async fn handle_driver_event(
    ctx: &Arc<DispatcherContext>,
    identity: &SessionIdentity,
    event: ClientEvent,
) -> Result<Option<Value>> {
    match event {
        ClientEvent::Setup {
            position,
            configuration,
        } => {
            let entry = DriverEntry {
                public_id: identity.public_id.clone(),
                socket_id: identity.socket_id.clone(),
                rating: identity.rating,
                p2p_capable: identity.p2p_capable,
                position,
                configuration: configuration.clone(),
                state: DriverState::Searching,
            };
            let profile = entry.profile();
            ctx.registry.lock().setup(entry);
            ctx.relay
                .broadcast(
                    &identity.socket_id,
                    BroadcastEvent::Setup {
                        position,
                        configuration,
                        profile,
                    },
                )
                .await?;
            Ok(None)
        }
        ClientEvent::Position(update) => {
            ctx.registry
                .lock()
                .set_position(&identity.socket_id, update.lat_lng);
            fan_to_observers(
                ctx,
                &identity.public_id,
                ServerEvent::Position {
                    from: identity.public_id.clone(),
                    update: update.clone(),
                },
                &update.ignore,
            )
            .await?;
            ctx.relay
                .broadcast(&identity.socket_id, BroadcastEvent::Position { update })
                .await?;
            Ok(None)
        }
        ClientEvent::Configuration(configuration) => {
            ctx.registry
                .lock()
                .set_configuration(&identity.socket_id, configuration.clone());
            ctx.relay
                .broadcast(
                    &identity.socket_id,
                    BroadcastEvent::Configuration { configuration },
                )
                .await?;
            Ok(None)
        }
        ClientEvent::State { state } => {
            ctx.registry.lock().set_state(&identity.socket_id, state);
            fan_to_observers(
                ctx,
                &identity.public_id,
                ServerEvent::State {
                    from: identity.public_id.clone(),
                    state,
                },
                &[],
            )
            .await?;
            ctx.relay
                .broadcast(&identity.socket_id, BroadcastEvent::State { state })
                .await?;
            Ok(None)
        }
        ClientEvent::OfferResponse(response) => {
            let routed = route_offer_response(
                ctx,
                identity.public_id.clone(),
                identity.socket_id.clone(),
                response.clone(),
            );
            if !routed {
                // The offer lives on the node owning the requester's
                // socket; let it pick the response up off the channel.
                ctx.relay
                    .broadcast(
                        &identity.socket_id,
                        BroadcastEvent::OfferResponse {
                            driver_id: identity.public_id.clone(),
                            driver_socket_id: identity.socket_id.clone(),
                            response,
                        },
                    )
                    .await?;
            }
            Ok(None)
        }
        ClientEvent::CancelRide { ride_id } => {
            Ok(Some(cancel_ack(ctx, &ride_id, &identity.public_id).await))
        }
        ClientEvent::Offer(_) | ClientEvent::AmIRunning => {
            debug!(public_id = %identity.public_id, "ignoring voyager event on driver socket");
            Ok(None)
        }
    }
}

async fn handle_voyager_event(
    ctx: &Arc<DispatcherContext>,
    identity: &SessionIdentity,
    event: ClientEvent,
) -> Result<Option<Value>> {
    match event {
        ClientEvent::Offer(request) => {
            let ctx = Arc::clone(ctx);
            let requester_id = identity.public_id.clone();
            let requester_socket_id = identity.socket_id.clone();
            tokio::spawn(matching::run_offer(
                ctx,
                request,
                requester_id,
                requester_socket_id,
            ));
            Ok(None)
        }
        ClientEvent::Position(update) => {
            fan_to_observers(
                ctx,
                &identity.public_id,
                ServerEvent::Position {
                    from: identity.public_id.clone(),
                    update: update.clone(),
                },
                &update.ignore,
            )
            .await?;
            Ok(None)
        }
        ClientEvent::CancelRide { ride_id } => {
            Ok(Some(cancel_ack(ctx, &ride_id, &identity.public_id).await))
        }
        ClientEvent::AmIRunning => {
            let ride_ids = ctx.store.active_ride_ids(&identity.public_id).await?;
            Ok(Some(serde_json::to_value(ride_ids)?))
        }
        ClientEvent::Setup { .. }
        | ClientEvent::Configuration(_)
        | ClientEvent::State { .. }
        | ClientEvent::OfferResponse(_) => {
            debug!(public_id = %identity.public_id, "ignoring driver event on voyager socket");
            Ok(None)
        }
    }
}

/// Run the cancellation workflow and fold the result into the structured
/// acknowledgment; validation failures never crash the connection.
async fn cancel_ack(ctx: &Arc<DispatcherContext>, ride_id: &str, actor: &str) -> Value {
    let outcome = match cancellation::cancel_ride(ctx, ride_id, actor).await {
        Ok(pendency) => CancelOutcome::ok(pendency),
        Err(error) => CancelOutcome::error(error.kind()),
    };
    serde_json::to_value(outcome).unwrap_or(Value::Null)
}

/// Forward an event to everyone watching this participant, skipping the
/// sockets the sender asked to leave out.
async fn fan_to_observers(
    ctx: &Arc<DispatcherContext>,
    public_id: &str,
    event: ServerEvent,
    skip: &[SocketId],
) -> Result<()> {
    let Some(connection) = ctx.directory.get(public_id).await? else {
        return Ok(());
    };
    for observer in connection.observers {
        if skip.contains(&observer.socket_id) {
            continue;
        }
        if let Err(error) = ctx.relay.emit(&observer.socket_id, event.clone()).await {
            warn!(observer = %observer.socket_id, %error, "observer delivery failed");
        }
    }
    Ok(())
}
