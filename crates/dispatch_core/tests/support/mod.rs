#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use dispatch_core::clock::TokioClock;
use dispatch_core::config::DispatchConfig;
use dispatch_core::directory::{MemoryStore, Role};
use dispatch_core::events::{
    ClientEvent, Configuration, OfferResponse, RideRequest, ServerEvent,
};
use dispatch_core::geo::Coordinate;
use dispatch_core::relay::{MemoryBus, SocketMessage};
use dispatch_core::session::{
    spawn_relay_pump, DispatcherContext, ParticipantHandler, SessionIdentity,
};
use dispatch_core::storage::MemoryRideStore;

/// Two dispatcher nodes sharing one bus, cache, and ride store.
pub struct Fleet {
    pub node_a: Arc<DispatcherContext>,
    pub node_b: Arc<DispatcherContext>,
    pub rides: Arc<MemoryRideStore>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        let bus = Arc::new(MemoryBus::new());
        let cache = Arc::new(MemoryStore::new());
        let rides = Arc::new(MemoryRideStore::new());
        let clock = Arc::new(TokioClock::new());
        let node_a = DispatcherContext::with_clock(
            "node-a".to_string(),
            bus.clone(),
            cache.clone(),
            rides.clone(),
            config,
            clock.clone(),
        );
        let node_b = DispatcherContext::with_clock(
            "node-b".to_string(),
            bus,
            cache,
            rides.clone(),
            config,
            clock,
        );
        spawn_relay_pump(node_a.clone());
        spawn_relay_pump(node_b.clone());
        Self {
            node_a,
            node_b,
            rides,
        }
    }
}

/// Let spawned tasks and relay pumps drain their queues.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// One connected participant plus its socket receiver.
pub struct TestClient {
    pub handler: ParticipantHandler,
    pub ctx: Arc<DispatcherContext>,
    pub rx: mpsc::UnboundedReceiver<SocketMessage>,
}

impl TestClient {
    pub async fn event(&self, event: ClientEvent) -> Option<Value> {
        self.handler
            .handle_event(&self.ctx, event)
            .await
            .expect("handle event")
    }

    /// Next pushed event, bounded so a broken test fails instead of
    /// hanging.
    pub async fn next_event(&mut self) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(120), self.rx.recv())
            .await
            .expect("timed out waiting for a socket event")
            .expect("socket closed")
            .event
    }

    /// Whatever is already sitting in the socket queue.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            events.push(message.event);
        }
        events
    }

    pub async fn respond(&self, ride_id: &str, accepted: bool) {
        self.event(ClientEvent::OfferResponse(OfferResponse {
            ride_id: ride_id.to_string(),
            accepted,
        }))
        .await;
    }

    pub fn public_id(&self) -> String {
        self.handler.identity().public_id.clone()
    }

    pub fn socket_id(&self) -> String {
        self.handler.identity().socket_id.clone()
    }
}

/// Builder for driver fixtures; connects and runs `setup` in one go.
pub struct DriverBuilder {
    public_id: String,
    rating: f64,
    position: Coordinate,
    configuration: Configuration,
}

impl DriverBuilder {
    pub fn new(public_id: &str) -> Self {
        Self {
            public_id: public_id.to_string(),
            rating: 4.5,
            position: Coordinate::new(0.0, 0.0),
            configuration: Configuration::accept_all(),
        }
    }

    pub fn rating(mut self, rating: f64) -> Self {
        self.rating = rating;
        self
    }

    pub fn at(mut self, lat: f64, lng: f64) -> Self {
        self.position = Coordinate::new(lat, lng);
        self
    }

    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    pub async fn connect(self, ctx: &Arc<DispatcherContext>) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = ParticipantHandler::connect(
            ctx,
            Role::Driver,
            SessionIdentity {
                public_id: self.public_id.clone(),
                socket_id: format!("sock-{}", self.public_id),
                p2p_capable: true,
                rating: self.rating,
            },
            tx,
        )
        .await
        .expect("driver connect");
        let client = TestClient {
            handler,
            ctx: Arc::clone(ctx),
            rx,
        };
        client
            .event(ClientEvent::Setup {
                position: self.position,
                configuration: self.configuration,
            })
            .await;
        settle().await;
        client
    }
}

/// Connect a voyager fixture.
pub async fn connect_voyager(public_id: &str, ctx: &Arc<DispatcherContext>) -> TestClient {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = ParticipantHandler::connect(
        ctx,
        Role::Voyager,
        SessionIdentity {
            public_id: public_id.to_string(),
            socket_id: format!("sock-{public_id}"),
            p2p_capable: false,
            rating: 0.0,
        },
        tx,
    )
    .await
    .expect("voyager connect");
    TestClient {
        handler,
        ctx: Arc::clone(ctx),
        rx,
    }
}

/// A ride request starting just north of the origin, accepting anything a
/// default driver accepts.
pub fn ride_request(ride_id: &str) -> RideRequest {
    RideRequest {
        ride_id: ride_id.to_string(),
        start: Coordinate::new(0.0, 0.001),
        end: Coordinate::new(0.0, 0.05),
        waypoints: Vec::new(),
        ride_type: "solo".to_string(),
        pay_method: "card".to_string(),
        drop_district: "mitte".to_string(),
    }
}
