//! Two-node demo: a driver parked on one node, a voyager requesting on the
//! other, matched across the in-memory bus.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use dispatch_core::config::DispatchConfig;
use dispatch_core::directory::{MemoryStore, Role};
use dispatch_core::events::{ClientEvent, Configuration, OfferResponse, ServerEvent};
use dispatch_core::geo::Coordinate;
use dispatch_core::relay::MemoryBus;
use dispatch_core::session::{spawn_relay_pump, DispatcherContext, ParticipantHandler, SessionIdentity};
use dispatch_core::storage::MemoryRideStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dispatch_core=debug".into()),
        )
        .init();

    let bus = Arc::new(MemoryBus::new());
    let cache = Arc::new(MemoryStore::new());
    let rides = Arc::new(MemoryRideStore::new());
    let config = DispatchConfig::default();

    let node_a = DispatcherContext::new(
        "node-a".to_string(),
        bus.clone(),
        cache.clone(),
        rides.clone(),
        config,
    );
    let node_b = DispatcherContext::new(
        "node-b".to_string(),
        bus.clone(),
        cache.clone(),
        rides.clone(),
        config,
    );
    spawn_relay_pump(node_a.clone());
    spawn_relay_pump(node_b.clone());

    // Driver comes online on node B.
    let (driver_tx, mut driver_rx) = mpsc::unbounded_channel();
    let driver = ParticipantHandler::connect(
        &node_b,
        Role::Driver,
        SessionIdentity {
            public_id: "drv-demo".to_string(),
            socket_id: "sock-drv".to_string(),
            p2p_capable: true,
            rating: 4.8,
        },
        driver_tx,
    )
    .await?;
    driver
        .handle_event(
            &node_b,
            ClientEvent::Setup {
                position: Coordinate::new(52.520, 13.405),
                configuration: Configuration::accept_all(),
            },
        )
        .await?;

    // Give the broadcast a beat to land in node A's registry mirror.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Voyager requests a ride on node A.
    let (voyager_tx, mut voyager_rx) = mpsc::unbounded_channel();
    let voyager = ParticipantHandler::connect(
        &node_a,
        Role::Voyager,
        SessionIdentity {
            public_id: "voy-demo".to_string(),
            socket_id: "sock-voy".to_string(),
            p2p_capable: false,
            rating: 0.0,
        },
        voyager_tx,
    )
    .await?;
    // Route waypoints arrive as an encoded polyline from the routing side.
    let waypoints = dispatch_core::geo::polyline::decode("g_q_IojypAwLwQoi@wcA")?;
    voyager
        .handle_event(
            &node_a,
            ClientEvent::Offer(dispatch_core::events::RideRequest {
                ride_id: "ride-demo".to_string(),
                start: Coordinate::new(52.521, 13.406),
                end: Coordinate::new(52.530, 13.420),
                waypoints,
                ride_type: "solo".to_string(),
                pay_method: "card".to_string(),
                drop_district: "mitte".to_string(),
            }),
        )
        .await?;

    // Driver side: wait for the pushed offer and accept it.
    while let Some(message) = driver_rx.recv().await {
        match message.event {
            ServerEvent::Offer(request) => {
                info!(ride_id = %request.ride_id, "driver received offer, accepting");
                driver
                    .handle_event(
                        &node_b,
                        ClientEvent::OfferResponse(OfferResponse {
                            ride_id: request.ride_id,
                            accepted: true,
                        }),
                    )
                    .await?;
            }
            ServerEvent::DriverOfferAccepted { ride_id, .. } => {
                info!(%ride_id, "driver confirmed on the ride");
                break;
            }
            other => info!(?other, "driver event"),
        }
    }

    // Voyager side: drain until the acceptance lands.
    while let Some(message) = voyager_rx.recv().await {
        if let ServerEvent::VoyagerOfferAccepted {
            ride_id,
            counterparty_id,
        } = message.event
        {
            info!(%ride_id, %counterparty_id, "match committed");
            break;
        }
    }

    driver.disconnect(&node_b).await?;
    voyager.disconnect(&node_a).await?;
    Ok(())
}
