mod support;

use dispatch_core::directory::Observer;
use dispatch_core::events::{ClientEvent, DriverState, PositionUpdate, ServerEvent};
use dispatch_core::geo::Coordinate;
use dispatch_core::storage::RideStore;
use support::{connect_voyager, ride_request, settle, DriverBuilder, Fleet};

#[tokio::test(start_paused = true)]
async fn driver_setup_is_mirrored_on_every_node() {
    let fleet = Fleet::new();
    let _driver = DriverBuilder::new("drv-1")
        .at(52.52, 13.405)
        .connect(&fleet.node_b)
        .await;

    let mirrored = fleet
        .node_a
        .registry
        .lock()
        .get("drv-1")
        .cloned()
        .expect("mirror on the other node");
    assert_eq!(mirrored.state, DriverState::Searching);
    assert_eq!(mirrored.position, Coordinate::new(52.52, 13.405));
}

#[tokio::test(start_paused = true)]
async fn position_updates_keep_the_mirror_current() {
    let fleet = Fleet::new();
    let driver = DriverBuilder::new("drv-1").connect(&fleet.node_b).await;

    driver
        .event(ClientEvent::Position(PositionUpdate {
            lat_lng: Coordinate::new(1.0, 2.0),
            heading: 90.0,
            kmh: 30.0,
            ignore: Vec::new(),
        }))
        .await;
    settle().await;

    let mirrored = fleet
        .node_a
        .registry
        .lock()
        .get("drv-1")
        .cloned()
        .expect("mirror");
    assert_eq!(mirrored.position, Coordinate::new(1.0, 2.0));
}

#[tokio::test(start_paused = true)]
async fn disconnect_removes_the_mirror_everywhere() {
    let fleet = Fleet::new();
    let driver = DriverBuilder::new("drv-1").connect(&fleet.node_b).await;
    assert!(fleet.node_a.registry.lock().get("drv-1").is_some());

    driver.handler.disconnect(&driver.ctx).await.expect("disconnect");
    settle().await;

    assert!(fleet.node_a.registry.lock().get("drv-1").is_none());
    assert!(fleet.node_b.registry.lock().get("drv-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn offer_matches_a_driver_parked_on_another_node() {
    let fleet = Fleet::new();
    let mut driver = DriverBuilder::new("drv-1").at(0.0, 0.0).connect(&fleet.node_b).await;
    let mut voyager = connect_voyager("voy-1", &fleet.node_a).await;

    voyager.event(ClientEvent::Offer(ride_request("r1"))).await;

    // The offer lives on node A; the push crosses the bus to node B.
    match driver.next_event().await {
        ServerEvent::Offer(request) => assert_eq!(request.ride_id, "r1"),
        other => panic!("expected offer, got {other:?}"),
    }
    match voyager.next_event().await {
        ServerEvent::OfferSent(profile) => assert_eq!(profile.public_id, "drv-1"),
        other => panic!("expected offerSent, got {other:?}"),
    }

    // The response finds no local offer on node B and rides the bus back.
    driver.respond("r1", true).await;
    assert!(matches!(
        driver.next_event().await,
        ServerEvent::DriverOfferAccepted { .. }
    ));
    assert!(matches!(
        voyager.next_event().await,
        ServerEvent::VoyagerOfferAccepted { .. }
    ));

    settle().await;
    let ride = fleet.rides.get_ride("r1").await.expect("store").expect("ride");
    assert_eq!(ride.driver_id.as_deref(), Some("drv-1"));
    // Both nodes now see the driver as running.
    assert_eq!(
        fleet.node_a.registry.lock().get("drv-1").map(|e| e.state),
        Some(DriverState::Running)
    );
    assert_eq!(
        fleet.node_b.registry.lock().get("drv-1").map(|e| e.state),
        Some(DriverState::Running)
    );
}

#[tokio::test(start_paused = true)]
async fn observers_receive_position_reports_across_nodes() {
    let fleet = Fleet::new();
    let driver = DriverBuilder::new("drv-1").connect(&fleet.node_b).await;
    let mut watcher = connect_voyager("voy-1", &fleet.node_a).await;

    fleet
        .node_a
        .directory
        .touch_observers(
            "drv-1",
            Observer {
                socket_id: watcher.socket_id(),
                p2p_capable: false,
            },
        )
        .await
        .expect("observe");

    driver
        .event(ClientEvent::Position(PositionUpdate {
            lat_lng: Coordinate::new(3.0, 4.0),
            heading: 0.0,
            kmh: 12.0,
            ignore: Vec::new(),
        }))
        .await;
    settle().await;

    match watcher.next_event().await {
        ServerEvent::Position { from, update } => {
            assert_eq!(from, "drv-1");
            assert_eq!(update.lat_lng, Coordinate::new(3.0, 4.0));
        }
        other => panic!("expected position, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn ignored_sockets_are_skipped_when_fanning_out() {
    let fleet = Fleet::new();
    let driver = DriverBuilder::new("drv-1").connect(&fleet.node_a).await;
    let mut watcher = connect_voyager("voy-1", &fleet.node_a).await;

    fleet
        .node_a
        .directory
        .touch_observers(
            "drv-1",
            Observer {
                socket_id: watcher.socket_id(),
                p2p_capable: false,
            },
        )
        .await
        .expect("observe");

    driver
        .event(ClientEvent::Position(PositionUpdate {
            lat_lng: Coordinate::new(5.0, 6.0),
            heading: 0.0,
            kmh: 0.0,
            ignore: vec![watcher.socket_id()],
        }))
        .await;
    settle().await;

    assert!(watcher.drain().is_empty());
}
