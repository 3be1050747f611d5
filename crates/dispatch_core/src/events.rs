//! Socket event surface: payloads exchanged with driver and voyager apps.
//!
//! Events are JSON-encoded with an `event` tag; the exact wire encoding is
//! an implementation choice, not a contract. Identifier aliases for the
//! whole crate live here too.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;
use crate::storage::Pendency;

pub type PublicId = String;
pub type SocketId = String;
pub type RideId = String;
pub type NodeId = String;

/// Wildcard entry accepting any value in a configuration set.
pub const ACCEPT_ANY: &str = "any";

/// Driver availability as carried on the wire (0/1/2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DriverState {
    Idle,
    Searching,
    Running,
}

impl From<DriverState> for u8 {
    fn from(state: DriverState) -> u8 {
        match state {
            DriverState::Idle => 0,
            DriverState::Searching => 1,
            DriverState::Running => 2,
        }
    }
}

impl TryFrom<u8> for DriverState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DriverState::Idle),
            1 => Ok(DriverState::Searching),
            2 => Ok(DriverState::Running),
            other => Err(format!("unknown driver state {other}")),
        }
    }
}

/// What a driver is willing to take on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub pay_methods: BTreeSet<String>,
    pub ride_types: BTreeSet<String>,
    pub drop_districts: BTreeSet<String>,
}

impl Configuration {
    /// A configuration accepting every pay method, ride type, and district.
    pub fn accept_all() -> Self {
        let any = BTreeSet::from([ACCEPT_ANY.to_string()]);
        Self {
            pay_methods: any.clone(),
            ride_types: any.clone(),
            drop_districts: any,
        }
    }

    pub fn accepts_pay_method(&self, pay_method: &str) -> bool {
        Self::accepts(&self.pay_methods, pay_method)
    }

    pub fn accepts_ride_type(&self, ride_type: &str) -> bool {
        Self::accepts(&self.ride_types, ride_type)
    }

    pub fn accepts_drop_district(&self, district: &str) -> bool {
        Self::accepts(&self.drop_districts, district)
    }

    fn accepts(set: &BTreeSet<String>, value: &str) -> bool {
        set.contains(ACCEPT_ANY) || set.contains(value)
    }
}

/// A live position report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub lat_lng: Coordinate,
    pub heading: f64,
    pub kmh: f64,
    /// Observer sockets that must not receive this report.
    #[serde(default)]
    pub ignore: Vec<SocketId>,
}

/// Public slice of a driver profile, shown to the requesting voyager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverProfile {
    pub public_id: PublicId,
    pub rating: f64,
    pub p2p_capable: bool,
}

/// A voyager's ride request, also the offer snapshot pushed to drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub ride_id: RideId,
    pub start: Coordinate,
    pub end: Coordinate,
    #[serde(default)]
    pub waypoints: Vec<Coordinate>,
    pub ride_type: String,
    pub pay_method: String,
    pub drop_district: String,
}

/// A driver's answer to a pushed offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferResponse {
    pub ride_id: RideId,
    pub accepted: bool,
}

/// Events received from a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Setup {
        position: Coordinate,
        configuration: Configuration,
    },
    Position(PositionUpdate),
    Configuration(Configuration),
    State {
        state: DriverState,
    },
    Offer(RideRequest),
    OfferResponse(OfferResponse),
    /// Carries an acknowledgment with a [`CancelOutcome`].
    CancelRide {
        ride_id: RideId,
    },
    /// Carries an acknowledgment with the list of active ride ids.
    AmIRunning,
}

/// Events pushed to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Offer(RideRequest),
    OfferSent(DriverProfile),
    DelayedOfferResponse(bool),
    DriverOfferAccepted {
        ride_id: RideId,
        counterparty_id: PublicId,
    },
    VoyagerOfferAccepted {
        ride_id: RideId,
        counterparty_id: PublicId,
    },
    NoDriversAvailable {
        ride_id: RideId,
    },
    Position {
        from: PublicId,
        update: PositionUpdate,
    },
    State {
        from: PublicId,
        state: DriverState,
    },
    RideCancelled {
        ride_id: RideId,
        by: PublicId,
        pendency: Option<Pendency>,
    },
}

/// Acknowledgment payload for `cancelRide`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pendency: Option<Pendency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CancelOutcome {
    pub fn ok(pendency: Option<Pendency>) -> Self {
        Self {
            status: "ok".to_string(),
            pendency,
            error: None,
        }
    }

    pub fn error(kind: &str) -> Self {
        Self {
            status: "error".to_string(),
            pendency: None,
            error: Some(kind.to_string()),
        }
    }
}
