//! External ride/pendency store seam.
//!
//! Rides and pendencies live in durable storage owned by another service;
//! the engine only needs the small async surface below. [`MemoryRideStore`]
//! backs tests and the demo node.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::{PublicId, RideId, RideRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    /// Accepted ride lost its driver and is waiting for a re-match.
    Open,
    Accepted,
    Cancelled,
}

/// A persisted ride. Only created at acceptance time, so an abandoned
/// search never produces an orphaned record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub ride_id: RideId,
    pub voyager_id: PublicId,
    pub driver_id: Option<PublicId>,
    pub status: RideStatus,
    /// Acceptance instant in engine milliseconds (process epoch).
    pub accepted_at_ms: Option<u64>,
    pub request: RideRequest,
}

/// A billable obligation produced by a non-safe cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pendency {
    pub issuer_id: PublicId,
    pub affected_id: PublicId,
    pub ride_id: RideId,
    pub amount: f64,
    pub resolved: bool,
}

#[async_trait]
pub trait RideStore: Send + Sync {
    async fn create_ride(&self, ride: Ride) -> Result<()>;
    async fn get_ride(&self, ride_id: &str) -> Result<Option<Ride>>;
    async fn update_ride(&self, ride: Ride) -> Result<()>;
    async fn create_pendency(&self, pendency: Pendency) -> Result<()>;
    /// Ids of rides the participant is currently on (accepted, or open and
    /// still attached to them).
    async fn active_ride_ids(&self, public_id: &str) -> Result<Vec<RideId>>;
}

/// In-memory store for tests and single-host runs.
#[derive(Default)]
pub struct MemoryRideStore {
    rides: Mutex<HashMap<RideId, Ride>>,
    pendencies: Mutex<Vec<Pendency>>,
}

impl MemoryRideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every pendency created so far.
    pub fn pendencies(&self) -> Vec<Pendency> {
        self.pendencies.lock().clone()
    }
}

#[async_trait]
impl RideStore for MemoryRideStore {
    async fn create_ride(&self, ride: Ride) -> Result<()> {
        self.rides.lock().insert(ride.ride_id.clone(), ride);
        Ok(())
    }

    async fn get_ride(&self, ride_id: &str) -> Result<Option<Ride>> {
        Ok(self.rides.lock().get(ride_id).cloned())
    }

    async fn update_ride(&self, ride: Ride) -> Result<()> {
        self.rides.lock().insert(ride.ride_id.clone(), ride);
        Ok(())
    }

    async fn create_pendency(&self, pendency: Pendency) -> Result<()> {
        self.pendencies.lock().push(pendency);
        Ok(())
    }

    async fn active_ride_ids(&self, public_id: &str) -> Result<Vec<RideId>> {
        let rides = self.rides.lock();
        let mut ids: Vec<RideId> = rides
            .values()
            .filter(|ride| {
                ride.status != RideStatus::Cancelled
                    && (ride.voyager_id == public_id
                        || ride.driver_id.as_deref() == Some(public_id))
            })
            .map(|ride| ride.ride_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
