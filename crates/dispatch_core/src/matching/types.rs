use std::collections::HashSet;

use tokio::sync::mpsc;

use crate::events::{PublicId, RideRequest, SocketId};

/// Lifecycle of one in-flight offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferPhase {
    Created,
    Searching,
    /// `offered_to` names the single driver currently holding the offer.
    Offered,
    Accepted,
    Exhausted,
}

/// One in-flight proposal to match a ride request with a driver.
///
/// Exactly one process — the one holding the requester's socket — owns this
/// state; other processes only ever see relayed events about it.
#[derive(Debug, Clone)]
pub struct Offer {
    pub request: RideRequest,
    pub requester_id: PublicId,
    pub requester_socket_id: SocketId,
    pub ignored_driver_ids: HashSet<PublicId>,
    pub offered_to: Option<PublicId>,
    pub try_count: u32,
    pub phase: OfferPhase,
}

impl Offer {
    pub fn new(request: RideRequest, requester_id: PublicId, requester_socket_id: SocketId) -> Self {
        Self {
            request,
            requester_id,
            requester_socket_id,
            ignored_driver_ids: HashSet::new(),
            offered_to: None,
            try_count: 0,
            phase: OfferPhase::Created,
        }
    }
}

/// A driver's answer as routed to the offer task, with enough identity to
/// verify it against `offered_to`.
#[derive(Debug, Clone)]
pub struct DriverAnswer {
    pub driver_id: PublicId,
    pub driver_socket_id: SocketId,
    pub accepted: bool,
}

/// Signals injected into a running offer task.
#[derive(Debug)]
pub enum OfferSignal {
    Response(DriverAnswer),
    /// The requester cancelled before acceptance; tear the offer down.
    Cancel,
}

/// Entry in the owning node's offer table; the way the outside world talks
/// to a running offer task.
#[derive(Debug, Clone)]
pub struct OfferHandle {
    pub requester_id: PublicId,
    pub signal_tx: mpsc::UnboundedSender<OfferSignal>,
}

/// Terminal result of an offer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferOutcome {
    Accepted { driver_id: PublicId },
    Exhausted,
    Cancelled,
}
