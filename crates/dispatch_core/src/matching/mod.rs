//! Matching / dispatch engine: finds a driver for an offer and drives the
//! offer state machine to acceptance or exhaustion.

pub mod eligibility;
pub mod engine;
pub mod scorer;
pub mod types;

pub use engine::run_offer;
pub use types::{DriverAnswer, Offer, OfferHandle, OfferOutcome, OfferPhase, OfferSignal};
