//! Candidate filters for a matching pass.
//!
//! Two layers: a hard filter deciding which drivers survive into the next
//! attempt's pool, and a soft filter deciding who can be offered the ride
//! at the current radius. A driver is eligible when its configuration
//! accepts the offer's pay method, ride type, and drop district ("any" is
//! a wildcard) — acceptance means eligible, never skip.

use crate::events::DriverState;
use crate::registry::DriverEntry;

use super::types::Offer;

/// Hard filter: drivers kept in the pool that seeds the next attempt.
/// Excluded drivers and drivers beyond the hard cutoff never come back.
pub fn retained(offer: &Offer, driver: &DriverEntry, hard_cutoff_m: f64) -> bool {
    !offer.ignored_driver_ids.contains(&driver.public_id)
        && offer.request.start.distance_m(&driver.position) <= hard_cutoff_m
}

/// Soft filter: can this driver be offered the ride at the current radius?
pub fn is_eligible(offer: &Offer, driver: &DriverEntry, max_distance_m: f64) -> bool {
    driver.state == DriverState::Searching
        && driver
            .configuration
            .accepts_drop_district(&offer.request.drop_district)
        && driver
            .configuration
            .accepts_pay_method(&offer.request.pay_method)
        && driver
            .configuration
            .accepts_ride_type(&offer.request.ride_type)
        && offer.request.start.distance_m(&driver.position) <= max_distance_m
}
