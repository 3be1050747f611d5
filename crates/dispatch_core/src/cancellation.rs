//! Cancellation workflow: free inside the safe window, billable after.
//!
//! A voyager cancelling safely closes the ride; a driver cancelling safely
//! only detaches, leaving the ride open for a re-match. Outside the safe
//! window the canceller picks up exactly one pendency in favor of the
//! other party, who is notified through the relay.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{DispatchError, Result};
use crate::events::ServerEvent;
use crate::matching::OfferSignal;
use crate::session::DispatcherContext;
use crate::storage::{Pendency, RideStatus};

/// Cancel a ride (or an in-flight offer) on behalf of `actor`. Returns the
/// pendency when the cancellation was billable.
pub async fn cancel_ride(
    ctx: &Arc<DispatcherContext>,
    ride_id: &str,
    actor: &str,
) -> Result<Option<Pendency>> {
    // An offer still searching has no persisted ride; tearing the offer
    // task down is the whole cancellation.
    {
        let offers = ctx.offers.lock();
        if let Some(handle) = offers.get(ride_id) {
            if handle.requester_id != actor {
                return Err(DispatchError::NotAllowed);
            }
            let _ = handle.signal_tx.send(OfferSignal::Cancel);
            info!(ride_id, actor, "offer cancelled before acceptance");
            return Ok(None);
        }
    }

    let Some(mut ride) = ctx.store.get_ride(ride_id).await? else {
        return Err(DispatchError::RideNotFound);
    };
    let is_voyager = ride.voyager_id == actor;
    let is_driver = ride.driver_id.as_deref() == Some(actor);
    if !is_voyager && !is_driver {
        return Err(DispatchError::NotAllowed);
    }

    let config = ctx.config.cancellation;
    let safe_window_ms = config.safe_window.as_millis() as u64;
    let safe = ride
        .accepted_at_ms
        .is_none_or(|accepted_at| ctx.now_ms().saturating_sub(accepted_at) < safe_window_ms);
    let counterparty = if is_voyager {
        ride.driver_id.clone()
    } else {
        Some(ride.voyager_id.clone())
    };

    let pendency = if safe {
        None
    } else {
        // Driver cancels always have a voyager counterparty; voyager
        // cancels without a driver are always inside the safe window.
        let affected = counterparty
            .clone()
            .unwrap_or_else(|| ride.voyager_id.clone());
        let pendency = Pendency {
            issuer_id: actor.to_string(),
            affected_id: affected,
            ride_id: ride_id.to_string(),
            amount: config.fee,
            resolved: false,
        };
        ctx.store.create_pendency(pendency.clone()).await?;
        Some(pendency)
    };

    if is_voyager {
        ride.status = RideStatus::Cancelled;
    } else {
        // The ride survives the driver leaving and can be re-matched.
        ride.driver_id = None;
        ride.status = RideStatus::Open;
        ride.accepted_at_ms = None;
    }
    ctx.store.update_ride(ride).await?;
    info!(ride_id, actor, safe, "ride cancellation applied");

    if let Some(counterparty_id) = counterparty {
        notify_counterparty(ctx, ride_id, actor, &counterparty_id, pendency.clone()).await;
    }
    Ok(pendency)
}

/// Best-effort notification; a counterparty that cannot be reached learns
/// about the cancellation from storage on its next request.
async fn notify_counterparty(
    ctx: &Arc<DispatcherContext>,
    ride_id: &str,
    actor: &str,
    counterparty_id: &str,
    pendency: Option<Pendency>,
) {
    let connection = match ctx.directory.get(counterparty_id).await {
        Ok(Some(connection)) => connection,
        Ok(None) => return,
        Err(error) => {
            warn!(counterparty_id, %error, "directory lookup failed");
            return;
        }
    };
    let event = ServerEvent::RideCancelled {
        ride_id: ride_id.to_string(),
        by: actor.to_string(),
        pendency,
    };
    if let Err(error) = ctx.relay.emit(&connection.socket_id, event).await {
        warn!(counterparty_id, %error, "cancellation notice failed");
    }
}
