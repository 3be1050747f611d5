//! The offer state machine.
//!
//! One task per offer, owned by the node holding the requester's socket.
//! Each attempt refreshes the retained pool, filters and scores it, pushes
//! the offer to the chosen driver, and races the driver's answer against
//! the response deadline with `select!` — settling either side drops the
//! other, so an accepted offer can never be timed out afterwards.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{DriverState, PublicId, RideRequest, ServerEvent, SocketId};
use crate::registry::DriverEntry;
use crate::session::DispatcherContext;
use crate::storage::{Ride, RideStatus};

use super::eligibility;
use super::scorer::{self, Candidate};
use super::types::{DriverAnswer, Offer, OfferHandle, OfferOutcome, OfferPhase, OfferSignal};

/// Run one offer to completion. Registers the offer in the node's offer
/// table for the duration so responses and cancellations can reach it.
pub async fn run_offer(
    ctx: Arc<DispatcherContext>,
    request: RideRequest,
    requester_id: PublicId,
    requester_socket_id: SocketId,
) -> OfferOutcome {
    let ride_id = request.ride_id.clone();
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    ctx.offers.lock().insert(
        ride_id.clone(),
        OfferHandle {
            requester_id: requester_id.clone(),
            signal_tx,
        },
    );

    let outcome = drive_offer(&ctx, request, &requester_id, &requester_socket_id, signal_rx).await;
    ctx.offers.lock().remove(&ride_id);

    match outcome {
        Ok(outcome) => {
            info!(%ride_id, ?outcome, "offer finished");
            outcome
        }
        Err(error) => {
            // Not part of the retry contract: report exhaustion instead of
            // leaving the offer dangling.
            warn!(%ride_id, %error, "offer failed, reporting no drivers");
            let event = ServerEvent::NoDriversAvailable {
                ride_id: ride_id.clone(),
            };
            if let Err(error) = ctx.relay.emit(&requester_socket_id, event).await {
                warn!(%ride_id, %error, "could not reach requester");
            }
            OfferOutcome::Exhausted
        }
    }
}

enum Verdict {
    Accepted(DriverAnswer),
    Rejected,
    TimedOut,
    Cancelled,
}

async fn drive_offer(
    ctx: &Arc<DispatcherContext>,
    request: RideRequest,
    requester_id: &str,
    requester_socket_id: &str,
    mut signals: mpsc::UnboundedReceiver<OfferSignal>,
) -> Result<OfferOutcome> {
    let config = ctx.config.matching;
    let mut offer = Offer::new(
        request.clone(),
        requester_id.to_string(),
        requester_socket_id.to_string(),
    );
    offer.phase = OfferPhase::Searching;
    let mut pool: Vec<DriverEntry> = ctx.registry.lock().snapshot();

    let mut attempt = 1;
    while attempt <= config.max_attempts {
        offer.try_count = attempt;
        let radius_m = config.radius_for_attempt(attempt);

        refresh_pool(ctx, &mut pool);
        pool.retain(|driver| eligibility::retained(&offer, driver, config.hard_cutoff_m));

        let chosen = scorer::choose(
            pool.iter()
                .filter(|driver| eligibility::is_eligible(&offer, driver, radius_m))
                .map(|driver| Candidate {
                    distance_m: offer.request.start.distance_m(&driver.position),
                    entry: driver.clone(),
                }),
        );

        let Some(candidate) = chosen else {
            debug!(
                ride_id = %offer.request.ride_id,
                try_count = offer.try_count,
                radius_m,
                "no eligible driver"
            );
            attempt += 1;
            if attempt > config.max_attempts {
                break;
            }
            if !backoff(ctx, &offer, &mut signals).await {
                return Ok(OfferOutcome::Cancelled);
            }
            continue;
        };

        offer.offered_to = Some(candidate.entry.public_id.clone());
        offer.phase = OfferPhase::Offered;
        debug!(
            ride_id = %offer.request.ride_id,
            try_count = offer.try_count,
            driver_id = %candidate.entry.public_id,
            distance_m = candidate.distance_m,
            "offering ride"
        );
        ctx.relay
            .emit(
                &candidate.entry.socket_id,
                ServerEvent::Offer(offer.request.clone()),
            )
            .await?;
        ctx.relay
            .emit(
                requester_socket_id,
                ServerEvent::OfferSent(candidate.entry.profile()),
            )
            .await?;

        match await_response(ctx, &offer, &mut signals).await {
            Verdict::Accepted(answer) => {
                offer.phase = OfferPhase::Accepted;
                accept(ctx, &offer, &answer).await?;
                return Ok(OfferOutcome::Accepted {
                    driver_id: answer.driver_id,
                });
            }
            Verdict::Rejected | Verdict::TimedOut => {
                offer
                    .ignored_driver_ids
                    .insert(candidate.entry.public_id.clone());
                offer.offered_to = None;
                offer.phase = OfferPhase::Searching;
                attempt += 1;
            }
            Verdict::Cancelled => return Ok(OfferOutcome::Cancelled),
        }
    }

    offer.phase = OfferPhase::Exhausted;
    ctx.relay
        .emit(
            requester_socket_id,
            ServerEvent::NoDriversAvailable {
                ride_id: offer.request.ride_id.clone(),
            },
        )
        .await?;
    Ok(OfferOutcome::Exhausted)
}

/// Race the offered driver's answer against the response deadline. Answers
/// from anyone but `offered_to` never touch the offer; the late responder
/// only gets a `delayedOfferResponse` back.
async fn await_response(
    ctx: &Arc<DispatcherContext>,
    offer: &Offer,
    signals: &mut mpsc::UnboundedReceiver<OfferSignal>,
) -> Verdict {
    let deadline = tokio::time::sleep(ctx.config.matching.offer_response_timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return Verdict::TimedOut,
            signal = signals.recv() => match signal {
                None | Some(OfferSignal::Cancel) => return Verdict::Cancelled,
                Some(OfferSignal::Response(answer)) => {
                    if offer.offered_to.as_deref() == Some(answer.driver_id.as_str()) {
                        if answer.accepted {
                            return Verdict::Accepted(answer);
                        }
                        return Verdict::Rejected;
                    }
                    debug!(
                        ride_id = %offer.request.ride_id,
                        driver_id = %answer.driver_id,
                        "response from a driver no longer holding the offer"
                    );
                    let event = ServerEvent::DelayedOfferResponse(true);
                    if let Err(error) = ctx.relay.emit(&answer.driver_socket_id, event).await {
                        warn!(%error, "could not acknowledge delayed response");
                    }
                }
            }
        }
    }
}

/// Persist the ride (only now — an abandoned search never leaves a record)
/// and notify both parties.
async fn accept(ctx: &Arc<DispatcherContext>, offer: &Offer, answer: &DriverAnswer) -> Result<()> {
    let ride = Ride {
        ride_id: offer.request.ride_id.clone(),
        voyager_id: offer.requester_id.clone(),
        driver_id: Some(answer.driver_id.clone()),
        status: RideStatus::Accepted,
        accepted_at_ms: Some(ctx.now_ms()),
        request: offer.request.clone(),
    };
    ctx.store.create_ride(ride).await?;
    ctx.registry
        .lock()
        .set_state(&answer.driver_socket_id, DriverState::Running);
    // Every mirror of this driver must stop seeing it as available.
    ctx.relay
        .broadcast(
            &answer.driver_socket_id,
            crate::relay::BroadcastEvent::State {
                state: DriverState::Running,
            },
        )
        .await?;

    ctx.relay
        .emit(
            &answer.driver_socket_id,
            ServerEvent::DriverOfferAccepted {
                ride_id: offer.request.ride_id.clone(),
                counterparty_id: offer.requester_id.clone(),
            },
        )
        .await?;
    ctx.relay
        .emit(
            &offer.requester_socket_id,
            ServerEvent::VoyagerOfferAccepted {
                ride_id: offer.request.ride_id.clone(),
                counterparty_id: answer.driver_id.clone(),
            },
        )
        .await
}

/// Wait out the retry interval. Stray driver responses arriving while
/// nobody holds the offer are acknowledged as delayed without shortening
/// the backoff. Returns `false` when the offer was cancelled.
async fn backoff(
    ctx: &Arc<DispatcherContext>,
    offer: &Offer,
    signals: &mut mpsc::UnboundedReceiver<OfferSignal>,
) -> bool {
    let pause = tokio::time::sleep(ctx.config.matching.retry_interval);
    tokio::pin!(pause);
    loop {
        tokio::select! {
            _ = &mut pause => return true,
            signal = signals.recv() => match signal {
                None | Some(OfferSignal::Cancel) => return false,
                Some(OfferSignal::Response(answer)) => {
                    debug!(
                        ride_id = %offer.request.ride_id,
                        driver_id = %answer.driver_id,
                        "response while searching"
                    );
                    let event = ServerEvent::DelayedOfferResponse(true);
                    if let Err(error) = ctx.relay.emit(&answer.driver_socket_id, event).await {
                        warn!(%error, "could not acknowledge delayed response");
                    }
                }
            }
        }
    }
}

/// Replace every pooled entry with its current registry value, dropping
/// drivers that disconnected since the last attempt.
fn refresh_pool(ctx: &Arc<DispatcherContext>, pool: &mut Vec<DriverEntry>) {
    let registry = ctx.registry.lock();
    pool.retain_mut(|slot| match registry.get(&slot.public_id) {
        Some(current) => {
            *slot = current.clone();
            true
        }
        None => false,
    });
}

