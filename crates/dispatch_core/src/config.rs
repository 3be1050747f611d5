//! Tunables for matching, relay delivery, cancellation, and the directory.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Matching-loop parameters: search radii, attempt budget, timers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Search radius for the first attempt, in meters.
    pub initial_radius_m: f64,
    /// Radius growth per attempt, in meters.
    pub step_radius_m: f64,
    /// Ceiling on the search radius, in meters.
    pub max_radius_m: f64,
    /// Hard cutoff beyond which a driver never seeds the next attempt.
    pub hard_cutoff_m: f64,
    /// Attempt budget before an offer is exhausted.
    pub max_attempts: u32,
    /// Backoff between attempts that found no candidate.
    pub retry_interval: Duration,
    /// How long an offered driver has to accept or reject.
    pub offer_response_timeout: Duration,
}

impl MatchingConfig {
    /// Radius for a given 1-based attempt, non-decreasing and clamped to
    /// `max_radius_m`.
    pub fn radius_for_attempt(&self, attempt: u32) -> f64 {
        if attempt <= 1 {
            return self.initial_radius_m;
        }
        (self.initial_radius_m + self.step_radius_m * f64::from(attempt)).min(self.max_radius_m)
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            initial_radius_m: 500.0,
            step_radius_m: 500.0,
            max_radius_m: 2_500.0,
            hard_cutoff_m: 3_000.0,
            max_attempts: 4,
            retry_interval: Duration::from_secs(1),
            offer_response_timeout: Duration::from_secs(15),
        }
    }
}

/// Cross-node relay parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RelayConfig {
    /// How long a directed delivery waits for its acknowledgment.
    pub ack_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(4),
        }
    }
}

/// Cancellation-fee parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CancellationConfig {
    /// Window after acceptance during which cancellation is free.
    pub safe_window: Duration,
    /// Fixed fee charged for a cancellation outside the safe window.
    pub fee: f64,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            safe_window: Duration::from_secs(120),
            fee: 7.0,
        }
    }
}

/// Connection-directory parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Time-to-live on connection records; a stale record reads as
    /// disconnected.
    pub ttl: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(4 * 60 * 60),
        }
    }
}

/// Aggregate configuration handed to a dispatcher context at construction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub matching: MatchingConfig,
    pub relay: RelayConfig,
    pub cancellation: CancellationConfig,
    pub directory: DirectoryConfig,
}
