use thiserror::Error;

/// Failure taxonomy for the dispatch engine.
///
/// Validation failures on direct client requests travel back through the
/// request's acknowledgment as `{status: "error", error: <kind>}` and never
/// tear down the connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Session/permission check failed at connection time.
    #[error("unauthorized")]
    Unauthorized,
    /// The referenced ride does not exist.
    #[error("ride not found")]
    RideNotFound,
    /// The acting participant is not a party to the ride.
    #[error("not allowed")]
    NotAllowed,
    /// A directed relay delivery got no reply within the ack timeout.
    #[error("ack timeout")]
    AckTimeout,
    /// Matching exhausted its attempt budget. Expected outcome, not a fault.
    #[error("no drivers available")]
    NoDriversAvailable,
    /// A wire payload failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// Unexpected failure inside a handler.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Stable kind string used in acknowledgment payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Unauthorized => "unauthorized",
            DispatchError::RideNotFound => "ride-not-found",
            DispatchError::NotAllowed => "not-allowed",
            DispatchError::AckTimeout => "ack-timeout",
            DispatchError::NoDriversAvailable => "no-drivers-available",
            DispatchError::Decode(_) => "decode-error",
            DispatchError::Internal(_) => "internal-error",
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
