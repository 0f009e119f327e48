//! Error types for the Birtu client core
//!
//! Three failure families cross the core boundary: persistence failures from the
//! session store, rejected lifecycle transitions, and inbound messages that cannot be
//! decoded. `BirtuError` unifies them for callers that do not care which one fired.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Persistence Errors
// ----------------------------------------------------------------------------

/// Failure reading or writing durable session storage
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage not available: {reason}")]
    Unavailable { reason: String },
}

impl PersistenceError {
    /// Create an unavailable-storage error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Transition Errors
// ----------------------------------------------------------------------------

/// A lifecycle transition that the state machine refused to apply
///
/// The machine is left exactly as it was before the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition from {from_state} on {event}: {reason}")]
pub struct InvalidTransition {
    pub from_state: String,
    pub event: String,
    pub reason: String,
}

impl InvalidTransition {
    pub fn new(
        from_state: impl Into<String>,
        event: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            from_state: from_state.into(),
            event: event.into(),
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Decode Errors
// ----------------------------------------------------------------------------

/// An inbound message that could not be turned into an event
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Missing field `{field}`")]
    MissingField { field: &'static str },

    #[error("Field `{field}` has the wrong type")]
    WrongType { field: &'static str },

    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Core error type for the Birtu client
#[derive(Debug, Error)]
pub enum BirtuError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

pub type Result<T> = core::result::Result<T, BirtuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_display() {
        let err = InvalidTransition::new("bidding", "AcceptBid(b9)", "no bid with id b9");
        assert_eq!(
            err.to_string(),
            "Invalid transition from bidding on AcceptBid(b9): no bid with id b9"
        );
    }

    #[test]
    fn test_unified_conversion() {
        let err: BirtuError = PersistenceError::unavailable("locked").into();
        assert!(matches!(err, BirtuError::Persistence(_)));
        assert!(err.to_string().contains("locked"));
    }
}
