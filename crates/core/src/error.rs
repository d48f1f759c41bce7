use crate::store::StoreError;
use crate::types::{DbId, EventId};

/// Errors surfaced by streak engine operations.
///
/// Only `InvalidState`, `NoItemAvailable` and `NotFound` are meant to reach the
/// UI as failures. `Unreachable` and `AlreadyClaimed` are downgraded by the
/// engine into queued/no-op outcomes, and `ReplayExhausted` is delivered as a
/// sync-failure notice.
#[derive(Debug, thiserror::Error)]
pub enum StreakError {
    #[error("Remote store unreachable: {0}")]
    Unreachable(String),

    #[error("Milestone {0} already claimed")]
    AlreadyClaimed(DbId),

    #[error("No recovery item available")]
    NoItemAvailable,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Event {event_id} could not be synced after {attempts} attempts: {reason}")]
    ReplayExhausted {
        event_id: EventId,
        attempts: u32,
        reason: String,
    },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Local cache failure: {0}")]
    LocalCache(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for StreakError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unreachable(msg) => StreakError::Unreachable(msg),
            StoreError::Timeout => StreakError::Unreachable("request timed out".into()),
            other => StreakError::Store(other),
        }
    }
}

impl StreakError {
    /// Whether the failure came from not being able to talk to the remote
    /// store (and should therefore be routed to the offline queue).
    pub fn is_unreachable(&self) -> bool {
        match self {
            StreakError::Unreachable(_) => true,
            StreakError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_unreachable() {
        let err: StreakError = StoreError::Timeout.into();
        assert!(matches!(err, StreakError::Unreachable(_)));
        assert!(err.is_unreachable());
    }

    #[test]
    fn conflict_is_routed_as_unreachable() {
        let err: StreakError = StoreError::Conflict.into();
        assert!(err.is_unreachable());
    }

    #[test]
    fn rejected_is_not_unreachable() {
        let err: StreakError = StoreError::Rejected("bad row".into()).into();
        assert!(!err.is_unreachable());
    }

    #[test]
    fn replay_exhausted_display() {
        let err = StreakError::ReplayExhausted {
            event_id: uuid::Uuid::nil(),
            attempts: 5,
            reason: "timeout".into(),
        };
        assert!(err.to_string().contains("after 5 attempts"));
    }
}
