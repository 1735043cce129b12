//! ClaimQueue error types
//!
//! Expected coordination races (`NotOwner`, `AlreadyRedeemed`) are first-class
//! outcomes here, not panics: callers match on them and discard in-flight work.

use thiserror::Error;

/// Errors that can occur in ClaimQueue operations
#[derive(Error, Debug)]
pub enum ClaimError {
    /// Enqueue target does not exist or is already redeemed. Caller error,
    /// not retried.
    #[error("Invalid invitation {invitation_id}: {reason}")]
    InvalidInvitation { invitation_id: i32, reason: String },

    /// The claim was lost to staleness or another worker. The caller must
    /// discard its in-flight work; no state was mutated.
    #[error("Request {request_id} is not owned by worker {worker_id}")]
    NotOwner { request_id: i32, worker_id: String },

    /// Another request already redeemed the invitation. The losing request
    /// has been marked superseded; the caller's transaction is logged for
    /// reconciliation, not treated as a failure of the system.
    #[error("Invitation {invitation_id} was already redeemed by another request")]
    AlreadyRedeemed { invitation_id: i32 },

    /// Referenced request row does not exist
    #[error("Redeem request {0} not found")]
    RequestNotFound(i32),

    /// Unexpected storage failure. Fatal to the caller, which must not
    /// assume it still owns any claim.
    #[error("Storage error: {0}")]
    Storage(#[from] diesel::result::Error),

    /// Could not obtain a pooled connection
    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// Blocking task was cancelled or panicked
    #[error("Task join error: {0}")]
    Runtime(#[from] tokio::task::JoinError),
}

impl ClaimError {
    /// True for the expected coordination races: the caller discards its
    /// in-flight work and moves on, nothing is wrong with the system.
    pub fn is_lost_race(&self) -> bool {
        matches!(
            self,
            ClaimError::NotOwner { .. } | ClaimError::AlreadyRedeemed { .. }
        )
    }

    /// True for failures after which claim ownership must not be assumed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClaimError::Storage(_) | ClaimError::Pool(_) | ClaimError::Runtime(_)
        )
    }
}

/// Result type for claim-queue operations
pub type ClaimResult<T> = Result<T, ClaimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_races_are_not_fatal() {
        let not_owner = ClaimError::NotOwner {
            request_id: 1,
            worker_id: "worker-1".into(),
        };
        assert!(not_owner.is_lost_race());
        assert!(!not_owner.is_fatal());

        let lost = ClaimError::AlreadyRedeemed { invitation_id: 3 };
        assert!(lost.is_lost_race());
        assert!(!lost.is_fatal());
    }

    #[test]
    fn test_storage_errors_are_fatal() {
        let err = ClaimError::Storage(diesel::result::Error::BrokenTransactionManager);
        assert!(err.is_fatal());
        assert!(!err.is_lost_race());
    }

    #[test]
    fn test_invalid_invitation_is_caller_error() {
        let err = ClaimError::InvalidInvitation {
            invitation_id: 9,
            reason: "already redeemed".into(),
        };
        assert!(!err.is_lost_race());
        assert!(!err.is_fatal());
    }
}
