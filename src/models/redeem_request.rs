//! RedeemInvitationRequest model - the unit of work in the claim queue

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::schema::redeem_invitation_requests;

/// Persisted terminal outcome: this request's claim produced the redemption.
pub const OUTCOME_SUCCEEDED: &str = "succeeded";
/// Persisted terminal outcome: another request redeemed the invitation first,
/// or the request was abandoned as unprocessable.
pub const OUTCOME_SUPERSEDED: &str = "superseded";

/// RedeemInvitationRequest model - column order MUST match schema.rs exactly!
#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = redeem_invitation_requests)]
pub struct RedeemRequest {
    pub id: i32,
    pub invitation_id: i32,
    pub created_by_profile_id: i32,
    pub created_at: NaiveDateTime,
    /// Identity of the worker currently holding the claim. Set and cleared
    /// together with `picked_at`.
    pub worker_process: Option<String>,
    pub picked_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub outcome: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = redeem_invitation_requests)]
pub struct NewRedeemRequest {
    pub invitation_id: i32,
    pub created_by_profile_id: i32,
    pub created_at: NaiveDateTime,
}

/// Claim-queue state of a request, derived from the row.
///
/// Terminal states are absorbing: every claim predicate requires
/// `outcome IS NULL`, so a terminal row can never be picked up again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    /// Open and claimable by any worker.
    Unclaimed,
    /// Exclusively held by one worker since `picked_at`.
    Claimed {
        worker: String,
        picked_at: NaiveDateTime,
    },
    /// This request's worker executed the redemption.
    Succeeded,
    /// Another request won, or the request was abandoned.
    Superseded,
}

impl RedeemRequest {
    /// Find request by ID
    pub fn find_by_id(conn: &mut SqliteConnection, request_id: i32) -> QueryResult<Option<RedeemRequest>> {
        redeem_invitation_requests::table
            .find(request_id)
            .first(conn)
            .optional()
    }

    /// All requests ever enqueued for an invitation, oldest first (audit view)
    pub fn find_for_invitation(
        conn: &mut SqliteConnection,
        invitation_id: i32,
    ) -> QueryResult<Vec<RedeemRequest>> {
        redeem_invitation_requests::table
            .filter(redeem_invitation_requests::invitation_id.eq(invitation_id))
            .order((
                redeem_invitation_requests::created_at.asc(),
                redeem_invitation_requests::id.asc(),
            ))
            .load(conn)
    }

    /// Derive the claim state from the row
    pub fn state(&self) -> RequestState {
        match self.outcome.as_deref() {
            Some(OUTCOME_SUCCEEDED) => RequestState::Succeeded,
            Some(_) => RequestState::Superseded,
            None => match (&self.worker_process, self.picked_at) {
                (Some(worker), Some(picked_at)) => RequestState::Claimed {
                    worker: worker.clone(),
                    picked_at,
                },
                _ => RequestState::Unclaimed,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// True if the claim was taken longer than `stale_after` before `now`,
    /// making the row eligible for reclaim by another worker.
    pub fn is_stale(&self, stale_after: Duration, now: NaiveDateTime) -> bool {
        match self.picked_at {
            Some(picked_at) if self.outcome.is_none() => {
                now.signed_duration_since(picked_at) > stale_duration(stale_after)
            }
            _ => false,
        }
    }
}

/// Convert a std `Duration` to a chrono one, saturating instead of panicking.
pub(crate) fn stale_duration(stale_after: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(stale_after.as_millis().min(i64::MAX as u128) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_row() -> RedeemRequest {
        RedeemRequest {
            id: 1,
            invitation_id: 1,
            created_by_profile_id: 7,
            created_at: chrono::Utc::now().naive_utc(),
            worker_process: None,
            picked_at: None,
            completed_at: None,
            outcome: None,
        }
    }

    #[test]
    fn test_state_unclaimed() {
        assert_eq!(request_row().state(), RequestState::Unclaimed);
        assert!(!request_row().is_terminal());
    }

    #[test]
    fn test_state_claimed() {
        let mut req = request_row();
        let picked_at = chrono::Utc::now().naive_utc();
        req.worker_process = Some("worker-1".to_string());
        req.picked_at = Some(picked_at);
        assert_eq!(
            req.state(),
            RequestState::Claimed {
                worker: "worker-1".to_string(),
                picked_at,
            }
        );
    }

    #[test]
    fn test_state_terminal() {
        let mut req = request_row();
        req.outcome = Some(OUTCOME_SUCCEEDED.to_string());
        assert_eq!(req.state(), RequestState::Succeeded);
        assert!(req.is_terminal());

        req.outcome = Some(OUTCOME_SUPERSEDED.to_string());
        assert_eq!(req.state(), RequestState::Superseded);
    }

    #[test]
    fn test_staleness_boundary() {
        let now = chrono::Utc::now().naive_utc();
        let mut req = request_row();
        req.worker_process = Some("worker-1".to_string());

        req.picked_at = Some(now - chrono::Duration::seconds(59));
        assert!(!req.is_stale(Duration::from_secs(60), now));

        req.picked_at = Some(now - chrono::Duration::seconds(61));
        assert!(req.is_stale(Duration::from_secs(60), now));
    }

    #[test]
    fn test_terminal_rows_never_stale() {
        let now = chrono::Utc::now().naive_utc();
        let mut req = request_row();
        req.worker_process = Some("worker-1".to_string());
        req.picked_at = Some(now - chrono::Duration::hours(2));
        req.outcome = Some(OUTCOME_SUCCEEDED.to_string());
        assert!(!req.is_stale(Duration::from_secs(60), now));
    }
}
