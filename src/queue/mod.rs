//! ClaimQueue - the claim protocol over `redeem_invitation_requests`
//!
//! Guarantees that for a given invitation needing redemption, at most one
//! worker process is ever actively processing it, while tolerating worker
//! crashes. Coordination happens purely through atomic conditional updates
//! on the persisted rows: no lock service, no leader election. A crashed
//! worker's claim simply goes stale after `stale_after` and is reclaimed.
//!
//! Every conditional write re-asserts its predicate in the WHERE clause and
//! checks the affected-row count, inside a SQLite immediate transaction.

mod error;

pub use error::{ClaimError, ClaimResult};

use chrono::NaiveDateTime;
use diesel::prelude::*;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::DbPool;
use crate::models::invitation::Invitation;
use crate::models::redeem_request::{
    stale_duration, NewRedeemRequest, RedeemRequest, OUTCOME_SUCCEEDED, OUTCOME_SUPERSEDED,
};
use crate::schema::invitations;
use crate::schema::redeem_invitation_requests as requests;

/// Async facade over the claim protocol.
///
/// Worker identity is always an explicit parameter, never ambient state, so
/// ownership checks stay testable in isolation.
#[derive(Clone)]
pub struct ClaimQueue {
    pool: DbPool,
}

impl ClaimQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Enqueue a redemption request for an invitation.
    ///
    /// Fails with `InvalidInvitation` if the invitation does not exist or is
    /// already redeemed. Duplicate outstanding requests for the same
    /// invitation are permitted; cross-request uniqueness is enforced at
    /// completion time, not here.
    pub async fn enqueue(
        &self,
        invitation_id: i32,
        created_by_profile_id: i32,
    ) -> ClaimResult<RedeemRequest> {
        let mut conn = self.pool.get()?;
        tokio::task::spawn_blocking(move || {
            enqueue_in(&mut conn, invitation_id, created_by_profile_id)
        })
        .await?
    }

    /// Atomically claim the oldest eligible request, if any.
    ///
    /// Eligible: open (`outcome IS NULL`), invitation unredeemed, and either
    /// unclaimed or claimed longer than `stale_after` ago. FIFO by
    /// `created_at`, ties broken by `id`. Two workers racing for the same
    /// row can never both succeed.
    pub async fn claim_next(
        &self,
        worker_id: &str,
        stale_after: Duration,
    ) -> ClaimResult<Option<RedeemRequest>> {
        let mut conn = self.pool.get()?;
        let worker_id = worker_id.to_string();
        tokio::task::spawn_blocking(move || claim_next_in(&mut conn, &worker_id, stale_after))
            .await?
    }

    /// Record a successful on-chain redemption for a claimed request.
    ///
    /// Fails with `NotOwner` if the claim was lost (nothing is mutated), or
    /// with `AlreadyRedeemed` if another request redeemed the invitation
    /// first - in which case this request is marked superseded and the
    /// caller's transaction is logged for reconciliation.
    pub async fn complete(
        &self,
        request_id: i32,
        worker_id: &str,
        redeemed_by_profile_id: i32,
        tx_hash: &str,
    ) -> ClaimResult<()> {
        let mut conn = self.pool.get()?;
        let worker_id = worker_id.to_string();
        let tx_hash = tx_hash.to_string();
        tokio::task::spawn_blocking(move || {
            complete_in(
                &mut conn,
                request_id,
                &worker_id,
                redeemed_by_profile_id,
                &tx_hash,
            )
        })
        .await?
    }

    /// Release a held claim after a recoverable failure, making the request
    /// immediately eligible for `claim_next` again.
    pub async fn release_claim(&self, request_id: i32, worker_id: &str) -> ClaimResult<()> {
        let mut conn = self.pool.get()?;
        let worker_id = worker_id.to_string();
        tokio::task::spawn_blocking(move || release_claim_in(&mut conn, request_id, &worker_id))
            .await?
    }

    /// Permanently retire a claimed request without touching the invitation.
    ///
    /// The permanent-failure path: the request is marked superseded and will
    /// never be claimed again, while the invitation stays open for other
    /// requests.
    pub async fn abandon(&self, request_id: i32, worker_id: &str) -> ClaimResult<()> {
        let mut conn = self.pool.get()?;
        let worker_id = worker_id.to_string();
        tokio::task::spawn_blocking(move || abandon_in(&mut conn, request_id, &worker_id)).await?
    }

    /// Explicit foreign-key fetch for a request's invitation
    pub async fn invitation(&self, invitation_id: i32) -> ClaimResult<Option<Invitation>> {
        let mut conn = self.pool.get()?;
        tokio::task::spawn_blocking(move || {
            Invitation::find_by_id(&mut conn, invitation_id).map_err(ClaimError::from)
        })
        .await?
    }

    /// Fetch a request row by id (audit/inspection)
    pub async fn request(&self, request_id: i32) -> ClaimResult<Option<RedeemRequest>> {
        let mut conn = self.pool.get()?;
        tokio::task::spawn_blocking(move || {
            RedeemRequest::find_by_id(&mut conn, request_id).map_err(ClaimError::from)
        })
        .await?
    }
}

fn enqueue_in(
    conn: &mut SqliteConnection,
    invitation_id: i32,
    created_by_profile_id: i32,
) -> ClaimResult<RedeemRequest> {
    let request = conn.immediate_transaction::<_, ClaimError, _>(|conn| {
        let invitation = Invitation::find_by_id(conn, invitation_id)?.ok_or_else(|| {
            ClaimError::InvalidInvitation {
                invitation_id,
                reason: "no such invitation".to_string(),
            }
        })?;

        if invitation.is_redeemed() {
            return Err(ClaimError::InvalidInvitation {
                invitation_id,
                reason: "already redeemed".to_string(),
            });
        }

        let new_request = NewRedeemRequest {
            invitation_id,
            created_by_profile_id,
            created_at: chrono::Utc::now().naive_utc(),
        };
        diesel::insert_into(requests::table)
            .values(&new_request)
            .execute(conn)?;

        // Still inside the write transaction, so the newest row is ours.
        let request: RedeemRequest = requests::table.order(requests::id.desc()).first(conn)?;
        Ok(request)
    })?;

    info!(
        request_id = request.id,
        invitation_id,
        created_by_profile_id,
        "Redemption request enqueued"
    );
    Ok(request)
}

fn claim_next_in(
    conn: &mut SqliteConnection,
    worker_id: &str,
    stale_after: Duration,
) -> ClaimResult<Option<RedeemRequest>> {
    let claimed = conn.immediate_transaction::<_, ClaimError, _>(|conn| {
        let now = chrono::Utc::now().naive_utc();
        let cutoff = now - stale_duration(stale_after);

        // Reconciliation sweep: open requests whose invitation was already
        // redeemed by another, now-completed request are garbage. Mark them
        // superseded instead of handing them to a worker.
        let redeemed_invitations = invitations::table
            .filter(invitations::redeemed_at.is_not_null())
            .select(invitations::id);
        let swept = diesel::update(
            requests::table
                .filter(requests::outcome.is_null())
                .filter(requests::invitation_id.eq_any(redeemed_invitations)),
        )
        .set((
            requests::outcome.eq(Some(OUTCOME_SUPERSEDED)),
            requests::completed_at.eq(Some(now)),
        ))
        .execute(conn)?;
        if swept > 0 {
            debug!(swept, "Superseded requests for already-redeemed invitations");
        }

        // Oldest eligible request first; bounds starvation.
        let candidate: Option<RedeemRequest> = requests::table
            .inner_join(invitations::table)
            .filter(requests::outcome.is_null())
            .filter(invitations::redeemed_at.is_null())
            .filter(
                requests::worker_process
                    .is_null()
                    .or(requests::picked_at.lt(cutoff)),
            )
            .order((requests::created_at.asc(), requests::id.asc()))
            .select(requests::all_columns)
            .first(conn)
            .optional()?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };

        // The compare-and-set at the heart of the protocol: the WHERE clause
        // re-asserts eligibility, so a row claimed by someone else since the
        // select above updates zero rows.
        let claimed_rows = diesel::update(
            requests::table
                .filter(requests::id.eq(candidate.id))
                .filter(requests::outcome.is_null())
                .filter(
                    requests::worker_process
                        .is_null()
                        .or(requests::picked_at.lt(cutoff)),
                ),
        )
        .set((
            requests::worker_process.eq(Some(worker_id)),
            requests::picked_at.eq(Some(now)),
        ))
        .execute(conn)?;

        if claimed_rows == 0 {
            return Ok(None);
        }

        Ok(RedeemRequest::find_by_id(conn, candidate.id)?)
    })?;

    if let Some(ref request) = claimed {
        info!(
            request_id = request.id,
            invitation_id = request.invitation_id,
            worker_id,
            "Claimed redemption request"
        );
    }
    Ok(claimed)
}

enum SealOutcome {
    Won,
    Lost,
}

fn complete_in(
    conn: &mut SqliteConnection,
    request_id: i32,
    worker_id: &str,
    redeemed_by_profile_id: i32,
    tx_hash: &str,
) -> ClaimResult<()> {
    let (outcome, invitation_id) = conn.immediate_transaction::<_, ClaimError, _>(|conn| {
        let now = chrono::Utc::now().naive_utc();
        let request = RedeemRequest::find_by_id(conn, request_id)?
            .ok_or(ClaimError::RequestNotFound(request_id))?;

        // Ownership check: zero rows means the claim went stale and was
        // taken by someone else, or the request is already terminal.
        let owned = diesel::update(
            requests::table
                .filter(requests::id.eq(request_id))
                .filter(requests::worker_process.eq(worker_id))
                .filter(requests::outcome.is_null()),
        )
        .set((
            requests::outcome.eq(Some(OUTCOME_SUCCEEDED)),
            requests::completed_at.eq(Some(now)),
        ))
        .execute(conn)?;

        if owned == 0 {
            return Err(ClaimError::NotOwner {
                request_id,
                worker_id: worker_id.to_string(),
            });
        }

        // Seal the invitation, guarded by `redeemed_at IS NULL`. This is the
        // sole serialization point against double-redemption.
        let sealed = Invitation::try_redeem(
            conn,
            request.invitation_id,
            redeemed_by_profile_id,
            tx_hash,
            now,
        )?;

        if sealed == 0 {
            // Lost the cross-request race: record the supersession and keep
            // the commit so the row never gets reclaimed.
            diesel::update(requests::table.filter(requests::id.eq(request_id)))
                .set(requests::outcome.eq(Some(OUTCOME_SUPERSEDED)))
                .execute(conn)?;
            return Ok((SealOutcome::Lost, request.invitation_id));
        }

        Ok((SealOutcome::Won, request.invitation_id))
    })?;

    match outcome {
        SealOutcome::Won => {
            info!(
                request_id,
                invitation_id,
                worker_id,
                tx_hash = %crate::logging::sanitize::sanitize_tx_hash(tx_hash),
                "Invitation redeemed"
            );
            Ok(())
        }
        SealOutcome::Lost => {
            warn!(
                request_id,
                invitation_id,
                worker_id,
                tx_hash = %crate::logging::sanitize::sanitize_tx_hash(tx_hash),
                "Invitation was already redeemed by another request; transaction logged for reconciliation"
            );
            Err(ClaimError::AlreadyRedeemed { invitation_id })
        }
    }
}

fn release_claim_in(
    conn: &mut SqliteConnection,
    request_id: i32,
    worker_id: &str,
) -> ClaimResult<()> {
    let released = diesel::update(
        requests::table
            .filter(requests::id.eq(request_id))
            .filter(requests::worker_process.eq(worker_id))
            .filter(requests::outcome.is_null()),
    )
    .set((
        requests::worker_process.eq(None::<String>),
        requests::picked_at.eq(None::<NaiveDateTime>),
    ))
    .execute(conn)?;

    if released == 0 {
        return match RedeemRequest::find_by_id(conn, request_id)? {
            None => Err(ClaimError::RequestNotFound(request_id)),
            Some(_) => Err(ClaimError::NotOwner {
                request_id,
                worker_id: worker_id.to_string(),
            }),
        };
    }

    info!(request_id, worker_id, "Claim released for retry");
    Ok(())
}

fn abandon_in(conn: &mut SqliteConnection, request_id: i32, worker_id: &str) -> ClaimResult<()> {
    let retired = diesel::update(
        requests::table
            .filter(requests::id.eq(request_id))
            .filter(requests::worker_process.eq(worker_id))
            .filter(requests::outcome.is_null()),
    )
    .set((
        requests::outcome.eq(Some(OUTCOME_SUPERSEDED)),
        requests::completed_at.eq(Some(chrono::Utc::now().naive_utc())),
    ))
    .execute(conn)?;

    if retired == 0 {
        return match RedeemRequest::find_by_id(conn, request_id)? {
            None => Err(ClaimError::RequestNotFound(request_id)),
            Some(_) => Err(ClaimError::NotOwner {
                request_id,
                worker_id: worker_id.to_string(),
            }),
        };
    }

    warn!(request_id, worker_id, "Request abandoned as unprocessable");
    Ok(())
}
