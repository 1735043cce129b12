//! Shared fixtures for the integration suites: scratch databases and
//! seeded invitations. No network, no chain - fully deterministic.

use diesel::prelude::*;
use tempfile::TempDir;

use redemption_queue::db::{self, DbPool};
use redemption_queue::models::invitation::{Invitation, NewInvitation};
use redemption_queue::schema::redeem_invitation_requests as requests;

/// A pooled scratch database; the backing directory lives as long as this
pub struct TestDb {
    pub pool: DbPool,
    _dir: TempDir,
}

pub fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = dir.path().join("queue.db");
    let pool =
        db::create_pool_with_migrations(url.to_str().expect("utf-8 path")).expect("test pool");
    TestDb { pool, _dir: dir }
}

/// Seed an invitation that a profile has already accepted, ready to redeem
pub fn seed_claimed_invitation(pool: &DbPool, creator: i32, invitee: i32) -> Invitation {
    let mut conn = pool.get().unwrap();
    let invitation = Invitation::create(
        &mut conn,
        NewInvitation::new(
            creator,
            "0x52098ce3e9f5a19f0e9ba9a57d466e0b3ca27069".to_string(),
            "invite-funding-secret".to_string(),
        ),
    )
    .unwrap();
    assert_eq!(
        Invitation::mark_claimed(&mut conn, invitation.id, invitee).unwrap(),
        1
    );
    Invitation::find_by_id(&mut conn, invitation.id)
        .unwrap()
        .unwrap()
}

/// Seed an invitation nobody has accepted yet
pub fn seed_open_invitation(pool: &DbPool, creator: i32) -> Invitation {
    let mut conn = pool.get().unwrap();
    Invitation::create(
        &mut conn,
        NewInvitation::new(
            creator,
            "0x19f0e9ba9a57d466e0b3ca2706952098ce3e9f5a".to_string(),
            "invite-funding-secret".to_string(),
        ),
    )
    .unwrap()
}

/// Age a claim so it counts as stale without sleeping through `stale_after`
pub fn backdate_claim(pool: &DbPool, request_id: i32, secs: i64) {
    let mut conn = pool.get().unwrap();
    let backdated = chrono::Utc::now().naive_utc() - chrono::Duration::seconds(secs);
    diesel::update(requests::table.filter(requests::id.eq(request_id)))
        .set(requests::picked_at.eq(Some(backdated)))
        .execute(&mut conn)
        .unwrap();
}
