//! Invitation model and related database operations

use chrono::NaiveDateTime;
use diesel::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::schema::invitations;

/// Invitation model - column order MUST match schema.rs exactly!
/// Diesel's Queryable trait requires fields in the same order as the table columns.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = invitations)]
pub struct Invitation {
    pub id: i32,
    pub code: String,
    pub address: String,
    /// Funding account secret. Never log this in full - see logging::sanitize.
    pub key: String,
    pub created_by_profile_id: i32,
    pub created_at: NaiveDateTime,
    pub claimed_by_profile_id: Option<i32>,
    pub claimed_at: Option<NaiveDateTime>,
    pub redeemed_by_profile_id: Option<i32>,
    pub redeemed_at: Option<NaiveDateTime>,
    pub redeem_tx_hash: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = invitations)]
pub struct NewInvitation {
    pub code: String,
    pub address: String,
    pub key: String,
    pub created_by_profile_id: i32,
    pub created_at: NaiveDateTime,
}

/// Lifecycle of an invitation, derived from its nullable timestamp pairs.
///
/// `Redeemed` is absorbing: `redeemed_at` is written exactly once by a
/// conditional update and never cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationState {
    /// Created, nobody has accepted it yet.
    Open,
    /// A profile accepted the invite; the on-chain redemption has not run.
    Claimed,
    /// The on-chain redemption completed and the tx hash is recorded.
    Redeemed,
}

impl InvitationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationState::Open => "open",
            InvitationState::Claimed => "claimed",
            InvitationState::Redeemed => "redeemed",
        }
    }
}

impl NewInvitation {
    pub fn new(created_by_profile_id: i32, address: String, key: String) -> Self {
        Self {
            code: generate_code(),
            address,
            key,
            created_by_profile_id,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Generate a human-presentable invite code (12 uppercase alphanumerics).
///
/// Uniqueness is enforced by the UNIQUE constraint on `invitations.code`;
/// collisions surface as an insert error and the caller regenerates.
pub fn generate_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

impl Invitation {
    /// Create a new invitation in the database
    pub fn create(conn: &mut SqliteConnection, new_invitation: NewInvitation) -> QueryResult<Invitation> {
        let code = new_invitation.code.clone();

        diesel::insert_into(invitations::table)
            .values(&new_invitation)
            .execute(conn)?;

        invitations::table
            .filter(invitations::code.eq(code))
            .first(conn)
    }

    /// Find invitation by ID
    pub fn find_by_id(conn: &mut SqliteConnection, invitation_id: i32) -> QueryResult<Option<Invitation>> {
        invitations::table
            .find(invitation_id)
            .first(conn)
            .optional()
    }

    /// Find invitation by its presentable code
    pub fn find_by_code(conn: &mut SqliteConnection, code: &str) -> QueryResult<Option<Invitation>> {
        invitations::table
            .filter(invitations::code.eq(code))
            .first(conn)
            .optional()
    }

    /// Record that a profile accepted this invitation.
    ///
    /// Conditional on the invitation being unclaimed and unredeemed; returns
    /// the number of rows updated (0 = someone else claimed it first).
    pub fn mark_claimed(
        conn: &mut SqliteConnection,
        invitation_id: i32,
        profile_id: i32,
    ) -> QueryResult<usize> {
        diesel::update(
            invitations::table
                .filter(invitations::id.eq(invitation_id))
                .filter(invitations::claimed_at.is_null())
                .filter(invitations::redeemed_at.is_null()),
        )
        .set((
            invitations::claimed_by_profile_id.eq(Some(profile_id)),
            invitations::claimed_at.eq(Some(chrono::Utc::now().naive_utc())),
        ))
        .execute(conn)
    }

    /// Seal the redemption: the single serialization point for
    /// "has this invitation been redeemed".
    ///
    /// The write is guarded by `redeemed_at IS NULL`; returns the number of
    /// rows updated. 0 means another request already redeemed the invitation
    /// and the caller lost the race.
    pub fn try_redeem(
        conn: &mut SqliteConnection,
        invitation_id: i32,
        redeemed_by_profile_id: i32,
        tx_hash: &str,
        now: NaiveDateTime,
    ) -> QueryResult<usize> {
        diesel::update(
            invitations::table
                .filter(invitations::id.eq(invitation_id))
                .filter(invitations::redeemed_at.is_null()),
        )
        .set((
            invitations::redeemed_at.eq(Some(now)),
            invitations::redeemed_by_profile_id.eq(Some(redeemed_by_profile_id)),
            invitations::redeem_tx_hash.eq(Some(tx_hash)),
        ))
        .execute(conn)
    }

    /// Derive the lifecycle state from the row
    pub fn state(&self) -> InvitationState {
        if self.redeemed_at.is_some() {
            InvitationState::Redeemed
        } else if self.claimed_at.is_some() {
            InvitationState::Claimed
        } else {
            InvitationState::Open
        }
    }

    pub fn is_redeemed(&self) -> bool {
        self.redeemed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation_row() -> Invitation {
        let now = chrono::Utc::now().naive_utc();
        Invitation {
            id: 1,
            code: "TESTCODE2345".to_string(),
            address: "0x52098ce3e9f5a19f0e9ba9a57d466e0b3ca27069".to_string(),
            key: "secret".to_string(),
            created_by_profile_id: 7,
            created_at: now,
            claimed_by_profile_id: None,
            claimed_at: None,
            redeemed_by_profile_id: None,
            redeemed_at: None,
            redeem_tx_hash: None,
        }
    }

    #[test]
    fn test_state_open() {
        assert_eq!(invitation_row().state(), InvitationState::Open);
    }

    #[test]
    fn test_state_claimed() {
        let mut inv = invitation_row();
        inv.claimed_by_profile_id = Some(9);
        inv.claimed_at = Some(chrono::Utc::now().naive_utc());
        assert_eq!(inv.state(), InvitationState::Claimed);
        assert!(!inv.is_redeemed());
    }

    #[test]
    fn test_state_redeemed() {
        let mut inv = invitation_row();
        inv.claimed_at = Some(chrono::Utc::now().naive_utc());
        inv.redeemed_by_profile_id = Some(9);
        inv.redeemed_at = Some(chrono::Utc::now().naive_utc());
        inv.redeem_tx_hash = Some("0xabc".to_string());
        assert_eq!(inv.state(), InvitationState::Redeemed);
        assert!(inv.is_redeemed());
    }

    #[test]
    fn test_generate_code_format() {
        let code = generate_code();
        assert_eq!(code.len(), 12);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        // Ambiguous glyphs are excluded from the alphabet
        assert!(!code.contains('O') && !code.contains('I') && !code.contains('0') && !code.contains('1'));
    }
}
