//! External collaborator interfaces for the worker loop
//!
//! The on-chain side is out of scope for the queue: submission happens
//! behind `BlockchainSubmitter`, the funding keypair comes from
//! `InvitationFundsRegistry`. Both are consumed read-only, and both must be
//! idempotent-or-checked before resubmission because the coordination model
//! tolerates at-least-once execution.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::invitation::Invitation;

/// Externally-owned account used to fund/sign a redemption transaction
#[derive(Debug, Clone)]
pub struct EoaKeypair {
    pub address: String,
    /// Hex-encoded signing key. Never log - see logging::sanitize.
    pub private_key: String,
}

/// Errors from the external submission path
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Worth retrying after releasing the claim (RPC hiccups, timeouts)
    #[error("Transient submission failure: {0}")]
    Transient(String),

    /// Never retried; the request is abandoned (invalid invitation,
    /// missing funds account, rejected transaction)
    #[error("Permanent submission failure: {0}")]
    Permanent(String),
}

impl SubmitError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SubmitError::Transient(_))
    }
}

/// Supplies the funding keypair for a profile's invitations
#[async_trait]
pub trait InvitationFundsRegistry: Send + Sync {
    async fn lookup(&self, profile_id: i32) -> Result<EoaKeypair, SubmitError>;
}

/// Submits and watches the on-chain redemption transaction for an
/// invitation, returning the transaction hash once accepted
#[async_trait]
pub trait BlockchainSubmitter: Send + Sync {
    async fn submit(
        &self,
        invitation: &Invitation,
        funds: &EoaKeypair,
    ) -> Result<String, SubmitError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_predicate() {
        assert!(SubmitError::Transient("rpc timeout".into()).is_transient());
        assert!(!SubmitError::Permanent("bad invitation".into()).is_transient());
    }
}
