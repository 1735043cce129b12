//! Claim-queue coordination core for invitation redemption.
//!
//! Multiple independent worker processes compete to execute the on-chain
//! redemption of single-use invitations exactly once. Coordination happens
//! purely through atomic conditional updates on two SQLite tables - no lock
//! service, no leader election. See the `queue` module for the claim
//! protocol and `worker` for the polling coordinator.

// Sanitization macros for log fields (defined before modules)
#[macro_export]
macro_rules! log_address {
    ($addr:expr) => {
        $crate::logging::sanitize::sanitize_address($addr)
    };
}

#[macro_export]
macro_rules! log_tx_hash {
    ($hash:expr) => {
        $crate::logging::sanitize::sanitize_tx_hash($hash)
    };
}

pub mod db;
pub mod logging;
pub mod models;
pub mod queue;
pub mod schema;
pub mod worker;
