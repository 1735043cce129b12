//! WorkerCoordinator - drives the claim/process/complete cycle
//!
//! Each worker process runs one coordinator: poll the claim queue with
//! jitter, claim a request, look up the invitation's funding account, submit
//! the on-chain transaction, and report the outcome back. A coordinator
//! that crashes mid-processing simply stops; its claim goes stale and
//! another worker picks the request up.

pub mod submitter;

pub use submitter::{BlockchainSubmitter, EoaKeypair, InvitationFundsRegistry, SubmitError};

use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::models::redeem_request::RedeemRequest;
use crate::queue::{ClaimQueue, ClaimResult};

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Opaque identity written into `worker_process` on every claim
    pub worker_id: String,
    /// Sleep between empty polls (default: 5s)
    pub poll_interval: Duration,
    /// Random extra sleep added to each poll to avoid thundering-herd
    /// claiming under contention (default: up to 500ms)
    pub poll_jitter: Duration,
    /// Claim TTL: claims older than this are reclaimable (default: 60s)
    pub stale_after: Duration,
    /// Release/reclaim cycles before a request is abandoned for good.
    /// 0 = unbounded, the queue itself never caps retries.
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            poll_interval: Duration::from_secs(5),
            poll_jitter: Duration::from_millis(500),
            stale_after: Duration::from_secs(60),
            max_attempts: 0,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            worker_id: std::env::var("WORKER_ID").unwrap_or(defaults.worker_id),
            poll_interval: env_secs("WORKER_POLL_INTERVAL_SECS", defaults.poll_interval),
            poll_jitter: env_millis("WORKER_POLL_JITTER_MS", defaults.poll_jitter),
            stale_after: env_secs("CLAIM_STALE_AFTER_SECS", defaults.stale_after),
            max_attempts: std::env::var("WORKER_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// The worker-process role: claims requests and executes redemptions
pub struct WorkerCoordinator {
    queue: ClaimQueue,
    submitter: Arc<dyn BlockchainSubmitter>,
    funds: Arc<dyn InvitationFundsRegistry>,
    config: WorkerConfig,
    shutdown: AtomicBool,
    /// Transient-failure count per request id, kept in-process. Worker
    /// restarts reset the count; the persisted rows stay authoritative.
    attempts: Mutex<HashMap<i32, u32>>,
}

impl WorkerCoordinator {
    pub fn new(
        queue: ClaimQueue,
        submitter: Arc<dyn BlockchainSubmitter>,
        funds: Arc<dyn InvitationFundsRegistry>,
        config: WorkerConfig,
    ) -> Self {
        info!(
            worker_id = %config.worker_id,
            poll_interval_secs = config.poll_interval.as_secs(),
            stale_after_secs = config.stale_after.as_secs(),
            "WorkerCoordinator initialized"
        );
        Self {
            queue,
            submitter,
            funds,
            config,
            shutdown: AtomicBool::new(false),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Trigger graceful shutdown; the loop exits before its next poll
    pub fn shutdown(&self) {
        info!(worker_id = %self.config.worker_id, "Worker shutdown requested");
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Run the claim/process/complete loop (call via tokio::spawn)
    pub async fn run(self: Arc<Self>) {
        info!(worker_id = %self.config.worker_id, "Starting redemption worker loop");

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.poll_once().await {
                // Work was found; poll again immediately in case more is queued.
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    error!(worker_id = %self.config.worker_id, "Worker cycle error: {}", e);
                }
            }
            sleep(self.poll_delay()).await;
        }

        info!(worker_id = %self.config.worker_id, "Redemption worker loop stopped");
    }

    /// One poll cycle: claim at most one request and process it.
    ///
    /// Returns whether a request was claimed. Lost races inside processing
    /// are handled and logged here, not surfaced as errors.
    pub async fn poll_once(&self) -> ClaimResult<bool> {
        let claimed = self
            .queue
            .claim_next(&self.config.worker_id, self.config.stale_after)
            .await?;

        match claimed {
            Some(request) => {
                self.process(request).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process(&self, request: RedeemRequest) -> ClaimResult<()> {
        let worker_id = &self.config.worker_id;
        debug!(
            request_id = request.id,
            invitation_id = request.invitation_id,
            worker_id = %worker_id,
            "Processing claimed request"
        );

        let invitation = match self.queue.invitation(request.invitation_id).await? {
            Some(invitation) => invitation,
            None => {
                warn!(
                    request_id = request.id,
                    invitation_id = request.invitation_id,
                    "Claimed request references a missing invitation; abandoning"
                );
                return self.retire(&request).await;
            }
        };

        // Redemption runs on behalf of the profile that accepted the invite.
        // An unclaimed invitation cannot be redeemed; the request is
        // provably unprocessable.
        let Some(redeemed_by) = invitation.claimed_by_profile_id else {
            warn!(
                request_id = request.id,
                invitation_id = invitation.id,
                code = %crate::logging::sanitize::sanitize_code(&invitation.code),
                "Invitation has not been accepted by any profile; abandoning request"
            );
            return self.retire(&request).await;
        };

        let funds = match self.funds.lookup(invitation.created_by_profile_id).await {
            Ok(funds) => funds,
            Err(e) => return self.handle_submit_error(&request, e).await,
        };
        debug!(
            request_id = request.id,
            funds_address = %crate::log_address!(&funds.address),
            "Funding account resolved"
        );

        let tx_hash = match self.submitter.submit(&invitation, &funds).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return self.handle_submit_error(&request, e).await,
        };

        match self
            .queue
            .complete(request.id, worker_id, redeemed_by, &tx_hash)
            .await
        {
            Ok(()) => {
                self.clear_attempts(request.id);
                Ok(())
            }
            Err(e) if e.is_lost_race() => {
                // Expected outcome, not a failure: the claim expired or
                // another request redeemed the invitation first.
                warn!(
                    request_id = request.id,
                    worker_id = %worker_id,
                    tx_hash = %crate::log_tx_hash!(&tx_hash),
                    "Discarding in-flight work: {}",
                    e
                );
                self.clear_attempts(request.id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_submit_error(
        &self,
        request: &RedeemRequest,
        error: SubmitError,
    ) -> ClaimResult<()> {
        let worker_id = &self.config.worker_id;

        if error.is_transient() {
            let attempts = self.bump_attempts(request.id);
            if self.config.max_attempts > 0 && attempts >= self.config.max_attempts {
                warn!(
                    request_id = request.id,
                    attempts,
                    max_attempts = self.config.max_attempts,
                    "Transient failure budget exhausted; abandoning: {}",
                    error
                );
                return self.retire(request).await;
            }

            warn!(
                request_id = request.id,
                attempts,
                "Transient submission failure; releasing claim for retry: {}",
                error
            );
            match self.queue.release_claim(request.id, worker_id).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_lost_race() => {
                    warn!(request_id = request.id, "Claim already lost: {}", e);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        } else {
            error!(
                request_id = request.id,
                invitation_id = request.invitation_id,
                "Permanent submission failure; abandoning request: {}",
                error
            );
            self.retire(request).await
        }
    }

    /// Abandon a request, tolerating an already-lost claim
    async fn retire(&self, request: &RedeemRequest) -> ClaimResult<()> {
        self.clear_attempts(request.id);
        match self
            .queue
            .abandon(request.id, &self.config.worker_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_lost_race() => {
                warn!(
                    request_id = request.id,
                    "Claim lost before abandon could land: {}", e
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn bump_attempts(&self, request_id: i32) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let count = attempts.entry(request_id).or_insert(0);
        *count += 1;
        *count
    }

    fn clear_attempts(&self, request_id: i32) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.remove(&request_id);
    }

    fn poll_delay(&self) -> Duration {
        let jitter_ms = self.config.poll_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.config.poll_interval;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        self.config.poll_interval + Duration::from_millis(jitter)
    }
}
