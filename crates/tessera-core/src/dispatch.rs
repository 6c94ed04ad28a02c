//! Placement dispatcher
//!
//! Binds each assignment of a batch to one identity and spawns a placement
//! task for it. Submission never waits on the network; the per-identity
//! claim taken at bind time keeps a second call for the same identity from
//! starting until the first one has recorded its outcome.

use crate::account::{Account, AccountPool, PlacementClaim};
use crate::placement::{interpret, PlacementOutcome};
use crate::ports::PlacementApi;
use crate::types::Assignment;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Fire-and-forget executor for placement tasks
pub struct Dispatcher {
    placement: Arc<dyn PlacementApi>,
    pool: Arc<AccountPool>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("available_permits", &self.permits.available_permits())
            .field("pending", &self.tasks.lock().len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher running at most `max_in_flight` calls at once
    #[must_use]
    pub fn new(placement: Arc<dyn PlacementApi>, pool: Arc<AccountPool>, max_in_flight: usize) -> Self {
        Self {
            placement,
            pool,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Bind assignments to identities pairwise and submit one task per pair
    ///
    /// An identity that is already claimed (or appears twice) is skipped
    /// together with its assignment; the pixel comes back in a later diff.
    /// Returns the number of tasks submitted.
    pub fn dispatch(&self, batch: Vec<Assignment>, accounts: &[Arc<Account>]) -> usize {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}

        let mut submitted = 0;
        for (assignment, account) in batch.into_iter().zip(accounts) {
            let Some(claim) = account.try_claim() else {
                tracing::debug!(account = account.username(), "account busy, dropping assignment");
                continue;
            };
            tasks.spawn(place(
                claim,
                assignment,
                Arc::clone(&self.placement),
                Arc::clone(&self.pool),
                Arc::clone(&self.permits),
            ));
            submitted += 1;
        }
        submitted
    }

    /// Number of submitted tasks not yet reaped
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Wait for every submitted task to finish
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let count = tasks.len();
        if count > 0 {
            tracing::info!(count, "draining placement tasks");
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "placement task ended abnormally");
            }
        }
    }
}

async fn place(
    claim: PlacementClaim,
    assignment: Assignment,
    placement: Arc<dyn PlacementApi>,
    pool: Arc<AccountPool>,
    permits: Arc<Semaphore>,
) {
    let Ok(_permit) = permits.acquire_owned().await else {
        return;
    };
    let account = claim.account();

    let outcome = match account.token() {
        Some(token) => interpret(placement.place(&token, &assignment).await, Utc::now()),
        None => PlacementOutcome::Failed {
            reason: "no session token".to_string(),
        },
    };

    match &outcome {
        PlacementOutcome::Placed { .. } => {
            tracing::info!(account = account.username(), %assignment, "placed pixel");
        }
        PlacementOutcome::RateLimited { .. } => {
            tracing::info!(account = account.username(), %assignment, "placement rate limited");
        }
        PlacementOutcome::Banned | PlacementOutcome::Failed { .. } => {
            tracing::warn!(account = account.username(), %assignment, ?outcome, "placement failed");
        }
    }

    pool.record_outcome(account, &outcome, Utc::now());
}
