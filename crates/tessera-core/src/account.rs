//! Account pool for identity lifecycle management
//!
//! Tracks, per identity:
//! - The current session token (replaced by logins only)
//! - The cooldown deadline (moved only by that identity's own placements)
//! - The disabled state and why it was set
//! - Whether a placement call is in flight
//!
//! Readers (scheduling, reporting) see consistent per-identity snapshots;
//! writes go through [`AccountPool::record_outcome`] and the login paths.

use crate::error::ErrorClass;
use crate::placement::{interpret_cooldown, PlacementOutcome};
use crate::ports::{Authenticator, PlacementApi};
use crate::types::{AccountId, Credentials, JitterRange, SessionToken};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Why an identity stopped receiving work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisableReason {
    /// Not logged in, or the last login failed; a refresh may clear it
    AuthFailure,
    /// A placement call failed; a refresh may clear it
    TransportFailure,
    /// Ban sentinel received; never cleared
    Banned,
}

impl DisableReason {
    /// Reason recorded for a failure of `class`, if that class disables
    #[must_use]
    pub fn from_class(class: ErrorClass) -> Option<Self> {
        if !class.disables_identity() {
            return None;
        }
        match class {
            ErrorClass::Banned => Some(Self::Banned),
            ErrorClass::AuthFailure => Some(Self::AuthFailure),
            _ => Some(Self::TransportFailure),
        }
    }

    /// Taxonomy class this reason was recorded for
    #[inline]
    #[must_use]
    pub fn class(self) -> ErrorClass {
        match self {
            Self::AuthFailure => ErrorClass::AuthFailure,
            Self::TransportFailure => ErrorClass::TransportFailure,
            Self::Banned => ErrorClass::Banned,
        }
    }

    /// Check if a successful login may clear this reason
    #[inline]
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        self.class().is_recoverable()
    }
}

/// Point-in-time view of one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub username: String,
    pub cooldown_until: DateTime<Utc>,
    pub disabled: Option<DisableReason>,
    pub in_flight: bool,
}

#[derive(Debug)]
struct AccountState {
    token: Option<SessionToken>,
    cooldown_until: DateTime<Utc>,
    disabled: Option<DisableReason>,
}

/// One automated identity
#[derive(Debug)]
pub struct Account {
    id: AccountId,
    credentials: Credentials,
    state: RwLock<AccountState>,
    in_flight: Arc<Mutex<()>>,
}

impl Account {
    fn new(id: AccountId, credentials: Credentials) -> Self {
        Self {
            id,
            credentials,
            state: RwLock::new(AccountState {
                token: None,
                cooldown_until: DateTime::<Utc>::MIN_UTC,
                disabled: Some(DisableReason::AuthFailure),
            }),
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Pool position
    #[inline]
    #[must_use]
    pub fn id(&self) -> AccountId {
        self.id
    }

    /// Login name
    #[inline]
    #[must_use]
    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// `!disabled && now >= cooldown_until`
    #[must_use]
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.read();
        state.disabled.is_none() && now >= state.cooldown_until
    }

    /// True when no placement call holds this identity
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.in_flight.try_lock().is_ok()
    }

    /// Disabled state, if any
    #[inline]
    #[must_use]
    pub fn disabled(&self) -> Option<DisableReason> {
        self.state.read().disabled
    }

    /// Current session token
    #[inline]
    #[must_use]
    pub fn token(&self) -> Option<SessionToken> {
        self.state.read().token.clone()
    }

    /// Consistent snapshot of this identity
    #[must_use]
    pub fn snapshot(&self) -> AccountSnapshot {
        let state = self.state.read();
        AccountSnapshot {
            id: self.id,
            username: self.credentials.username.clone(),
            cooldown_until: state.cooldown_until,
            disabled: state.disabled,
            in_flight: !self.is_idle(),
        }
    }

    /// Claim exclusive placement rights without waiting
    ///
    /// Returns `None` while another placement for this identity is in flight.
    #[must_use]
    pub fn try_claim(self: &Arc<Self>) -> Option<PlacementClaim> {
        let guard = Arc::clone(&self.in_flight).try_lock_owned().ok()?;
        Some(PlacementClaim {
            account: Arc::clone(self),
            _guard: guard,
        })
    }

    /// True while the disable reason can never be cleared
    fn is_terminal(&self) -> bool {
        self.disabled().is_some_and(|reason| !reason.is_recoverable())
    }

    fn disable(&self, reason: DisableReason) {
        let mut state = self.state.write();
        if state.disabled.map_or(true, DisableReason::is_recoverable) {
            state.disabled = Some(reason);
        }
    }

    fn install_token(&self, token: SessionToken) -> bool {
        let mut state = self.state.write();
        state.token = Some(token);
        if !state.disabled.map_or(true, DisableReason::is_recoverable) {
            return false;
        }
        state.disabled = None;
        true
    }
}

/// Exclusive right to make one placement call for one identity
///
/// Released on drop.
#[derive(Debug)]
pub struct PlacementClaim {
    account: Arc<Account>,
    _guard: OwnedMutexGuard<()>,
}

impl PlacementClaim {
    /// Identity this claim belongs to
    #[inline]
    #[must_use]
    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Identities in the pool
    pub total: usize,
    /// Identities satisfying the availability predicate
    pub usable: usize,
    /// Disabled identities (including banned)
    pub disabled: usize,
    /// Banned identities
    pub banned: usize,
    /// Identities with a placement call in flight
    pub in_flight: usize,
}

/// Collection of every identity
#[derive(Debug)]
pub struct AccountPool {
    accounts: RwLock<Vec<Arc<Account>>>,
    jitter: JitterRange,
}

impl AccountPool {
    /// Create a pool; identities start disabled until their first login
    #[must_use]
    pub fn new(credentials: Vec<Credentials>, jitter: JitterRange) -> Self {
        let accounts = credentials
            .into_iter()
            .zip(0u32..)
            .map(|(creds, i)| Arc::new(Account::new(AccountId(i), creds)))
            .collect();
        Self {
            accounts: RwLock::new(accounts),
            jitter,
        }
    }

    /// Number of identities
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    /// True when the pool holds no identity
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    /// Identity by id
    #[must_use]
    pub fn get(&self, id: AccountId) -> Option<Arc<Account>> {
        self.accounts.read().iter().find(|a| a.id == id).cloned()
    }

    /// Every identity in current pool order
    #[must_use]
    pub fn accounts(&self) -> Vec<Arc<Account>> {
        self.accounts.read().clone()
    }

    /// Identities that may receive work right now: available and idle
    #[must_use]
    pub fn available(&self, now: DateTime<Utc>) -> Vec<Arc<Account>> {
        self.accounts
            .read()
            .iter()
            .filter(|a| a.is_available(now) && a.is_idle())
            .cloned()
            .collect()
    }

    /// Log every identity in and load its current cooldown
    ///
    /// Identities whose login or cooldown query fails stay disabled.
    pub async fn seed(&self, auth: &dyn Authenticator, placement: &dyn PlacementApi) {
        tracing::info!(total = self.len(), "logging into accounts");
        let accounts = self.accounts();

        let results = join_all(accounts.iter().map(|account| async move {
            if !self.login(account, auth).await {
                return false;
            }
            let Some(token) = account.token() else {
                return false;
            };
            let outcome = interpret_cooldown(placement.cooldown(&token).await, Utc::now());
            self.record_outcome(account, &outcome, Utc::now());
            account.disabled().is_none()
        }))
        .await;

        let logged_in = results.into_iter().filter(|ok| *ok).count();
        tracing::info!(logged_in, total = accounts.len(), "account seeding done");
        self.shuffle();
    }

    /// Re-login every identity in parallel
    ///
    /// Success replaces the token and clears a non-ban disable; failure
    /// disables the identity. Banned identities are skipped.
    pub async fn refresh_all(&self, auth: &dyn Authenticator) {
        tracing::info!(total = self.len(), "regenerating account tokens");
        let accounts = self.accounts();
        join_all(accounts.iter().map(|account| self.login(account, auth))).await;
        self.shuffle();
    }

    /// Apply the result of one placement attempt to its identity
    pub fn record_outcome(&self, account: &Account, outcome: &PlacementOutcome, now: DateTime<Utc>) {
        let class = outcome.class();
        if let Some(reason) = class.and_then(DisableReason::from_class) {
            account.disable(reason);
            match outcome {
                PlacementOutcome::Failed { reason: detail } => {
                    tracing::warn!(account = account.username(), ?reason, %detail, "disabled account");
                }
                _ => tracing::warn!(account = account.username(), ?reason, "disabled account"),
            }
            return;
        }

        let Some(at) = outcome.available_at() else {
            return;
        };
        let until = at.max(now) + self.jitter.sample(&mut rand::rng());
        account.state.write().cooldown_until = until;
        tracing::info!(
            account = account.username(),
            wait_secs = (until - now).num_seconds(),
            rate_limited = class == Some(ErrorClass::RateLimited),
            "timing account out"
        );
    }

    /// Tokens for up to `n` distinct usable identities, in pool order
    #[must_use]
    pub fn subscription_tokens(&self, n: usize) -> Vec<(AccountId, SessionToken)> {
        self.accounts
            .read()
            .iter()
            .filter(|a| a.disabled().is_none())
            .filter_map(|a| a.token().map(|t| (a.id, t)))
            .take(n)
            .collect()
    }

    /// Snapshot of every identity
    #[must_use]
    pub fn snapshot(&self) -> Vec<AccountSnapshot> {
        self.accounts.read().iter().map(|a| a.snapshot()).collect()
    }

    /// Pool statistics at `now`
    #[must_use]
    pub fn stats(&self, now: DateTime<Utc>) -> PoolStats {
        let accounts = self.accounts.read();
        let mut stats = PoolStats {
            total: accounts.len(),
            ..PoolStats::default()
        };
        for account in accounts.iter() {
            match account.disabled() {
                Some(DisableReason::Banned) => {
                    stats.disabled += 1;
                    stats.banned += 1;
                }
                Some(_) => stats.disabled += 1,
                None if account.is_available(now) => stats.usable += 1,
                None => {}
            }
            if !account.is_idle() {
                stats.in_flight += 1;
            }
        }
        stats
    }

    async fn login(&self, account: &Account, auth: &dyn Authenticator) -> bool {
        if account.is_terminal() {
            tracing::debug!(account = account.username(), "skipping banned account");
            return false;
        }
        match auth.login(&account.credentials).await {
            Ok(token) => account.install_token(token),
            Err(e) => {
                if let Some(reason) = DisableReason::from_class(e.class()) {
                    account.disable(reason);
                }
                tracing::warn!(account = account.username(), error = %e, "couldn't log into account");
                false
            }
        }
    }

    fn shuffle(&self) {
        self.accounts.write().shuffle(&mut rand::rng());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, PlacementError};
    use crate::placement::PlacementResponse;
    use crate::types::Assignment;
    use chrono::Duration;
    use std::collections::HashSet;

    /// Logs in everyone except the names in `reject`
    struct StubAuth {
        reject: parking_lot::Mutex<HashSet<String>>,
    }

    impl StubAuth {
        fn rejecting(names: &[&str]) -> Self {
            Self {
                reject: parking_lot::Mutex::new(names.iter().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Authenticator for StubAuth {
        async fn login(&self, credentials: &Credentials) -> Result<SessionToken, AuthError> {
            if self.reject.lock().contains(&credentials.username) {
                return Err(AuthError::Rejected(credentials.username.clone()));
            }
            Ok(SessionToken::new(format!("token-{}", credentials.username)))
        }
    }

    /// Cooldown query answers with a fixed timestamp
    struct StubCooldown(Option<i64>);

    #[async_trait::async_trait]
    impl PlacementApi for StubCooldown {
        async fn place(
            &self,
            _token: &SessionToken,
            _assignment: &Assignment,
        ) -> Result<PlacementResponse, PlacementError> {
            Err(PlacementError::Transport("not used".to_string()))
        }

        async fn cooldown(&self, _token: &SessionToken) -> Result<PlacementResponse, PlacementError> {
            self.0
                .map(PlacementResponse::next_available)
                .ok_or_else(|| PlacementError::Transport("down".to_string()))
        }
    }

    fn pool(names: &[&str]) -> AccountPool {
        AccountPool::new(
            names.iter().map(|n| Credentials::new(*n, "pw")).collect(),
            JitterRange::default(),
        )
    }

    fn by_name(pool: &AccountPool, name: &str) -> Arc<Account> {
        pool.accounts().into_iter().find(|a| a.username() == name).unwrap()
    }

    #[test]
    fn accounts_start_disabled() {
        let pool = pool(&["a", "b"]);
        assert!(pool.available(Utc::now()).is_empty());
        assert_eq!(pool.stats(Utc::now()).disabled, 2);
    }

    #[tokio::test]
    async fn seed_logs_in_and_loads_cooldown() {
        let pool = pool(&["a", "b", "c"]);
        let past = Utc::now() - Duration::seconds(1);
        pool.seed(&StubAuth::rejecting(&["c"]), &StubCooldown(Some(past.timestamp_millis())))
            .await;

        let now = Utc::now();
        let names: HashSet<_> = pool
            .available(now)
            .iter()
            .map(|a| a.username().to_string())
            .collect();
        assert_eq!(names, HashSet::from(["a".to_string(), "b".to_string()]));
        assert_eq!(by_name(&pool, "c").disabled(), Some(DisableReason::AuthFailure));
    }

    #[tokio::test]
    async fn seed_with_failing_cooldown_query_disables() {
        let pool = pool(&["a"]);
        pool.seed(&StubAuth::rejecting(&[]), &StubCooldown(None)).await;
        assert_eq!(
            by_name(&pool, "a").disabled(),
            Some(DisableReason::TransportFailure)
        );
    }

    #[tokio::test]
    async fn cooldown_excludes_until_deadline() {
        let pool = pool(&["a"]);
        pool.refresh_all(&StubAuth::rejecting(&[])).await;
        let account = by_name(&pool, "a");
        let now = Utc::now();

        let next = now + Duration::milliseconds(60_000);
        pool.record_outcome(&account, &PlacementOutcome::Placed { next_available: next }, now);

        assert!(!account.is_available(now));
        assert!(!account.is_available(next - Duration::milliseconds(1)));
        assert!(account.is_available(next));
        assert_eq!(account.snapshot().cooldown_until, next);
    }

    #[tokio::test]
    async fn past_timestamps_clamp_to_now() {
        let pool = pool(&["a"]);
        pool.refresh_all(&StubAuth::rejecting(&[])).await;
        let account = by_name(&pool, "a");
        let now = Utc::now();

        pool.record_outcome(
            &account,
            &PlacementOutcome::Placed {
                next_available: now - Duration::hours(1),
            },
            now,
        );
        assert_eq!(account.snapshot().cooldown_until, now);
    }

    #[tokio::test]
    async fn jitter_extends_cooldown() {
        let pool = AccountPool::new(vec![Credentials::new("a", "pw")], JitterRange::new(500, 500));
        pool.refresh_all(&StubAuth::rejecting(&[])).await;
        let account = by_name(&pool, "a");
        let now = Utc::now();

        pool.record_outcome(&account, &PlacementOutcome::Placed { next_available: now }, now);
        assert_eq!(account.snapshot().cooldown_until, now + Duration::milliseconds(500));
    }

    #[tokio::test]
    async fn ban_survives_refresh() {
        let pool = pool(&["a"]);
        let auth = StubAuth::rejecting(&[]);
        pool.refresh_all(&auth).await;
        let account = by_name(&pool, "a");

        pool.record_outcome(&account, &PlacementOutcome::Banned, Utc::now());
        pool.refresh_all(&auth).await;

        assert_eq!(account.disabled(), Some(DisableReason::Banned));
        assert!(!account.is_available(Utc::now() + Duration::days(365)));
        assert_eq!(pool.stats(Utc::now()).banned, 1);
    }

    #[tokio::test]
    async fn failure_disables_until_refresh() {
        let pool = pool(&["a"]);
        let auth = StubAuth::rejecting(&[]);
        pool.refresh_all(&auth).await;
        let account = by_name(&pool, "a");

        pool.record_outcome(
            &account,
            &PlacementOutcome::Failed {
                reason: "reset".to_string(),
            },
            Utc::now(),
        );
        assert_eq!(account.disabled(), Some(DisableReason::TransportFailure));

        pool.refresh_all(&auth).await;
        assert!(account.disabled().is_none());
    }

    #[tokio::test]
    async fn refresh_failure_disables() {
        let pool = pool(&["a"]);
        pool.refresh_all(&StubAuth::rejecting(&[])).await;
        pool.refresh_all(&StubAuth::rejecting(&["a"])).await;
        let account = by_name(&pool, "a");
        assert_eq!(account.disabled(), Some(DisableReason::AuthFailure));
        // Token from the earlier login is kept
        assert_eq!(account.token(), Some(SessionToken::new("token-a")));
    }

    #[tokio::test]
    async fn claims_are_exclusive() {
        let pool = pool(&["a"]);
        pool.refresh_all(&StubAuth::rejecting(&[])).await;
        let account = by_name(&pool, "a");

        let claim = account.try_claim().unwrap();
        assert!(account.try_claim().is_none());
        assert!(!account.is_idle());
        assert!(pool.available(Utc::now()).is_empty());
        assert_eq!(pool.stats(Utc::now()).in_flight, 1);

        drop(claim);
        assert!(account.is_idle());
        assert_eq!(pool.available(Utc::now()).len(), 1);
    }

    #[tokio::test]
    async fn subscription_tokens_skip_disabled() {
        let pool = pool(&["a", "b", "c"]);
        pool.refresh_all(&StubAuth::rejecting(&["b"])).await;

        let tokens = pool.subscription_tokens(5);
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(|(_, t)| t.expose() != "token-b"));
        assert_eq!(pool.subscription_tokens(1).len(), 1);
    }

    #[test]
    fn disable_reasons_follow_error_classes() {
        assert_eq!(DisableReason::from_class(ErrorClass::Banned), Some(DisableReason::Banned));
        assert_eq!(
            DisableReason::from_class(ErrorClass::AuthFailure),
            Some(DisableReason::AuthFailure)
        );
        assert_eq!(
            DisableReason::from_class(ErrorClass::TransportFailure),
            Some(DisableReason::TransportFailure)
        );
        assert_eq!(DisableReason::from_class(ErrorClass::RateLimited), None);
        assert_eq!(DisableReason::from_class(ErrorClass::ProtocolAnomaly), None);

        assert!(!DisableReason::Banned.is_recoverable());
        assert!(DisableReason::AuthFailure.is_recoverable());
        assert!(DisableReason::TransportFailure.is_recoverable());
    }

    #[tokio::test]
    async fn rate_limit_records_cooldown_without_disabling() {
        let pool = pool(&["a"]);
        pool.refresh_all(&StubAuth::rejecting(&[])).await;
        let account = by_name(&pool, "a");
        let now = Utc::now();
        let retry_at = now + Duration::seconds(90);

        pool.record_outcome(&account, &PlacementOutcome::RateLimited { retry_at }, now);
        assert_eq!(account.disabled(), None);
        assert_eq!(account.snapshot().cooldown_until, retry_at);
        assert!(!account.is_available(now));
        assert!(account.is_available(retry_at));
    }
}
