//! Pool orchestrator: picks an eligible account and performs sends.
//!
//! Owns the live-session cache and the in-flight enrollments. Remote
//! failures never escape the public methods: they are logged, classified,
//! and folded into a `false`/`None` result. Only store failures on the
//! read paths propagate as errors.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::cache::SessionCache;
use crate::accounts::{Account, AccountStatus};
use crate::config::PoolConfig;
use crate::error::{DatabaseError, PoolError, SessionError};
use crate::monitor::ErrorCounter;
use crate::notify::Notifier;
use crate::safety::SafetyPolicy;
use crate::session::{AccountClient, FailureClass, SessionFactory, bounded, classify, close};
use crate::store::AccountStore;

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9]\d{6,14}$").expect("phone regex is valid"));

/// An enrollment waiting for its one-time code.
struct PendingAuthorization {
    account_id: i64,
    client: Box<dyn AccountClient>,
    requested_at: Instant,
}

/// Dependencies for building a [`PoolOrchestrator`].
pub struct PoolDeps {
    pub store: Arc<dyn AccountStore>,
    pub sessions: Arc<dyn SessionFactory>,
    pub notifier: Arc<dyn Notifier>,
    /// Failure streaks shared with the health monitor. Every status change
    /// made here clears the account's streak.
    pub errors: Arc<ErrorCounter>,
}

/// Selects accounts, sends through them, and manages enrollment.
pub struct PoolOrchestrator {
    config: PoolConfig,
    store: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionFactory>,
    notifier: Arc<dyn Notifier>,
    errors: Arc<ErrorCounter>,
    policy: SafetyPolicy,
    cache: SessionCache,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl PoolOrchestrator {
    pub fn new(config: PoolConfig, deps: PoolDeps) -> Self {
        Self {
            policy: SafetyPolicy::from_config(&config),
            cache: SessionCache::new(config.session_cache_capacity, config.remote_timeout),
            pending: Mutex::new(HashMap::new()),
            store: deps.store,
            sessions: deps.sessions,
            notifier: deps.notifier,
            errors: deps.errors,
            config,
        }
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    /// Number of live sessions currently cached.
    pub async fn cached_sessions(&self) -> usize {
        self.cache.len().await
    }

    /// Number of enrollments waiting for a code.
    pub async fn pending_authorizations(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Authorized and allowed by the safety policy right now.
    fn is_usable(&self, account: &Account) -> bool {
        account.is_authorized() && self.policy.is_eligible(account)
    }

    // ── Enrollment ──────────────────────────────────────────────────

    /// Create (or reuse) the account record, open a session and ask the
    /// platform to send an authorization code to `phone`.
    ///
    /// Re-enrolling a disabled or blocked account is the re-authorization
    /// path; an active, authorized account is rejected.
    pub async fn enroll(&self, phone: &str) -> Result<Account, PoolError> {
        let phone = phone.trim();
        if !PHONE_RE.is_match(phone) {
            return Err(PoolError::InvalidPhone(phone.to_string()));
        }

        let account = match self.store.get_by_phone(phone).await? {
            Some(existing) if existing.is_active() && existing.is_authorized() => {
                return Err(PoolError::AlreadyEnrolled {
                    phone: phone.to_string(),
                });
            }
            Some(existing) => {
                info!(account_id = existing.id, phone, status = %existing.status, "Re-enrolling account");
                existing
            }
            None => self.store.create_account(phone).await?,
        };

        let mut client = self.sessions.open(&account);
        let timeout = self.config.remote_timeout;
        let requested = async {
            bounded("connect", timeout, client.connect()).await?;
            bounded(
                "request_authorization_code",
                timeout,
                client.request_authorization_code(phone),
            )
            .await
        }
        .await;

        if let Err(source) = requested {
            warn!(phone, error = %source, "Enrollment failed");
            close(client.as_mut(), timeout).await;
            return Err(PoolError::Enrollment {
                phone: phone.to_string(),
                source,
            });
        }

        let replaced = self.pending.lock().await.insert(
            phone.to_string(),
            PendingAuthorization {
                account_id: account.id,
                client,
                requested_at: Instant::now(),
            },
        );
        if let Some(mut old) = replaced {
            close(old.client.as_mut(), timeout).await;
        }

        info!(account_id = account.id, phone, "Authorization code requested");
        Ok(account)
    }

    /// Exchange `code` for a session credential and persist it.
    ///
    /// Returns false when the account is unknown, the session cannot
    /// connect, or the code is rejected. A rejected code leaves the pending
    /// enrollment in place so the caller can retry.
    pub async fn complete_authorization(&self, phone: &str, code: &str) -> bool {
        let phone = phone.trim();
        self.prune_pending_authorizations().await;

        let account = match self.store.get_by_phone(phone).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!(phone, "Authorization for unknown account");
                return false;
            }
            Err(e) => {
                error!(phone, error = %e, "Failed to load account for authorization");
                return false;
            }
        };

        let timeout = self.config.remote_timeout;
        let pending = self.pending.lock().await.remove(phone);
        let (mut client, requested_at) = match pending {
            Some(p) if p.account_id == account.id => (p.client, p.requested_at),
            other => {
                if let Some(mut stale) = other {
                    close(stale.client.as_mut(), timeout).await;
                }
                let mut client = self.sessions.open(&account);
                if let Err(e) = bounded("connect", timeout, client.connect()).await {
                    warn!(phone, error = %e, "Session failed to connect for authorization");
                    close(client.as_mut(), timeout).await;
                    return false;
                }
                (client, Instant::now())
            }
        };

        let exchanged =
            bounded("complete_authorization", timeout, client.complete_authorization(code)).await;
        let credential = match exchanged {
            Ok(credential) => credential,
            Err(e) => {
                warn!(phone, error = %e, "Authorization code rejected");
                self.pending.lock().await.insert(
                    phone.to_string(),
                    PendingAuthorization {
                        account_id: account.id,
                        client,
                        requested_at,
                    },
                );
                return false;
            }
        };
        close(client.as_mut(), timeout).await;

        let stored = match self.store.update_session(account.id, &credential).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(account_id = account.id, error = %e, "Failed to persist session credential");
                return false;
            }
        };
        if !stored {
            return false;
        }

        if account.status != AccountStatus::Active {
            match self
                .store
                .update_status_by_id(account.id, AccountStatus::Active)
                .await
            {
                Ok(_) => info!(account_id = account.id, phone, from = %account.status, "Account re-authorized and reactivated"),
                Err(e) => {
                    error!(account_id = account.id, error = %e, "Failed to reactivate account");
                    return false;
                }
            }
        }

        self.errors.clear(account.id).await;

        // Any cached session still carries the old credential.
        let lease = self.cache.acquire(account.id).await;
        self.cache.invalidate(lease).await;

        info!(account_id = account.id, phone, "Account authorized");
        true
    }

    /// Disconnect enrollments that waited longer than the authorization TTL.
    pub async fn prune_pending_authorizations(&self) -> usize {
        let ttl = self.config.authorization_ttl;
        let expired: Vec<(String, PendingAuthorization)> = {
            let mut pending = self.pending.lock().await;
            let phones: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.requested_at.elapsed() > ttl)
                .map(|(phone, _)| phone.clone())
                .collect();
            phones
                .into_iter()
                .filter_map(|phone| pending.remove(&phone).map(|p| (phone, p)))
                .collect()
        };

        let count = expired.len();
        for (phone, mut p) in expired {
            info!(phone = %phone, account_id = p.account_id, "Authorization window expired");
            close(p.client.as_mut(), self.config.remote_timeout).await;
        }
        count
    }

    // ── Selection & sending ─────────────────────────────────────────

    /// First active account the safety policy currently allows. `None` means
    /// the pool is exhausted, which is ordinary backpressure.
    pub async fn select_available(&self) -> Result<Option<Account>, DatabaseError> {
        let accounts = self.store.get_active_accounts().await?;
        Ok(accounts.into_iter().find(|a| self.is_usable(a)))
    }

    /// Send `text` to `target` through `account`.
    ///
    /// Work on one account id is serialized. The account is re-read from the
    /// store under that lock and `account` is refreshed in place, so the
    /// caller's copy reflects the post-send counters.
    pub async fn send(&self, account: &mut Account, target: &str, text: &str) -> bool {
        let mut lease = self.cache.acquire(account.id).await;

        match self.store.get_by_id(account.id).await {
            Ok(Some(fresh)) => *account = fresh,
            Ok(None) => {
                warn!(account_id = account.id, "Account vanished before send");
                self.cache.invalidate(lease).await;
                return false;
            }
            Err(e) => {
                error!(account_id = account.id, error = %e, "Failed to re-read account before send");
                return false;
            }
        }

        if !self.is_usable(account) {
            debug!(account_id = account.id, status = %account.status, daily = account.daily_messages, "Account not eligible at send time");
            if !account.is_active() && lease.is_connected() {
                self.cache.invalidate(lease).await;
            }
            return false;
        }

        let timeout = self.config.remote_timeout;
        if !lease.is_connected() {
            let mut client = self.sessions.open(account);
            match bounded("connect", timeout, client.connect()).await {
                Ok(()) => lease.install(client),
                Err(e) => {
                    close(client.as_mut(), timeout).await;
                    self.handle_remote_failure(account, &e).await;
                    self.cache.invalidate(lease).await;
                    return false;
                }
            }
        }

        let result = match lease.client() {
            Some(client) => bounded("send_text", timeout, client.send_text(target, text)).await,
            None => Err(SessionError::NotConnected),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.store.increment_message_count(account.id).await {
                    error!(account_id = account.id, error = %e, "Message sent but counter update failed");
                }
                self.policy.record_send(account);
                info!(
                    account_id = account.id,
                    target,
                    daily = account.daily_messages,
                    "Message sent"
                );
                true
            }
            Err(e) => {
                self.handle_remote_failure(account, &e).await;
                self.cache.invalidate(lease).await;
                false
            }
        }
    }

    /// Select an account and send, moving on to the next eligible account
    /// when a send fails. Returns the account that delivered the message.
    pub async fn dispatch(
        &self,
        target: &str,
        text: &str,
    ) -> Result<Option<Account>, DatabaseError> {
        let mut tried = HashSet::new();
        for _ in 0..self.config.max_dispatch_attempts.max(1) {
            let candidates = self.store.get_active_accounts().await?;
            let Some(mut account) = candidates
                .into_iter()
                .find(|a| !tried.contains(&a.id) && self.is_usable(a))
            else {
                debug!(target, "No eligible account for dispatch");
                return Ok(None);
            };

            tried.insert(account.id);
            if self.send(&mut account, target, text).await {
                return Ok(Some(account));
            }
        }
        Ok(None)
    }

    /// Administrative status override.
    pub async fn update_status(&self, phone: &str, status: AccountStatus) -> bool {
        let updated = match self.store.update_status(phone, status).await {
            Ok(updated) => updated,
            Err(e) => {
                error!(phone, error = %e, "Failed to update account status");
                return false;
            }
        };

        if updated && let Ok(Some(account)) = self.store.get_by_phone(phone).await {
            self.errors.clear(account.id).await;
            if status != AccountStatus::Active {
                let lease = self.cache.acquire(account.id).await;
                self.cache.invalidate(lease).await;
            }
        }
        info!(phone, status = %status, updated, "Account status override");
        updated
    }

    /// Close every cached session and abandon pending enrollments.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
        let pending: Vec<PendingAuthorization> =
            self.pending.lock().await.drain().map(|(_, p)| p).collect();
        for mut p in pending {
            close(p.client.as_mut(), self.config.remote_timeout).await;
        }
    }

    /// Fold a remote failure into the lifecycle. Terminal signals block the
    /// account immediately; transient failures are only logged here.
    async fn handle_remote_failure(&self, account: &mut Account, error: &SessionError) {
        match classify(error) {
            FailureClass::Terminal(signal) => {
                error!(account_id = account.id, phone = %account.phone, signal = %signal, "Terminal signal during send");
                self.errors.clear(account.id).await;
                match self
                    .store
                    .demote_status(account.id, AccountStatus::Blocked)
                    .await
                {
                    Ok(true) => {
                        account.status = AccountStatus::Blocked;
                        if let Err(e) = self
                            .notifier
                            .account_blocked(account, &error.to_string())
                            .await
                        {
                            warn!(account_id = account.id, error = %e, "Failed to deliver block notification");
                        }
                    }
                    Ok(false) => {
                        account.status = AccountStatus::Blocked;
                    }
                    Err(e) => {
                        error!(account_id = account.id, error = %e, "Failed to mark account blocked");
                    }
                }
            }
            FailureClass::Transient => {
                warn!(account_id = account.id, phone = %account.phone, error = %error, "Send failed");
            }
        }
    }
}

/// Periodically drop enrollments whose code never arrived.
pub fn spawn_pending_prune_task(
    orchestrator: Arc<PoolOrchestrator>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let pruned = orchestrator.prune_pending_authorizations().await;
            if pruned > 0 {
                debug!(pruned, "Pruned expired authorizations");
            }
        }
    })
}
