//! Shared fakes for integration tests: a scripted session factory and a
//! notifier that records what it was told.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use outreach_pool::accounts::Account;
use outreach_pool::config::{MonitorConfig, PoolConfig};
use outreach_pool::error::{NotifyError, SessionError};
use outreach_pool::monitor::{ErrorCounter, HealthMonitor, MonitorDeps, SweepReport};
use outreach_pool::notify::Notifier;
use outreach_pool::pool::{PoolDeps, PoolOrchestrator};
use outreach_pool::session::{AccountClient, Identity, SessionFactory};
use outreach_pool::store::{AccountStore, LibSqlAccountStore};

/// The only code the fake platform accepts.
pub const VALID_CODE: &str = "24680";

pub fn rpc(code: &str) -> SessionError {
    SessionError::Rpc {
        code: code.to_string(),
        message: format!("{code} (test)"),
    }
}

pub fn transport() -> SessionError {
    SessionError::Transport("connection reset by peer".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub phone: String,
    pub target: String,
    pub text: String,
}

#[derive(Default)]
struct Script {
    connect_errors: VecDeque<SessionError>,
    probe_errors: VecDeque<SessionError>,
    send_errors: VecDeque<SessionError>,
    hang: Option<Duration>,
    disconnect_hang: Option<Duration>,
}

#[derive(Default)]
struct Inner {
    scripts: Mutex<HashMap<String, Script>>,
    opened: AtomicUsize,
    connected: AtomicUsize,
    closed: AtomicUsize,
    probes: AtomicUsize,
    code_requests: AtomicUsize,
    sent: Mutex<Vec<Sent>>,
}

impl Inner {
    fn script<R>(&self, phone: &str, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut scripts = self.scripts.lock().unwrap();
        f(scripts.entry(phone.to_string()).or_default())
    }
}

/// Session factory whose clients follow a per-phone script. Anything not
/// scripted succeeds.
#[derive(Clone, Default)]
pub struct FakeGateway {
    inner: Arc<Inner>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(&self, phone: &str, error: SessionError) {
        self.inner
            .script(phone, |s| s.connect_errors.push_back(error));
    }

    pub fn fail_probes(&self, phone: &str, error: SessionError, times: usize) {
        self.inner.script(phone, |s| {
            for _ in 0..times {
                s.probe_errors.push_back(error.clone());
            }
        });
    }

    pub fn fail_send(&self, phone: &str, error: SessionError) {
        self.inner.script(phone, |s| s.send_errors.push_back(error));
    }

    /// Make probes and sends for `phone` stall for `delay`.
    pub fn hang(&self, phone: &str, delay: Duration) {
        self.inner.script(phone, |s| s.hang = Some(delay));
    }

    /// Make disconnects for `phone` stall for `delay` before closing.
    pub fn hang_disconnect(&self, phone: &str, delay: Duration) {
        self.inner.script(phone, |s| s.disconnect_hang = Some(delay));
    }

    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.inner.probes.load(Ordering::SeqCst)
    }

    pub fn code_requests(&self) -> usize {
        self.inner.code_requests.load(Ordering::SeqCst)
    }

    /// Connected clients that were never disconnected.
    pub fn live_sessions(&self) -> usize {
        self.inner.connected.load(Ordering::SeqCst) - self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.inner.sent.lock().unwrap().clone()
    }
}

impl SessionFactory for FakeGateway {
    fn open(&self, account: &Account) -> Box<dyn AccountClient> {
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeClient {
            phone: account.phone.clone(),
            inner: Arc::clone(&self.inner),
            connected: false,
        })
    }
}

struct FakeClient {
    phone: String,
    inner: Arc<Inner>,
    connected: bool,
}

impl FakeClient {
    async fn stall(&self) {
        let hang = self.inner.script(&self.phone, |s| s.hang);
        if let Some(delay) = hang {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AccountClient for FakeClient {
    async fn connect(&mut self) -> Result<(), SessionError> {
        if let Some(e) = self
            .inner
            .script(&self.phone, |s| s.connect_errors.pop_front())
        {
            return Err(e);
        }
        if !self.connected {
            self.connected = true;
            self.inner.connected.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        let hang = self.inner.script(&self.phone, |s| s.disconnect_hang);
        if let Some(delay) = hang {
            tokio::time::sleep(delay).await;
        }
        if self.connected {
            self.connected = false;
            self.inner.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn request_authorization_code(&mut self, _phone: &str) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        self.inner.code_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn complete_authorization(&mut self, code: &str) -> Result<SecretString, SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        if code == VALID_CODE {
            Ok(SecretString::from(format!("session:{}", self.phone)))
        } else {
            Err(rpc("PHONE_CODE_INVALID"))
        }
    }

    async fn probe_identity(&mut self) -> Result<Identity, SessionError> {
        self.stall().await;
        self.inner.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self
            .inner
            .script(&self.phone, |s| s.probe_errors.pop_front())
        {
            return Err(e);
        }
        Ok(Identity {
            user_id: 1000,
            username: Some(self.phone.trim_start_matches('+').to_string()),
        })
    }

    async fn send_text(&mut self, target: &str, text: &str) -> Result<(), SessionError> {
        self.stall().await;
        if let Some(e) = self
            .inner
            .script(&self.phone, |s| s.send_errors.pop_front())
        {
            return Err(e);
        }
        self.inner.sent.lock().unwrap().push(Sent {
            phone: self.phone.clone(),
            target: target.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Report(SweepReport),
    Blocked { phone: String, reason: String },
    Disabled { phone: String, reason: String },
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<SweepReport> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Report(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn blocked(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Blocked { phone, .. } => Some(phone),
                _ => None,
            })
            .collect()
    }

    pub fn disabled(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Disabled { phone, .. } => Some(phone),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn status_report(&self, report: &SweepReport) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(Event::Report(*report));
        Ok(())
    }

    async fn account_blocked(&self, account: &Account, reason: &str) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(Event::Blocked {
            phone: account.phone.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn account_disabled(&self, account: &Account, reason: &str) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(Event::Disabled {
            phone: account.phone.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

/// Everything a test needs, wired against an in-memory store.
pub struct Harness {
    pub store: Arc<dyn AccountStore>,
    pub gateway: FakeGateway,
    pub notifier: Arc<RecordingNotifier>,
    pub errors: Arc<ErrorCounter>,
}

impl Harness {
    pub async fn new() -> Self {
        let store = LibSqlAccountStore::new_memory()
            .await
            .expect("in-memory store");
        Self {
            store: Arc::new(store),
            gateway: FakeGateway::new(),
            notifier: Arc::new(RecordingNotifier::default()),
            errors: Arc::new(ErrorCounter::new()),
        }
    }

    pub fn pool(&self, config: PoolConfig) -> PoolOrchestrator {
        PoolOrchestrator::new(
            config,
            PoolDeps {
                store: Arc::clone(&self.store),
                sessions: Arc::new(self.gateway.clone()),
                notifier: self.notifier.clone(),
                errors: Arc::clone(&self.errors),
            },
        )
    }

    pub fn monitor(&self, config: MonitorConfig) -> HealthMonitor {
        HealthMonitor::new(
            config,
            MonitorDeps {
                store: Arc::clone(&self.store),
                sessions: Arc::new(self.gateway.clone()),
                notifier: self.notifier.clone(),
                errors: Arc::clone(&self.errors),
            },
        )
    }

    /// Create an account that already holds a session credential.
    pub async fn authorized(&self, phone: &str) -> Account {
        let account = self.store.create_account(phone).await.expect("create");
        let credential = SecretString::from(format!("session:{phone}"));
        assert!(self
            .store
            .update_session(account.id, &credential)
            .await
            .expect("update session"));
        self.reload(account.id).await
    }

    pub async fn reload(&self, id: i64) -> Account {
        self.store
            .get_by_id(id)
            .await
            .expect("get_by_id")
            .expect("account exists")
    }
}

/// Pool config with no spacing so tests can send back to back.
pub fn unspaced(daily_cap: u32) -> PoolConfig {
    PoolConfig {
        daily_message_cap: daily_cap,
        min_send_interval: Duration::ZERO,
        ..PoolConfig::default()
    }
}

pub fn monitor_config(threshold: u32) -> MonitorConfig {
    MonitorConfig {
        failure_threshold: threshold,
        probe_timeout: Duration::from_millis(200),
        ..MonitorConfig::default()
    }
}
