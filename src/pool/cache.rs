//! Live session cache: one slot per account id, bounded, LRU-evicted.
//!
//! Each slot is guarded by its own async mutex. Holding a [`SessionLease`]
//! is what serializes work against one account: two sends for the same id
//! never overlap, sends for different ids never wait on each other.
//!
//! Evicted or invalidated slots are flagged so a waiter that grabbed the old
//! slot retries against the map instead of reviving an orphan.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

use crate::session::{AccountClient, close};

/// Contents of one cache slot.
#[derive(Default)]
pub struct SessionSlot {
    client: Option<Box<dyn AccountClient>>,
    evicted: bool,
}

impl SessionSlot {
    pub fn client(&mut self) -> Option<&mut Box<dyn AccountClient>> {
        self.client.as_mut()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Store a connected client in the slot.
    pub fn install(&mut self, client: Box<dyn AccountClient>) {
        self.client = Some(client);
    }
}

struct Entry {
    slot: Arc<Mutex<SessionSlot>>,
    last_access: Instant,
}

/// Exclusive access to one account's slot.
pub struct SessionLease {
    account_id: i64,
    slot: Arc<Mutex<SessionSlot>>,
    guard: OwnedMutexGuard<SessionSlot>,
}

impl SessionLease {
    pub fn account_id(&self) -> i64 {
        self.account_id
    }
}

impl Deref for SessionLease {
    type Target = SessionSlot;

    fn deref(&self) -> &SessionSlot {
        &self.guard
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut SessionSlot {
        &mut self.guard
    }
}

/// Bounded map of live sessions keyed by account id.
pub struct SessionCache {
    capacity: usize,
    close_timeout: Duration,
    entries: Mutex<HashMap<i64, Entry>>,
}

impl SessionCache {
    /// `close_timeout` bounds every disconnect the cache performs.
    pub fn new(capacity: usize, close_timeout: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            close_timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of slots currently cached.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Whether a connected client is cached for `account_id`. Waits for any
    /// in-flight operation on that account.
    pub async fn is_connected(&self, account_id: i64) -> bool {
        let slot = {
            let entries = self.entries.lock().await;
            match entries.get(&account_id) {
                Some(entry) => Arc::clone(&entry.slot),
                None => return false,
            }
        };
        let guard = slot.lock().await;
        !guard.evicted && guard.is_connected()
    }

    /// Lock the slot for `account_id`, creating it if absent. May evict the
    /// least recently used idle slot to stay within capacity.
    pub async fn acquire(&self, account_id: i64) -> SessionLease {
        loop {
            let (slot, evicted) = {
                let mut entries = self.entries.lock().await;
                match entries.get_mut(&account_id) {
                    Some(entry) => {
                        entry.last_access = Instant::now();
                        (Arc::clone(&entry.slot), Vec::new())
                    }
                    None => {
                        let evicted = self.evict_for_insert(&mut entries);
                        let slot = Arc::new(Mutex::new(SessionSlot::default()));
                        entries.insert(
                            account_id,
                            Entry {
                                slot: Arc::clone(&slot),
                                last_access: Instant::now(),
                            },
                        );
                        (slot, evicted)
                    }
                }
            };

            for (id, mut client) in evicted {
                debug!(account_id = id, "Evicting idle session from cache");
                close(client.as_mut(), self.close_timeout).await;
            }

            let guard = Arc::clone(&slot).lock_owned().await;
            if guard.evicted {
                continue;
            }
            return SessionLease {
                account_id,
                slot,
                guard,
            };
        }
    }

    /// Drop the slot held by `lease` and disconnect its client.
    pub async fn invalidate(&self, mut lease: SessionLease) {
        lease.guard.evicted = true;
        let client = lease.guard.client.take();
        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get(&lease.account_id)
                && Arc::ptr_eq(&entry.slot, &lease.slot)
            {
                entries.remove(&lease.account_id);
            }
        }
        let account_id = lease.account_id;
        drop(lease);

        if let Some(mut client) = client {
            debug!(account_id, "Dropping cached session");
            close(client.as_mut(), self.close_timeout).await;
        }
    }

    /// Disconnect every cached session, waiting for in-flight work.
    pub async fn shutdown(&self) {
        let drained: Vec<(i64, Entry)> = self.entries.lock().await.drain().collect();
        for (account_id, entry) in drained {
            let mut guard = entry.slot.lock_owned().await;
            guard.evicted = true;
            if let Some(mut client) = guard.client.take() {
                debug!(account_id, "Closing cached session on shutdown");
                close(client.as_mut(), self.close_timeout).await;
            }
        }
    }

    /// Make room for one more entry. Only idle (unlocked) slots are evicted;
    /// if every slot is busy the cache temporarily exceeds capacity.
    fn evict_for_insert(
        &self,
        entries: &mut HashMap<i64, Entry>,
    ) -> Vec<(i64, Box<dyn AccountClient>)> {
        let mut evicted = Vec::new();
        if entries.len() < self.capacity {
            return evicted;
        }

        let mut by_age: Vec<(i64, Instant)> =
            entries.iter().map(|(id, e)| (*id, e.last_access)).collect();
        by_age.sort_by_key(|(_, at)| *at);

        let mut excess = entries.len() + 1 - self.capacity;
        for (id, _) in by_age {
            if excess == 0 {
                break;
            }
            let Some(entry) = entries.get(&id) else {
                continue;
            };
            let Ok(mut guard) = Arc::clone(&entry.slot).try_lock_owned() else {
                continue;
            };
            guard.evicted = true;
            if let Some(client) = guard.client.take() {
                evicted.push((id, client));
            }
            drop(guard);
            entries.remove(&id);
            excess -= 1;
        }

        if excess > 0 {
            debug!(
                len = entries.len(),
                capacity = self.capacity,
                "Session cache over capacity; all slots busy"
            );
        }
        evicted
    }
}
