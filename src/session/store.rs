//! Session handles for the transport layer.
//!
//! Each record sits behind its own async mutex, so operations on one session
//! are serialized while different sessions proceed independently. Idle
//! sessions expire after the configured TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::record::SessionRecord;

/// Shared handle to one session's record.
pub type SessionHandle = Arc<Mutex<SessionRecord>>;

/// In-memory map of live sessions.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<Uuid, SessionHandle>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Mint a new, idle session.
    pub fn create(&self) -> Uuid {
        let record = SessionRecord::new();
        let id = record.id();
        self.sessions.insert(id, Arc::new(Mutex::new(record)));
        tracing::debug!(session_id = %id, live = self.sessions.len(), "session created");
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Lock a session for one operation, waiting for any in-flight operation
    /// on the same session to finish. `None` if the session is unknown or was
    /// removed while waiting.
    pub async fn lock(&self, id: &Uuid) -> Option<OwnedMutexGuard<SessionRecord>> {
        // clone the handle out so the map shard is not held across the await
        let handle = self.get(id)?;
        let mut guard = Arc::clone(&handle).lock_owned().await;
        let still_live = self
            .sessions
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), &handle));
        if !still_live {
            tracing::debug!(session_id = %id, "session removed while waiting for its lock");
            return None;
        }
        guard.touch();
        Some(guard)
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            tracing::debug!(session_id = %id, "session discarded");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle for longer than the TTL. Sessions currently locked
    /// are in use and kept. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now() - ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| match handle.try_lock() {
            Ok(record) => record.touched_at() >= cutoff,
            Err(_) => true,
        });
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            tracing::info!(purged, live = self.sessions.len(), "expired sessions purged");
        }
        purged
    }

    /// Purge expired sessions every `period` until the returned task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                store.purge_expired();
            }
        })
    }
}
