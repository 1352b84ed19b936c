//! In-Memory Session Store
//!
//! Information Hiding:
//! - HashMap storage behind async RwLock
//! - Per-thread mutexes created on demand and dropped with their last guard
//! - Expiry is enforced lazily on read and eagerly by the sweeper

use super::{Session, SessionPolicy};
use crate::embedding::Embedding;
use std::collections::HashMap;
use std::sync::{Arc, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;

type ThreadLocks = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

fn lock_map(locks: &ThreadLocks) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held while a thread's routing decision is computed and recorded.
///
/// Releasing the last guard for a thread removes its mutex from the store.
pub struct ThreadGuard {
    thread_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: ThreadLocks,
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = lock_map(&self.locks);
        let idle = locks
            .get(&self.thread_id)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        if idle {
            locks.remove(&self.thread_id);
        }
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    thread_locks: ThreadLocks,
    timeout: Duration,
    enabled: bool,
}

impl SessionStore {
    pub fn new(policy: &SessionPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            thread_locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
            timeout: policy.timeout,
            enabled: policy.sticky_enabled,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(&SessionPolicy {
            timeout,
            ..SessionPolicy::default()
        })
    }

    /// A store that never remembers anything; every turn is routed fresh.
    pub fn disabled() -> Self {
        Self::new(&SessionPolicy {
            sticky_enabled: false,
            ..SessionPolicy::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Serializes work on one thread. Distinct threads never contend.
    pub async fn lock_thread(&self, thread_id: &str) -> ThreadGuard {
        let lock = lock_map(&self.thread_locks)
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        ThreadGuard {
            thread_id: thread_id.to_string(),
            guard: Some(lock.lock_owned().await),
            locks: self.thread_locks.clone(),
        }
    }

    /// Threads that currently have a routing decision in flight or queued.
    pub fn active_threads(&self) -> usize {
        lock_map(&self.thread_locks).len()
    }

    pub async fn get(&self, thread_id: &str) -> Option<Session> {
        if !self.enabled {
            return None;
        }

        let mut sessions = self.sessions.write().await;
        match sessions.get(thread_id) {
            Some(session) if session.is_expired(self.timeout) => {
                tracing::debug!(
                    "[SessionStore] Session '{}' expired after {:?} idle",
                    thread_id,
                    session.idle_for()
                );
                sessions.remove(thread_id);
                None
            }
            Some(session) => Some(session.clone()),
            None => None,
        }
    }

    /// Creates or overwrites the binding for a thread.
    pub async fn bind(
        &self,
        thread_id: &str,
        agent_id: &str,
        embedding: Option<Embedding>,
    ) -> Option<Session> {
        if !self.enabled {
            return None;
        }

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get_mut(thread_id) {
            if existing.bound_agent_id == agent_id && !existing.is_expired(self.timeout) {
                existing.refresh(embedding);
                return Some(existing.clone());
            }
            tracing::info!(
                "[SessionStore] Rebinding thread '{}' from '{}' to '{}'",
                thread_id,
                existing.bound_agent_id,
                agent_id
            );
        } else {
            tracing::debug!("[SessionStore] Binding thread '{}' to '{}'", thread_id, agent_id);
        }

        let session = Session::new(thread_id, agent_id, embedding);
        sessions.insert(thread_id.to_string(), session.clone());
        Some(session)
    }

    /// Refreshes activity time. Returns false when there is no live session.
    pub async fn touch(&self, thread_id: &str, embedding: Option<Embedding>) -> bool {
        if !self.enabled {
            return false;
        }

        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(thread_id) {
            Some(session) if session.is_expired(self.timeout) => {
                sessions.remove(thread_id);
                false
            }
            Some(session) => {
                session.refresh(embedding);
                true
            }
            None => false,
        }
    }

    pub async fn expire_if_stale(&self, thread_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let stale = sessions
            .get(thread_id)
            .map(|s| s.is_expired(self.timeout))
            .unwrap_or(false);
        if stale {
            sessions.remove(thread_id);
        }
        stale
    }

    pub async fn remove(&self, thread_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(thread_id).is_some()
    }

    /// Stored sessions, including ones that have expired but not been swept.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Removes expired sessions whose thread is not currently being routed.
    pub async fn sweep_expired(&self) -> usize {
        let stale: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, s)| s.is_expired(self.timeout))
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut removed = 0;
        for thread_id in stale {
            let lock = lock_map(&self.thread_locks).get(&thread_id).cloned();
            let _guard = match lock {
                Some(lock) => match lock.try_lock_owned() {
                    Ok(guard) => Some(guard),
                    Err(_) => continue,
                },
                None => None,
            };

            if self.expire_if_stale(&thread_id).await {
                removed += 1;
            }
        }

        lock_map(&self.thread_locks).retain(|_, lock| Arc::strong_count(lock) > 1);

        removed
    }

    /// Periodically sweeps expired sessions until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.sweep_expired().await;
                if removed > 0 {
                    tracing::info!("[SessionStore] Swept {} expired sessions", removed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_and_get() {
        let store = SessionStore::with_timeout(Duration::from_secs(60));
        assert!(store.get("t1").await.is_none());

        store.bind("t1", "agent-a", Some(vec![1.0, 0.0])).await;
        let session = store.get("t1").await.unwrap();
        assert_eq!(session.bound_agent_id, "agent-a");
        assert_eq!(session.last_message_embedding, Some(vec![1.0, 0.0]));
    }

    #[tokio::test]
    async fn test_rebind_replaces_agent() {
        let store = SessionStore::with_timeout(Duration::from_secs(60));
        store.bind("t1", "agent-a", None).await;
        store.bind("t1", "agent-b", None).await;

        assert_eq!(store.get("t1").await.unwrap().bound_agent_id, "agent-b");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_absent() {
        let store = SessionStore::with_timeout(Duration::from_millis(20));
        store.bind("t1", "agent-a", None).await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!store.touch("t1", None).await);
        assert!(store.get("t1").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_touch_extends_lifetime() {
        let store = SessionStore::with_timeout(Duration::from_millis(80));
        store.bind("t1", "agent-a", None).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.touch("t1", None).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.get("t1").await.is_some());
    }

    #[tokio::test]
    async fn test_disabled_store_never_binds() {
        let store = SessionStore::disabled();
        assert!(store.bind("t1", "agent-a", None).await.is_none());
        assert!(store.get("t1").await.is_none());
        assert!(!store.is_enabled());
    }

    #[tokio::test]
    async fn test_sweep_skips_threads_in_use() {
        let store = SessionStore::with_timeout(Duration::from_millis(10));
        store.bind("busy", "agent-a", None).await;
        store.bind("idle", "agent-a", None).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        let guard = store.lock_thread("busy").await;
        assert_eq!(store.sweep_expired().await, 1);
        assert_eq!(store.len().await, 1);

        drop(guard);
        assert_eq!(store.sweep_expired().await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_thread_lock_serializes_same_thread() {
        let store = Arc::new(SessionStore::with_timeout(Duration::from_secs(60)));
        let guard = store.lock_thread("t1").await;

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let _guard = store.lock_thread("t1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // other threads are unaffected
        let _other = store.lock_thread("t2").await;

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_thread_locks_released_without_sweeper() {
        let store = SessionStore::disabled();
        for i in 0..1000 {
            let _guard = store.lock_thread(&format!("thread-{}", i)).await;
        }
        assert_eq!(store.active_threads(), 0);
    }

    #[tokio::test]
    async fn test_thread_lock_kept_while_contended() {
        let store = Arc::new(SessionStore::with_timeout(Duration::from_secs(60)));
        let guard = store.lock_thread("t1").await;

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let _guard = store.lock_thread("t1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        // the waiting contender still shares the same mutex
        assert_eq!(store.active_threads(), 1);

        contender.await.unwrap();
        assert_eq!(store.active_threads(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_store_dropped() {
        let store = Arc::new(SessionStore::with_timeout(Duration::from_millis(5)));
        store.bind("t1", "agent-a", None).await;

        let handle = store.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.is_empty().await);

        drop(store);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
