use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;

use flowbot_core::error::{FlowbotError, Result};
use flowbot_core::traits::{FlowRepository, SessionStore};
use flowbot_core::{FlowGraph, ResumePoint, Session, SessionUpdate};

type Key = (String, String);

fn key(a: &str, b: &str) -> Key {
    (a.to_string(), b.to_string())
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> FlowbotError {
    FlowbotError::Database(e.to_string())
}

/// Flow repository backed by a HashMap.
#[derive(Default)]
pub struct MemoryFlowRepository {
    flows: Mutex<HashMap<Key, FlowGraph>>,
}

impl MemoryFlowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(self, flow_id: &str, owner: &str, graph: FlowGraph) -> Self {
        if let Ok(mut flows) = self.flows.lock() {
            flows.insert(key(flow_id, owner), graph);
        }
        self
    }
}

impl FlowRepository for MemoryFlowRepository {
    fn load_flow(&self, flow_id: &str, owner: &str) -> BoxFuture<'_, Result<Option<FlowGraph>>> {
        let k = key(flow_id, owner);
        Box::pin(async move {
            let flows = self.flows.lock().map_err(lock_err)?;
            Ok(flows.get(&k).cloned())
        })
    }

    fn save_flow(&self, flow_id: &str, owner: &str, graph: &FlowGraph) -> BoxFuture<'_, Result<()>> {
        let k = key(flow_id, owner);
        let graph = graph.clone();
        Box::pin(async move {
            self.flows.lock().map_err(lock_err)?.insert(k, graph);
            Ok(())
        })
    }
}

/// Session store backed by a HashMap, with the same version semantics as SQLite.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Key, Session>>,
    writes: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful compare-and-swap writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Synchronous peek for assertions.
    pub fn snapshot(&self, flow_id: &str, session_key: &str) -> Option<Session> {
        self.sessions
            .lock()
            .ok()
            .and_then(|s| s.get(&key(flow_id, session_key)).cloned())
    }

    /// Write a session row directly, bypassing version checks.
    pub fn insert(&self, session: Session) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(key(&session.flow_id, &session.session_key), session);
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load_or_create(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<Session>> {
        let (flow_id, session_key) = (flow_id.to_string(), session_key.to_string());
        Box::pin(async move {
            let mut sessions = self.sessions.lock().map_err(lock_err)?;
            let session = sessions
                .entry(key(&flow_id, &session_key))
                .or_insert_with(|| Session::new(&flow_id, &session_key));
            Ok(session.clone())
        })
    }

    fn get(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<Option<Session>>> {
        let k = key(flow_id, session_key);
        Box::pin(async move {
            let sessions = self.sessions.lock().map_err(lock_err)?;
            Ok(sessions.get(&k).cloned())
        })
    }

    fn compare_and_swap(
        &self,
        current: &Session,
        update: &SessionUpdate,
    ) -> BoxFuture<'_, Result<bool>> {
        let k = key(&current.flow_id, &current.session_key);
        let expected = current.version;
        let update = update.clone();
        Box::pin(async move {
            let mut sessions = self.sessions.lock().map_err(lock_err)?;
            match sessions.get_mut(&k) {
                Some(stored) if stored.version == expected => {
                    stored.apply(&update);
                    self.writes.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn reset(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<bool>> {
        let k = key(flow_id, session_key);
        Box::pin(async move {
            let mut sessions = self.sessions.lock().map_err(lock_err)?;
            match sessions.get_mut(&k) {
                Some(stored) => {
                    stored.resume = ResumePoint::Fresh;
                    stored.last_message = None;
                    stored.version += 1;
                    stored.updated_at = chrono::Utc::now();
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }
}

/// A session store where another writer sneaks in before each of the first
/// `losses` writes, so those compare-and-swaps fail.
pub struct ContendedSessionStore {
    inner: MemorySessionStore,
    losses: AtomicUsize,
    lost: AtomicUsize,
    racer_resume: Option<ResumePoint>,
}

impl ContendedSessionStore {
    pub fn new(losses: usize) -> Self {
        Self {
            inner: MemorySessionStore::new(),
            losses: AtomicUsize::new(losses),
            lost: AtomicUsize::new(0),
            racer_resume: None,
        }
    }

    /// Make the competing writer move the session to `resume` instead of
    /// leaving the resume point where it was.
    pub fn racer_moves_to(mut self, resume: ResumePoint) -> Self {
        self.racer_resume = Some(resume);
        self
    }

    /// A store that never lets a write through.
    pub fn always() -> Self {
        Self::new(usize::MAX)
    }

    /// Number of compare-and-swaps that were made to fail.
    pub fn lost_races(&self) -> usize {
        self.lost.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemorySessionStore {
        &self.inner
    }
}

impl SessionStore for ContendedSessionStore {
    fn load_or_create(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<Session>> {
        self.inner.load_or_create(flow_id, session_key)
    }

    fn get(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<Option<Session>>> {
        self.inner.get(flow_id, session_key)
    }

    fn compare_and_swap(
        &self,
        current: &Session,
        update: &SessionUpdate,
    ) -> BoxFuture<'_, Result<bool>> {
        let current = current.clone();
        let update = update.clone();
        Box::pin(async move {
            let remaining = self.losses.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != usize::MAX {
                    self.losses.fetch_sub(1, Ordering::SeqCst);
                }
                self.lost.fetch_add(1, Ordering::SeqCst);
                // The competing writer lands first and bumps the version.
                let racer = SessionUpdate {
                    resume: self
                        .racer_resume
                        .clone()
                        .unwrap_or_else(|| current.resume.clone()),
                    last_message: "(concurrent write)".into(),
                };
                self.inner.compare_and_swap(&current, &racer).await?;
                return Ok(false);
            }
            self.inner.compare_and_swap(&current, &update).await
        })
    }

    fn reset(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<bool>> {
        self.inner.reset(flow_id, session_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(node: &str) -> SessionUpdate {
        SessionUpdate {
            resume: ResumePoint::AwaitingNode(node.into()),
            last_message: "hi".into(),
        }
    }

    #[test]
    fn test_memory_cas_rejects_stale_version() {
        futures::executor::block_on(async {
            let store = MemorySessionStore::new();
            let s = store.load_or_create("f", "k").await.unwrap();
            assert!(store.compare_and_swap(&s, &update("b")).await.unwrap());
            assert!(!store.compare_and_swap(&s, &update("c")).await.unwrap());
            let stored = store.get("f", "k").await.unwrap().unwrap();
            assert_eq!(stored.resume.awaiting(), Some("b"));
            assert_eq!(stored.version, 1);
        });
    }

    #[test]
    fn test_contended_store_loses_then_wins() {
        futures::executor::block_on(async {
            let store = ContendedSessionStore::new(1);
            let s = store.load_or_create("f", "k").await.unwrap();
            assert!(!store.compare_and_swap(&s, &update("b")).await.unwrap());
            let s = store.load_or_create("f", "k").await.unwrap();
            assert!(store.compare_and_swap(&s, &update("b")).await.unwrap());
            assert_eq!(store.lost_races(), 1);
        });
    }
}
