use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use flowbot_core::error::{FlowbotError, Result};
use flowbot_core::traits::{FlowRepository, SessionStore};
use flowbot_core::{FlowGraph, ResumePoint, Session, SessionUpdate};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS flows (
        flow_id TEXT NOT NULL,
        owner TEXT NOT NULL,
        graph TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (flow_id, owner)
    );

    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        flow_id TEXT NOT NULL,
        session_key TEXT NOT NULL,
        last_node_id TEXT,
        last_message TEXT,
        version INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        UNIQUE (flow_id, session_key)
    );";

fn db_err(e: impl std::fmt::Display) -> FlowbotError {
    FlowbotError::Database(e.to_string())
}

/// SQLite-backed flow repository and session store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FlowbotError::Database(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for tests and `flowbot chat`).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn read_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let last_node_id: Option<String> = row.get(3)?;
    let version: i64 = row.get(5)?;
    let ts_str: String = row.get(6)?;
    Ok(Session {
        id: row.get(0)?,
        flow_id: row.get(1)?,
        session_key: row.get(2)?,
        resume: ResumePoint::from(last_node_id),
        last_message: row.get(4)?,
        version: version.max(0) as u64,
        updated_at: DateTime::parse_from_rfc3339(&ts_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

const SELECT_SESSION: &str = "SELECT id, flow_id, session_key, last_node_id, last_message, version, updated_at
     FROM sessions WHERE flow_id = ?1 AND session_key = ?2";

impl FlowRepository for SqliteStore {
    fn load_flow(&self, flow_id: &str, owner: &str) -> BoxFuture<'_, Result<Option<FlowGraph>>> {
        let (flow_id, owner) = (flow_id.to_string(), owner.to_string());

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let graph: Option<String> = conn
                .query_row(
                    "SELECT graph FROM flows WHERE flow_id = ?1 AND owner = ?2",
                    params![flow_id, owner],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;

            graph.map(|json| FlowGraph::from_json(&json)).transpose()
        })
    }

    fn save_flow(&self, flow_id: &str, owner: &str, graph: &FlowGraph) -> BoxFuture<'_, Result<()>> {
        let (flow_id, owner) = (flow_id.to_string(), owner.to_string());
        let json = serde_json::to_string(graph);

        Box::pin(async move {
            let json = json?;
            let conn = self.conn.lock().map_err(db_err)?;
            conn.execute(
                "INSERT INTO flows (flow_id, owner, graph, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (flow_id, owner) DO UPDATE SET graph = excluded.graph, updated_at = excluded.updated_at",
                params![flow_id, owner, json, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            debug!(flow_id = %flow_id, owner = %owner, "Flow saved");
            Ok(())
        })
    }
}

impl SessionStore for SqliteStore {
    fn load_or_create(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<Session>> {
        let fresh = Session::new(flow_id, session_key);

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            // Lazily create; a concurrent creator wins via the UNIQUE constraint.
            conn.execute(
                "INSERT OR IGNORE INTO sessions (id, flow_id, session_key, version, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![fresh.id, fresh.flow_id, fresh.session_key, fresh.updated_at.to_rfc3339()],
            )
            .map_err(db_err)?;

            conn.query_row(SELECT_SESSION, params![fresh.flow_id, fresh.session_key], read_session)
                .map_err(db_err)
        })
    }

    fn get(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<Option<Session>>> {
        let (flow_id, session_key) = (flow_id.to_string(), session_key.to_string());

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            conn.query_row(SELECT_SESSION, params![flow_id, session_key], read_session)
                .optional()
                .map_err(db_err)
        })
    }

    fn compare_and_swap(
        &self,
        current: &Session,
        update: &SessionUpdate,
    ) -> BoxFuture<'_, Result<bool>> {
        let flow_id = current.flow_id.clone();
        let session_key = current.session_key.clone();
        let expected = current.version as i64;
        let last_node_id: Option<String> = update.resume.clone().into();
        let last_message = update.last_message.clone();

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let changed = conn
                .execute(
                    "UPDATE sessions
                     SET last_node_id = ?1, last_message = ?2, version = version + 1, updated_at = ?3
                     WHERE flow_id = ?4 AND session_key = ?5 AND version = ?6",
                    params![
                        last_node_id,
                        last_message,
                        Utc::now().to_rfc3339(),
                        flow_id,
                        session_key,
                        expected
                    ],
                )
                .map_err(db_err)?;

            if changed == 0 {
                debug!(flow_id = %flow_id, session_key = %session_key, expected, "Stale session version");
            }
            Ok(changed == 1)
        })
    }

    fn reset(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<bool>> {
        let (flow_id, session_key) = (flow_id.to_string(), session_key.to_string());

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let changed = conn
                .execute(
                    "UPDATE sessions
                     SET last_node_id = NULL, last_message = NULL, version = version + 1, updated_at = ?1
                     WHERE flow_id = ?2 AND session_key = ?3",
                    params![Utc::now().to_rfc3339(), flow_id, session_key],
                )
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowbot_test_utils::fixtures;

    fn pause_at(node: &str) -> SessionUpdate {
        SessionUpdate {
            resume: ResumePoint::AwaitingNode(node.into()),
            last_message: "hi".into(),
        }
    }

    #[tokio::test]
    async fn test_flow_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let graph = fixtures::welcome_buttons_graph();

        store.save_flow("bot", "acme", &graph).await.unwrap();
        let loaded = store.load_flow("bot", "acme").await.unwrap().unwrap();
        assert_eq!(loaded.nodes, graph.nodes);
        assert_eq!(loaded.edges, graph.edges);

        assert!(store.load_flow("bot", "someone-else").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_flow_replaces() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_flow("bot", "acme", &fixtures::refund_graph()).await.unwrap();
        store.save_flow("bot", "acme", &fixtures::pin_graph("42")).await.unwrap();
        let loaded = store.load_flow("bot", "acme").await.unwrap().unwrap();
        assert!(loaded.node("granted").is_some());
    }

    #[tokio::test]
    async fn test_load_or_create_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let a = store.load_or_create("bot", "k").await.unwrap();
        let b = store.load_or_create("bot", "k").await.unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.resume.is_fresh());
        assert_eq!(a.version, 0);
        assert!(a.last_message.is_none());
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let store = SqliteStore::in_memory().unwrap();
        let session = store.load_or_create("bot", "k").await.unwrap();

        assert!(store.compare_and_swap(&session, &pause_at("pick")).await.unwrap());
        // Same snapshot again: version moved on.
        assert!(!store.compare_and_swap(&session, &pause_at("other")).await.unwrap());

        let stored = store.get("bot", "k").await.unwrap().unwrap();
        assert_eq!(stored.resume, ResumePoint::AwaitingNode("pick".into()));
        assert_eq!(stored.last_message.as_deref(), Some("hi"));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_fresh_write_stores_null() {
        let store = SqliteStore::in_memory().unwrap();
        let session = store.load_or_create("bot", "k").await.unwrap();
        let update = SessionUpdate {
            resume: ResumePoint::Fresh,
            last_message: "bye".into(),
        };
        assert!(store.compare_and_swap(&session, &update).await.unwrap());

        let conn = store.conn.lock().unwrap();
        let last: Option<String> = conn
            .query_row("SELECT last_node_id FROM sessions WHERE session_key = 'k'", [], |r| r.get(0))
            .unwrap();
        assert!(last.is_none());
    }

    #[tokio::test]
    async fn test_reset() {
        let store = SqliteStore::in_memory().unwrap();
        let session = store.load_or_create("bot", "k").await.unwrap();
        store.compare_and_swap(&session, &pause_at("pick")).await.unwrap();

        assert!(store.reset("bot", "k").await.unwrap());
        assert!(!store.reset("bot", "missing").await.unwrap());
        let stored = store.get("bot", "k").await.unwrap().unwrap();
        assert!(stored.resume.is_fresh());
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("flowbot.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_flow("bot", "acme", &fixtures::refund_graph()).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.load_flow("bot", "acme").await.unwrap().is_some());
    }
}
