//! SQLite-based persistent state store
//!
//! Provides durable storage for sessions and the append-only audit ledger.
//! Uses SQLx for async database operations.
//!
//! The ledger sequence is the `AUTOINCREMENT` row id. A unique correlation id
//! column rejects duplicate appends, and a partial unique index allows at most
//! one live resource-bound session per resource, which makes find-or-create a
//! plain `INSERT OR IGNORE` followed by a read.

use crate::error::{Result, StateStoreError};
use crate::metrics;
use crate::state_store::StateStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use op_core::{AuditEvent, ErrorKind, Outcome, Session, SessionKind, SessionStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const SESSION_COLUMNS: &str =
    "id, owner_id, kind, status, resource_id, metadata, created_at, updated_at";

const EVENT_COLUMNS: &str = "sequence, id, correlation_id, parent_correlation_id, actor_id, \
     session_id, resource_id, operation_name, request_snapshot, response_snapshot, \
     response_complete, outcome, error_kind, duration_ms, timestamp";

/// SQLite-backed state store for sessions and audit events
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given database URL
    ///
    /// URL format: `sqlite:///path/to/db.sqlite` or `sqlite::memory:`
    pub async fn new(url: &str) -> Result<Self> {
        info!("Initializing SQLite state store: {}", url);

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        // Every connection to `:memory:` is its own database
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.initialize_schema().await?;
        metrics::register_metrics();

        info!("SQLite state store initialized successfully");
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Initialize database schema
    async fn initialize_schema(&self) -> Result<()> {
        debug!("Initializing database schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                resource_id TEXT,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                correlation_id TEXT NOT NULL UNIQUE,
                parent_correlation_id TEXT,
                actor_id TEXT NOT NULL,
                session_id TEXT,
                resource_id TEXT,
                operation_name TEXT NOT NULL,
                request_snapshot TEXT NOT NULL,
                response_snapshot TEXT NOT NULL,
                response_complete INTEGER NOT NULL DEFAULT 0,
                outcome TEXT NOT NULL,
                error_kind TEXT,
                duration_ms INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_live_resource
            ON sessions(resource_id)
            WHERE kind = 'resource_bound' AND status IN ('active', 'executing')
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_session ON audit_events(session_id, sequence)")
            .execute(&self.pool)
            .await?;

        debug!("Database schema initialized");
        Ok(())
    }

    async fn live_resource_session(&self, resource_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sessions WHERE kind = 'resource_bound' AND resource_id = ? \
             AND status IN ('active', 'executing')",
            SESSION_COLUMNS
        ))
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    /// Count all audit events
    pub async fn event_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn append(&self, mut event: AuditEvent) -> Result<AuditEvent> {
        let _timer = metrics::OperationTimer::new("append", "sqlite");

        let result = sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, correlation_id, parent_correlation_id, actor_id, session_id, resource_id,
                operation_name, request_snapshot, response_snapshot, response_complete, outcome,
                error_kind, duration_ms, timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(correlation_id) DO NOTHING
            "#,
        )
        .bind(&event.id)
        .bind(&event.correlation_id)
        .bind(&event.parent_correlation_id)
        .bind(&event.actor_id)
        .bind(&event.session_id)
        .bind(&event.resource_id)
        .bind(&event.operation_name)
        .bind(serde_json::to_string(&event.request_snapshot)?)
        .bind(serde_json::to_string(&event.response_snapshot)?)
        .bind(event.response_complete)
        .bind(event.outcome.as_str())
        .bind(event.error_kind.map(|k| k.as_str()))
        .bind(event.duration_ms as i64)
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .inspect_err(|_| metrics::record_store_error("append", "sqlite"))?;

        if result.rows_affected() == 0 {
            warn!(correlation_id = %event.correlation_id, "Correlation id already audited");
            return Err(StateStoreError::DuplicateCorrelation(event.correlation_id));
        }

        event.sequence = result.last_insert_rowid() as u64;
        metrics::record_audit_event(event.outcome.as_str());
        debug!(sequence = event.sequence, correlation_id = %event.correlation_id, "Appended audit event");
        Ok(event)
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(&format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS))
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn upsert(&self, session: &Session) -> Result<()> {
        let _timer = metrics::OperationTimer::new("upsert", "sqlite");

        sqlx::query(
            r#"
            INSERT INTO sessions (id, owner_id, kind, status, resource_id, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                resource_id = excluded.resource_id,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.id)
        .bind(&session.owner_id)
        .bind(session.kind.as_str())
        .bind(session.status.as_str())
        .bind(&session.resource_id)
        .bind(serde_json::to_string(&session.metadata)?)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .inspect_err(|_| metrics::record_store_error("upsert", "sqlite"))?;

        debug!("Upserted session {} ({})", session.id, session.status);
        Ok(())
    }

    async fn find_or_create(&self, candidate: Session) -> Result<Session> {
        let _timer = metrics::OperationTimer::new("find_or_create", "sqlite");

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO sessions (id, owner_id, kind, status, resource_id, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&candidate.id)
        .bind(&candidate.owner_id)
        .bind(candidate.kind.as_str())
        .bind(candidate.status.as_str())
        .bind(&candidate.resource_id)
        .bind(serde_json::to_string(&candidate.metadata)?)
        .bind(candidate.created_at.to_rfc3339())
        .bind(candidate.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            metrics::record_session_created(candidate.kind.as_str());
            debug!(session_id = %candidate.id, kind = candidate.kind.as_str(), "Created session");
            return Ok(candidate);
        }

        let existing = match (&candidate.kind, &candidate.resource_id) {
            (SessionKind::ResourceBound, Some(resource_id)) => {
                self.live_resource_session(resource_id).await?
            }
            _ => self.get(&candidate.id).await?,
        };
        existing.ok_or(StateStoreError::NotFound(candidate.id))
    }

    async fn events_for_session(&self, session_id: &str) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM audit_events WHERE session_id = ? ORDER BY sequence ASC",
            EVENT_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    async fn event_by_correlation(&self, correlation_id: &str) -> Result<Option<AuditEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM audit_events WHERE correlation_id = ?",
            EVENT_COLUMNS
        ))
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_event).transpose()
    }

    async fn sessions_for_actor(&self, actor_id: &str) -> Result<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sessions WHERE owner_id = ? ORDER BY created_at ASC, id ASC",
            SESSION_COLUMNS
        ))
        .bind(actor_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM audit_events ORDER BY sequence DESC LIMIT ?",
            EVENT_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StateStoreError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

fn parse_error_kind(raw: &str) -> Result<ErrorKind> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| StateStoreError::Corrupt(format!("error kind '{}'", raw)))
}

/// Helper function to convert database row to Session
fn row_to_session(row: &SqliteRow) -> Result<Session> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let metadata: String = row.get("metadata");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Session {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        kind: SessionKind::parse(&kind)
            .ok_or_else(|| StateStoreError::Corrupt(format!("session kind '{}'", kind)))?,
        status: SessionStatus::parse(&status)
            .ok_or_else(|| StateStoreError::Corrupt(format!("session status '{}'", status)))?,
        resource_id: row.get("resource_id"),
        metadata: serde_json::from_str(&metadata)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

/// Helper function to convert database row to AuditEvent
fn row_to_event(row: &SqliteRow) -> Result<AuditEvent> {
    let request: String = row.get("request_snapshot");
    let response: String = row.get("response_snapshot");
    let outcome: String = row.get("outcome");
    let error_kind: Option<String> = row.get("error_kind");
    let timestamp: String = row.get("timestamp");

    Ok(AuditEvent {
        id: row.get("id"),
        sequence: row.get::<i64, _>("sequence") as u64,
        correlation_id: row.get("correlation_id"),
        parent_correlation_id: row.get("parent_correlation_id"),
        actor_id: row.get("actor_id"),
        session_id: row.get("session_id"),
        resource_id: row.get("resource_id"),
        operation_name: row.get("operation_name"),
        request_snapshot: serde_json::from_str(&request)?,
        response_snapshot: serde_json::from_str(&response)?,
        response_complete: row.get("response_complete"),
        outcome: Outcome::parse(&outcome)
            .ok_or_else(|| StateStoreError::Corrupt(format!("outcome '{}'", outcome)))?,
        error_kind: error_kind.as_deref().map(parse_error_kind).transpose()?,
        duration_ms: row.get::<i64, _>("duration_ms") as u64,
        timestamp: parse_time(&timestamp)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::ExecutionContext;
    use serde_json::json;
    use std::sync::Arc;

    fn event(session: &str, correlation: &str, outcome: Outcome) -> AuditEvent {
        let mut ctx = ExecutionContext::new("alice", "widget.create").with_session(session);
        ctx.correlation_id = correlation.to_string();
        let error_kind = (outcome == Outcome::Failed).then_some(ErrorKind::Timeout);
        AuditEvent::from_context(&ctx, json!({"title": "x"}), json!(null), outcome, error_kind, 3)
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut session = Session::new("alice", SessionKind::Conversational);
        session.metadata.insert("channel".into(), "cli".into());
        store.upsert(&session).await.unwrap();

        session.transition(SessionStatus::Closed).unwrap();
        store.upsert(&session).await.unwrap();

        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Closed);
        assert_eq!(loaded.metadata.get("channel").map(String::as_str), Some("cli"));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append(event("s1", "c1", Outcome::Completed)).await.unwrap();
        store
            .append(event("s2", "c2", Outcome::Completed).with_complete_response(true))
            .await
            .unwrap();
        let failed = store.append(event("s1", "c3", Outcome::Failed)).await.unwrap();

        let trail = store.events_for_session("s1").await.unwrap();
        assert_eq!(trail.len(), 2);
        assert!(trail[0].sequence < trail[1].sequence);
        assert_eq!(trail[1].error_kind, Some(ErrorKind::Timeout));

        let found = store.event_by_correlation("c3").await.unwrap().unwrap();
        assert_eq!(found.id, failed.id);
        assert_eq!(found.request_snapshot, json!({"title": "x"}));
        assert!(!found.response_complete);
        let complete = store.event_by_correlation("c2").await.unwrap().unwrap();
        assert!(complete.response_complete);

        let err = store.append(event("s1", "c1", Outcome::Completed)).await.unwrap_err();
        assert!(matches!(err, StateStoreError::DuplicateCorrelation(_)));
        assert_eq!(store.event_count().await.unwrap(), 3);
        assert_eq!(store.recent_events(1).await.unwrap()[0].correlation_id, "c3");
    }

    #[tokio::test]
    async fn test_concurrent_resource_find_or_create() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .find_or_create(Session::for_resource(format!("actor-{}", i), "widget-1"))
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
