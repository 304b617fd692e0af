//! OP State Store - Sessions and the Audit Ledger
//!
//! Implements the persistence interface the orchestrator talks to:
//! append-only audit events, session get/upsert and idempotent
//! find-or-create of resource-bound sessions.
//!
//! Features:
//! - In-memory store for tests and single-process use
//! - SQLite persistent storage
//! - Prometheus metrics

pub mod error;
pub mod memory_store;
pub mod metrics;
pub mod sqlite_store;
pub mod state_store;

use std::sync::Arc;

pub use error::{Result, StateStoreError};
pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;
pub use state_store::StateStore;

/// Open the store named by a URL: `memory://` or any `sqlite:` URL
pub async fn open(url: &str) -> Result<Arc<dyn StateStore>> {
    if url.starts_with("memory:") {
        metrics::register_metrics();
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(SqliteStore::new(url).await?))
}
