//! Persistence layer, SQLite-backed via libSQL.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

use std::sync::Arc;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    AckStatus, Conversation, ConversationSummary, Database, MessageRole, MessageStatus,
    OutboxEntry, OutboxStatus, StoredMessage,
};

/// Spawn a background task that periodically purges resolved outbox
/// entries older than the retention window.
pub fn spawn_outbox_cleanup(
    db: Arc<dyn Database>,
    retention_days: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            if let Err(e) = db.cleanup_outbox(retention_days).await {
                tracing::warn!(error = %e, "Outbox cleanup failed");
            }
        }
    })
}
