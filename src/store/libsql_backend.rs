//! libSQL backend, the async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are
//! written as RFC 3339 TEXT, which also sorts correctly as a string.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    AckStatus, Conversation, ConversationSummary, Database, MessageRole, MessageStatus,
    OutboxEntry, OutboxStatus, StoredMessage,
};

const CONVERSATION_COLUMNS: &str = "id, phone_number, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, timestamp, status";
const OUTBOX_COLUMNS: &str = "id, phone_number, content, created_at, status, sent_at";

/// libSQL database backend.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_db(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        Self::from_db(db).await
    }

    async fn from_db(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        // Required for ON DELETE CASCADE on messages.conversation_id.
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, entity: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Query(format!("bad {entity} id '{s}': {e}")))
}

/// Convert `Option<String>` to a libsql Value (NULL when absent).
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn str_to_role(s: &str) -> MessageRole {
    match s {
        "assistant" => MessageRole::Assistant,
        _ => MessageRole::User,
    }
}

fn str_to_msg_status(s: &str) -> MessageStatus {
    match s {
        "pending" => MessageStatus::Pending,
        "sent" => MessageStatus::Sent,
        "failed" => MessageStatus::Failed,
        _ => MessageStatus::Received,
    }
}

fn str_to_outbox_status(s: &str) -> OutboxStatus {
    match s {
        "sent" => OutboxStatus::Sent,
        "failed" => OutboxStatus::Failed,
        _ => OutboxStatus::Pending,
    }
}

/// Map a libsql row to a Conversation. Column order matches CONVERSATION_COLUMNS.
fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("conversation row: {e}")))?;
    let phone_number: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("conversation row: {e}")))?;
    let created_at: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("conversation row: {e}")))?;
    let updated_at: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("conversation row: {e}")))?;

    Ok(Conversation {
        id: parse_uuid(&id, "conversation")?,
        phone_number,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

/// Map a libsql row to a StoredMessage. Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<StoredMessage, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("message row: {e}")))?;
    let conversation_id: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("message row: {e}")))?;
    let role: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("message row: {e}")))?;
    let content: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("message row: {e}")))?;
    let timestamp: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("message row: {e}")))?;
    let status: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("message row: {e}")))?;

    Ok(StoredMessage {
        id: parse_uuid(&id, "message")?,
        conversation_id: parse_uuid(&conversation_id, "conversation")?,
        role: str_to_role(&role),
        content,
        timestamp: parse_datetime(&timestamp),
        status: str_to_msg_status(&status),
    })
}

/// Map a libsql row to an OutboxEntry. Column order matches OUTBOX_COLUMNS.
fn row_to_outbox_entry(row: &libsql::Row) -> Result<OutboxEntry, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("outbox row: {e}")))?;
    let phone_number: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("outbox row: {e}")))?;
    let content: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("outbox row: {e}")))?;
    let created_at: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("outbox row: {e}")))?;
    let status: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("outbox row: {e}")))?;
    let sent_at: Option<String> = row.get(5).ok();

    Ok(OutboxEntry {
        id: parse_uuid(&id, "outbox")?,
        phone_number,
        content,
        created_at: parse_datetime(&created_at),
        status: str_to_outbox_status(&status),
        sent_at: sent_at.as_deref().map(parse_datetime),
    })
}

#[async_trait]
impl Database for LibSqlBackend {
    // ── Conversations ───────────────────────────────────────────────

    async fn find_conversation_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE phone_number = ?1"
                ),
                params![phone_number],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_conversation_by_phone: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("find_conversation_by_phone: {e}")))?
        {
            Some(row) => Ok(Some(row_to_conversation(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_or_create_conversation(
        &self,
        phone_number: &str,
    ) -> Result<Conversation, DatabaseError> {
        let conn = self.conn();
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();

        // Insert-or-ignore keyed on the phone_number UNIQUE constraint,
        // then re-select: concurrent callers for the same number all land
        // on the one surviving row.
        conn.execute(
            "INSERT INTO conversations (id, phone_number, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT (phone_number) DO NOTHING",
            params![id.to_string(), phone_number, now],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("find_or_create_conversation: {e}")))?;

        self.find_conversation_by_phone(phone_number)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "conversation".to_string(),
                id: phone_number.to_string(),
            })
    }

    async fn touch_conversation(&self, conversation_id: Uuid) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), conversation_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("touch_conversation: {e}")))?;
        Ok(())
    }

    async fn list_conversations(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ConversationSummary>, i64), DatabaseError> {
        let conn = self.conn();

        let mut rows = conn
            .query("SELECT COUNT(*) FROM conversations", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_conversations: {e}")))?;
        let total: i64 = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_conversations: {e}")))?
        {
            Some(row) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("list_conversations: {e}")))?,
            None => 0,
        };

        let mut rows = conn
            .query(
                "SELECT c.id, c.phone_number, c.updated_at,
                        m.content, m.timestamp, m.role
                 FROM conversations c
                 LEFT JOIN messages m ON m.id = (
                     SELECT id FROM messages
                     WHERE conversation_id = c.id
                     ORDER BY timestamp DESC, rowid DESC LIMIT 1
                 )
                 ORDER BY c.updated_at DESC
                 LIMIT ?1 OFFSET ?2",
                params![limit as i64, offset as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_conversations: {e}")))?;

        let mut summaries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("conversation summary row: {e}")))?;
            let phone_number: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("conversation summary row: {e}")))?;
            let updated_at: String = row
                .get(2)
                .map_err(|e| DatabaseError::Query(format!("conversation summary row: {e}")))?;
            let last_message: Option<String> = row.get(3).ok();
            let last_message_time: Option<String> = row.get(4).ok();
            let last_message_role: Option<String> = row.get(5).ok();

            summaries.push(ConversationSummary {
                id: parse_uuid(&id, "conversation")?,
                phone_number,
                last_message,
                last_message_time: last_message_time.as_deref().map(parse_datetime),
                last_message_role: last_message_role.as_deref().map(str_to_role),
                updated_at: parse_datetime(&updated_at),
            });
        }

        Ok((summaries, total))
    }

    async fn delete_conversation(&self, phone_number: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let affected = conn
            .execute(
                "DELETE FROM conversations WHERE phone_number = ?1",
                params![phone_number],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_conversation: {e}")))?;

        if affected > 0 {
            info!(phone = phone_number, "Conversation deleted");
        }
        Ok(affected > 0)
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn create_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        status: MessageStatus,
    ) -> Result<StoredMessage, DatabaseError> {
        let conn = self.conn();
        let id = Uuid::new_v4();
        let timestamp = Utc::now();

        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                conversation_id.to_string(),
                role.as_str(),
                content,
                timestamp.to_rfc3339(),
                status.as_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_message: {e}")))?;

        debug!(id = %id, conversation = %conversation_id, role = role.as_str(), "Message stored");

        Ok(StoredMessage {
            id,
            conversation_id,
            role,
            content: content.to_string(),
            timestamp,
            status,
        })
    }

    async fn get_history(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, DatabaseError> {
        let conn = self.conn();
        // Latest N first, then flipped: the window must hold the most
        // recent messages, not the first N ever stored.
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY timestamp DESC, rowid DESC
                     LIMIT ?2"
                ),
                params![conversation_id.to_string(), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_history: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            messages.push(row_to_message(&row)?);
        }
        messages.reverse();
        Ok(messages)
    }

    async fn get_all_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<StoredMessage>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY timestamp ASC, rowid ASC"
                ),
                params![conversation_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_all_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            messages.push(row_to_message(&row)?);
        }
        Ok(messages)
    }

    async fn update_message_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            params![status.as_str(), message_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("update_message_status: {e}")))?;
        Ok(())
    }

    // ── Outbox ──────────────────────────────────────────────────────

    async fn enqueue_outbox(
        &self,
        phone_number: &str,
        content: &str,
    ) -> Result<Uuid, DatabaseError> {
        let conn = self.conn();
        let id = Uuid::new_v4();

        conn.execute(
            "INSERT INTO outbox (id, phone_number, content, created_at, status)
             VALUES (?1, ?2, ?3, ?4, 'pending')",
            params![
                id.to_string(),
                phone_number,
                content,
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("enqueue_outbox: {e}")))?;

        debug!(id = %id, to = phone_number, "Outbox entry enqueued");
        Ok(id)
    }

    async fn get_pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {OUTBOX_COLUMNS} FROM outbox
                     WHERE status = 'pending'
                     ORDER BY created_at ASC, rowid ASC
                     LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_pending_outbox: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            entries.push(row_to_outbox_entry(&row)?);
        }
        Ok(entries)
    }

    async fn acknowledge_outbox(
        &self,
        entry_id: Uuid,
        status: AckStatus,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let sent_at = match status {
            AckStatus::Sent => Some(Utc::now().to_rfc3339()),
            AckStatus::Failed => None,
        };

        // Conditional on 'pending': exactly one acknowledgment wins,
        // later ones (and unknown ids) report false.
        let affected = conn
            .execute(
                "UPDATE outbox SET status = ?1, sent_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![status.as_str(), opt_text_owned(sent_at), entry_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("acknowledge_outbox: {e}")))?;

        Ok(affected > 0)
    }

    async fn pending_outbox_count(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query("SELECT COUNT(*) FROM outbox WHERE status = 'pending'", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("pending_outbox_count: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("pending_outbox_count: {e}")))?
        {
            Some(row) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("pending_outbox_count: {e}"))),
            None => Ok(0),
        }
    }

    async fn cleanup_outbox(&self, days: u32) -> Result<u64, DatabaseError> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let conn = self.conn();
        let count = conn
            .execute(
                "DELETE FROM outbox
                 WHERE status IN ('sent', 'failed') AND created_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("cleanup_outbox: {e}")))?;

        if count > 0 {
            info!(count, days, "Purged resolved outbox entries");
        }
        Ok(count)
    }
}
