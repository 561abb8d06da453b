//! Async `Database` trait, the single persistence interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Role of a stored conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Delivery status of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Inbound message, recorded as-is.
    Received,
    /// Assistant reply awaiting delivery.
    Pending,
    /// Delivered by the relay.
    Sent,
    /// Relay reported delivery failure.
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Received => "received",
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }
}

/// Status of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// Terminal status supplied by the relay when acknowledging delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Sent,
    Failed,
}

impl AckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckStatus::Sent => "sent",
            AckStatus::Failed => "failed",
        }
    }
}

/// A conversation with one phone number.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Conversation summary with a last-message preview, for listing UIs.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub phone_number: String,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_message_role: Option<MessageRole>,
    pub updated_at: DateTime<Utc>,
}

/// A message within a conversation.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
}

/// An entry in the outgoing-delivery queue.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub phone_number: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Backend-agnostic persistence trait covering conversations, messages,
/// and the outbox queue.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Conversations ───────────────────────────────────────────────

    /// Find a conversation by phone number.
    async fn find_conversation_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<Conversation>, DatabaseError>;

    /// Get the existing conversation for a number or create one.
    ///
    /// Safe under concurrent calls for the same number: duplicate inserts
    /// resolve to the unique existing row via the phone_number constraint.
    async fn find_or_create_conversation(
        &self,
        phone_number: &str,
    ) -> Result<Conversation, DatabaseError>;

    /// Set a conversation's `updated_at` to now.
    async fn touch_conversation(&self, conversation_id: Uuid) -> Result<(), DatabaseError>;

    /// List conversations with last-message previews, most recent first.
    /// Returns `(summaries, total_count)`.
    async fn list_conversations(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ConversationSummary>, i64), DatabaseError>;

    /// Delete a conversation and all its messages. Returns whether it existed.
    async fn delete_conversation(&self, phone_number: &str) -> Result<bool, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Append a message; the store assigns the timestamp.
    async fn create_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        status: MessageStatus,
    ) -> Result<StoredMessage, DatabaseError>;

    /// The most recent `limit` messages, returned oldest-first.
    async fn get_history(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, DatabaseError>;

    /// Every message in a conversation, oldest-first.
    async fn get_all_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<StoredMessage>, DatabaseError>;

    /// Update a message's delivery status.
    async fn update_message_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
    ) -> Result<(), DatabaseError>;

    // ── Outbox ──────────────────────────────────────────────────────

    /// Append a `pending` entry to the outbox. Returns the entry id.
    async fn enqueue_outbox(
        &self,
        phone_number: &str,
        content: &str,
    ) -> Result<Uuid, DatabaseError>;

    /// Pending entries, oldest-created-first. Read-only: no lease is taken.
    async fn get_pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, DatabaseError>;

    /// Resolve a pending entry to `sent` or `failed`.
    ///
    /// Conditional on the entry still being `pending`; returns false when
    /// the entry is absent or already resolved. Re-acknowledging is a no-op.
    async fn acknowledge_outbox(
        &self,
        entry_id: Uuid,
        status: AckStatus,
    ) -> Result<bool, DatabaseError>;

    /// Count of pending entries, for health reporting.
    async fn pending_outbox_count(&self) -> Result<i64, DatabaseError>;

    /// Delete resolved entries older than `days`. Returns the count deleted.
    async fn cleanup_outbox(&self, days: u32) -> Result<u64, DatabaseError>;
}
