//! Message processor, the core inbound pipeline.
//!
//! One inbound SMS runs the fixed sequence: authorize, record the user
//! message, fetch context, generate a reply, record the assistant
//! message, enqueue it for delivery, touch the conversation. The
//! processor never propagates an error: collaborator failures are
//! caught at the top and reported as `ProcessOutcome::Failed`.

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::auth::AuthGate;
use crate::error::{DatabaseError, Error};
use crate::llm::{AiResponder, ChatMessage};
use crate::store::{AckStatus, Database, MessageRole, MessageStatus, OutboxEntry};

/// Outcome of processing one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Reply generated and queued for delivery.
    Processed,
    /// Sender not on the allowlist; nothing was stored.
    Unauthorized,
    /// A collaborator failed partway through the pipeline. Partial state
    /// is possible: an assistant message may exist without its outbox
    /// entry (the insert and the enqueue are separate statements).
    Failed(String),
}

impl ProcessOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, ProcessOutcome::Processed)
    }
}

/// Orchestrates the gate, the store, and the responder.
///
/// Simple interface, complex insides: callers see `process_incoming`,
/// `get_outgoing_messages`, and `acknowledge_sent`; authorization,
/// bookkeeping, generation, and queuing stay behind it.
pub struct MessageProcessor {
    auth: AuthGate,
    db: Arc<dyn Database>,
    responder: Arc<dyn AiResponder>,
    system_prompt: String,
    max_context: usize,
}

impl MessageProcessor {
    pub fn new(
        auth: AuthGate,
        db: Arc<dyn Database>,
        responder: Arc<dyn AiResponder>,
        system_prompt: String,
        max_context: usize,
    ) -> Self {
        Self {
            auth,
            db,
            responder,
            system_prompt,
            max_context,
        }
    }

    /// Process one inbound SMS end to end. Never returns an error.
    pub async fn process_incoming(&self, phone_number: &str, content: &str) -> ProcessOutcome {
        if !self.auth.is_authorized(phone_number) {
            return ProcessOutcome::Unauthorized;
        }

        match self.run_pipeline(phone_number, content).await {
            Ok(()) => {
                info!(from = phone_number, "Message processed");
                ProcessOutcome::Processed
            }
            Err(e) => {
                error!(from = phone_number, error = %e, "Failed to process message");
                ProcessOutcome::Failed(e.to_string())
            }
        }
    }

    /// The authorized path. Steps run strictly in order; any error
    /// unwinds to `process_incoming` for containment.
    async fn run_pipeline(&self, phone_number: &str, content: &str) -> Result<(), Error> {
        let conversation = self.db.find_or_create_conversation(phone_number).await?;
        info!(
            from = phone_number,
            conversation = %conversation.id,
            "Processing inbound message"
        );

        self.db
            .create_message(
                conversation.id,
                MessageRole::User,
                content,
                MessageStatus::Received,
            )
            .await?;

        let history = self.db.get_history(conversation.id, self.max_context).await?;
        let context: Vec<ChatMessage> = history
            .iter()
            .map(|m| match m.role {
                MessageRole::User => ChatMessage::user(m.content.clone()),
                MessageRole::Assistant => ChatMessage::assistant(m.content.clone()),
            })
            .collect();

        info!(
            conversation = %conversation.id,
            responder = self.responder.name(),
            context_len = context.len(),
            "Generating reply"
        );
        let reply = self
            .responder
            .generate_response(&context, &self.system_prompt)
            .await;

        self.db
            .create_message(
                conversation.id,
                MessageRole::Assistant,
                &reply,
                MessageStatus::Pending,
            )
            .await?;

        self.db.enqueue_outbox(phone_number, &reply).await?;

        self.db.touch_conversation(conversation.id).await?;

        Ok(())
    }

    /// Pending replies for the relay to deliver. Pass-through to the outbox.
    pub async fn get_outgoing_messages(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, DatabaseError> {
        self.db.get_pending_outbox(limit).await
    }

    /// Record the relay's delivery outcome. Idempotent pass-through.
    pub async fn acknowledge_sent(
        &self,
        entry_id: Uuid,
        status: AckStatus,
    ) -> Result<bool, DatabaseError> {
        let applied = self.db.acknowledge_outbox(entry_id, status).await?;
        if applied {
            info!(entry = %entry_id, status = status.as_str(), "Outbox entry acknowledged");
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::llm::FALLBACK_MESSAGE;
    use crate::store::{
        Conversation, ConversationSummary, LibSqlBackend, OutboxStatus, StoredMessage,
    };

    struct StubResponder {
        reply: &'static str,
    }

    #[async_trait]
    impl AiResponder for StubResponder {
        async fn generate_response(&self, _history: &[ChatMessage], _system: &str) -> String {
            self.reply.to_string()
        }

        fn name(&self) -> &str {
            "stub:test"
        }
    }

    async fn processor_with(
        allowed: &[String],
        reply: &'static str,
    ) -> (MessageProcessor, Arc<dyn Database>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let processor = MessageProcessor::new(
            AuthGate::new(allowed),
            Arc::clone(&db),
            Arc::new(StubResponder { reply }),
            "be helpful".to_string(),
            20,
        );
        (processor, db)
    }

    #[tokio::test]
    async fn processed_path_stores_and_queues() {
        let (processor, db) = processor_with(&[], "hello").await;

        let outcome = processor.process_incoming("+15551234567", "hi").await;
        assert_eq!(outcome, ProcessOutcome::Processed);

        let conv = db
            .find_conversation_by_phone("+15551234567")
            .await
            .unwrap()
            .expect("conversation created");

        let messages = db.get_all_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[0].status, MessageStatus::Received);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "hello");
        assert_eq!(messages[1].status, MessageStatus::Pending);

        let pending = processor.get_outgoing_messages(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].phone_number, "+15551234567");
        assert_eq!(pending[0].content, "hello");
        assert_eq!(pending[0].status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn second_message_sees_history() {
        let (processor, db) = processor_with(&[], "reply").await;

        processor.process_incoming("+15551234567", "first").await;
        processor.process_incoming("+15551234567", "second").await;

        let conv = db
            .find_conversation_by_phone("+15551234567")
            .await
            .unwrap()
            .unwrap();
        let messages = db.get_all_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 4);

        // Still one conversation, two queued replies.
        let (_, total) = db.list_conversations(10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(db.pending_outbox_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unauthorized_stores_nothing() {
        let (processor, db) = processor_with(&["+15559999999".to_string()], "hello").await;

        let outcome = processor.process_incoming("+15551111111", "hi").await;
        assert_eq!(outcome, ProcessOutcome::Unauthorized);

        assert!(db
            .find_conversation_by_phone("+15551111111")
            .await
            .unwrap()
            .is_none());
        assert_eq!(db.pending_outbox_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fallback_reply_still_queued() {
        let (processor, db) = processor_with(&[], FALLBACK_MESSAGE).await;

        let outcome = processor.process_incoming("+15551234567", "hi").await;
        assert_eq!(outcome, ProcessOutcome::Processed);

        let pending = db.get_pending_outbox(10).await.unwrap();
        assert_eq!(pending[0].content, FALLBACK_MESSAGE);
    }

    #[tokio::test]
    async fn acknowledge_passthrough_is_idempotent() {
        let (processor, _db) = processor_with(&[], "hello").await;
        processor.process_incoming("+15551234567", "hi").await;

        let entry = processor.get_outgoing_messages(10).await.unwrap()[0].clone();
        assert!(processor
            .acknowledge_sent(entry.id, AckStatus::Sent)
            .await
            .unwrap());
        assert!(!processor
            .acknowledge_sent(entry.id, AckStatus::Sent)
            .await
            .unwrap());
        assert!(processor.get_outgoing_messages(10).await.unwrap().is_empty());
    }

    // ── Partial-failure containment ─────────────────────────────────

    /// Delegates everything to the inner backend but fails enqueues,
    /// simulating a storage fault between message insert and enqueue.
    struct EnqueueFails {
        inner: Arc<dyn Database>,
    }

    #[async_trait]
    impl Database for EnqueueFails {
        async fn find_conversation_by_phone(
            &self,
            phone_number: &str,
        ) -> Result<Option<Conversation>, DatabaseError> {
            self.inner.find_conversation_by_phone(phone_number).await
        }

        async fn find_or_create_conversation(
            &self,
            phone_number: &str,
        ) -> Result<Conversation, DatabaseError> {
            self.inner.find_or_create_conversation(phone_number).await
        }

        async fn touch_conversation(&self, conversation_id: Uuid) -> Result<(), DatabaseError> {
            self.inner.touch_conversation(conversation_id).await
        }

        async fn list_conversations(
            &self,
            limit: usize,
            offset: usize,
        ) -> Result<(Vec<ConversationSummary>, i64), DatabaseError> {
            self.inner.list_conversations(limit, offset).await
        }

        async fn delete_conversation(&self, phone_number: &str) -> Result<bool, DatabaseError> {
            self.inner.delete_conversation(phone_number).await
        }

        async fn create_message(
            &self,
            conversation_id: Uuid,
            role: MessageRole,
            content: &str,
            status: MessageStatus,
        ) -> Result<StoredMessage, DatabaseError> {
            self.inner
                .create_message(conversation_id, role, content, status)
                .await
        }

        async fn get_history(
            &self,
            conversation_id: Uuid,
            limit: usize,
        ) -> Result<Vec<StoredMessage>, DatabaseError> {
            self.inner.get_history(conversation_id, limit).await
        }

        async fn get_all_messages(
            &self,
            conversation_id: Uuid,
        ) -> Result<Vec<StoredMessage>, DatabaseError> {
            self.inner.get_all_messages(conversation_id).await
        }

        async fn update_message_status(
            &self,
            message_id: Uuid,
            status: MessageStatus,
        ) -> Result<(), DatabaseError> {
            self.inner.update_message_status(message_id, status).await
        }

        async fn enqueue_outbox(
            &self,
            _phone_number: &str,
            _content: &str,
        ) -> Result<Uuid, DatabaseError> {
            Err(DatabaseError::Query("enqueue_outbox: disk full".to_string()))
        }

        async fn get_pending_outbox(
            &self,
            limit: usize,
        ) -> Result<Vec<OutboxEntry>, DatabaseError> {
            self.inner.get_pending_outbox(limit).await
        }

        async fn acknowledge_outbox(
            &self,
            entry_id: Uuid,
            status: AckStatus,
        ) -> Result<bool, DatabaseError> {
            self.inner.acknowledge_outbox(entry_id, status).await
        }

        async fn pending_outbox_count(&self) -> Result<i64, DatabaseError> {
            self.inner.pending_outbox_count().await
        }

        async fn cleanup_outbox(&self, days: u32) -> Result<u64, DatabaseError> {
            self.inner.cleanup_outbox(days).await
        }
    }

    #[tokio::test]
    async fn enqueue_failure_leaves_orphan_assistant_message() {
        let inner: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let db: Arc<dyn Database> = Arc::new(EnqueueFails {
            inner: Arc::clone(&inner),
        });
        let processor = MessageProcessor::new(
            AuthGate::new(&[]),
            db,
            Arc::new(StubResponder { reply: "hello" }),
            "be helpful".to_string(),
            20,
        );

        let outcome = processor.process_incoming("+15551234567", "hi").await;
        assert!(matches!(outcome, ProcessOutcome::Failed(_)));

        // Accepted at-least-once limitation: both messages persisted,
        // nothing queued, conversation not touched after the failure.
        let conv = inner
            .find_conversation_by_phone("+15551234567")
            .await
            .unwrap()
            .unwrap();
        let messages = inner.get_all_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].status, MessageStatus::Pending);
        assert_eq!(inner.pending_outbox_count().await.unwrap(), 0);
    }
}
