//! Conversation store boundary.
//!
//! The connection client only ever appends finalized messages through
//! [`ConversationStore::append`]; it never reads conversation history.
//! [`InMemoryConversations`] is the store used by the CLI and tests.

use crate::message::{Message, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Opaque conversation identifier.
pub type ConversationId = String;

/// Title given to a conversation before its first user message.
pub const DEFAULT_TITLE: &str = "New conversation";

const TITLE_MAX_CHARS: usize = 40;

/// Receives every finalized message (user or assistant).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, conversation_id: &str, message: Message);
}

/// A conversation: id, title and ordered messages.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    fn new(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// In-memory store for conversations (create, get, append).
pub struct InMemoryConversations {
    inner: Arc<RwLock<HashMap<ConversationId, Conversation>>>,
}

impl Default for InMemoryConversations {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConversations {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a new conversation with a generated id; returns the id.
    pub async fn create(&self) -> ConversationId {
        let id = format!("conv-{}", uuid::Uuid::new_v4());
        self.inner
            .write()
            .await
            .insert(id.clone(), Conversation::new(id.clone()));
        id
    }

    /// Return a clone of the conversation if it exists.
    pub async fn get(&self, id: &str) -> Option<Conversation> {
        self.inner.read().await.get(id).cloned()
    }

    /// Conversation ids, most recently updated first.
    pub async fn ids(&self) -> Vec<ConversationId> {
        let g = self.inner.read().await;
        let mut convs: Vec<&Conversation> = g.values().collect();
        convs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        convs.into_iter().map(|c| c.id.clone()).collect()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversations {
    /// Appends to the conversation, creating it when unknown. The first user
    /// message also becomes the title.
    async fn append(&self, conversation_id: &str, message: Message) {
        let mut g = self.inner.write().await;
        let conv = g
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::new(conversation_id.to_string()));
        if conv.title == DEFAULT_TITLE && message.role == Role::User {
            let title: String = message.content.trim().chars().take(TITLE_MAX_CHARS).collect();
            if !title.is_empty() {
                conv.title = title;
            }
        }
        conv.messages.push(message);
        conv.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_creates_conversation_and_titles_it() {
        let store = InMemoryConversations::new();
        store.append("c1", Message::user("What is streaming?")).await;
        store
            .append("c1", Message::assistant("Data in pieces.", Utc::now()))
            .await;
        let conv = store.get("c1").await.unwrap();
        assert_eq!(conv.title, "What is streaming?");
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn assistant_message_does_not_set_title() {
        let store = InMemoryConversations::new();
        let id = store.create().await;
        store.append(&id, Message::assistant("hello", Utc::now())).await;
        assert_eq!(store.get(&id).await.unwrap().title, DEFAULT_TITLE);
    }
}
