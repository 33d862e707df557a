//! Project chat: message history, sending, and a live feed.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::merge::{self, RowChange};
use super::models::ChatMessage;
use crate::errors::BoardError;
use crate::store::{Backend, ChannelSpec, Query, Store, Table, decode_rows, select_as};

pub const DEFAULT_HISTORY: usize = 50;
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn Store>,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn from_backend(backend: &Backend) -> Self {
        Self::new(backend.store.clone())
    }

    /// Latest `limit` messages of a project, newest first.
    pub async fn recent_messages(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BoardError> {
        Ok(select_as(
            self.store.as_ref(),
            Table::ChatMessages,
            &Query::new()
                .eq("project_id", project_id)
                .order_desc("created_at")
                .limit(limit),
        )
        .await?)
    }

    /// Post a message. Content is trimmed; blank messages are rejected.
    pub async fn send_message(
        &self,
        project_id: Uuid,
        user_id: Option<Uuid>,
        content: &str,
    ) -> Result<ChatMessage, BoardError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(BoardError::InvalidInput("message must not be blank".into()));
        }
        let row = json!({
            "project_id": project_id,
            "user_id": user_id,
            "content": content,
        });
        let inserted = self.store.insert(Table::ChatMessages, vec![row]).await?;
        decode_rows::<ChatMessage>(Table::ChatMessages, inserted)?
            .into_iter()
            .next()
            .ok_or_else(|| BoardError::InvalidInput("insert returned no row".into()))
    }
}

/// Newest-first message list kept current by realtime inserts.
pub struct ChatFeed {
    messages: Arc<RwLock<Vec<ChatMessage>>>,
    version: watch::Receiver<u64>,
    pump: JoinHandle<()>,
}

impl ChatFeed {
    pub async fn open(
        backend: &Backend,
        project_id: Uuid,
        history: usize,
        capacity: usize,
    ) -> Result<Self, BoardError> {
        let mut sub = backend
            .realtime
            .subscribe(ChannelSpec::filtered(
                Table::ChatMessages,
                "project_id",
                project_id,
            ))
            .await?;
        let mut initial = ChatService::from_backend(backend)
            .recent_messages(project_id, history)
            .await?;
        initial.truncate(capacity);

        let messages = Arc::new(RwLock::new(initial));
        let (tx, version) = watch::channel(0u64);
        let feed = messages.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                match RowChange::<ChatMessage>::decode(&event) {
                    Ok(change) => {
                        merge::apply_chat(&mut *feed.write().await, change, capacity);
                        tx.send_modify(|v| *v += 1);
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping undecodable chat message"),
                }
            }
        });
        Ok(Self {
            messages,
            version,
            pump,
        })
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().await.clone()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.clone()
    }
}

impl Drop for ChatFeed {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
