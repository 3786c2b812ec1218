//! Conversation Store — Redis-backed thread/turn persistence with TTL.
//!
//! Keys per thread: `thread:<id>:meta` (hash of metadata/counters/timestamps)
//! and `thread:<id>:turns` (ordered list of serialized [`Turn`] records).
//! Every key on a thread shares a TTL equal to `CONVERSATION_TIMEOUT`;
//! `append_turn` refreshes it. Concurrent appends to the same thread
//! serialize on a short-TTL `SETNX`-based lease rather than a global lock.

mod redis_store;

pub use redis_store::RedisConversationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One exchange in a thread. Immutable after append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub tool_name: Option<String>,
    pub model_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Turn {
    pub fn user(content: impl Into<String>, input_tokens: u32) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_name: None,
            model_name: None,
            timestamp: Utc::now(),
            input_tokens,
            output_tokens: 0,
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        tool_name: impl Into<String>,
        model_name: impl Into<String>,
        output_tokens: u32,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_name: Some(tool_name.into()),
            model_name: Some(model_name.into()),
            timestamp: Utc::now(),
            input_tokens: 0,
            output_tokens,
        }
    }
}

/// Persisted conversation, materialized from the store on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub tool_name: String,
    pub turns: Vec<Turn>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub metadata: HashMap<String, String>,
}

impl Thread {
    fn new(id: String, tool_name: String, metadata: HashMap<String, String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_updated_at: now,
            tool_name,
            turns: Vec::new(),
            total_input_tokens: 0,
            total_output_tokens: 0,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadStats {
    pub turns: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tools_used: Vec<String>,
    pub models_used: Vec<String>,
}

/// Store-wide tunables, loaded once from [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_turns: usize,
    pub ttl_seconds: u64,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_thread(
        &self,
        tool_name: &str,
        initial_metadata: HashMap<String, String>,
    ) -> Result<String, StoreError>;

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>, StoreError>;

    async fn append_turn(&self, id: &str, turn: Turn) -> Result<(), StoreError>;

    async fn stats(&self, id: &str) -> Result<ThreadStats, StoreError>;
}

fn stats_from_thread(thread: &Thread) -> ThreadStats {
    let mut tools_used = Vec::new();
    let mut models_used = Vec::new();
    for turn in &thread.turns {
        if let Some(t) = &turn.tool_name {
            if !tools_used.contains(t) {
                tools_used.push(t.clone());
            }
        }
        if let Some(m) = &turn.model_name {
            if !models_used.contains(m) {
                models_used.push(m.clone());
            }
        }
    }
    ThreadStats {
        turns: thread.turns.len(),
        input_tokens: thread.total_input_tokens,
        output_tokens: thread.total_output_tokens,
        tools_used,
        models_used,
    }
}

/// Single-node in-memory stand-in for [`RedisConversationStore`], used in
/// tests and for operation without a live Redis instance. Implements the
/// same TTL-expiry and turn-cap semantics.
pub struct InMemoryConversationStore {
    limits: StoreLimits,
    threads: Mutex<HashMap<String, Thread>>,
}

impl InMemoryConversationStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            limits,
            threads: Mutex::new(HashMap::new()),
        }
    }

    fn is_expired(&self, thread: &Thread) -> bool {
        let age = Utc::now().signed_duration_since(thread.last_updated_at);
        age.num_seconds() > self.limits.ttl_seconds as i64
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_thread(
        &self,
        tool_name: &str,
        initial_metadata: HashMap<String, String>,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let thread = Thread::new(id.clone(), tool_name.to_string(), initial_metadata);
        self.threads.lock().unwrap().insert(id.clone(), thread);
        Ok(id)
    }

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>, StoreError> {
        let mut threads = self.threads.lock().unwrap();
        let Some(thread) = threads.get(id) else {
            return Ok(None);
        };
        if self.is_expired(thread) {
            threads.remove(id);
            return Ok(None);
        }
        Ok(Some(thread.clone()))
    }

    async fn append_turn(&self, id: &str, turn: Turn) -> Result<(), StoreError> {
        let mut threads = self.threads.lock().unwrap();
        let expired = threads.get(id).map(|t| self.is_expired(t)).unwrap_or(true);
        if expired {
            threads.remove(id);
            return Err(StoreError::ThreadNotFound(id.to_string()));
        }
        let thread = threads
            .get_mut(id)
            .ok_or_else(|| StoreError::ThreadNotFound(id.to_string()))?;
        if thread.turns.len() >= self.limits.max_turns {
            return Err(StoreError::ThreadFull(id.to_string(), self.limits.max_turns));
        }
        match turn.role {
            Role::User => thread.total_input_tokens += turn.input_tokens as u64,
            Role::Assistant => thread.total_output_tokens += turn.output_tokens as u64,
        }
        thread.turns.push(turn);
        thread.last_updated_at = Utc::now();
        Ok(())
    }

    async fn stats(&self, id: &str) -> Result<ThreadStats, StoreError> {
        let threads = self.threads.lock().unwrap();
        let thread = threads
            .get(id)
            .filter(|t| !self.is_expired(t))
            .ok_or_else(|| StoreError::ThreadNotFound(id.to_string()))?;
        Ok(stats_from_thread(thread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> StoreLimits {
        StoreLimits {
            max_turns: 4,
            ttl_seconds: 3 * 3600,
        }
    }

    #[tokio::test]
    async fn create_then_fetch_returns_the_thread() {
        let store = InMemoryConversationStore::new(limits());
        let id = store
            .create_thread("chat", HashMap::new())
            .await
            .unwrap();
        let thread = store.get_thread(&id).await.unwrap().unwrap();
        assert_eq!(thread.id, id);
        assert!(thread.turns.is_empty());
    }

    #[tokio::test]
    async fn token_counters_equal_sum_over_turns() {
        let store = InMemoryConversationStore::new(limits());
        let id = store.create_thread("chat", HashMap::new()).await.unwrap();
        store.append_turn(&id, Turn::user("hi", 3)).await.unwrap();
        store
            .append_turn(&id, Turn::assistant("hello", "chat", "gpt-5", 5))
            .await
            .unwrap();
        let thread = store.get_thread(&id).await.unwrap().unwrap();
        assert_eq!(thread.total_input_tokens, 3);
        assert_eq!(thread.total_output_tokens, 5);
    }

    #[tokio::test]
    async fn append_fails_with_thread_full_past_max_turns() {
        let store = InMemoryConversationStore::new(limits());
        let id = store.create_thread("chat", HashMap::new()).await.unwrap();
        for _ in 0..2 {
            store.append_turn(&id, Turn::user("hi", 1)).await.unwrap();
            store
                .append_turn(&id, Turn::assistant("ok", "chat", "gpt-5", 1))
                .await
                .unwrap();
        }
        let err = store
            .append_turn(&id, Turn::user("one more", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ThreadFull(_, 4)));
    }

    #[tokio::test]
    async fn append_fails_with_thread_not_found_after_expiry() {
        let mut l = limits();
        l.ttl_seconds = 0;
        let store = InMemoryConversationStore::new(l);
        let id = store.create_thread("chat", HashMap::new()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let err = store
            .append_turn(&id, Turn::user("hi", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ThreadNotFound(_)));
    }

    #[tokio::test]
    async fn turn_ordering_reflects_call_order() {
        let store = InMemoryConversationStore::new(limits());
        let id = store.create_thread("chat", HashMap::new()).await.unwrap();
        store.append_turn(&id, Turn::user("first", 1)).await.unwrap();
        store
            .append_turn(&id, Turn::assistant("second", "chat", "gpt-5", 1))
            .await
            .unwrap();
        let thread = store.get_thread(&id).await.unwrap().unwrap();
        assert_eq!(thread.turns[0].content, "first");
        assert_eq!(thread.turns[1].content, "second");
    }
}
