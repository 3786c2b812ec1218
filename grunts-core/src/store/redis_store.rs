//! Redis-backed [`ConversationStore`] implementation.
//!
//! `thread:<id>:meta` is a hash of scalar metadata/counters/timestamps;
//! `thread:<id>:turns` is a Redis list of JSON-serialized [`Turn`] records.
//! Both keys share a TTL; every append refreshes it via `EXPIRE`.
//!
//! Per-thread mutual exclusion uses a `SET NX PX` lease (`thread:<id>:lease`)
//! with a short timeout, per the re-architecture note on replacing ad-hoc
//! `SETNX` locking with an explicit fencing lease.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

use super::{ConversationStore, Role, StoreLimits, Thread, ThreadStats, Turn};
use crate::errors::StoreError;

const LEASE_TTL_MS: usize = 2_000;
const LEASE_RETRY_DELAY_MS: u64 = 25;
const LEASE_MAX_ATTEMPTS: u32 = 80;

pub struct RedisConversationStore {
    conn: ConnectionManager,
    limits: StoreLimits,
}

impl RedisConversationStore {
    pub async fn connect(redis_url: &str, limits: StoreLimits) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { conn, limits })
    }

    fn meta_key(id: &str) -> String {
        format!("thread:{id}:meta")
    }

    fn turns_key(id: &str) -> String {
        format!("thread:{id}:turns")
    }

    fn lease_key(id: &str) -> String {
        format!("thread:{id}:lease")
    }

    /// Acquire the per-thread fencing lease, retrying briefly on contention.
    async fn acquire_lease(&self, id: &str) -> Result<String, StoreError> {
        let mut conn = self.conn.clone();
        let token = uuid::Uuid::new_v4().to_string();
        let key = Self::lease_key(id);
        for _ in 0..LEASE_MAX_ATTEMPTS {
            let acquired: bool = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(LEASE_TTL_MS)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            if acquired {
                return Ok(token);
            }
            tokio::time::sleep(Duration::from_millis(LEASE_RETRY_DELAY_MS)).await;
        }
        Err(StoreError::LeaseContended(id.to_string()))
    }

    /// Release the lease only if we still hold it (token match), avoiding
    /// releasing a lease some other caller has since acquired.
    async fn release_lease(&self, id: &str, token: &str) {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
            "#,
        );
        let _: Result<i64, _> = script
            .key(Self::lease_key(id))
            .arg(token)
            .invoke_async(&mut conn)
            .await;
    }

    async fn read_meta(&self, id: &str) -> Result<Option<HashMap<String, String>>, StoreError> {
        let mut conn = self.conn.clone();
        let meta: HashMap<String, String> = conn
            .hgetall(Self::meta_key(id))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if meta.is_empty() {
            return Ok(None);
        }
        Ok(Some(meta))
    }

    async fn materialize(&self, id: &str) -> Result<Option<Thread>, StoreError> {
        let mut conn = self.conn.clone();
        let Some(meta) = self.read_meta(id).await? else {
            return Ok(None);
        };
        let raw_turns: Vec<String> = conn
            .lrange(Self::turns_key(id), 0, -1)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let turns: Vec<Turn> = raw_turns
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect();

        let created_at = meta
            .get("created_at")
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);
        let last_updated_at = meta
            .get("last_updated_at")
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);
        let tool_name = meta.get("tool_name").cloned().unwrap_or_default();
        let total_input_tokens = meta
            .get("total_input_tokens")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let total_output_tokens = meta
            .get("total_output_tokens")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let metadata: HashMap<String, String> = meta
            .iter()
            .filter(|(k, _)| k.starts_with("meta:"))
            .map(|(k, v)| (k.trim_start_matches("meta:").to_string(), v.clone()))
            .collect();

        Ok(Some(Thread {
            id: id.to_string(),
            created_at,
            last_updated_at,
            tool_name,
            turns,
            total_input_tokens,
            total_output_tokens,
            metadata,
        }))
    }

    async fn refresh_ttl(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let ttl = self.limits.ttl_seconds as i64;
        let _: () = conn
            .expire(Self::meta_key(id), ttl)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let _: () = conn
            .expire(Self::turns_key(id), ttl)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for RedisConversationStore {
    async fn create_thread(
        &self,
        tool_name: &str,
        initial_metadata: HashMap<String, String>,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(Self::meta_key(&id), "created_at", now)
            .ignore()
            .hset(Self::meta_key(&id), "last_updated_at", now)
            .ignore()
            .hset(Self::meta_key(&id), "tool_name", tool_name)
            .ignore()
            .hset(Self::meta_key(&id), "total_input_tokens", 0)
            .ignore()
            .hset(Self::meta_key(&id), "total_output_tokens", 0)
            .ignore();
        for (k, v) in &initial_metadata {
            pipe.hset(Self::meta_key(&id), format!("meta:{k}"), v).ignore();
        }
        pipe.expire(Self::meta_key(&id), self.limits.ttl_seconds as i64)
            .ignore();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(id)
    }

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>, StoreError> {
        self.materialize(id).await
    }

    async fn append_turn(&self, id: &str, turn: Turn) -> Result<(), StoreError> {
        let token = self.acquire_lease(id).await?;
        let result = self.append_turn_locked(id, turn).await;
        self.release_lease(id, &token).await;
        result
    }

    async fn stats(&self, id: &str) -> Result<ThreadStats, StoreError> {
        let thread = self
            .materialize(id)
            .await?
            .ok_or_else(|| StoreError::ThreadNotFound(id.to_string()))?;
        Ok(super::stats_from_thread(&thread))
    }
}

impl RedisConversationStore {
    async fn append_turn_locked(&self, id: &str, turn: Turn) -> Result<(), StoreError> {
        let meta = self
            .read_meta(id)
            .await?
            .ok_or_else(|| StoreError::ThreadNotFound(id.to_string()))?;

        let mut conn = self.conn.clone();
        let current_len: i64 = conn
            .llen(Self::turns_key(id))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if current_len as usize >= self.limits.max_turns {
            return Err(StoreError::ThreadFull(id.to_string(), self.limits.max_turns));
        }

        let serialized =
            serde_json::to_string(&turn).map_err(|e| StoreError::Backend(e.to_string()))?;
        let total_input_tokens: u64 = meta
            .get("total_input_tokens")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let total_output_tokens: u64 = meta
            .get("total_output_tokens")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let (total_input_tokens, total_output_tokens) = match turn.role {
            Role::User => (total_input_tokens + turn.input_tokens as u64, total_output_tokens),
            Role::Assistant => (total_input_tokens, total_output_tokens + turn.output_tokens as u64),
        };

        let mut pipe = redis::pipe();
        pipe.atomic()
            .rpush(Self::turns_key(id), serialized)
            .ignore()
            .hset(Self::meta_key(id), "total_input_tokens", total_input_tokens)
            .ignore()
            .hset(Self::meta_key(id), "total_output_tokens", total_output_tokens)
            .ignore()
            .hset(Self::meta_key(id), "last_updated_at", Utc::now().timestamp())
            .ignore();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.refresh_ttl(id).await?;
        Ok(())
    }
}
