//! User and device-token storage.
//!
//! The store is Redis: a `users` set of user references, plus one
//! insertion-ordered list of device tokens per user. The `TokenSource` trait
//! is the seam the dispatcher sees, so tests can substitute an in-memory
//! source.

use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use bb8_redis::bb8::Pool;
use bb8_redis::{redis, RedisConnectionManager};
use std::sync::Mutex;
use std::time::Duration;

// Type alias for the connection pool
pub type RedisPool = Pool<RedisConnectionManager>;

const USERS_SET: &str = "users";
const USER_TOKENS_LIST_PREFIX: &str = "user_tokens:";

fn user_tokens_key(user_ref: &str) -> String {
    format!("{USER_TOKENS_LIST_PREFIX}{user_ref}")
}

/// Creates a new Redis connection pool.
pub async fn create_pool(redis_url: &str, pool_size: u32) -> Result<RedisPool> {
    let manager = RedisConnectionManager::new(redis_url).map_err(ServiceError::Redis)?;
    Pool::builder()
        .max_size(pool_size)
        .connection_timeout(Duration::from_secs(15))
        .build(manager)
        .await
        .map_err(|e| ServiceError::Internal(format!("Failed to build Redis pool: {e}")))
}

async fn get_conn(
    pool: &RedisPool,
) -> Result<bb8_redis::bb8::PooledConnection<'_, RedisConnectionManager>> {
    pool.get()
        .await
        .map_err(|e| ServiceError::Internal(format!("Failed to get Redis connection: {e}")))
}

/// Adds a user reference to the user set.
pub async fn register_user(pool: &RedisPool, user_ref: &str) -> Result<()> {
    let mut conn = get_conn(pool).await?;
    let _: () = redis::cmd("SADD")
        .arg(USERS_SET)
        .arg(user_ref)
        .query_async(&mut *conn)
        .await
        .map_err(ServiceError::Redis)?;
    Ok(())
}

/// Registers a device token for a user, keeping the token list free of
/// duplicates while preserving registration order.
pub async fn register_token(pool: &RedisPool, user_ref: &str, token: &str) -> Result<()> {
    let mut conn = get_conn(pool).await?;
    let tokens_key = user_tokens_key(user_ref);

    let mut pipe = redis::pipe();
    pipe.atomic()
        .sadd(USERS_SET, user_ref)
        .lrem(&tokens_key, 0, token)
        .rpush(&tokens_key, token);

    let _: redis::Value = pipe
        .query_async(&mut *conn)
        .await
        .map_err(ServiceError::Redis)?;
    Ok(())
}

/// Checks whether a user record exists.
pub async fn user_exists(pool: &RedisPool, user_ref: &str) -> Result<bool> {
    let mut conn = get_conn(pool).await?;
    let exists: bool = redis::cmd("SISMEMBER")
        .arg(USERS_SET)
        .arg(user_ref)
        .query_async(&mut *conn)
        .await
        .map_err(ServiceError::Redis)?;
    Ok(exists)
}

/// Retrieves the device tokens registered for a user, oldest first.
/// An existing user with no tokens yields an empty Vec, not an error.
pub async fn get_tokens_for_user(pool: &RedisPool, user_ref: &str) -> Result<Vec<String>> {
    let mut conn = get_conn(pool).await?;
    let tokens: Vec<String> = redis::cmd("LRANGE")
        .arg(user_tokens_key(user_ref))
        .arg(0)
        .arg(-1)
        .query_async(&mut *conn)
        .await
        .map_err(ServiceError::Redis)?;
    Ok(tokens)
}

/// Retrieves the full user set.
pub async fn get_all_user_refs(pool: &RedisPool) -> Result<Vec<String>> {
    let mut conn = get_conn(pool).await?;
    let users: Vec<String> = redis::cmd("SMEMBERS")
        .arg(USERS_SET)
        .query_async(&mut *conn)
        .await
        .map_err(ServiceError::Redis)?;
    Ok(users)
}

/// Read-side contract the dispatcher resolves targets through.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn user_exists(&self, user_ref: &str) -> Result<bool>;
    /// Ordered token sequence; empty when the user has no registered device.
    async fn tokens_for_user(&self, user_ref: &str) -> Result<Vec<String>>;
    async fn all_user_refs(&self) -> Result<Vec<String>>;
}

pub struct RedisTokenSource {
    pool: RedisPool,
}

impl RedisTokenSource {
    pub fn new(pool: RedisPool) -> Self {
        RedisTokenSource { pool }
    }
}

#[async_trait]
impl TokenSource for RedisTokenSource {
    async fn user_exists(&self, user_ref: &str) -> Result<bool> {
        user_exists(&self.pool, user_ref).await
    }

    async fn tokens_for_user(&self, user_ref: &str) -> Result<Vec<String>> {
        get_tokens_for_user(&self.pool, user_ref).await
    }

    async fn all_user_refs(&self) -> Result<Vec<String>> {
        get_all_user_refs(&self.pool).await
    }
}

/// In-memory token source for tests, mirroring `MockFcmSender`.
#[derive(Clone, Default)]
pub struct MemoryTokenSource {
    // Vec keeps user insertion order, which makes test scenarios readable.
    users: std::sync::Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl MemoryTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user with no tokens (no-op if already present).
    pub fn add_user(&self, user_ref: &str) {
        let mut users = self.users.lock().unwrap();
        if !users.iter().any(|(r, _)| r == user_ref) {
            users.push((user_ref.to_string(), Vec::new()));
        }
    }

    /// Adds a token for a user, creating the user if needed.
    pub fn add_token(&self, user_ref: &str, token: &str) {
        let mut users = self.users.lock().unwrap();
        if let Some((_, tokens)) = users.iter_mut().find(|(r, _)| r == user_ref) {
            tokens.push(token.to_string());
        } else {
            users.push((user_ref.to_string(), vec![token.to_string()]));
        }
    }
}

#[async_trait]
impl TokenSource for MemoryTokenSource {
    async fn user_exists(&self, user_ref: &str) -> Result<bool> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .any(|(r, _)| r == user_ref))
    }

    async fn tokens_for_user(&self, user_ref: &str) -> Result<Vec<String>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|(r, _)| r == user_ref)
            .map(|(_, tokens)| tokens.clone())
            .unwrap_or_default())
    }

    async fn all_user_refs(&self) -> Result<Vec<String>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| r.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_keeps_token_order() {
        let source = MemoryTokenSource::new();
        source.add_token("alice", "token-old");
        source.add_token("alice", "token-new");
        source.add_user("bob");

        let tokens = source.tokens_for_user("alice").await.unwrap();
        assert_eq!(tokens, vec!["token-old", "token-new"]);

        assert!(source.user_exists("bob").await.unwrap());
        assert!(source.tokens_for_user("bob").await.unwrap().is_empty());
        assert!(!source.user_exists("carol").await.unwrap());
        assert!(source.tokens_for_user("carol").await.unwrap().is_empty());

        assert_eq!(source.all_user_refs().await.unwrap(), vec!["alice", "bob"]);
    }
}
