use crate::domain::ports::LockService;
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Script;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;

/// Deletes KEYS[1] only while it still holds ARGV[1]. Runs atomically on the server.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock service backed by Redis `SET NX PX`.
///
/// The connection manager reconnects on its own; clones share it.
#[derive(Clone)]
pub struct RedisLockService {
    redis: ConnectionManager,
    compare_and_delete: Arc<Script>,
}

impl RedisLockService {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            compare_and_delete: Arc::new(Script::new(COMPARE_AND_DELETE)),
        }
    }

    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/1`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(GuardError::lock_service)?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(GuardError::lock_service)?;
        Ok(Self::new(redis))
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Err(GuardError::Validation(format!(
                "lock {key} needs a time-to-live of at least one millisecond"
            )));
        }

        let mut conn = self.redis.clone();
        // SET replies OK when the key was written and nil when NX refused it.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await
            .map_err(GuardError::lock_service)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: i64 = conn.del(key).await.map_err(GuardError::lock_service)?;
        Ok(())
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = self
            .compare_and_delete
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(GuardError::lock_service)?;
        Ok(removed == 1)
    }
}
