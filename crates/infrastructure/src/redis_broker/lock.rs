use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;

use secron_core::{SecronError, SecronResult};
use secron_domain::TaskLock;

use super::RedisConnection;

/// Redis SET NX EX实现的TTL互斥锁，键值为获取时刻的Unix时间戳
pub struct RedisTaskLock {
    manager: ConnectionManager,
    lock_prefix: String,
}

impl RedisTaskLock {
    pub fn new(connection: &RedisConnection) -> Self {
        Self {
            manager: connection.manager(),
            lock_prefix: connection.config().lock_prefix.clone(),
        }
    }

    fn key(&self, task_id: i64) -> String {
        format!("{}{}", self.lock_prefix, task_id)
    }
}

#[async_trait]
impl TaskLock for RedisTaskLock {
    async fn acquire(&self, task_id: i64, ttl: Duration) -> SecronResult<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(task_id))
            .arg(Utc::now().timestamp())
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| SecronError::Lock(format!("加锁失败: {e}")))?;
        Ok(reply.is_some())
    }

    async fn release(&self, task_id: i64) -> SecronResult<()> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.key(task_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| SecronError::Lock(format!("解锁失败: {e}")))?;
        Ok(())
    }
}
