use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use secron_core::{SecronError, SecronResult};
use secron_domain::{Task, TaskQueue};

use super::RedisConnection;

/// Redis列表实现的交接队列：LPUSH入队头，BRPOP出队尾，保持FIFO
pub struct RedisTaskQueue {
    manager: ConnectionManager,
    queue_name: String,
}

impl RedisTaskQueue {
    pub fn new(connection: &RedisConnection) -> Self {
        Self {
            manager: connection.manager(),
            queue_name: connection.config().task_queue.clone(),
        }
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn push(&self, task: &Task) -> SecronResult<()> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.queue_name)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| SecronError::MessageQueue(format!("入队失败: {e}")))?;
        debug!("任务 {} 已入队 {}", task.id, self.queue_name);
        Ok(())
    }

    async fn pop_timeout(&self, timeout: Duration) -> SecronResult<Option<Task>> {
        let mut conn = self.manager.clone();
        let item: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.queue_name)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| SecronError::MessageQueue(format!("出队失败: {e}")))?;

        match item {
            Some((_, payload)) => {
                let task: Task = serde_json::from_str(&payload)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }
}
