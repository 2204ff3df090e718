use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use secron_core::{SecronError, SecronResult};
use secron_domain::{LogChannel, LogEvent};

/// Redis发布订阅实现的日志通道
pub struct RedisLogChannel {
    manager: ConnectionManager,
    client: Client,
    channel: String,
    retry_delay: Duration,
}

impl RedisLogChannel {
    pub fn new(connection: &super::RedisConnection) -> Self {
        Self {
            manager: connection.manager(),
            client: connection.client(),
            channel: connection.config().log_channel.clone(),
            retry_delay: Duration::from_secs(connection.config().retry_delay_seconds),
        }
    }
}

#[async_trait]
impl LogChannel for RedisLogChannel {
    async fn publish(&self, event: &LogEvent) -> SecronResult<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| SecronError::MessageQueue(format!("发布日志失败: {e}")))?;
        Ok(())
    }

    /// 订阅日志频道。订阅连接断开后延时重建，直到接收端被丢弃。
    async fn subscribe(&self) -> SecronResult<mpsc::Receiver<(String, String)>> {
        let (tx, rx) = mpsc::channel(1024);
        let client = self.client.clone();
        let channel = self.channel.clone();
        let retry_delay = self.retry_delay;

        tokio::spawn(async move {
            loop {
                let mut pubsub = match client.get_async_pubsub().await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("创建订阅连接失败: {e}，{}秒后重试", retry_delay.as_secs());
                        sleep(retry_delay).await;
                        continue;
                    }
                };
                if let Err(e) = pubsub.subscribe(&channel).await {
                    warn!("订阅频道 {channel} 失败: {e}，{}秒后重试", retry_delay.as_secs());
                    sleep(retry_delay).await;
                    continue;
                }
                debug!("已订阅日志频道: {channel}");

                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!("读取订阅消息失败: {e}");
                            continue;
                        }
                    };
                    if tx.send((channel.clone(), payload)).await.is_err() {
                        // 接收端已关闭，结束订阅任务
                        return;
                    }
                }

                warn!("日志频道订阅中断，{}秒后重连", retry_delay.as_secs());
                sleep(retry_delay).await;
            }
        });

        Ok(rx)
    }
}
