use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use secron_domain::{BroadcastFrame, LogChannel};

/// 单个频道广播缓冲区的容量，慢消费者落后超过该值会丢失旧消息
const CHANNEL_CAPACITY: usize = 256;

/// 日志广播中枢
///
/// 从日志通道订阅原始事件，包装成统一消息帧后按频道名
/// 扇出给所有在线订阅者。没有订阅者时消息直接丢弃。
pub struct LogBroadcaster {
    source: Arc<dyn LogChannel>,
    senders: RwLock<HashMap<String, broadcast::Sender<String>>>,
}

impl LogBroadcaster {
    pub fn new(source: Arc<dyn LogChannel>) -> Self {
        Self {
            source,
            senders: RwLock::new(HashMap::new()),
        }
    }

    /// 订阅一个频道的广播流
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut senders = self.senders.write().await;
        senders
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// 运行转发循环，直到收到关闭信号
    ///
    /// 源通道断开时按固定间隔重新订阅，广播侧不感知中断。
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("日志广播中枢启动");
        loop {
            let mut rx = match self.source.subscribe().await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!("订阅日志通道失败: {e}，稍后重试");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(3)) => continue,
                        _ = shutdown_rx.recv() => return,
                    }
                }
            };

            loop {
                tokio::select! {
                    message = rx.recv() => {
                        match message {
                            Some((channel, payload)) => self.fan_out(&channel, &payload).await,
                            None => {
                                warn!("日志通道流中断，重新订阅");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("日志广播中枢收到关闭信号，退出");
                        return;
                    }
                }
            }
        }
    }

    /// 包装消息帧并投递到对应频道
    async fn fan_out(&self, channel: &str, payload: &str) {
        let data = serde_json::from_str(payload)
            .unwrap_or_else(|_| serde_json::Value::String(payload.to_string()));
        let frame = BroadcastFrame::log(channel, data);
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!("序列化广播帧失败: {e}");
                return;
            }
        };

        let senders = self.senders.read().await;
        if let Some(sender) = senders.get(channel) {
            // 返回Err仅表示当前没有在线订阅者
            let delivered = sender.send(text).unwrap_or(0);
            metrics::counter!("secron_broadcast_frames_total").increment(1);
            debug!("广播日志帧: channel={channel}, 订阅者={delivered}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secron_domain::LogEvent;
    use secron_infrastructure::in_memory::InMemoryLogChannel;

    #[tokio::test]
    async fn test_fan_out_wraps_frame_per_channel() {
        let source = Arc::new(InMemoryLogChannel::new("secron:logs"));
        let broadcaster = Arc::new(LogBroadcaster::new(source.clone()));
        let mut rx = broadcaster.subscribe("secron:logs").await;

        let (shutdown_tx, _) = broadcast::channel(1);
        let runner = broadcaster.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        // 等转发循环完成订阅后再发布
        tokio::time::sleep(Duration::from_millis(50)).await;
        source.publish(&LogEvent::info(1, 2, "开始")).await.unwrap();

        let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(frame["type"], "log");
        assert_eq!(frame["channel"], "secron:logs");
        assert_eq!(frame["data"]["task_id"], 1);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribed_channel_drops_messages() {
        let source = Arc::new(InMemoryLogChannel::new("secron:logs"));
        let broadcaster = LogBroadcaster::new(source);
        // 没有任何订阅者时扇出不报错
        broadcaster.fan_out("secron:logs", r#"{"message":"ok"}"#).await;
    }
}
