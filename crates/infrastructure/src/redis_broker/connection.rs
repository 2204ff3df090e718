use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Client;
use tokio::time::sleep;
use tracing::{debug, warn};

use secron_core::config::BrokerConfig;
use secron_core::{SecronError, SecronResult};

/// Redis连接持有者
///
/// 命令走自动重连的ConnectionManager；订阅需要独占连接，
/// 由Client另行创建。
pub struct RedisConnection {
    client: Client,
    manager: ConnectionManager,
    config: BrokerConfig,
}

impl RedisConnection {
    pub async fn connect(config: &BrokerConfig) -> SecronResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| SecronError::MessageQueue(format!("创建Redis客户端失败: {e}")))?;

        let mut last_error = None;
        for attempt in 0..config.max_retry_attempts.max(1) {
            match client.get_connection_manager().await {
                Ok(manager) => {
                    debug!("已连接Redis: {}", config.url);
                    return Ok(Self {
                        client,
                        manager,
                        config: config.clone(),
                    });
                }
                Err(e) => {
                    warn!(
                        "连接Redis失败 (第{}/{}次): {e}",
                        attempt + 1,
                        config.max_retry_attempts
                    );
                    last_error = Some(e);
                    sleep(Duration::from_secs(config.retry_delay_seconds)).await;
                }
            }
        }

        Err(SecronError::MessageQueue(format!(
            "连接Redis失败，已重试{}次: {}",
            config.max_retry_attempts.max(1),
            last_error.map_or("未知错误".to_string(), |e| e.to_string())
        )))
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}
