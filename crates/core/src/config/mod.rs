use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::errors::{SecronError, SecronResult};

/// 系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub api: ApiConfig,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

/// 协调代理（Redis）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    /// 任务交接队列名
    pub task_queue: String,
    /// 分布式锁键前缀
    pub lock_prefix: String,
    /// 执行日志发布频道
    pub log_channel: String,
    /// 连接失败的最大重试次数
    pub max_retry_attempts: u32,
    /// 重试间隔（秒）
    pub retry_delay_seconds: u64,
}

/// 调度器扫描循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 扫描定时器间隔（毫秒）
    pub scan_interval_ms: u64,
    /// 两次扫描之间的最小间隔（毫秒），防止定时器抖动导致重叠扫描
    pub min_scan_gap_ms: u64,
}

/// 执行进程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// 队列阻塞弹出的超时（秒），超时后做一次存活检查再继续
    pub poll_timeout_seconds: u64,
    /// 执行策略: "concurrent" 或 "serial"
    pub execution_mode: String,
    /// 任务未设置timeout时的默认超时（秒）
    pub default_timeout_seconds: i64,
}

/// API服务配置（日志广播WebSocket + 管理协议）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    /// WebSocket日志广播监听地址
    pub ws_bind_address: String,
    /// 管理协议（换行分隔JSON）监听地址
    pub admin_bind_address: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            broker: BrokerConfig::default(),
            scheduler: SchedulerConfig::default(),
            worker: WorkerConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/secron".to_string(),
            max_connections: 10,
            connection_timeout_seconds: 30,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            task_queue: "secron:cron_queue".to_string(),
            lock_prefix: "secron:lock:".to_string(),
            log_channel: "secron:logs".to_string(),
            max_retry_attempts: 3,
            retry_delay_seconds: 5,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_ms: 1000,
            min_scan_gap_ms: 500,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_timeout_seconds: 1,
            execution_mode: "concurrent".to_string(),
            default_timeout_seconds: 300,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ws_bind_address: "0.0.0.0:8790".to_string(),
            admin_bind_address: "0.0.0.0:8791".to_string(),
        }
    }
}

impl AppConfig {
    /// 加载配置：默认值 <- TOML文件 <- SECRON_环境变量
    pub fn load(config_path: Option<&str>) -> SecronResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(
                File::new(path, FileFormat::Toml).required(false),
            );
        }

        let config = builder
            .add_source(Environment::with_prefix("SECRON").separator("__"))
            .build()
            .map_err(|e| SecronError::Configuration(format!("构建配置失败: {e}")))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| SecronError::Configuration(format!("解析配置失败: {e}")))?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// 校验配置项
    pub fn validate(&self) -> SecronResult<()> {
        if self.database.url.is_empty() {
            return Err(SecronError::Configuration("数据库URL不能为空".to_string()));
        }
        if self.broker.url.is_empty() {
            return Err(SecronError::Configuration("Redis URL不能为空".to_string()));
        }
        if self.broker.task_queue.is_empty() {
            return Err(SecronError::Configuration("任务队列名不能为空".to_string()));
        }
        if self.scheduler.scan_interval_ms == 0 {
            return Err(SecronError::Configuration(
                "扫描间隔必须大于0".to_string(),
            ));
        }
        match self.worker.execution_mode.as_str() {
            "concurrent" | "serial" => {}
            other => {
                return Err(SecronError::Configuration(format!(
                    "未知的执行策略: {other}"
                )));
            }
        }
        Ok(())
    }
}
