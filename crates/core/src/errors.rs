use thiserror::Error;

/// 调度系统统一错误类型
#[derive(Debug, Error)]
pub enum SecronError {
    #[error("数据库错误: {0}")]
    Database(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("执行日志未找到: {id}")]
    RunLogNotFound { id: i64 },

    #[error("无效的Cron表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("Cron表达式在366天内无匹配时间: {expr}")]
    NoMatchFound { expr: String },

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("分布式锁错误: {0}")]
    Lock(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务类型未设置")]
    TaskTypeUnset,

    #[error("无效的命令格式: {0}")]
    CommandInvalid(String),

    #[error("方法未注册: {class}::{method}")]
    MethodNotFound { class: String, method: String },

    #[error("方法不可访问: {class}::{method}")]
    MethodNotAccessible { class: String, method: String },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务执行超时: {seconds}秒")]
    ExecutionTimeout { seconds: i64 },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SecronError {
    fn from(e: serde_json::Error) -> Self {
        SecronError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type SecronResult<T> = std::result::Result<T, SecronError>;
