use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 日志事件级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "error")]
    Error,
}

/// 执行过程中发布的实时日志事件，仅用于在线消费，不落库
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub task_id: i64,
    pub log_id: i64,
    pub level: LogLevel,
    pub message: String,
    /// Unix时间戳（秒）
    pub timestamp: i64,
    pub pid: i64,
}

impl LogEvent {
    pub fn new(task_id: i64, log_id: i64, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            task_id,
            log_id,
            level,
            message: message.into(),
            timestamp: Utc::now().timestamp(),
            pid: std::process::id() as i64,
        }
    }

    pub fn info(task_id: i64, log_id: i64, message: impl Into<String>) -> Self {
        Self::new(task_id, log_id, LogLevel::Info, message)
    }

    pub fn success(task_id: i64, log_id: i64, message: impl Into<String>) -> Self {
        Self::new(task_id, log_id, LogLevel::Success, message)
    }

    pub fn error(task_id: i64, log_id: i64, message: impl Into<String>) -> Self {
        Self::new(task_id, log_id, LogLevel::Error, message)
    }
}

/// 广播给在线监听者的消息帧
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub channel: String,
    pub data: serde_json::Value,
    pub timestamp: i64,
}

impl BroadcastFrame {
    pub fn log(channel: &str, data: serde_json::Value) -> Self {
        Self {
            frame_type: "log".to_string(),
            channel: channel.to_string(),
            data,
            timestamp: Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_wire_shape() {
        let event = LogEvent::error(3, 11, "失败");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["task_id"], 3);
        assert_eq!(json["log_id"], 11);
        assert_eq!(json["level"], "error");
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_broadcast_frame() {
        let frame = BroadcastFrame::log("secron:logs", serde_json::json!({"message": "ok"}));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["channel"], "secron:logs");
    }
}
