use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 定时任务定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    /// 命令内容，含义取决于task_type
    pub command: String,
    /// 缺失或未知的类型解析为Unset，由执行器在产生任何副作用前拒绝
    #[serde(default)]
    pub task_type: TaskType,
    /// 秒级Cron表达式（6或7字段；5字段会被自动补秒）
    pub cron_expression: String,
    /// 执行超时（秒）
    pub timeout: i64,
    /// 锁TTL（秒），小于等于0表示该任务不加锁
    pub lock_time: i64,
    pub status: TaskStatus,
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_run_time: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(name: String, command: String, task_type: TaskType, cron_expression: String) -> Self {
        Self {
            id: 0, // 由数据库生成
            name,
            command,
            task_type,
            cron_expression,
            timeout: 300,
            lock_time: 0,
            status: TaskStatus::Enabled,
            last_run_time: None,
            next_run_time: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status == TaskStatus::Enabled
    }
}

/// 任务启停状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "enabled")]
    Enabled,
    #[serde(rename = "disabled")]
    Disabled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Enabled => "enabled",
            TaskStatus::Disabled => "disabled",
        }
    }
}

/// 任务执行类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskType {
    /// 外部进程命令
    #[serde(rename = "command")]
    Command,
    /// 注册的类方法调用 (Type::method(args))
    #[serde(rename = "class_method")]
    ClassMethod,
    /// HTTP GET请求
    #[serde(rename = "url")]
    Url,
    /// Shell命令，与Command走同一进程路径
    #[serde(rename = "shell")]
    Shell,
    /// 类型未设置或未知
    #[serde(rename = "unset")]
    #[serde(other)]
    Unset,
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Unset
    }
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Command => "command",
            TaskType::ClassMethod => "class_method",
            TaskType::Url => "url",
            TaskType::Shell => "shell",
            TaskType::Unset => "unset",
        }
    }
}

/// 一次执行尝试的记录，列名cron_id/task_name等构成持久化契约
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub id: i64,
    /// 对应任务ID（表列名为cron_id）
    pub task_id: i64,
    pub task_name: String,
    pub status: RunLogStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// 执行耗时（秒）
    pub duration: Option<i64>,
    pub pid: Option<i64>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl RunLog {
    /// 新开一条running状态的记录
    pub fn open(task_id: i64, task_name: String, pid: i64) -> Self {
        Self {
            id: 0,
            task_id,
            task_name,
            status: RunLogStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            pid: Some(pid),
            output: None,
            error: None,
        }
    }
}

/// 执行记录状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunLogStatus {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "error")]
    Error,
}

impl RunLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunLogStatus::Running => "running",
            RunLogStatus::Success => "success",
            RunLogStatus::Error => "error",
        }
    }
}

macro_rules! impl_pg_string_enum {
    ($ty:ty { $($variant:path => $text:literal),+ $(,)? }) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                match s {
                    $($text => Ok($variant),)+
                    _ => Err(format!("无效的枚举值: {s}").into()),
                }
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                let s = match self {
                    $($variant => $text,)+
                };
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(s, buf)
            }
        }
    };
}

impl_pg_string_enum!(TaskStatus {
    TaskStatus::Enabled => "enabled",
    TaskStatus::Disabled => "disabled",
});

impl_pg_string_enum!(TaskType {
    TaskType::Command => "command",
    TaskType::ClassMethod => "class_method",
    TaskType::Url => "url",
    TaskType::Shell => "shell",
    TaskType::Unset => "unset",
});

impl_pg_string_enum!(RunLogStatus {
    RunLogStatus::Running => "running",
    RunLogStatus::Success => "success",
    RunLogStatus::Error => "error",
});
