use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secron_core::SecronResult;

use crate::entities::{RunLog, RunLogStatus, Task, TaskStatus};

/// 任务表读写契约
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 插入任务，返回带数据库生成ID的记录
    async fn create(&self, task: &Task) -> SecronResult<Task>;

    async fn get_by_id(&self, id: i64) -> SecronResult<Option<Task>>;

    /// 按合并后的完整记录覆盖更新
    async fn update(&self, task: &Task) -> SecronResult<()>;

    async fn delete(&self, id: i64) -> SecronResult<()>;

    /// 启用状态且 next_run_time <= now 或为空 的任务快照
    async fn get_due_tasks(&self, now: DateTime<Utc>) -> SecronResult<Vec<Task>>;

    async fn list(&self, limit: i64, offset: i64) -> SecronResult<Vec<Task>>;

    async fn set_status(&self, id: i64, status: TaskStatus) -> SecronResult<()>;

    /// 更新本次与下次执行时间
    async fn set_run_times(
        &self,
        id: i64,
        last_run_time: DateTime<Utc>,
        next_run_time: Option<DateTime<Utc>>,
    ) -> SecronResult<()>;

    async fn set_next_run_time(
        &self,
        id: i64,
        next_run_time: Option<DateTime<Utc>>,
    ) -> SecronResult<()>;
}

/// 执行日志表读写契约
#[async_trait]
pub trait RunLogRepository: Send + Sync {
    /// 插入一条running记录，返回日志ID
    async fn open(&self, run_log: &RunLog) -> SecronResult<i64>;

    async fn get_by_id(&self, id: i64) -> SecronResult<Option<RunLog>>;

    /// 写入结束状态；重复关闭以最后一次为准
    async fn close(
        &self,
        id: i64,
        status: RunLogStatus,
        end_time: DateTime<Utc>,
        duration: i64,
        output: Option<String>,
        error: Option<String>,
    ) -> SecronResult<()>;

    async fn update_pid(&self, id: i64, pid: i64) -> SecronResult<()>;

    async fn list_by_task(&self, task_id: i64, limit: i64, offset: i64)
        -> SecronResult<Vec<RunLog>>;
}
