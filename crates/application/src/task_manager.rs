use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use secron_core::{cron::CronSchedule, SecronError, SecronResult};
use secron_domain::{
    RunLog, RunLogRepository, RunLogStatus, Task, TaskLock, TaskRepository, TaskStatus, TaskType,
};

/// 任务部分更新载荷，未提供的字段保持原值
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub command: Option<String>,
    pub task_type: Option<TaskType>,
    pub cron_expression: Option<String>,
    pub timeout: Option<i64>,
    pub lock_time: Option<i64>,
    pub status: Option<TaskStatus>,
}

/// 任务管理器
///
/// 锁与执行日志生命周期的唯一责任方：其他组件只通过这里
/// 改动锁和run-log状态。
pub struct TaskManager {
    task_repo: Arc<dyn TaskRepository>,
    run_log_repo: Arc<dyn RunLogRepository>,
    lock: Arc<dyn TaskLock>,
}

impl TaskManager {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        run_log_repo: Arc<dyn RunLogRepository>,
        lock: Arc<dyn TaskLock>,
    ) -> Self {
        Self {
            task_repo,
            run_log_repo,
            lock,
        }
    }

    /// 获取到期任务快照：启用状态且next_run_time已到或未设置
    ///
    /// 无事务性认领，依赖单调度器部署假设。
    pub async fn get_due_tasks(&self) -> SecronResult<Vec<Task>> {
        self.task_repo.get_due_tasks(Utc::now()).await
    }

    /// 尝试获取任务锁；lock_time <= 0 的任务不加锁，总是放行
    pub async fn acquire_lock(&self, task: &Task) -> SecronResult<bool> {
        if task.lock_time <= 0 {
            return Ok(true);
        }
        let acquired = self
            .lock
            .acquire(task.id, Duration::from_secs(task.lock_time as u64))
            .await?;
        if !acquired {
            info!("任务 {} 已被锁定，跳过执行", task.id);
            metrics::counter!("secron_lock_contention_total").increment(1);
        }
        Ok(acquired)
    }

    /// 释放任务锁；失败只记录日志，绝不上抛
    pub async fn release_lock(&self, task_id: i64) {
        if let Err(e) = self.lock.release(task_id).await {
            warn!("释放任务锁失败: task_id={task_id}, {e}");
        }
    }

    /// 记录任务开始：先持久化本次/下次执行时间，再加锁并开执行日志
    ///
    /// 返回None表示锁被占用，本轮放弃执行。
    pub async fn log_task_start(&self, task: &Task) -> SecronResult<Option<i64>> {
        let now = Utc::now();
        let next_run_time = self.calculate_next_run_time(task);
        self.task_repo
            .set_run_times(task.id, now, next_run_time)
            .await?;

        if !self.acquire_lock(task).await? {
            return Ok(None);
        }

        let run_log = RunLog::open(task.id, task.name.clone(), std::process::id() as i64);
        match self.run_log_repo.open(&run_log).await {
            Ok(log_id) => {
                metrics::counter!("secron_runs_opened_total").increment(1);
                Ok(Some(log_id))
            }
            Err(e) => {
                // 开日志失败时不能让锁悬挂到TTL过期
                self.release_lock(task.id).await;
                Err(e)
            }
        }
    }

    /// 记录任务结束：无条件释放锁，然后写入结束状态
    ///
    /// 重复关闭被容忍，后写覆盖先写。
    pub async fn log_task_end(
        &self,
        log_id: i64,
        status: RunLogStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> SecronResult<()> {
        let run_log = self
            .run_log_repo
            .get_by_id(log_id)
            .await?
            .ok_or(SecronError::RunLogNotFound { id: log_id })?;
        self.release_lock(run_log.task_id).await;

        let end_time = Utc::now();
        let duration = (end_time - run_log.start_time).num_seconds();
        self.run_log_repo
            .close(log_id, status, end_time, duration, output, error)
            .await
    }

    /// 把子进程PID写到执行日志上
    pub async fn update_pid(&self, log_id: i64, pid: i64) -> SecronResult<()> {
        self.run_log_repo.update_pid(log_id, pid).await
    }

    /// 计算下次执行时间
    ///
    /// 5字段的经典表达式自动补秒字段"0"；表达式非法时记录日志并
    /// 返回None——任务从此不再到期，直到表达式被修正（定义中的降级状态）。
    pub fn calculate_next_run_time(&self, task: &Task) -> Option<DateTime<Utc>> {
        let expression = Self::normalize_expression(&task.cron_expression);
        match CronSchedule::parse(&expression).and_then(|s| s.next_after(Utc::now())) {
            Ok(next) => Some(next),
            Err(e) => {
                warn!(
                    "任务 {} 的Cron表达式无效: {} - {e}",
                    task.name, task.cron_expression
                );
                None
            }
        }
    }

    /// 5字段表达式（分 时 日 月 周）补为6字段，秒位取0
    pub fn normalize_expression(expression: &str) -> String {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() == 5 {
            format!("0 {}", parts.join(" "))
        } else {
            parts.join(" ")
        }
    }

    /// 创建任务，入库前计算next_run_time
    pub async fn create_task(&self, mut task: Task) -> SecronResult<Task> {
        task.next_run_time = self.calculate_next_run_time(&task);
        let created = self.task_repo.create(&task).await?;
        info!("创建任务成功: id={}, name={}", created.id, created.name);
        Ok(created)
    }

    /// 合并更新任务，并按合并后的表达式重算next_run_time
    pub async fn update_task(&self, id: i64, patch: TaskPatch) -> SecronResult<Task> {
        let mut task = self
            .task_repo
            .get_by_id(id)
            .await?
            .ok_or(SecronError::TaskNotFound { id })?;

        if let Some(name) = patch.name {
            task.name = name;
        }
        if let Some(command) = patch.command {
            task.command = command;
        }
        if let Some(task_type) = patch.task_type {
            task.task_type = task_type;
        }
        if let Some(cron_expression) = patch.cron_expression {
            task.cron_expression = cron_expression;
        }
        if let Some(timeout) = patch.timeout {
            task.timeout = timeout;
        }
        if let Some(lock_time) = patch.lock_time {
            task.lock_time = lock_time;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }

        task.next_run_time = self.calculate_next_run_time(&task);
        self.task_repo.update(&task).await?;
        Ok(task)
    }

    pub async fn delete_task(&self, id: i64) -> SecronResult<()> {
        self.task_repo.delete(id).await
    }

    /// 启用任务
    pub async fn start_task(&self, id: i64) -> SecronResult<()> {
        self.task_repo.set_status(id, TaskStatus::Enabled).await
    }

    /// 停用任务并释放其可能持有的锁，停用的任务不能被锁卡住
    pub async fn close_task(&self, id: i64) -> SecronResult<()> {
        self.task_repo.set_status(id, TaskStatus::Disabled).await?;
        self.release_lock(id).await;
        Ok(())
    }

    /// 重新计算并持久化下次执行时间
    pub async fn reload_task(&self, id: i64) -> SecronResult<()> {
        let task = self
            .task_repo
            .get_by_id(id)
            .await?
            .ok_or(SecronError::TaskNotFound { id })?;
        let next = self.calculate_next_run_time(&task).ok_or_else(|| {
            SecronError::Configuration(format!(
                "无法计算任务 {} 的下次执行时间: {}",
                task.name, task.cron_expression
            ))
        })?;
        self.task_repo.set_next_run_time(id, Some(next)).await
    }

    /// 重启任务：停用 -> 启用 -> 重载，三步之间不保证原子性
    pub async fn restart_task(&self, id: i64) -> SecronResult<()> {
        self.close_task(id).await?;
        self.start_task(id).await?;
        self.reload_task(id).await
    }

    /// 立即执行：把下次执行时间设为当前，由扫描循环自然拾取
    pub async fn execute_immediately(&self, id: i64) -> SecronResult<()> {
        self.task_repo
            .get_by_id(id)
            .await?
            .ok_or(SecronError::TaskNotFound { id })?;
        self.task_repo.set_next_run_time(id, Some(Utc::now())).await
    }

    pub async fn get_task(&self, id: i64) -> SecronResult<Option<Task>> {
        self.task_repo.get_by_id(id).await
    }

    pub async fn list_tasks(&self, limit: i64, offset: i64) -> SecronResult<Vec<Task>> {
        self.task_repo.list(limit, offset).await
    }

    pub async fn get_task_logs(
        &self,
        task_id: i64,
        limit: i64,
        offset: i64,
    ) -> SecronResult<Vec<RunLog>> {
        self.run_log_repo.list_by_task(task_id, limit, offset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secron_infrastructure::in_memory::{
        InMemoryRunLogRepository, InMemoryTaskLock, InMemoryTaskRepository,
    };

    fn manager() -> (
        TaskManager,
        Arc<InMemoryTaskRepository>,
        Arc<InMemoryTaskLock>,
    ) {
        let task_repo = Arc::new(InMemoryTaskRepository::new());
        let run_log_repo = Arc::new(InMemoryRunLogRepository::new());
        let lock = Arc::new(InMemoryTaskLock::new());
        let manager = TaskManager::new(task_repo.clone(), run_log_repo, lock.clone());
        (manager, task_repo, lock)
    }

    fn sample_task(lock_time: i64) -> Task {
        let mut task = Task::new(
            "demo".to_string(),
            "echo hi".to_string(),
            TaskType::Command,
            "0 * * * * *".to_string(),
        );
        task.lock_time = lock_time;
        task
    }

    #[tokio::test]
    async fn test_due_tasks_exclude_disabled() {
        let (manager, _, _) = manager();
        let enabled = manager.create_task(sample_task(0)).await.unwrap();
        let mut disabled = sample_task(0);
        disabled.status = TaskStatus::Disabled;
        manager.create_task(disabled).await.unwrap();
        // next_run_time在未来，先手动置为到期
        manager.execute_immediately(enabled.id).await.unwrap();

        let due = manager.get_due_tasks().await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, enabled.id);
    }

    #[tokio::test]
    async fn test_unset_next_run_time_is_due() {
        let (manager, task_repo, _) = manager();
        let mut task = sample_task(0);
        task.cron_expression = "0 0 0 30 2 *".to_string(); // 永不匹配 -> next为None
        let created = manager.create_task(task).await.unwrap();
        assert!(created.next_run_time.is_none());

        let due = task_repo.get_due_tasks(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_log_task_start_and_end_releases_lock() {
        let (manager, _, lock) = manager();
        let task = manager.create_task(sample_task(60)).await.unwrap();

        let log_id = manager.log_task_start(&task).await.unwrap().unwrap();
        assert!(lock.is_held(task.id).await);

        // 锁被持有期间再次开始会被跳过
        assert!(manager.log_task_start(&task).await.unwrap().is_none());

        manager
            .log_task_end(log_id, RunLogStatus::Error, None, Some("失败".to_string()))
            .await
            .unwrap();
        // 无论结束状态如何锁都被释放
        assert!(!lock.is_held(task.id).await);

        let logs = manager.get_task_logs(task.id, 10, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, RunLogStatus::Error);
        assert!(logs[0].end_time.is_some());
        assert!(logs[0].duration.is_some());
    }

    #[tokio::test]
    async fn test_zero_lock_time_skips_locking() {
        let (manager, _, lock) = manager();
        let task = manager.create_task(sample_task(0)).await.unwrap();

        let first = manager.log_task_start(&task).await.unwrap();
        let second = manager.log_task_start(&task).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(!lock.is_held(task.id).await);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_only_one_wins() {
        let (_, _, lock) = manager();
        let ttl = Duration::from_secs(10);
        let (a, b) = tokio::join!(lock.acquire(1, ttl), lock.acquire(1, ttl));
        assert_ne!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn test_start_updates_run_times() {
        let (manager, task_repo, _) = manager();
        let task = manager.create_task(sample_task(0)).await.unwrap();
        manager.log_task_start(&task).await.unwrap();

        let stored = task_repo.get_by_id(task.id).await.unwrap().unwrap();
        assert!(stored.last_run_time.is_some());
        assert!(stored.next_run_time.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_malformed_cron_yields_none() {
        let (manager, _, _) = manager();
        let mut task = sample_task(0);
        task.cron_expression = "not a cron".to_string();
        let created = manager.create_task(task).await.unwrap();
        assert!(created.next_run_time.is_none());
        // reload对无解表达式报配置错误
        assert!(manager.reload_task(created.id).await.is_err());
    }

    #[tokio::test]
    async fn test_five_field_normalization() {
        assert_eq!(
            TaskManager::normalize_expression("*/10 * * * *"),
            "0 */10 * * * *"
        );
        let a = CronSchedule::parse("0 */10 * * * *").unwrap();
        let b =
            CronSchedule::parse(&TaskManager::normalize_expression("*/10 * * * *")).unwrap();
        let base = Utc::now();
        assert_eq!(a.next_after(base).unwrap(), b.next_after(base).unwrap());
    }

    #[tokio::test]
    async fn test_close_task_releases_lock() {
        let (manager, task_repo, lock) = manager();
        let task = manager.create_task(sample_task(60)).await.unwrap();
        manager.log_task_start(&task).await.unwrap();
        assert!(lock.is_held(task.id).await);

        manager.close_task(task.id).await.unwrap();
        assert!(!lock.is_held(task.id).await);
        let stored = task_repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Disabled);
    }

    #[tokio::test]
    async fn test_update_task_merges_and_recomputes() {
        let (manager, _, _) = manager();
        let task = manager.create_task(sample_task(0)).await.unwrap();
        let patch = TaskPatch {
            cron_expression: Some("0 0 3 * * *".to_string()),
            timeout: Some(60),
            ..Default::default()
        };
        let updated = manager.update_task(task.id, patch).await.unwrap();
        assert_eq!(updated.cron_expression, "0 0 3 * * *");
        assert_eq!(updated.timeout, 60);
        assert_eq!(updated.command, "echo hi");
        assert!(updated.next_run_time.is_some());
    }

    #[tokio::test]
    async fn test_double_close_last_write_wins() {
        let (manager, _, _) = manager();
        let task = manager.create_task(sample_task(0)).await.unwrap();
        let log_id = manager.log_task_start(&task).await.unwrap().unwrap();

        manager
            .log_task_end(log_id, RunLogStatus::Success, Some("ok".to_string()), None)
            .await
            .unwrap();
        manager
            .log_task_end(log_id, RunLogStatus::Error, None, Some("boom".to_string()))
            .await
            .unwrap();

        let logs = manager.get_task_logs(task.id, 10, 0).await.unwrap();
        assert_eq!(logs[0].status, RunLogStatus::Error);
        assert_eq!(logs[0].error.as_deref(), Some("boom"));
    }
}
