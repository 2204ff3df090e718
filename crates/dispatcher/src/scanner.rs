use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use secron_application::TaskManager;
use secron_core::config::SchedulerConfig;
use secron_core::SecronResult;
use secron_domain::TaskQueue;

/// 调度扫描循环
///
/// 固定间隔扫描到期任务并推入交接队列，从不直接执行任务，
/// 也不等待执行进度。整个部署中只允许一个活动实例。
pub struct TaskScanner {
    task_manager: Arc<TaskManager>,
    queue: Arc<dyn TaskQueue>,
    config: SchedulerConfig,
    /// 上次扫描时刻，用于防止定时器抖动导致的重叠扫描
    last_scan: Mutex<Option<Instant>>,
}

impl TaskScanner {
    pub fn new(
        task_manager: Arc<TaskManager>,
        queue: Arc<dyn TaskQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            task_manager,
            queue,
            config,
            last_scan: Mutex::new(None),
        }
    }

    /// 运行扫描循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "调度扫描循环启动, 间隔={}ms (PID: {})",
            self.config.scan_interval_ms,
            std::process::id()
        );
        let mut ticker = interval(Duration::from_millis(self.config.scan_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        // 连接类故障：记录后继续下一轮
                        error!("扫描任务失败: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("调度扫描循环收到关闭信号，退出");
                    return;
                }
            }
        }
    }

    /// 单次扫描：取到期任务快照，逐个序列化入队
    pub async fn scan_once(&self) -> SecronResult<usize> {
        {
            let mut last_scan = self.last_scan.lock().await;
            let min_gap = Duration::from_millis(self.config.min_scan_gap_ms);
            if let Some(last) = *last_scan {
                if last.elapsed() < min_gap {
                    debug!("距上次扫描不足{}ms，跳过本轮", self.config.min_scan_gap_ms);
                    return Ok(0);
                }
            }
            *last_scan = Some(Instant::now());
        }

        let due_tasks = self.task_manager.get_due_tasks().await?;
        let mut enqueued = 0;
        for task in &due_tasks {
            match self.queue.push(task).await {
                Ok(()) => {
                    debug!("到期任务已入队: id={}, name={}", task.id, task.name);
                    enqueued += 1;
                }
                Err(e) => {
                    error!("任务入队失败: id={}, {e}", task.id);
                }
            }
        }

        if enqueued > 0 {
            metrics::counter!("secron_tasks_enqueued_total").increment(enqueued as u64);
            info!("本轮扫描入队 {enqueued} 个任务");
        }
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use secron_domain::{Task, TaskRepository, TaskStatus, TaskType};
    use secron_infrastructure::in_memory::{
        InMemoryRunLogRepository, InMemoryTaskLock, InMemoryTaskQueue, InMemoryTaskRepository,
    };

    fn scanner_with(config: SchedulerConfig) -> (TaskScanner, Arc<InMemoryTaskRepository>, Arc<InMemoryTaskQueue>) {
        let task_repo = Arc::new(InMemoryTaskRepository::new());
        let manager = Arc::new(TaskManager::new(
            task_repo.clone(),
            Arc::new(InMemoryRunLogRepository::new()),
            Arc::new(InMemoryTaskLock::new()),
        ));
        let queue = Arc::new(InMemoryTaskQueue::new());
        (TaskScanner::new(manager, queue.clone(), config), task_repo, queue)
    }

    fn due_task(name: &str) -> Task {
        let mut task = Task::new(
            name.to_string(),
            "echo hi".to_string(),
            TaskType::Command,
            "* * * * * *".to_string(),
        );
        task.next_run_time = Some(Utc::now());
        task
    }

    #[tokio::test]
    async fn test_scan_enqueues_due_tasks() {
        let (scanner, repo, queue) = scanner_with(SchedulerConfig {
            enabled: true,
            scan_interval_ms: 1000,
            min_scan_gap_ms: 0,
        });
        repo.create(&due_task("a")).await.unwrap();
        repo.create(&due_task("b")).await.unwrap();
        let mut disabled = due_task("c");
        disabled.status = TaskStatus::Disabled;
        repo.create(&disabled).await.unwrap();

        let enqueued = scanner.scan_once().await.unwrap();
        assert_eq!(enqueued, 2);
        assert_eq!(queue.len().await, 2);

        // FIFO：先入队的先出
        let first = queue
            .pop_timeout(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.name, "a");
    }

    #[tokio::test]
    async fn test_min_gap_guard_skips_rapid_scans() {
        let (scanner, repo, queue) = scanner_with(SchedulerConfig {
            enabled: true,
            scan_interval_ms: 1000,
            min_scan_gap_ms: 500,
        });
        repo.create(&due_task("a")).await.unwrap();

        assert_eq!(scanner.scan_once().await.unwrap(), 1);
        // 间隔不足时直接跳过，不重复入队
        assert_eq!(scanner.scan_once().await.unwrap(), 0);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_future_task_not_enqueued() {
        let (scanner, repo, _queue) = scanner_with(SchedulerConfig {
            enabled: true,
            scan_interval_ms: 1000,
            min_scan_gap_ms: 0,
        });
        let mut task = due_task("later");
        task.next_run_time = Some(Utc::now() + chrono::Duration::hours(1));
        repo.create(&task).await.unwrap();

        assert_eq!(scanner.scan_once().await.unwrap(), 0);
    }
}
