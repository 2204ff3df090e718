use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use secron_application::TaskManager;
use secron_core::SecronResult;
use secron_domain::TaskQueue;

use crate::runner::TaskRunner;
use crate::strategy::ExecutionStrategy;

/// 执行进程的队列消费循环
///
/// 从交接队列阻塞弹出任务，开执行日志（含加锁），
/// 再按并发策略交给执行器。锁被占用的任务直接丢弃本轮。
pub struct WorkerService {
    queue: Arc<dyn TaskQueue>,
    task_manager: Arc<TaskManager>,
    runner: Arc<TaskRunner>,
    strategy: Box<dyn ExecutionStrategy>,
    poll_timeout: Duration,
}

impl WorkerService {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        task_manager: Arc<TaskManager>,
        runner: Arc<TaskRunner>,
        strategy: Box<dyn ExecutionStrategy>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            task_manager,
            runner,
            strategy,
            poll_timeout,
        }
    }

    /// 运行消费循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("执行消费循环启动 (PID: {})", std::process::id());
        loop {
            tokio::select! {
                result = self.poll_once() => {
                    if let Err(e) = result {
                        // 队列故障：记录后稍作等待再试，避免空转刷日志
                        error!("消费队列失败: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("执行消费循环收到关闭信号，退出");
                    return;
                }
            }
        }
    }

    /// 单次弹出与分派；队列超时无任务时静默返回
    pub async fn poll_once(&self) -> SecronResult<()> {
        let task = match self.queue.pop_timeout(self.poll_timeout).await? {
            Some(task) => task,
            None => return Ok(()),
        };

        match self.task_manager.log_task_start(&task).await {
            Ok(Some(log_id)) => {
                metrics::counter!("secron_tasks_dispatched_total").increment(1);
                let runner = self.runner.clone();
                self.strategy
                    .launch(Box::pin(async move {
                        runner.run(task, log_id).await;
                    }))
                    .await;
            }
            Ok(None) => {
                debug!("任务 {} 的锁被占用，本轮跳过", task.id);
            }
            Err(e) => {
                error!("开执行日志失败: task_id={}, {e}", task.id);
            }
        }
        Ok(())
    }
}
