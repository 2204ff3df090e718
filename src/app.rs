use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info};

use secron_api::{ws, AdminServer, LogBroadcaster};
use secron_application::TaskManager;
use secron_core::config::AppConfig;
use secron_core::SecronResult;
use secron_dispatcher::TaskScanner;
use secron_domain::{LogChannel, RunLogRepository, TaskLock, TaskQueue, TaskRepository};
use secron_infrastructure::{
    create_pool, PostgresRunLogRepository, PostgresTaskRepository, RedisConnection,
    RedisLogChannel, RedisTaskLock, RedisTaskQueue,
};
use secron_worker::{strategy_from_mode, MethodRegistry, TaskRunner, WorkerService};

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Scheduler,
    Worker,
    Api,
    All,
}

impl AppMode {
    fn runs_scheduler(&self) -> bool {
        matches!(self, AppMode::Scheduler | AppMode::All)
    }

    fn runs_worker(&self) -> bool {
        matches!(self, AppMode::Worker | AppMode::All)
    }

    fn runs_api(&self) -> bool {
        matches!(self, AppMode::Api | AppMode::All)
    }
}

/// 应用实例：按运行模式组装并启动各个后台循环
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    registry: Arc<MethodRegistry>,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode, registry: MethodRegistry) -> Self {
        Self {
            config,
            mode,
            registry: Arc::new(registry),
        }
    }

    /// 启动所有组件并等待它们退出
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> SecronResult<()> {
        let pool = create_pool(&self.config.database).await?;
        let redis = RedisConnection::connect(&self.config.broker).await?;

        let task_repo: Arc<dyn TaskRepository> =
            Arc::new(PostgresTaskRepository::new(pool.clone()));
        let run_log_repo: Arc<dyn RunLogRepository> =
            Arc::new(PostgresRunLogRepository::new(pool));
        let lock: Arc<dyn TaskLock> = Arc::new(RedisTaskLock::new(&redis));
        let queue: Arc<dyn TaskQueue> = Arc::new(RedisTaskQueue::new(&redis));
        let log_channel: Arc<dyn LogChannel> = Arc::new(RedisLogChannel::new(&redis));
        let task_manager = Arc::new(TaskManager::new(task_repo, run_log_repo, lock));

        let mut handles = Vec::new();

        if self.mode.runs_scheduler() && self.config.scheduler.enabled {
            let scanner = TaskScanner::new(
                task_manager.clone(),
                queue.clone(),
                self.config.scheduler.clone(),
            );
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                scanner.run(rx).await;
            }));
        }

        if self.mode.runs_worker() && self.config.worker.enabled {
            let runner = Arc::new(TaskRunner::new(
                task_manager.clone(),
                log_channel.clone(),
                self.registry.clone(),
                self.config.worker.default_timeout_seconds,
            ));
            let worker = WorkerService::new(
                queue.clone(),
                task_manager.clone(),
                runner,
                strategy_from_mode(&self.config.worker.execution_mode),
                Duration::from_secs(self.config.worker.poll_timeout_seconds),
            );
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                worker.run(rx).await;
            }));
        }

        if self.mode.runs_api() && self.config.api.enabled {
            let broadcaster = Arc::new(LogBroadcaster::new(log_channel.clone()));

            let forwarder = broadcaster.clone();
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                forwarder.run(rx).await;
            }));

            let ws_bind = self.config.api.ws_bind_address.clone();
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = ws::serve(&ws_bind, broadcaster, rx).await {
                    error!("WebSocket服务退出: {e}");
                }
            }));

            let admin = AdminServer::new(task_manager.clone());
            let admin_bind = self.config.api.admin_bind_address.clone();
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = admin.run(&admin_bind, rx).await {
                    error!("管理协议服务退出: {e}");
                }
            }));
        }

        info!("已启动 {} 个组件", handles.len());
        for handle in handles {
            let _ = handle.await;
        }
        info!("所有组件已退出");
        Ok(())
    }
}
