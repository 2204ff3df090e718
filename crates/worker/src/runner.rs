use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use secron_application::TaskManager;
use secron_core::{SecronError, SecronResult};
use secron_domain::{LogChannel, LogEvent, RunLogStatus, Task, TaskType};

use crate::invoker::MethodRegistry;

/// 任务执行器
///
/// 负责单次执行的全过程：发布开始事件，按任务类型分派执行，
/// 把成败结果恰好一次地写回执行日志并发布结束事件。
/// 日志通道的发布失败只记录，绝不影响执行结果。
pub struct TaskRunner {
    task_manager: Arc<TaskManager>,
    log_channel: Arc<dyn LogChannel>,
    registry: Arc<MethodRegistry>,
    http_client: reqwest::Client,
    default_timeout: i64,
}

impl TaskRunner {
    pub fn new(
        task_manager: Arc<TaskManager>,
        log_channel: Arc<dyn LogChannel>,
        registry: Arc<MethodRegistry>,
        default_timeout: i64,
    ) -> Self {
        Self {
            task_manager,
            log_channel,
            registry,
            http_client: reqwest::Client::new(),
            default_timeout,
        }
    }

    /// 执行一个已开好执行日志的任务
    pub async fn run(&self, task: Task, log_id: i64) {
        self.publish(LogEvent::info(
            task.id,
            log_id,
            format!("任务开始执行: {}", task.name),
        ))
        .await;

        match self.execute(&task, log_id).await {
            Ok(output) => {
                metrics::counter!("secron_runs_succeeded_total").increment(1);
                self.publish(LogEvent::success(
                    task.id,
                    log_id,
                    format!("任务执行成功: {}", task.name),
                ))
                .await;
                if let Err(e) = self
                    .task_manager
                    .log_task_end(log_id, RunLogStatus::Success, Some(output), None)
                    .await
                {
                    error!("写入执行结果失败: log_id={log_id}, {e}");
                }
            }
            Err(e) => {
                metrics::counter!("secron_runs_failed_total").increment(1);
                let message = e.to_string();
                self.publish(LogEvent::error(
                    task.id,
                    log_id,
                    format!("任务执行失败: {} - {message}", task.name),
                ))
                .await;
                if let Err(e) = self
                    .task_manager
                    .log_task_end(log_id, RunLogStatus::Error, None, Some(message))
                    .await
                {
                    error!("写入执行结果失败: log_id={log_id}, {e}");
                }
            }
        }
    }

    /// 按任务类型分派；未设置类型在产生任何副作用前拒绝
    async fn execute(&self, task: &Task, log_id: i64) -> SecronResult<String> {
        match task.task_type {
            TaskType::Command | TaskType::Shell => self.run_process(task, log_id).await,
            TaskType::ClassMethod => self.run_class_method(task),
            TaskType::Url => self.run_url(task).await,
            TaskType::Unset => Err(SecronError::TaskTypeUnset),
        }
    }

    /// 外部进程执行：spawn后记录PID，超时则由kill_on_drop终止子进程
    async fn run_process(&self, task: &Task, log_id: i64) -> SecronResult<String> {
        let mut parts = task.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SecronError::CommandInvalid(task.command.clone()))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SecronError::TaskExecution(format!("启动进程失败: {e}")))?;

        if let Some(pid) = child.id() {
            self.publish(LogEvent::info(
                task.id,
                log_id,
                format!("子进程已启动: pid={pid}"),
            ))
            .await;
            if let Err(e) = self.task_manager.update_pid(log_id, pid as i64).await {
                warn!("记录子进程PID失败: log_id={log_id}, {e}");
            }
        }

        let seconds = self.effective_timeout(task);
        match timeout(Duration::from_secs(seconds as u64), child.wait_with_output()).await {
            Err(_) => Err(SecronError::ExecutionTimeout { seconds }),
            Ok(Err(e)) => Err(SecronError::TaskExecution(format!("等待进程失败: {e}"))),
            Ok(Ok(output)) => {
                if output.status.success() {
                    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let detail = if stderr.trim().is_empty() {
                        String::from_utf8_lossy(&output.stdout).into_owned()
                    } else {
                        stderr.into_owned()
                    };
                    Err(SecronError::TaskExecution(format!(
                        "进程退出码 {}: {}",
                        output.status.code().unwrap_or(-1),
                        detail.trim()
                    )))
                }
            }
        }
    }

    /// 注册方法调用，返回值序列化为输出
    fn run_class_method(&self, task: &Task) -> SecronResult<String> {
        let result = self.registry.invoke(&task.command)?;
        debug!("方法调用完成: {} -> {result}", task.command);
        Ok(match result {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// HTTP GET执行，响应体作为输出
    async fn run_url(&self, task: &Task) -> SecronResult<String> {
        let seconds = self.effective_timeout(task);
        let response = self
            .http_client
            .get(&task.command)
            .timeout(Duration::from_secs(seconds as u64))
            .send()
            .await
            .map_err(|e| SecronError::Network(format!("请求失败: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SecronError::Network(format!("读取响应失败: {e}")))?;
        if !status.is_success() {
            return Err(SecronError::Network(format!("HTTP状态 {status}")));
        }
        Ok(body)
    }

    fn effective_timeout(&self, task: &Task) -> i64 {
        if task.timeout > 0 {
            task.timeout
        } else {
            self.default_timeout
        }
    }

    async fn publish(&self, event: LogEvent) {
        if let Err(e) = self.log_channel.publish(&event).await {
            warn!("发布日志事件失败: task_id={}, {e}", event.task_id);
        }
    }
}
