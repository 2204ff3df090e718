//! 执行器集成测试，全部走内存实现

use std::sync::Arc;

use serde_json::{json, Value};

use secron_application::TaskManager;
use secron_domain::{LogLevel, RunLogStatus, Task, TaskType};
use secron_infrastructure::in_memory::{
    InMemoryLogChannel, InMemoryRunLogRepository, InMemoryTaskLock, InMemoryTaskRepository,
};
use secron_worker::{MethodRegistry, TaskRunner};

struct Harness {
    manager: Arc<TaskManager>,
    channel: Arc<InMemoryLogChannel>,
    lock: Arc<InMemoryTaskLock>,
    runner: TaskRunner,
}

fn harness() -> Harness {
    let lock = Arc::new(InMemoryTaskLock::new());
    let manager = Arc::new(TaskManager::new(
        Arc::new(InMemoryTaskRepository::new()),
        Arc::new(InMemoryRunLogRepository::new()),
        lock.clone(),
    ));
    let channel = Arc::new(InMemoryLogChannel::new("secron:logs"));

    let mut registry = MethodRegistry::new();
    registry.register("Demo", "greet", |args| {
        Ok(json!(format!("你好, {}", args.first().unwrap_or(&Value::Null))))
    });

    let runner = TaskRunner::new(
        manager.clone(),
        channel.clone(),
        Arc::new(registry),
        300,
    );
    Harness {
        manager,
        channel,
        lock,
        runner,
    }
}

fn task_of(task_type: TaskType, command: &str, lock_time: i64) -> Task {
    let mut task = Task::new(
        "demo".to_string(),
        command.to_string(),
        task_type,
        "0 * * * * *".to_string(),
    );
    task.lock_time = lock_time;
    task
}

async fn run_and_fetch(h: &Harness, task: Task) -> secron_domain::RunLog {
    let created = h.manager.create_task(task).await.unwrap();
    let log_id = h.manager.log_task_start(&created).await.unwrap().unwrap();
    h.runner.run(created.clone(), log_id).await;
    h.manager
        .get_task_logs(created.id, 1, 0)
        .await
        .unwrap()
        .remove(0)
}

#[tokio::test]
async fn test_command_success_records_output_and_releases_lock() {
    let h = harness();
    let log = run_and_fetch(&h, task_of(TaskType::Command, "echo hi", 60)).await;

    assert_eq!(log.status, RunLogStatus::Success);
    assert_eq!(log.output.as_deref(), Some("hi\n"));
    assert!(log.pid.is_some());
    assert!(log.end_time.is_some());
    assert!(!h.lock.is_held(log.task_id).await);

    let events = h.channel.published().await;
    assert!(events.iter().any(|e| e.level == LogLevel::Success));
}

#[tokio::test]
async fn test_command_nonzero_exit_is_error() {
    let h = harness();
    let log = run_and_fetch(&h, task_of(TaskType::Command, "ls /secron-no-such-path", 0)).await;

    assert_eq!(log.status, RunLogStatus::Error);
    assert!(log.error.is_some());
    assert!(log.output.is_none());
}

#[tokio::test]
async fn test_command_timeout_kills_and_reports() {
    let h = harness();
    let mut task = task_of(TaskType::Command, "sleep 30", 60);
    task.timeout = 1;
    let log = run_and_fetch(&h, task).await;

    assert_eq!(log.status, RunLogStatus::Error);
    assert!(log.error.as_deref().unwrap().contains("超时"));
    assert!(!h.lock.is_held(log.task_id).await);
}

#[tokio::test]
async fn test_class_method_invocation() {
    let h = harness();
    let log = run_and_fetch(&h, task_of(TaskType::ClassMethod, r#"Demo::greet("世界")"#, 0)).await;

    assert_eq!(log.status, RunLogStatus::Success);
    assert_eq!(log.output.as_deref(), Some("你好, \"世界\""));
}

#[tokio::test]
async fn test_unregistered_method_is_error() {
    let h = harness();
    let log = run_and_fetch(&h, task_of(TaskType::ClassMethod, "Demo::missing()", 0)).await;

    assert_eq!(log.status, RunLogStatus::Error);
    assert!(log.error.as_deref().unwrap().contains("未注册"));
}

#[tokio::test]
async fn test_unreachable_url_closes_exactly_once() {
    let h = harness();
    let mut task = task_of(TaskType::Url, "http://127.0.0.1:1/none", 60);
    task.timeout = 2;
    let log = run_and_fetch(&h, task).await;

    assert_eq!(log.status, RunLogStatus::Error);
    assert!(log.end_time.is_some());
    assert!(!h.lock.is_held(log.task_id).await);

    // 恰好一条error级事件，结束路径不重复发布
    let events = h.channel.published().await;
    let errors: Vec<_> = events
        .iter()
        .filter(|e| e.level == LogLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn test_unset_type_rejected_before_side_effects() {
    let h = harness();
    let log = run_and_fetch(&h, task_of(TaskType::Unset, "whatever", 0)).await;

    assert_eq!(log.status, RunLogStatus::Error);
    assert!(log.error.as_deref().unwrap().contains("类型未设置"));
}
