//! 进程内实现的队列/锁/日志通道/存储
//!
//! 供测试与单机嵌入式部署使用，行为与Redis/Postgres实现对齐。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::time::Instant;

use secron_core::{SecronError, SecronResult};
use secron_domain::{
    LogChannel, LogEvent, RunLog, RunLogRepository, RunLogStatus, Task, TaskLock, TaskQueue,
    TaskRepository, TaskStatus,
};

/// 内存FIFO交接队列
#[derive(Default)]
pub struct InMemoryTaskQueue {
    items: Mutex<VecDeque<Task>>,
    notify: Notify,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn push(&self, task: &Task) -> SecronResult<()> {
        self.items.lock().await.push_back(task.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop_timeout(&self, timeout: Duration) -> SecronResult<Option<Task>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = self.items.lock().await.pop_front() {
                return Ok(Some(task));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            // 等待新元素或超时，唤醒后重新检查队列
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
            if Instant::now() >= deadline {
                return Ok(self.items.lock().await.pop_front());
            }
        }
    }
}

/// 内存TTL互斥锁
#[derive(Default)]
pub struct InMemoryTaskLock {
    held: Mutex<HashMap<i64, Instant>>,
}

impl InMemoryTaskLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_held(&self, task_id: i64) -> bool {
        let mut held = self.held.lock().await;
        Self::purge_expired(&mut held);
        held.contains_key(&task_id)
    }

    fn purge_expired(held: &mut HashMap<i64, Instant>) {
        let now = Instant::now();
        held.retain(|_, expires| *expires > now);
    }
}

#[async_trait]
impl TaskLock for InMemoryTaskLock {
    async fn acquire(&self, task_id: i64, ttl: Duration) -> SecronResult<bool> {
        let mut held = self.held.lock().await;
        Self::purge_expired(&mut held);
        if held.contains_key(&task_id) {
            return Ok(false);
        }
        held.insert(task_id, Instant::now() + ttl);
        Ok(true)
    }

    async fn release(&self, task_id: i64) -> SecronResult<()> {
        self.held.lock().await.remove(&task_id);
        Ok(())
    }
}

/// 内存日志通道，保留已发布事件供测试断言
#[derive(Default)]
pub struct InMemoryLogChannel {
    channel_name: String,
    subscribers: Mutex<Vec<mpsc::Sender<(String, String)>>>,
    published: Mutex<Vec<LogEvent>>,
}

impl InMemoryLogChannel {
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            subscribers: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    /// 全部已发布事件的快照
    pub async fn published(&self) -> Vec<LogEvent> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl LogChannel for InMemoryLogChannel {
    async fn publish(&self, event: &LogEvent) -> SecronResult<()> {
        let payload = serde_json::to_string(event)?;
        self.published.lock().await.push(event.clone());

        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| {
            tx.try_send((self.channel_name.clone(), payload.clone()))
                .is_ok()
        });
        Ok(())
    }

    async fn subscribe(&self) -> SecronResult<mpsc::Receiver<(String, String)>> {
        let (tx, rx) = mpsc::channel(1024);
        self.subscribers.lock().await.push(tx);
        Ok(rx)
    }
}

/// 内存任务表
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<i64, Task>>,
    next_id: AtomicI64,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> SecronResult<Task> {
        let mut created = task.clone();
        created.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.tasks.write().await.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SecronResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn update(&self, task: &Task) -> SecronResult<()> {
        let mut tasks = self.tasks.write().await;
        if !tasks.contains_key(&task.id) {
            return Err(SecronError::TaskNotFound { id: task.id });
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn delete(&self, id: i64) -> SecronResult<()> {
        self.tasks.write().await.remove(&id);
        Ok(())
    }

    async fn get_due_tasks(&self, now: DateTime<Utc>) -> SecronResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut due: Vec<Task> = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Enabled
                    && t.next_run_time.map(|n| n <= now).unwrap_or(true)
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| t.id);
        Ok(due)
    }

    async fn list(&self, limit: i64, offset: i64) -> SecronResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut all: Vec<Task> = tasks.values().cloned().collect();
        all.sort_by_key(|t| std::cmp::Reverse(t.id));
        Ok(all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn set_status(&self, id: i64, status: TaskStatus) -> SecronResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or(SecronError::TaskNotFound { id })?;
        task.status = status;
        Ok(())
    }

    async fn set_run_times(
        &self,
        id: i64,
        last_run_time: DateTime<Utc>,
        next_run_time: Option<DateTime<Utc>>,
    ) -> SecronResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or(SecronError::TaskNotFound { id })?;
        task.last_run_time = Some(last_run_time);
        task.next_run_time = next_run_time;
        Ok(())
    }

    async fn set_next_run_time(
        &self,
        id: i64,
        next_run_time: Option<DateTime<Utc>>,
    ) -> SecronResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or(SecronError::TaskNotFound { id })?;
        task.next_run_time = next_run_time;
        Ok(())
    }
}

/// 内存执行日志表
#[derive(Default)]
pub struct InMemoryRunLogRepository {
    logs: RwLock<HashMap<i64, RunLog>>,
    next_id: AtomicI64,
}

impl InMemoryRunLogRepository {
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl RunLogRepository for InMemoryRunLogRepository {
    async fn open(&self, run_log: &RunLog) -> SecronResult<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = run_log.clone();
        stored.id = id;
        self.logs.write().await.insert(id, stored);
        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> SecronResult<Option<RunLog>> {
        Ok(self.logs.read().await.get(&id).cloned())
    }

    async fn close(
        &self,
        id: i64,
        status: RunLogStatus,
        end_time: DateTime<Utc>,
        duration: i64,
        output: Option<String>,
        error: Option<String>,
    ) -> SecronResult<()> {
        let mut logs = self.logs.write().await;
        let log = logs
            .get_mut(&id)
            .ok_or(SecronError::RunLogNotFound { id })?;
        log.status = status;
        log.end_time = Some(end_time);
        log.duration = Some(duration);
        if output.is_some() {
            log.output = output;
        }
        if error.is_some() {
            log.error = error;
        }
        Ok(())
    }

    async fn update_pid(&self, id: i64, pid: i64) -> SecronResult<()> {
        let mut logs = self.logs.write().await;
        let log = logs
            .get_mut(&id)
            .ok_or(SecronError::RunLogNotFound { id })?;
        log.pid = Some(pid);
        Ok(())
    }

    async fn list_by_task(
        &self,
        task_id: i64,
        limit: i64,
        offset: i64,
    ) -> SecronResult<Vec<RunLog>> {
        let logs = self.logs.read().await;
        let mut matched: Vec<RunLog> = logs
            .values()
            .filter(|l| l.task_id == task_id)
            .cloned()
            .collect();
        matched.sort_by_key(|l| std::cmp::Reverse(l.id));
        Ok(matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}
