use std::time::Duration;

use async_trait::async_trait;
use secron_core::SecronResult;
use tokio::sync::mpsc;

use crate::entities::Task;
use crate::events::LogEvent;

/// 调度器与执行进程之间的交接队列（FIFO，至少一次投递）
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 将任务完整记录推入队列
    async fn push(&self, task: &Task) -> SecronResult<()>;

    /// 带超时的阻塞弹出；超时返回None以便调用方做存活检查
    async fn pop_timeout(&self, timeout: Duration) -> SecronResult<Option<Task>>;
}

/// TTL互斥锁。键按任务ID区分，锁的存在表示"相信有一次执行在途"。
///
/// 锁不记录持有者身份，任何持有键名的一方都可以释放。
/// TTL短于实际执行时长时锁会中途过期，这里保持宽容语义，不做续约。
#[async_trait]
pub trait TaskLock: Send + Sync {
    /// set-if-absent加锁；已被持有时返回false
    async fn acquire(&self, task_id: i64, ttl: Duration) -> SecronResult<bool>;

    /// 无条件删除锁
    async fn release(&self, task_id: i64) -> SecronResult<()>;
}

/// 执行日志的发布/订阅通道
#[async_trait]
pub trait LogChannel: Send + Sync {
    /// 发布一条日志事件；失败由调用方记录日志后吞掉，绝不中断执行
    async fn publish(&self, event: &LogEvent) -> SecronResult<()>;

    /// 订阅日志频道，返回(频道名, 原始JSON)流
    async fn subscribe(&self) -> SecronResult<mpsc::Receiver<(String, String)>>;
}
