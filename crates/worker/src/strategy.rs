use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;

/// 执行并发策略
///
/// 决定一次任务执行相对于队列消费循环的调度方式。
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    async fn launch(&self, fut: BoxFuture<'static, ()>);
}

/// 并发执行：每个任务spawn独立执行，消费循环立即继续取下一个
pub struct ConcurrentStrategy;

#[async_trait]
impl ExecutionStrategy for ConcurrentStrategy {
    async fn launch(&self, fut: BoxFuture<'static, ()>) {
        tokio::spawn(fut);
    }
}

/// 串行执行：在消费循环内等待执行结束，同一进程内天然互斥
pub struct SerialStrategy;

#[async_trait]
impl ExecutionStrategy for SerialStrategy {
    async fn launch(&self, fut: BoxFuture<'static, ()>) {
        fut.await;
    }
}

/// 按配置值选择策略，未知取值回退为并发
pub fn strategy_from_mode(mode: &str) -> Box<dyn ExecutionStrategy> {
    match mode {
        "serial" => Box::new(SerialStrategy),
        "concurrent" => Box::new(ConcurrentStrategy),
        other => {
            warn!("未知的执行模式: {other}，回退为concurrent");
            Box::new(ConcurrentStrategy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_serial_strategy_waits_for_completion() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        SerialStrategy
            .launch(Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            }))
            .await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_concurrent_strategy_returns_before_completion() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        ConcurrentStrategy
            .launch(Box::pin(async move {
                let _ = rx.await;
                flag.store(true, Ordering::SeqCst);
            }))
            .await;
        // launch返回时任务仍被挂起，未完成
        assert!(!done.load(Ordering::SeqCst));
        tx.send(()).unwrap();
        tokio::task::yield_now().await;
    }
}
