pub mod invoker;
pub mod runner;
pub mod service;
pub mod strategy;

pub use invoker::MethodRegistry;
pub use runner::TaskRunner;
pub use service::WorkerService;
pub use strategy::{strategy_from_mode, ConcurrentStrategy, ExecutionStrategy, SerialStrategy};
