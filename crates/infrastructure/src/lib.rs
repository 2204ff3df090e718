pub mod database;
pub mod in_memory;
pub mod redis_broker;

pub use database::{
    create_pool, PostgresRunLogRepository, PostgresTaskRepository,
};
pub use redis_broker::{RedisConnection, RedisLogChannel, RedisTaskLock, RedisTaskQueue};
