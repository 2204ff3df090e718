//! 基于Redis的协调代理：交接队列(LPUSH/BRPOP)、TTL互斥锁(SET NX EX)、
//! 日志发布订阅(PUBLISH/SUBSCRIBE)

mod channel;
mod connection;
mod lock;
mod queue;

pub use channel::RedisLogChannel;
pub use connection::RedisConnection;
pub use lock::RedisTaskLock;
pub use queue::RedisTaskQueue;
