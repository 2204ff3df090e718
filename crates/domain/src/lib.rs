pub mod entities;
pub mod events;
pub mod ports;
pub mod repositories;

pub use entities::{RunLog, RunLogStatus, Task, TaskStatus, TaskType};
pub use events::{BroadcastFrame, LogEvent, LogLevel};
pub use ports::{LogChannel, TaskLock, TaskQueue};
pub use repositories::{RunLogRepository, TaskRepository};
