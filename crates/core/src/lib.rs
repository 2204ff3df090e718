pub mod config;
pub mod cron;
pub mod errors;

pub use config::AppConfig;
pub use cron::CronSchedule;
pub use errors::{SecronError, SecronResult};
