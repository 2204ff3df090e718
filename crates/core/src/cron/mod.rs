//! 秒级Cron表达式引擎
//!
//! 支持6或7个字段（秒 分 时 日 月 周 [年]），周字段0=周日。
//! 日与周字段同时生效（交集语义），越界的字面量会被静默丢弃。

mod parser;
mod schedule;

pub use schedule::{next_run_time, CronSchedule};

/// 校验Cron表达式是否合法，永不panic
pub fn validate(expression: &str) -> bool {
    CronSchedule::parse(expression).is_ok()
}
