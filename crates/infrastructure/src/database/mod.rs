mod postgres_run_log_repository;
mod postgres_task_repository;

pub use postgres_run_log_repository::PostgresRunLogRepository;
pub use postgres_task_repository::PostgresTaskRepository;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use secron_core::config::DatabaseConfig;
use secron_core::{SecronError, SecronResult};

/// 创建Postgres连接池
pub async fn create_pool(config: &DatabaseConfig) -> SecronResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
        .connect(&config.url)
        .await
        .map_err(|e| SecronError::Database(format!("连接数据库失败: {e}")))
}

pub(crate) fn db_err(e: sqlx::Error) -> SecronError {
    SecronError::Database(e.to_string())
}
