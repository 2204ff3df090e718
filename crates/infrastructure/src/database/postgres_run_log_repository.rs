use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use secron_core::SecronResult;
use secron_domain::{RunLog, RunLogRepository, RunLogStatus};

use super::db_err;

const COLUMNS: &str =
    "id, cron_id, task_name, status, start_time, end_time, duration, pid, output, error";

/// 执行日志表的Postgres实现，列名cron_id等为持久化契约
pub struct PostgresRunLogRepository {
    pool: PgPool,
}

impl PostgresRunLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_run_log(row: &sqlx::postgres::PgRow) -> Result<RunLog, sqlx::Error> {
        Ok(RunLog {
            id: row.try_get("id")?,
            task_id: row.try_get("cron_id")?,
            task_name: row.try_get("task_name")?,
            status: row.try_get("status")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            duration: row.try_get("duration")?,
            pid: row.try_get("pid")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
        })
    }
}

#[async_trait]
impl RunLogRepository for PostgresRunLogRepository {
    async fn open(&self, run_log: &RunLog) -> SecronResult<i64> {
        let row = sqlx::query(
            "INSERT INTO secron_task_log (cron_id, task_name, status, start_time, pid) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(run_log.task_id)
        .bind(&run_log.task_name)
        .bind(run_log.status)
        .bind(run_log.start_time)
        .bind(run_log.pid)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.try_get("id").map_err(db_err)
    }

    async fn get_by_id(&self, id: i64) -> SecronResult<Option<RunLog>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM secron_task_log WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| Self::row_to_run_log(&r))
            .transpose()
            .map_err(db_err)
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
        sqlx::query(
            "UPDATE secron_task_log SET status = $2, end_time = $3, duration = $4, \
             output = COALESCE($5, output), error = COALESCE($6, error) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(end_time)
        .bind(duration)
        .bind(output)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_pid(&self, id: i64, pid: i64) -> SecronResult<()> {
        sqlx::query("UPDATE secron_task_log SET pid = $2 WHERE id = $1")
            .bind(id)
            .bind(pid)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_by_task(
        &self,
        task_id: i64,
        limit: i64,
        offset: i64,
    ) -> SecronResult<Vec<RunLog>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM secron_task_log WHERE cron_id = $1 \
             ORDER BY id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(task_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(Self::row_to_run_log)
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
    }
}
