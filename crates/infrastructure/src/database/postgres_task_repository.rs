use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use secron_core::SecronResult;
use secron_domain::{Task, TaskRepository, TaskStatus};

use super::db_err;

const COLUMNS: &str = "id, name, command, task_type, cron_expression, timeout, \
                       lock_time, status, last_run_time, next_run_time";

/// 任务表的Postgres实现
pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> Result<Task, sqlx::Error> {
        Ok(Task {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            command: row.try_get("command")?,
            task_type: row.try_get("task_type")?,
            cron_expression: row.try_get("cron_expression")?,
            timeout: row.try_get("timeout")?,
            lock_time: row.try_get("lock_time")?,
            status: row.try_get("status")?,
            last_run_time: row.try_get("last_run_time")?,
            next_run_time: row.try_get("next_run_time")?,
        })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn create(&self, task: &Task) -> SecronResult<Task> {
        let row = sqlx::query(
            "INSERT INTO secron_task \
             (name, command, task_type, cron_expression, timeout, lock_time, status, \
              last_run_time, next_run_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING id",
        )
        .bind(&task.name)
        .bind(&task.command)
        .bind(task.task_type)
        .bind(&task.cron_expression)
        .bind(task.timeout)
        .bind(task.lock_time)
        .bind(task.status)
        .bind(task.last_run_time)
        .bind(task.next_run_time)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let mut created = task.clone();
        created.id = row.try_get("id").map_err(db_err)?;
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SecronResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM secron_task WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| Self::row_to_task(&r)).transpose().map_err(db_err)
    }

    async fn update(&self, task: &Task) -> SecronResult<()> {
        sqlx::query(
            "UPDATE secron_task SET name = $2, command = $3, task_type = $4, \
             cron_expression = $5, timeout = $6, lock_time = $7, status = $8, \
             last_run_time = $9, next_run_time = $10 \
             WHERE id = $1",
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(&task.command)
        .bind(task.task_type)
        .bind(&task.cron_expression)
        .bind(task.timeout)
        .bind(task.lock_time)
        .bind(task.status)
        .bind(task.last_run_time)
        .bind(task.next_run_time)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> SecronResult<()> {
        sqlx::query("DELETE FROM secron_task WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_due_tasks(&self, now: DateTime<Utc>) -> SecronResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM secron_task \
             WHERE status = $1 AND (next_run_time <= $2 OR next_run_time IS NULL) \
             ORDER BY id"
        ))
        .bind(TaskStatus::Enabled)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(Self::row_to_task)
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    async fn list(&self, limit: i64, offset: i64) -> SecronResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM secron_task ORDER BY id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(Self::row_to_task)
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    async fn set_status(&self, id: i64, status: TaskStatus) -> SecronResult<()> {
        sqlx::query("UPDATE secron_task SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn set_run_times(
        &self,
        id: i64,
        last_run_time: DateTime<Utc>,
        next_run_time: Option<DateTime<Utc>>,
    ) -> SecronResult<()> {
        sqlx::query(
            "UPDATE secron_task SET last_run_time = $2, next_run_time = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(last_run_time)
        .bind(next_run_time)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_next_run_time(
        &self,
        id: i64,
        next_run_time: Option<DateTime<Utc>>,
    ) -> SecronResult<()> {
        sqlx::query("UPDATE secron_task SET next_run_time = $2 WHERE id = $1")
            .bind(id)
            .bind(next_run_time)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
