use async_trait::async_trait;
use crawler_domain::{Task, TaskClaim, TaskDetails, TaskRepository, TaskStatus};
use crawler_errors::{CrawlerError, CrawlerResult};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::database::mapping::{row_to_task, TASK_COLUMNS};

/// PostgreSQL任务仓储实现
pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    /// 创建新的PostgreSQL任务仓储
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn seed(&self, tasks: &[Task]) -> CrawlerResult<u64> {
        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;
        let mut inserted = 0;

        for task in tasks {
            let result = sqlx::query(
                r#"
                INSERT INTO tasks (id, task_type, name, description, status, position, details, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&task.id)
            .bind(task.task_type)
            .bind(&task.name)
            .bind(&task.description)
            .bind(task.status)
            .bind(task.position)
            .bind(Json(&task.details))
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(CrawlerError::Database)?;

        if inserted > 0 {
            info!("写入预置任务 {} 个", inserted);
        }
        Ok(inserted)
    }

    async fn find_all(&self) -> CrawlerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY position ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn find_by_id(&self, id: &str) -> CrawlerResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CrawlerError::Database)?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn begin_next(&self) -> CrawlerResult<TaskClaim> {
        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;

        // 锁住全部任务行，并发的master在此串行化
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY position ASC FOR UPDATE"
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        let tasks = rows.iter().map(row_to_task).collect::<CrawlerResult<Vec<_>>>()?;

        if let Some(running) = tasks.iter().find(|t| t.is_processing()) {
            tx.commit().await.map_err(CrawlerError::Database)?;
            return Ok(TaskClaim::Busy(running.clone()));
        }

        if let Some(failed) = tasks.iter().find(|t| t.status == TaskStatus::Error) {
            tx.commit().await.map_err(CrawlerError::Database)?;
            return Ok(TaskClaim::Halted(failed.clone()));
        }

        let Some(mut next) = tasks.into_iter().find(|t| t.status == TaskStatus::Todo) else {
            tx.commit().await.map_err(CrawlerError::Database)?;
            return Ok(TaskClaim::Idle);
        };

        sqlx::query(
            "UPDATE tasks SET status = $2, error = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(&next.id)
        .bind(TaskStatus::Processing)
        .execute(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        tx.commit().await.map_err(CrawlerError::Database)?;

        next.status = TaskStatus::Processing;
        next.error = None;
        debug!("任务 {} 进入processing", next.id);
        Ok(TaskClaim::Claimed(next))
    }

    async fn finish(
        &self,
        id: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> CrawlerResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = $2, error = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CrawlerError::task_not_found(id));
        }

        debug!("任务 {} 状态更新为 {}", id, status.as_str());
        Ok(())
    }

    async fn update_details(&self, id: &str, details: &TaskDetails) -> CrawlerResult<()> {
        let result =
            sqlx::query("UPDATE tasks SET details = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(Json(details))
                .execute(&self.pool)
                .await
                .map_err(CrawlerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CrawlerError::task_not_found(id));
        }
        Ok(())
    }

    async fn reset(&self, ids: &[String]) -> CrawlerResult<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'todo', error = NULL, updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        debug!("重置任务 {:?}", ids);
        Ok(result.rows_affected())
    }
}
