use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crawler_domain::{BatchClaim, Worker, WorkerRepository, WorkerStatus};
use crawler_errors::{CrawlerError, CrawlerResult};
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::mapping::{row_to_url, row_to_worker, URL_COLUMNS, WORKER_COLUMNS};

/// PostgreSQL Worker槽位仓储实现
pub struct PostgresWorkerRepository {
    pool: PgPool,
}

impl PostgresWorkerRepository {
    /// 创建新的PostgreSQL Worker仓储
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkerRepository for PostgresWorkerRepository {
    async fn find_all(&self) -> CrawlerResult<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers ORDER BY worker_type ASC, instance_number ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        rows.iter().map(row_to_worker).collect()
    }

    async fn find_by_id(&self, id: Uuid) -> CrawlerResult<Option<Worker>> {
        let row = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CrawlerError::Database)?;

        row.as_ref().map(row_to_worker).transpose()
    }

    async fn find_or_create(
        &self,
        worker_type: &str,
        instance_number: i32,
    ) -> CrawlerResult<Worker> {
        let candidate = Worker::new(worker_type, instance_number);
        let inserted = sqlx::query(
            r#"
            INSERT INTO workers (id, worker_type, instance_number, status, urls_processed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $5)
            ON CONFLICT (worker_type, instance_number) DO NOTHING
            "#,
        )
        .bind(candidate.id)
        .bind(worker_type)
        .bind(instance_number)
        .bind(WorkerStatus::Idle)
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        if inserted.rows_affected() > 0 {
            debug!("创建worker槽位 {}", candidate.slot_name());
        }

        let row = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE worker_type = $1 AND instance_number = $2"
        ))
        .bind(worker_type)
        .bind(instance_number)
        .fetch_one(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        row_to_worker(&row)
    }

    async fn delete_retired(&self, configured: &[(String, i32)]) -> CrawlerResult<u64> {
        let keep: HashSet<(&str, i32)> = configured
            .iter()
            .map(|(t, n)| (t.as_str(), *n))
            .collect();

        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;

        let rows = sqlx::query("SELECT id, worker_type, instance_number FROM workers FOR UPDATE")
            .fetch_all(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?;

        let mut retired = Vec::new();
        for row in &rows {
            let worker_type: String = row.try_get("worker_type")?;
            let instance_number: i32 = row.try_get("instance_number")?;
            if !keep.contains(&(worker_type.as_str(), instance_number)) {
                retired.push(row.try_get::<Uuid, _>("id")?);
                debug!("退役worker槽位 {}#{}", worker_type, instance_number);
            }
        }

        if retired.is_empty() {
            tx.commit().await.map_err(CrawlerError::Database)?;
            return Ok(0);
        }

        let released = sqlx::query(
            r#"
            UPDATE urls
            SET status = 'new', worker_id = NULL, batch_id = NULL, worker_type = NULL, updated_at = NOW()
            WHERE worker_id = ANY($1) AND status IN ('new', 'processing')
            "#,
        )
        .bind(&retired)
        .execute(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        let deleted = sqlx::query("DELETE FROM workers WHERE id = ANY($1)")
            .bind(&retired)
            .execute(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?;

        tx.commit().await.map_err(CrawlerError::Database)?;

        info!(
            "删除退役槽位 {} 个，释放URL {} 条",
            deleted.rows_affected(),
            released.rows_affected()
        );
        Ok(deleted.rows_affected())
    }

    async fn delete_if_unused(&self, id: Uuid, stale_before: DateTime<Utc>) -> CrawlerResult<bool> {
        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;

        let row = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        let Some(row) = row else {
            tx.commit().await.map_err(CrawlerError::Database)?;
            return Ok(false);
        };
        let worker = row_to_worker(&row)?;

        if worker.is_leased(stale_before) {
            tx.commit().await.map_err(CrawlerError::Database)?;
            return Ok(false);
        }

        let outstanding: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM urls WHERE worker_id = $1 AND status IN ('new', 'processing')",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        if outstanding > 0 {
            tx.commit().await.map_err(CrawlerError::Database)?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?;

        tx.commit().await.map_err(CrawlerError::Database)?;
        debug!("删除未分配到URL的槽位 {}", worker.slot_name());
        Ok(true)
    }

    async fn claim(
        &self,
        stale_threshold: Duration,
        holder: &str,
    ) -> CrawlerResult<Option<Worker>> {
        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;

        // SKIP LOCKED：并发认领者不会选中同一行
        let candidate = sqlx::query(
            r#"
            SELECT id, status FROM workers
            WHERE status = 'idle'
               OR (status = 'active'
                   AND (last_heartbeat IS NULL
                        OR last_heartbeat < NOW() - make_interval(secs => $1)))
            ORDER BY (status = 'idle') DESC, worker_type ASC, instance_number ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(stale_threshold.as_secs_f64())
        .fetch_optional(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        let Some(candidate) = candidate else {
            tx.commit().await.map_err(CrawlerError::Database)?;
            return Ok(None);
        };
        let id: Uuid = candidate.try_get("id")?;
        let previous: WorkerStatus = candidate.try_get("status")?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE workers
            SET status = 'active', urls_processed = 0, current_batch_id = NULL,
                last_heartbeat = NOW(), lease_holder = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {WORKER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(holder)
        .fetch_one(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        // 上一个持有者崩溃时留下的processing URL，放回new以便本次租约续做
        let orphans = sqlx::query(
            "UPDATE urls SET status = 'new', updated_at = NOW() WHERE worker_id = $1 AND status = 'processing'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        tx.commit().await.map_err(CrawlerError::Database)?;

        let worker = row_to_worker(&row)?;
        if previous == WorkerStatus::Active {
            warn!(
                "回收心跳过期的槽位 {}，恢复未完成URL {} 条",
                worker.slot_name(),
                orphans.rows_affected()
            );
        }
        Ok(Some(worker))
    }

    async fn heartbeat(&self, id: Uuid, holder: &str) -> CrawlerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workers SET last_heartbeat = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND lease_holder = $2
            "#,
        )
        .bind(id)
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_next_batch(&self, id: Uuid) -> CrawlerResult<BatchClaim> {
        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;

        sqlx::query("SELECT id FROM workers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?
            .ok_or_else(|| CrawlerError::worker_not_found(id.to_string()))?;

        let batch_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT batch_id FROM urls
            WHERE worker_id = $1 AND status = 'new' AND batch_id IS NOT NULL
            ORDER BY batch_id ASC
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        if let Some(batch_id) = batch_id {
            let rows = sqlx::query(&format!(
                r#"
                SELECT {URL_COLUMNS} FROM urls
                WHERE worker_id = $1 AND batch_id = $2 AND status = 'new'
                ORDER BY priority DESC, url ASC
                FOR UPDATE
                "#
            ))
            .bind(id)
            .bind(batch_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?;

            sqlx::query(
                "UPDATE workers SET current_batch_id = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(id)
            .bind(batch_id)
            .execute(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?;

            tx.commit().await.map_err(CrawlerError::Database)?;

            let urls = rows.iter().map(row_to_url).collect::<CrawlerResult<Vec<_>>>()?;
            debug!("认领批次 {}，共 {} 条URL", batch_id, urls.len());
            return Ok(BatchClaim::Claimed { batch_id, urls });
        }

        let outstanding: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM urls WHERE worker_id = $1 AND status IN ('new', 'processing')",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        if outstanding > 0 {
            tx.commit().await.map_err(CrawlerError::Database)?;
            return Ok(BatchClaim::Waiting { outstanding });
        }

        sqlx::query(
            "UPDATE workers SET status = 'completed', current_batch_id = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        tx.commit().await.map_err(CrawlerError::Database)?;
        info!("槽位 {} 已无剩余URL，标记为completed", id);
        Ok(BatchClaim::Exhausted)
    }

    async fn release(&self, id: Uuid, holder: &str) -> CrawlerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workers
            SET current_batch_id = NULL,
                status = CASE WHEN status = 'completed' THEN status ELSE 'idle' END,
                lease_holder = NULL,
                updated_at = NOW()
            WHERE id = $1 AND lease_holder = $2
            "#,
        )
        .bind(id)
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        debug!("释放槽位 {}，生效 {} 行", id, result.rows_affected());
        Ok(result.rows_affected() > 0)
    }
}
