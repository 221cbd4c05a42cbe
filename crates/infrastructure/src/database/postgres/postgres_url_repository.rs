use async_trait::async_trait;
use crawler_domain::{
    BatchOwner, CrawlUrl, DiscoveredUrl, Metadata, PublishedPage, UrlRepository, UrlStatus, Worker,
    WorkerStatus, DEFAULT_CLASSIFICATION, DEFAULT_URL_PRIORITY,
};
use crawler_errors::{CrawlerError, CrawlerResult};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::mapping::{row_to_published, row_to_url, URL_COLUMNS};

/// 单条INSERT写入的最大行数
const UPSERT_CHUNK: usize = 1000;

/// PostgreSQL URL与元数据仓储实现
pub struct PostgresUrlRepository {
    pool: PgPool,
}

impl PostgresUrlRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 锁住槽位行，确认仍为active且由 `owner.holder` 持有
    ///
    /// 与 `claim` 回收槽位互斥：回收提交后这里看到的是新的持有者
    async fn lock_owner(
        tx: &mut Transaction<'_, Postgres>,
        owner: &BatchOwner,
    ) -> CrawlerResult<bool> {
        let held: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM workers WHERE id = $1 AND status = 'active' AND lease_holder = $2 FOR UPDATE",
        )
        .bind(owner.worker_id)
        .bind(&owner.holder)
        .fetch_optional(&mut **tx)
        .await
        .map_err(CrawlerError::Database)?;
        Ok(held.is_some())
    }

    /// 把URL从 `from` 状态改为 `to`，仅限仍属于owner批次的行
    async fn transition_owned(
        tx: &mut Transaction<'_, Postgres>,
        url_id: Uuid,
        owner: &BatchOwner,
        from: UrlStatus,
        to: UrlStatus,
    ) -> CrawlerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE urls SET status = $5, updated_at = NOW()
            WHERE id = $1 AND worker_id = $2 AND batch_id = $3 AND status = $4
            "#,
        )
        .bind(url_id)
        .bind(owner.worker_id)
        .bind(owner.batch_id)
        .bind(from)
        .bind(to)
        .execute(&mut **tx)
        .await
        .map_err(CrawlerError::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

fn lost_lease(action: &str, url_id: Uuid, owner: &BatchOwner) {
    warn!(
        url_id = %url_id,
        batch_id = owner.batch_id,
        holder = %owner.holder,
        "{}被拒绝：URL已不属于当前租约",
        action
    );
}

#[async_trait]
impl UrlRepository for PostgresUrlRepository {
    async fn upsert_discovered(&self, domain: &str, urls: &[DiscoveredUrl]) -> CrawlerResult<u64> {
        // 同一条语句里 ON CONFLICT 不能两次命中同一行
        let mut seen = HashSet::new();
        let unique: Vec<&DiscoveredUrl> = urls.iter().filter(|u| seen.insert(&u.url)).collect();

        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;
        let mut written = 0;

        for chunk in unique.chunks(UPSERT_CHUNK) {
            let ids: Vec<Uuid> = chunk.iter().map(|_| Uuid::new_v4()).collect();
            let links: Vec<String> = chunk.iter().map(|u| u.url.clone()).collect();
            let priorities: Vec<f64> = chunk
                .iter()
                .map(|u| u.priority.unwrap_or(DEFAULT_URL_PRIORITY))
                .collect();
            let lastmods: Vec<Option<String>> = chunk.iter().map(|u| u.lastmod.clone()).collect();
            let classifications: Vec<String> = chunk
                .iter()
                .map(|u| {
                    u.classification
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CLASSIFICATION.to_string())
                })
                .collect();

            let result = sqlx::query(
                r#"
                INSERT INTO urls (id, url, domain, status, priority, lastmod, classification)
                SELECT id, url, $2, 'new', priority, lastmod, classification
                FROM UNNEST($1::uuid[], $3::text[], $4::float8[], $5::text[], $6::text[])
                    AS t(id, url, priority, lastmod, classification)
                ON CONFLICT (url) DO UPDATE SET
                    priority = EXCLUDED.priority,
                    lastmod = EXCLUDED.lastmod,
                    classification = EXCLUDED.classification,
                    updated_at = NOW()
                "#,
            )
            .bind(&ids)
            .bind(domain)
            .bind(&links)
            .bind(&priorities)
            .bind(&lastmods)
            .bind(&classifications)
            .execute(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?;

            written += result.rows_affected();
        }

        tx.commit().await.map_err(CrawlerError::Database)?;
        debug!("域名 {} 写入URL {} 条", domain, written);
        Ok(written)
    }

    async fn requeue_failed(&self, max_retries: u32) -> CrawlerResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE urls
            SET status = 'new', worker_id = NULL, batch_id = NULL, worker_type = NULL, updated_at = NOW()
            WHERE status = 'failed' AND retries < $1
            "#,
        )
        .bind(max_retries as i32)
        .execute(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        if result.rows_affected() > 0 {
            info!("{} 条失败URL重新进入待分配队列", result.rows_affected());
        }
        Ok(result.rows_affected())
    }

    async fn find_unassigned(&self) -> CrawlerResult<Vec<CrawlUrl>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {URL_COLUMNS} FROM urls
            WHERE status = 'new' AND (batch_id IS NULL OR worker_id IS NULL)
            ORDER BY priority DESC, url ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        rows.iter().map(row_to_url).collect()
    }

    async fn assign_batch(&self, worker: &Worker, url_ids: &[Uuid]) -> CrawlerResult<(i64, u64)> {
        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;

        let status_row = sqlx::query("SELECT status FROM workers WHERE id = $1 FOR UPDATE")
            .bind(worker.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?
            .ok_or_else(|| CrawlerError::worker_not_found(worker.id.to_string()))?;
        let status: WorkerStatus = status_row.try_get("status")?;

        let batch_id: i64 = sqlx::query_scalar("SELECT nextval('url_batch_seq')")
            .fetch_one(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?;

        let result = sqlx::query(
            r#"
            UPDATE urls
            SET batch_id = $1, worker_id = $2, worker_type = $3, updated_at = NOW()
            WHERE id = ANY($4) AND status = 'new' AND (batch_id IS NULL OR worker_id IS NULL)
            "#,
        )
        .bind(batch_id)
        .bind(worker.id)
        .bind(&worker.worker_type)
        .bind(url_ids)
        .execute(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        let assigned = result.rows_affected();
        if assigned > 0 && status == WorkerStatus::Completed {
            sqlx::query("UPDATE workers SET status = 'idle', updated_at = NOW() WHERE id = $1")
                .bind(worker.id)
                .execute(&mut *tx)
                .await
                .map_err(CrawlerError::Database)?;
            debug!("槽位 {} 收到新批次，重新开放", worker.slot_name());
        }

        tx.commit().await.map_err(CrawlerError::Database)?;
        Ok((batch_id, assigned))
    }

    async fn count_outstanding(&self, max_retries: u32, unroutable: &[Uuid]) -> CrawlerResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM urls
            WHERE (status IN ('new', 'processing') OR (status = 'failed' AND retries < $1))
              AND NOT (id = ANY($2))
            "#,
        )
        .bind(max_retries as i32)
        .bind(unroutable)
        .fetch_one(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;
        Ok(count)
    }

    async fn count_by_status(&self) -> CrawlerResult<Vec<(UrlStatus, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM urls GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        rows.iter()
            .map(|row| -> CrawlerResult<(UrlStatus, i64)> {
                Ok((row.try_get("status")?, row.try_get("count")?))
            })
            .collect()
    }

    async fn mark_processing(&self, url_id: Uuid, owner: &BatchOwner) -> CrawlerResult<bool> {
        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;

        let owned = Self::lock_owner(&mut tx, owner).await?
            && Self::transition_owned(&mut tx, url_id, owner, UrlStatus::New, UrlStatus::Processing)
                .await?;
        if !owned {
            lost_lease("标记processing", url_id, owner);
            return Ok(false);
        }

        tx.commit().await.map_err(CrawlerError::Database)?;
        Ok(true)
    }

    async fn complete(
        &self,
        url_id: Uuid,
        owner: &BatchOwner,
        metadata: &Metadata,
    ) -> CrawlerResult<bool> {
        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;

        let owned = Self::lock_owner(&mut tx, owner).await?
            && Self::transition_owned(&mut tx, url_id, owner, UrlStatus::Processing, UrlStatus::Done)
                .await?;
        if !owned {
            // 事务在drop时回滚
            lost_lease("写入元数据", url_id, owner);
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO metadata (id, url_id, title, description, author, date, extras, parsed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (url_id) DO NOTHING
            "#,
        )
        .bind(metadata.id)
        .bind(url_id)
        .bind(&metadata.title)
        .bind(&metadata.description)
        .bind(&metadata.author)
        .bind(&metadata.date)
        .bind(&metadata.extras)
        .bind(metadata.parsed_at)
        .execute(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        sqlx::query(
            "UPDATE workers SET urls_processed = urls_processed + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(owner.worker_id)
        .execute(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        tx.commit().await.map_err(CrawlerError::Database)?;
        Ok(true)
    }

    async fn fail(&self, url_id: Uuid, owner: &BatchOwner) -> CrawlerResult<bool> {
        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;

        if !Self::lock_owner(&mut tx, owner).await? {
            lost_lease("标记failed", url_id, owner);
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE urls
            SET status = 'failed', worker_id = NULL, batch_id = NULL, worker_type = NULL,
                retries = retries + 1, updated_at = NOW()
            WHERE id = $1 AND worker_id = $2 AND batch_id = $3 AND status = 'processing'
            "#,
        )
        .bind(url_id)
        .bind(owner.worker_id)
        .bind(owner.batch_id)
        .execute(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        if result.rows_affected() == 0 {
            lost_lease("标记failed", url_id, owner);
            return Ok(false);
        }

        tx.commit().await.map_err(CrawlerError::Database)?;
        Ok(true)
    }

    async fn find_published(&self, domain: &str) -> CrawlerResult<Vec<PublishedPage>> {
        let rows = sqlx::query(
            r#"
            SELECT u.url, u.classification, m.id AS metadata_id, m.url_id, m.title,
                   m.description, m.author, m.date, m.extras, m.parsed_at
            FROM urls u
            JOIN metadata m ON m.url_id = u.id
            WHERE u.domain = $1 AND u.status = 'done'
            ORDER BY u.classification ASC, u.priority DESC, u.url ASC
            "#,
        )
        .bind(domain)
        .fetch_all(&self.pool)
        .await
        .map_err(CrawlerError::Database)?;

        rows.iter().map(row_to_published).collect()
    }

    async fn reset_crawl_state(&self) -> CrawlerResult<()> {
        let mut tx = self.pool.begin().await.map_err(CrawlerError::Database)?;

        let metadata = sqlx::query("DELETE FROM metadata")
            .execute(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?;

        let urls = sqlx::query(
            r#"
            UPDATE urls
            SET status = 'new', worker_id = NULL, batch_id = NULL, worker_type = NULL,
                retries = 0, updated_at = NOW()
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(CrawlerError::Database)?;

        let workers = sqlx::query("DELETE FROM workers")
            .execute(&mut *tx)
            .await
            .map_err(CrawlerError::Database)?;

        tx.commit().await.map_err(CrawlerError::Database)?;

        info!(
            metadata = metadata.rows_affected(),
            urls = urls.rows_affected(),
            workers = workers.rows_affected(),
            "抓取状态已重置"
        );
        Ok(())
    }
}
