pub mod mapping;
pub mod postgres;

use crawler_config::DatabaseConfig;
use crawler_errors::{CrawlerError, CrawlerResult};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 数据库连接池管理器
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// 创建新的数据库管理器
    pub async fn new(config: &DatabaseConfig) -> CrawlerResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.url)
            .await
            .map_err(CrawlerError::Database)?;

        debug!("数据库连接池已创建");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 获取数据库连接池
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 运行数据库迁移
    pub async fn migrate(&self) -> CrawlerResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("数据库迁移完成");
        Ok(())
    }

    /// 删除全部表后重新迁移
    pub async fn reset_schema(&self) -> CrawlerResult<()> {
        warn!("重置数据库结构，所有抓取数据将被删除");
        for statement in [
            "DROP TABLE IF EXISTS metadata CASCADE",
            "DROP TABLE IF EXISTS urls CASCADE",
            "DROP TABLE IF EXISTS workers CASCADE",
            "DROP TABLE IF EXISTS tasks CASCADE",
            "DROP SEQUENCE IF EXISTS url_batch_seq",
            "DROP TABLE IF EXISTS _sqlx_migrations",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(CrawlerError::Database)?;
        }
        self.migrate().await
    }

    /// 检查数据库连接健康状态
    pub async fn health_check(&self) -> CrawlerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(CrawlerError::Database)?;
        Ok(())
    }

    /// 关闭数据库连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
