use async_trait::async_trait;
use crawler_config::RedisConfig;
use crawler_domain::{ExtractionPhase, SignalStore, EXTRACTION_PHASE_KEY};
use crawler_errors::{CrawlerError, CrawlerResult};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// 基于Redis单个键的抽取阶段信号
#[derive(Clone)]
pub struct RedisSignalStore {
    connection: ConnectionManager,
    key: String,
}

impl RedisSignalStore {
    pub async fn connect(config: &RedisConfig) -> CrawlerResult<Self> {
        let client = Client::open(config.connection_url()).map_err(|e| {
            CrawlerError::SignalStore(format!("创建Redis客户端失败: {e}"))
        })?;

        let connection = timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| {
            CrawlerError::SignalStore(format!(
                "连接Redis超时 {}:{}",
                config.host, config.port
            ))
        })??;

        debug!("已连接Redis {}:{}", config.host, config.port);
        Ok(Self {
            connection,
            key: Self::key_for(config.key_prefix.as_deref()),
        })
    }

    fn key_for(prefix: Option<&str>) -> String {
        match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{EXTRACTION_PHASE_KEY}"),
            _ => EXTRACTION_PHASE_KEY.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl SignalStore for RedisSignalStore {
    async fn get_phase(&self) -> CrawlerResult<ExtractionPhase> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(&self.key).await?;
        match value {
            Some(value) => value.parse(),
            None => Ok(ExtractionPhase::NotRunning),
        }
    }

    async fn set_phase(&self, phase: ExtractionPhase) -> CrawlerResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(&self.key, phase.as_str()).await?;
        info!("抽取阶段信号更新为 {}", phase);
        Ok(())
    }
}
