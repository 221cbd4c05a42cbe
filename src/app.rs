use std::sync::Arc;

use anyhow::{Context, Result};
use crawler_config::AppConfig;
use crawler_dispatcher::{AdvanceOutcome, CrawlSteps, StepDependencies, TaskPipeline};
use crawler_domain::{
    ArtifactUploader, MetadataExtractor, NoopUploader, ProviderRegistry, SignalStore,
    TaskRepository, UrlDiscovery, UrlRepository, WorkerRepository,
};
use crawler_infrastructure::{
    DatabaseManager, PostgresTaskRepository, PostgresUrlRepository, PostgresWorkerRepository,
    RedisSignalStore,
};
use crawler_publisher::{ObjectStoreUploader, SitemapDiscovery};
use crawler_worker::{HttpMetadataExtractor, WorkerDependencies, WorkerLifecycle, WorkerRunOutcome};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 推进一个流水线步骤
    Master,
    /// 处理一个批次
    Worker,
}

/// 连接好的存储层，master、worker和cli共用
pub struct Application {
    config: Arc<AppConfig>,
    mode: AppMode,
    database: DatabaseManager,
    task_repo: Arc<dyn TaskRepository>,
    url_repo: Arc<dyn UrlRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    signal: Arc<dyn SignalStore>,
    /// 仅worker模式，关闭超时时用来释放持有的槽位
    worker: Option<WorkerLifecycle>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        if config.database.run_migrations {
            database.migrate().await.context("数据库迁移失败")?;
        }

        let signal = RedisSignalStore::connect(&config.redis)
            .await
            .context("连接Redis失败")?;

        let pool = database.pool().clone();
        let config = Arc::new(config);
        let url_repo: Arc<dyn UrlRepository> = Arc::new(PostgresUrlRepository::new(pool.clone()));
        let worker_repo: Arc<dyn WorkerRepository> =
            Arc::new(PostgresWorkerRepository::new(pool.clone()));
        let signal: Arc<dyn SignalStore> = Arc::new(signal);

        let worker = match mode {
            AppMode::Worker => Some(WorkerLifecycle::new(
                Arc::clone(&config),
                WorkerDependencies {
                    url_repo: Arc::clone(&url_repo),
                    worker_repo: Arc::clone(&worker_repo),
                    signal: Arc::clone(&signal),
                    extractor: build_extractor(&config)?,
                },
            )),
            AppMode::Master => None,
        };

        Ok(Self {
            config,
            mode,
            task_repo: Arc::new(PostgresTaskRepository::new(pool)),
            url_repo,
            worker_repo,
            signal,
            worker,
            database,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.database
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        Arc::clone(&self.task_repo)
    }

    pub fn url_repository(&self) -> Arc<dyn UrlRepository> {
        Arc::clone(&self.url_repo)
    }

    pub fn worker_repository(&self) -> Arc<dyn WorkerRepository> {
        Arc::clone(&self.worker_repo)
    }

    pub fn signal_store(&self) -> Arc<dyn SignalStore> {
        Arc::clone(&self.signal)
    }

    /// 预置任务以及它们需要的输出目录
    pub fn pipeline(&self) -> Result<TaskPipeline> {
        let steps = CrawlSteps::new(
            Arc::clone(&self.config),
            StepDependencies {
                task_repo: self.task_repository(),
                url_repo: self.url_repository(),
                worker_repo: self.worker_repository(),
                signal: self.signal_store(),
                discovery: build_discovery(&self.config)?,
                uploader: build_uploader(&self.config)?,
            },
        );
        Ok(TaskPipeline::new(self.task_repository(), Arc::new(steps)))
    }

    pub fn output_directories(&self) -> Vec<String> {
        self.config
            .storage
            .paths
            .all()
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect()
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match self.mode {
            AppMode::Master => self.run_master().await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
        }
    }

    /// `run` 在关闭超时后被取消时调用
    ///
    /// worker模式尽力释放槽位；master中断的任务停留在processing，
    /// 需要 `crawler-cli retry --force` 恢复
    pub async fn abandon(&self) {
        match &self.worker {
            Some(lifecycle) => lifecycle.release_held().await,
            None => warn!(
                "流水线步骤被中断，任务保持processing，需通过 crawler-cli retry --force 恢复"
            ),
        }
    }

    async fn run_master(&self) -> Result<()> {
        let pipeline = self.pipeline()?;
        let seeded = pipeline
            .bootstrap(&self.output_directories())
            .await
            .context("写入预置任务失败")?;
        if seeded > 0 {
            info!("写入 {} 个预置任务", seeded);
        }

        match pipeline.advance().await.context("推进流水线失败")? {
            AdvanceOutcome::Failed { task_id, error } => {
                // 已记录到任务表，需通过 crawler-cli retry 恢复
                error!("任务 {} 执行失败: {}", task_id, error);
            }
            AdvanceOutcome::Halted { task_id } => {
                warn!("流水线因任务 {} 失败而暂停", task_id);
            }
            outcome => info!("本次推进结果: {:?}", outcome),
        }
        Ok(())
    }

    async fn run_worker(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let lifecycle = self
            .worker
            .as_ref()
            .context("worker模式未初始化worker生命周期")?;

        match lifecycle.run_once(shutdown_rx).await.context("worker执行失败")? {
            WorkerRunOutcome::NotRunning(phase) => info!("抽取阶段为 {}，无需工作", phase),
            WorkerRunOutcome::NoCapacity => info!("没有空闲槽位"),
            WorkerRunOutcome::Processed { slot, report } => {
                info!("槽位 {} 执行结果: {:?}", slot, report)
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.database.close().await;
        info!("数据库连接池已关闭");
    }
}

/// 发现器注册表，sitemap作为默认实现
pub fn build_discovery(config: &AppConfig) -> Result<Arc<dyn UrlDiscovery>> {
    let sitemap: Arc<dyn UrlDiscovery> =
        Arc::new(SitemapDiscovery::new(&config.fetch).context("创建sitemap发现器失败")?);
    Ok(Arc::new(ProviderRegistry::<dyn UrlDiscovery>::new(sitemap)))
}

pub fn build_extractor(config: &AppConfig) -> Result<Arc<dyn MetadataExtractor>> {
    let http: Arc<dyn MetadataExtractor> =
        Arc::new(HttpMetadataExtractor::new(&config.fetch).context("创建元数据抽取器失败")?);
    Ok(Arc::new(ProviderRegistry::<dyn MetadataExtractor>::new(http)))
}

pub fn build_uploader(config: &AppConfig) -> Result<Arc<dyn ArtifactUploader>> {
    match &config.storage.upload {
        Some(upload) => {
            let uploader = ObjectStoreUploader::new(&upload.url)
                .with_context(|| format!("创建上传器失败: {}", upload.url))?;
            Ok(Arc::new(uploader))
        }
        None => Ok(Arc::new(NoopUploader)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawler_config::UploadConfig;

    #[test]
    fn test_uploader_defaults_to_noop() {
        let config = AppConfig::default();
        assert!(build_uploader(&config).is_ok());
    }

    #[test]
    fn test_unsupported_upload_scheme_is_rejected() {
        let mut config = AppConfig::default();
        config.storage.upload = Some(UploadConfig {
            url: "ftp://example.com/llms".to_string(),
        });
        assert!(build_uploader(&config).is_err());
    }

    #[test]
    fn test_collaborators_build_from_defaults() {
        let config = AppConfig::default();
        assert!(build_discovery(&config).is_ok());
        assert!(build_extractor(&config).is_ok());
    }
}
