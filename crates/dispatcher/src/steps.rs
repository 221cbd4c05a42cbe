//! 各流水线步骤的具体实现

use async_trait::async_trait;
use chrono::Utc;
use crawler_config::AppConfig;
use crawler_domain::schedule::next_run;
use crawler_domain::{
    ArtifactUploader, ExtractionPhase, SignalStore, Task, TaskDetails, TaskRepository, TaskType,
    UrlDiscovery, UrlRepository, WorkerRepository,
};
use crawler_errors::CrawlerResult;
use crawler_publisher::OutputVersionManager;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::distribution::BatchDistributor;
use crate::pipeline::{StepHandler, StepOutcome};

/// 步骤处理器依赖的仓储和协作者
#[derive(Clone)]
pub struct StepDependencies {
    pub task_repo: Arc<dyn TaskRepository>,
    pub url_repo: Arc<dyn UrlRepository>,
    pub worker_repo: Arc<dyn WorkerRepository>,
    pub signal: Arc<dyn SignalStore>,
    pub discovery: Arc<dyn UrlDiscovery>,
    pub uploader: Arc<dyn ArtifactUploader>,
}

pub struct CrawlSteps {
    config: Arc<AppConfig>,
    deps: StepDependencies,
    distributor: BatchDistributor,
    publisher: OutputVersionManager,
}

impl CrawlSteps {
    pub fn new(config: Arc<AppConfig>, deps: StepDependencies) -> Self {
        let distributor =
            BatchDistributor::new(&config, deps.url_repo.clone(), deps.worker_repo.clone());
        let publisher = OutputVersionManager::new(
            config.storage.clone(),
            config.domains.clone(),
            deps.url_repo.clone(),
        );
        Self {
            config,
            deps,
            distributor,
            publisher,
        }
    }

    async fn setup(&self, directories: &[String]) -> CrawlerResult<StepOutcome> {
        let directories: Vec<String> = if directories.is_empty() {
            self.config
                .storage
                .paths
                .all()
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect()
        } else {
            directories.to_vec()
        };

        for dir in &directories {
            fs::create_dir_all(dir).await?;
            debug!("目录已就绪: {}", dir);
        }
        info!("初始化完成，目录 {} 个", directories.len());
        Ok(StepOutcome::Done)
    }

    async fn discover_urls(&self) -> CrawlerResult<StepOutcome> {
        let mut total = 0;
        for domain in self.config.domains_by_priority() {
            let urls = self.deps.discovery.discover(&domain.domain).await;
            if urls.is_empty() {
                warn!("域名 {} 没有发现任何URL", domain.domain);
                continue;
            }
            let written = self
                .deps
                .url_repo
                .upsert_discovered(&domain.domain, &urls)
                .await?;
            info!("域名 {} 发现URL {} 条", domain.domain, written);
            total += written;
        }
        info!("URL发现完成，共 {} 条", total);
        Ok(StepOutcome::Done)
    }

    async fn extract_metadata(
        &self,
        task: &Task,
        distribution_passes: u32,
    ) -> CrawlerResult<StepOutcome> {
        self.deps.signal.set_phase(ExtractionPhase::Running).await?;

        let report = self.distributor.distribute().await?;
        self.deps
            .task_repo
            .update_details(
                &task.id,
                &TaskDetails::MetadataExtraction {
                    distribution_passes: distribution_passes + 1,
                },
            )
            .await?;

        let outstanding = self
            .deps
            .url_repo
            .count_outstanding(self.config.pipeline.max_url_retries, &report.unmatched_ids)
            .await?;
        if report.unmatched > 0 {
            warn!(
                "{} 条URL无法路由到任何worker类型，不再等待其处理",
                report.unmatched
            );
        }

        if outstanding > 0 {
            info!(
                "元数据抽取进行中，剩余 {} 条URL，本轮新分配 {} 条",
                outstanding, report.assigned_urls
            );
            return Ok(StepOutcome::Pending);
        }

        self.deps
            .signal
            .set_phase(ExtractionPhase::Completed)
            .await?;
        info!("全部URL处理完毕，共分配 {} 轮", distribution_passes + 1);
        Ok(StepOutcome::Done)
    }

    async fn generate_files(&self) -> CrawlerResult<StepOutcome> {
        let mut published = Vec::new();
        for domain in self.config.domains_by_priority() {
            match self.publisher.publish(&domain.domain).await {
                Ok(report) => published.push(report),
                Err(e) => error!("域名 {} 发布失败，跳过: {}", domain.domain, e),
            }
        }

        for report in &published {
            if let Err(e) = self
                .deps
                .uploader
                .upload(&report.output_dir, &report.domain)
                .await
            {
                error!("域名 {} 上传失败: {}", report.domain, e);
            }
        }

        info!(
            "文件生成完成，成功 {}/{} 个域名",
            published.len(),
            self.config.domains.len()
        );
        Ok(StepOutcome::Done)
    }

    async fn schedule_next_run(&self) -> CrawlerResult<StepOutcome> {
        let next = next_run(&self.config.schedule, Utc::now())?;
        let cleanup = TaskType::Cleanup.as_str();

        self.deps
            .task_repo
            .update_details(cleanup, &TaskDetails::Cleanup { next_run: Some(next) })
            .await?;
        self.deps.task_repo.reset(&[cleanup.to_string()]).await?;

        info!("下次清理时间: {}", next.to_rfc3339());
        Ok(StepOutcome::Done)
    }

    async fn cleanup(&self) -> CrawlerResult<StepOutcome> {
        self.deps.url_repo.reset_crawl_state().await?;
        self.deps
            .signal
            .set_phase(ExtractionPhase::NotRunning)
            .await?;

        let cyclic: Vec<String> = TaskType::ALL
            .iter()
            .filter(|t| t.is_cyclic())
            .map(|t| t.as_str().to_string())
            .collect();
        self.deps.task_repo.reset(&cyclic).await?;
        self.deps
            .task_repo
            .update_details(
                TaskType::MetadataExtraction.as_str(),
                &TaskDetails::MetadataExtraction {
                    distribution_passes: 0,
                },
            )
            .await?;
        self.deps
            .task_repo
            .update_details(
                TaskType::Cleanup.as_str(),
                &TaskDetails::Cleanup { next_run: None },
            )
            .await?;

        info!("清理完成，新一轮抓取从 {} 开始", cyclic.join(" -> "));
        Ok(StepOutcome::Done)
    }
}

#[async_trait]
impl StepHandler for CrawlSteps {
    async fn run(&self, task: &Task) -> CrawlerResult<StepOutcome> {
        match &task.details {
            TaskDetails::Setup { directories } => self.setup(directories).await,
            TaskDetails::UrlDiscovery => self.discover_urls().await,
            TaskDetails::MetadataExtraction {
                distribution_passes,
            } => self.extract_metadata(task, *distribution_passes).await,
            TaskDetails::FileGeneration => self.generate_files().await,
            TaskDetails::SetNextSchedule => self.schedule_next_run().await,
            TaskDetails::Cleanup { .. } => self.cleanup().await,
        }
    }
}
