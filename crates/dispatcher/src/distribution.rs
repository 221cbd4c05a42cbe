use chrono::Utc;
use crawler_config::{AppConfig, WorkerTypeConfig};
use crawler_domain::planner::{plan_batches, Classifier};
use crawler_domain::{UrlRepository, Worker, WorkerRepository};
use crawler_errors::{CrawlerError, CrawlerResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 一次分配的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub requeued: u64,
    pub retired_slots: u64,
    pub assigned_urls: u64,
    pub batches: usize,
    pub unmatched: usize,
    /// 没有匹配任何worker类型的URL，不计入待处理
    pub unmatched_ids: Vec<Uuid>,
    pub removed_slots: usize,
}

/// 批次分配引擎
///
/// 每一轮：失败URL回队 -> 按配置对齐槽位 -> 分类 -> 均分到实例并按batch_size切块
/// -> 删除本轮没分到URL且已无工作的槽位。可重复执行，已分配的URL不会被再次分配。
pub struct BatchDistributor {
    worker_types: Vec<WorkerTypeConfig>,
    max_url_retries: u32,
    stale_threshold: Duration,
    url_repo: Arc<dyn UrlRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
}

impl BatchDistributor {
    pub fn new(
        config: &AppConfig,
        url_repo: Arc<dyn UrlRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
    ) -> Self {
        Self {
            worker_types: config.workers.clone(),
            max_url_retries: config.pipeline.max_url_retries,
            stale_threshold: config.lease.stale_threshold(),
            url_repo,
            worker_repo,
        }
    }

    pub async fn distribute(&self) -> CrawlerResult<DistributionReport> {
        let classifier = Classifier::new(&self.worker_types)?;
        let mut report = DistributionReport {
            requeued: self.url_repo.requeue_failed(self.max_url_retries).await?,
            ..Default::default()
        };

        let slots = self.reconcile_slots(&mut report).await?;

        let unassigned = self.url_repo.find_unassigned().await?;
        let (groups, unmatched) = classifier.group(&unassigned);
        report.unmatched = unmatched.len();
        report.unmatched_ids = unmatched.iter().map(|u| u.id).collect();
        if !unmatched.is_empty() {
            warn!(
                "{} 条URL没有匹配任何worker类型，保持未分配，例如 {}",
                unmatched.len(),
                unmatched[0].url
            );
        }

        let mut touched: HashSet<Uuid> = HashSet::new();
        for worker_type in &self.worker_types {
            let Some(urls) = groups.get(&worker_type.name) else {
                continue;
            };
            let instances = slots
                .get(&worker_type.name)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let url_ids: Vec<Uuid> = urls.iter().map(|u| u.id).collect();

            for planned in plan_batches(&url_ids, instances, worker_type.batch_size) {
                let worker = instances
                    .iter()
                    .find(|w| w.id == planned.worker_id)
                    .ok_or_else(|| CrawlerError::worker_not_found(planned.worker_id.to_string()))?;

                let (batch_id, assigned) =
                    self.url_repo.assign_batch(worker, &planned.url_ids).await?;
                if assigned == 0 {
                    continue;
                }
                debug!(
                    "批次 {} 分配给 {}，URL {} 条",
                    batch_id,
                    worker.slot_name(),
                    assigned
                );
                touched.insert(worker.id);
                report.batches += 1;
                report.assigned_urls += assigned;
            }
        }

        let stale_before = Utc::now()
            - chrono::Duration::from_std(self.stale_threshold)
                .map_err(|e| CrawlerError::Internal(e.to_string()))?;
        for worker in slots.values().flatten() {
            if touched.contains(&worker.id) {
                continue;
            }
            if self
                .worker_repo
                .delete_if_unused(worker.id, stale_before)
                .await?
            {
                debug!("槽位 {} 本轮无URL，已删除", worker.slot_name());
                report.removed_slots += 1;
            }
        }

        info!(
            requeued = report.requeued,
            assigned = report.assigned_urls,
            batches = report.batches,
            unmatched = report.unmatched,
            removed_slots = report.removed_slots,
            "URL分配完成"
        );
        Ok(report)
    }

    /// 为每个配置的(类型, 实例号)确保有槽位，删除配置中已不存在的槽位
    async fn reconcile_slots(
        &self,
        report: &mut DistributionReport,
    ) -> CrawlerResult<HashMap<String, Vec<Worker>>> {
        let mut slots: HashMap<String, Vec<Worker>> = HashMap::new();
        let mut configured = Vec::new();

        for worker_type in &self.worker_types {
            for instance in 1..=worker_type.instances as i32 {
                let worker = self
                    .worker_repo
                    .find_or_create(&worker_type.name, instance)
                    .await?;
                slots
                    .entry(worker_type.name.clone())
                    .or_default()
                    .push(worker);
                configured.push((worker_type.name.clone(), instance));
            }
        }

        report.retired_slots = self.worker_repo.delete_retired(&configured).await?;
        if report.retired_slots > 0 {
            info!("删除配置外的槽位 {} 个", report.retired_slots);
        }
        Ok(slots)
    }
}
