use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crawler_domain::{
    BatchClaim, BatchOwner, CrawlUrl, Metadata, MetadataExtractor, UrlRepository,
    WorkerRepository,
};
use crawler_errors::CrawlerResult;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::lease::Lease;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UrlOutcome {
    Succeeded,
    Failed,
    /// 关闭信号到达后未开始的URL，保持new等待下次续跑
    Skipped,
    /// 槽位已被回收或退役，结果未写入
    Lost,
}

/// 一次执行的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReport {
    Processed {
        batch_id: i64,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        /// 租约丢失后被放弃的URL
        lost: usize,
    },
    /// 槽位仍有未完成的URL，但没有可认领的批次
    Waiting { outstanding: i64 },
    /// 槽位已无工作，被标记为completed
    Exhausted,
}

/// 批次执行循环
///
/// 认领槽位下batch_id最小的new批次，以 `concurrency` 为上限并发抽取元数据。
/// 关闭信号只阻止新的URL开始，已在处理中的URL会跑完。
pub struct BatchExecutor {
    url_repo: Arc<dyn UrlRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    extractor: Arc<dyn MetadataExtractor>,
    concurrency: usize,
}

impl BatchExecutor {
    pub fn new(
        url_repo: Arc<dyn UrlRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        extractor: Arc<dyn MetadataExtractor>,
        concurrency: usize,
    ) -> Self {
        Self {
            url_repo,
            worker_repo,
            extractor,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, lease: &Lease, shutdown: Arc<AtomicBool>) -> CrawlerResult<BatchReport> {
        let worker_id = lease.worker_id();
        let (batch_id, urls) = match self.worker_repo.claim_next_batch(worker_id).await? {
            BatchClaim::Claimed { batch_id, urls } => (batch_id, urls),
            BatchClaim::Waiting { outstanding } => {
                info!(
                    "槽位 {} 没有可认领的批次，仍有 {} 条URL未完成",
                    lease.worker.slot_name(),
                    outstanding
                );
                return Ok(BatchReport::Waiting { outstanding });
            }
            BatchClaim::Exhausted => {
                info!("槽位 {} 已完成全部批次", lease.worker.slot_name());
                return Ok(BatchReport::Exhausted);
            }
        };

        info!(
            slot = %lease.worker.slot_name(),
            batch_id,
            urls = urls.len(),
            concurrency = self.concurrency,
            "开始处理批次"
        );

        let owner = lease.owner(batch_id);
        let outcomes: Vec<CrawlerResult<UrlOutcome>> = stream::iter(urls)
            .map(|url| {
                let shutdown = Arc::clone(&shutdown);
                let owner = &owner;
                async move {
                    if shutdown.load(Ordering::SeqCst) {
                        return Ok(UrlOutcome::Skipped);
                    }
                    self.process_url(owner, url).await
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let (mut succeeded, mut failed, mut skipped, mut lost) = (0, 0, 0, 0);
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(UrlOutcome::Succeeded) => succeeded += 1,
                Ok(UrlOutcome::Failed) => failed += 1,
                Ok(UrlOutcome::Skipped) => skipped += 1,
                Ok(UrlOutcome::Lost) => lost += 1,
                Err(e) => {
                    warn!("批次 {} 写库失败: {}", batch_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        if lost > 0 {
            warn!(batch_id, lost, "租约已丢失，剩余URL交由新的持有者处理");
        }
        info!(batch_id, succeeded, failed, skipped, lost, "批次处理结束");
        Ok(BatchReport::Processed {
            batch_id,
            succeeded,
            failed,
            skipped,
            lost,
        })
    }

    async fn process_url(&self, owner: &BatchOwner, url: CrawlUrl) -> CrawlerResult<UrlOutcome> {
        if !self.url_repo.mark_processing(url.id, owner).await? {
            return Ok(UrlOutcome::Lost);
        }

        match self.extractor.extract(&url.url).await {
            Ok(page) => {
                let metadata = Metadata::from_page(url.id, page);
                if !self.url_repo.complete(url.id, owner, &metadata).await? {
                    return Ok(UrlOutcome::Lost);
                }
                debug!("URL处理完成: {}", url.url);
                Ok(UrlOutcome::Succeeded)
            }
            Err(e) => {
                warn!("URL处理失败 {}: {}", url.url, e);
                if !self.url_repo.fail(url.id, owner).await? {
                    return Ok(UrlOutcome::Lost);
                }
                Ok(UrlOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawler_domain::{UrlStatus, WorkerStatus};
    use chrono::Utc;
    use crawler_testing_utils::{discovered_urls, MockCrawlStore, ScriptedExtractor};
    use std::time::Duration;
    use uuid::Uuid;

    async fn leased_slot(store: &MockCrawlStore, urls: usize, batch_size: usize) -> Lease {
        let slot = store.find_or_create("default", 1).await.unwrap();
        store
            .upsert_discovered("example.com", &discovered_urls("example.com", urls))
            .await
            .unwrap();
        let ids: Vec<Uuid> = store
            .find_unassigned()
            .await
            .unwrap()
            .iter()
            .map(|u| u.id)
            .collect();
        for chunk in ids.chunks(batch_size) {
            store.assign_batch(&slot, chunk).await.unwrap();
        }
        let worker = store
            .claim(Duration::from_secs(600), "test:1")
            .await
            .unwrap()
            .unwrap();
        Lease { worker }
    }

    fn executor(
        store: &MockCrawlStore,
        extractor: Arc<ScriptedExtractor>,
        concurrency: usize,
    ) -> BatchExecutor {
        BatchExecutor::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            extractor,
            concurrency,
        )
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let store = MockCrawlStore::new();
        let lease = leased_slot(&store, 6, 100).await;
        let extractor = Arc::new(ScriptedExtractor::new().with_delay(Duration::from_millis(20)));

        let report = executor(&store, extractor.clone(), 2)
            .run(&lease, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert!(matches!(
            report,
            BatchReport::Processed {
                succeeded: 6,
                failed: 0,
                skipped: 0,
                ..
            }
        ));
        assert!(extractor.max_in_flight() <= 2);
        assert_eq!(extractor.calls().len(), 6);
        assert_eq!(store.metadata_count(), 6);
        assert_eq!(store.worker(lease.worker_id()).unwrap().urls_processed, 6);
    }

    #[tokio::test]
    async fn test_only_smallest_batch_is_processed() {
        let store = MockCrawlStore::new();
        let lease = leased_slot(&store, 5, 2).await;
        let extractor = Arc::new(ScriptedExtractor::new());

        let report = executor(&store, extractor.clone(), 4)
            .run(&lease, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        let BatchReport::Processed { batch_id, succeeded, .. } = report else {
            panic!("unexpected report: {report:?}");
        };
        assert_eq!(succeeded, 2);
        let urls = store.urls();
        let min_batch = urls.iter().filter_map(|u| u.batch_id).min().unwrap();
        assert_eq!(batch_id, min_batch);
        assert!(urls
            .iter()
            .filter(|u| u.batch_id != Some(batch_id))
            .all(|u| u.status == UrlStatus::New));
    }

    #[tokio::test]
    async fn test_failed_url_clears_ownership() {
        let store = MockCrawlStore::new();
        let lease = leased_slot(&store, 3, 100).await;
        let extractor =
            Arc::new(ScriptedExtractor::new().failing_on("https://example.com/page-1"));

        let report = executor(&store, extractor, 1)
            .run(&lease, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert!(matches!(
            report,
            BatchReport::Processed {
                succeeded: 2,
                failed: 1,
                ..
            }
        ));
        let failed = store.url("https://example.com/page-1").unwrap();
        assert_eq!(failed.status, UrlStatus::Failed);
        assert_eq!(failed.retries, 1);
        assert!(failed.worker_id.is_none());
        assert!(failed.batch_id.is_none());
        assert!(failed.worker_type.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_prevents_new_starts() {
        let store = MockCrawlStore::new();
        let lease = leased_slot(&store, 3, 100).await;
        let extractor = Arc::new(ScriptedExtractor::new());

        let report = executor(&store, extractor.clone(), 1)
            .run(&lease, Arc::new(AtomicBool::new(true)))
            .await
            .unwrap();

        assert!(matches!(
            report,
            BatchReport::Processed {
                succeeded: 0,
                skipped: 3,
                ..
            }
        ));
        assert!(extractor.calls().is_empty());
        assert!(store
            .urls()
            .iter()
            .all(|u| u.status == UrlStatus::New && u.is_assigned()));
    }

    #[tokio::test]
    async fn test_exhausted_slot_is_completed() {
        let store = MockCrawlStore::new();
        let lease = leased_slot(&store, 0, 100).await;

        let report = executor(&store, Arc::new(ScriptedExtractor::new()), 1)
            .run(&lease, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert_eq!(report, BatchReport::Exhausted);
        assert_eq!(
            store.worker(lease.worker_id()).unwrap().status,
            WorkerStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_processing_orphans_block_completion() {
        let store = MockCrawlStore::new();
        let lease = leased_slot(&store, 1, 100).await;
        store.set_url_status("https://example.com/page-0", UrlStatus::Processing);

        let report = executor(&store, Arc::new(ScriptedExtractor::new()), 1)
            .run(&lease, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert_eq!(report, BatchReport::Waiting { outstanding: 1 });
    }

    #[tokio::test]
    async fn test_reclaimed_slot_rejects_stale_results() {
        let store = MockCrawlStore::new();
        let lease = leased_slot(&store, 1, 100).await;
        let extractor = Arc::new(
            ScriptedExtractor::new()
                .failing_on("https://example.com/page-0")
                .with_delay(Duration::from_millis(200)),
        );
        let slow = executor(&store, extractor, 1);

        // 抽取期间心跳过期，另一个进程回收槽位并接手同一批次
        let takeover = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.set_heartbeat(lease.worker_id(), Utc::now() - chrono::Duration::minutes(11));
            let worker = store
                .claim(Duration::from_secs(600), "test:2")
                .await
                .unwrap()
                .unwrap();
            let BatchClaim::Claimed { batch_id, urls } =
                store.claim_next_batch(worker.id).await.unwrap()
            else {
                panic!("batch should be resumable");
            };
            let owner = Lease { worker }.owner(batch_id);
            assert!(store.mark_processing(urls[0].id, &owner).await.unwrap());
            owner
        };

        let (report, owner) =
            tokio::join!(slow.run(&lease, Arc::new(AtomicBool::new(false))), takeover);

        assert!(matches!(
            report.unwrap(),
            BatchReport::Processed {
                failed: 0,
                lost: 1,
                ..
            }
        ));
        let url = store.url("https://example.com/page-0").unwrap();
        assert_eq!(url.status, UrlStatus::Processing);
        assert_eq!(url.retries, 0);
        assert_eq!(url.worker_id, Some(owner.worker_id));
        assert_eq!(url.batch_id, Some(owner.batch_id));
    }
}
