use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crawler_config::AppConfig;
use crawler_domain::{
    ExtractionPhase, MetadataExtractor, SignalStore, UrlRepository, WorkerRepository,
};
use crawler_errors::CrawlerResult;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::execution::{BatchExecutor, BatchReport};
use crate::heartbeat::HeartbeatManager;
use crate::lease::{Lease, LeaseManager};

#[derive(Clone)]
pub struct WorkerDependencies {
    pub url_repo: Arc<dyn UrlRepository>,
    pub worker_repo: Arc<dyn WorkerRepository>,
    pub signal: Arc<dyn SignalStore>,
    pub extractor: Arc<dyn MetadataExtractor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRunOutcome {
    /// 抽取阶段未开始或已结束，直接退出
    NotRunning(ExtractionPhase),
    /// 没有可认领的槽位
    NoCapacity,
    Processed { slot: String, report: BatchReport },
}

/// 一次worker进程的生命周期：检查信号、认领槽位、处理一个批次、释放
pub struct WorkerLifecycle {
    config: Arc<AppConfig>,
    deps: WorkerDependencies,
    lease_manager: LeaseManager,
    /// 当前持有的租约，关闭超时时由 `release_held` 释放
    held: Mutex<Option<Lease>>,
}

impl WorkerLifecycle {
    pub fn new(config: Arc<AppConfig>, deps: WorkerDependencies) -> Self {
        let lease_manager =
            LeaseManager::new(Arc::clone(&deps.worker_repo), config.lease.stale_threshold());
        Self {
            config,
            deps,
            lease_manager,
            held: Mutex::new(None),
        }
    }

    fn set_held(&self, lease: Option<Lease>) {
        if let Ok(mut held) = self.held.lock() {
            *held = lease;
        }
    }

    /// 尽力释放仍持有的槽位
    ///
    /// 用于 `run_once` 被中途取消的情况，槽位未被持有时什么也不做
    pub async fn release_held(&self) {
        let lease = match self.held.lock() {
            Ok(mut held) => held.take(),
            Err(_) => None,
        };
        let Some(lease) = lease else {
            return;
        };
        warn!("处理未正常结束，释放槽位 {}", lease.worker.slot_name());
        if let Err(e) = self.lease_manager.release(&lease).await {
            error!("释放槽位 {} 失败: {}", lease.worker.slot_name(), e);
        }
    }

    /// `shutdown_rx` 收到信号后不再开始新的URL，已开始的处理完后正常释放槽位
    pub async fn run_once(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> CrawlerResult<WorkerRunOutcome> {
        let phase = self.deps.signal.get_phase().await?;
        if phase != ExtractionPhase::Running {
            info!("抽取阶段为 {}，worker退出", phase.as_str());
            return Ok(WorkerRunOutcome::NotRunning(phase));
        }

        let Some(lease) = self.lease_manager.claim().await? else {
            return Ok(WorkerRunOutcome::NoCapacity);
        };
        let slot = lease.worker.slot_name();
        self.set_held(Some(lease.clone()));

        let concurrency = self
            .config
            .worker_type(&lease.worker.worker_type)
            .map(|w| w.concurrency)
            .unwrap_or(1);

        let (heartbeat_tx, heartbeat_rx) = broadcast::channel(1);
        let heartbeat = HeartbeatManager::new(
            lease.worker_id(),
            lease.holder().to_string(),
            Arc::clone(&self.deps.worker_repo),
            self.config.lease.heartbeat_interval(),
        )
        .start_heartbeat_task(heartbeat_rx);

        let stop = Arc::new(AtomicBool::new(false));
        let watcher = {
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                if shutdown_rx.recv().await.is_ok() {
                    info!("收到关闭信号，不再开始新的URL");
                    stop.store(true, Ordering::SeqCst);
                }
            })
        };

        let executor = BatchExecutor::new(
            Arc::clone(&self.deps.url_repo),
            Arc::clone(&self.deps.worker_repo),
            Arc::clone(&self.deps.extractor),
            concurrency,
        );
        let result = executor.run(&lease, stop).await;

        watcher.abort();
        if heartbeat_tx.send(()).is_err() {
            // 心跳任务已自行退出
            warn!("槽位 {} 的心跳任务已提前结束", slot);
        }
        if let Err(e) = heartbeat.await {
            error!("等待心跳任务结束失败: {}", e);
        }

        // 释放失败只记录，槽位会在心跳过期后被重新认领
        self.set_held(None);
        let _ = self.lease_manager.release(&lease).await;

        let report = result?;
        Ok(WorkerRunOutcome::Processed { slot, report })
    }
}
