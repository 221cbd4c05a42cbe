use std::sync::Arc;
use std::time::Duration;

use crawler_domain::{BatchOwner, Worker, WorkerRepository};
use crawler_errors::CrawlerResult;
use tracing::{info, warn};
use uuid::Uuid;

/// 当前进程持有的槽位
#[derive(Debug, Clone)]
pub struct Lease {
    pub worker: Worker,
}

impl Lease {
    pub fn worker_id(&self) -> Uuid {
        self.worker.id
    }

    /// 认领时写入的 lease_holder
    pub fn holder(&self) -> &str {
        self.worker.lease_holder.as_deref().unwrap_or_default()
    }

    pub fn owner(&self, batch_id: i64) -> BatchOwner {
        BatchOwner {
            worker_id: self.worker.id,
            batch_id,
            holder: self.holder().to_string(),
        }
    }
}

/// `hostname:pid:<随机后缀>`，写入 lease_holder
///
/// 同一进程内的多个租约管理器也互不相同
pub fn holder_identity() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}:{}:{}", host, std::process::id(), &suffix[..8])
}

/// 槽位租约管理
///
/// 可认领的槽位：idle，或active但心跳超过阈值未刷新(持有者视为已崩溃)。
/// completed/failed 槽位不会被认领。
pub struct LeaseManager {
    worker_repo: Arc<dyn WorkerRepository>,
    stale_threshold: Duration,
    holder: String,
}

impl LeaseManager {
    pub fn new(worker_repo: Arc<dyn WorkerRepository>, stale_threshold: Duration) -> Self {
        Self::with_holder(worker_repo, stale_threshold, holder_identity())
    }

    pub fn with_holder(
        worker_repo: Arc<dyn WorkerRepository>,
        stale_threshold: Duration,
        holder: String,
    ) -> Self {
        Self {
            worker_repo,
            stale_threshold,
            holder,
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// 没有可用槽位时返回 `None`，这不是错误
    pub async fn claim(&self) -> CrawlerResult<Option<Lease>> {
        match self
            .worker_repo
            .claim(self.stale_threshold, &self.holder)
            .await?
        {
            Some(worker) => {
                info!(
                    slot = %worker.slot_name(),
                    holder = %self.holder,
                    "认领槽位成功"
                );
                Ok(Some(Lease { worker }))
            }
            None => {
                info!("没有可认领的槽位");
                Ok(None)
            }
        }
    }

    /// 释放租约：completed保持不变，其余置回idle
    ///
    /// 槽位已被其他进程回收时不做修改，返回false
    pub async fn release(&self, lease: &Lease) -> CrawlerResult<bool> {
        match self
            .worker_repo
            .release(lease.worker_id(), &self.holder)
            .await
        {
            Ok(true) => {
                info!("槽位 {} 已释放", lease.worker.slot_name());
                Ok(true)
            }
            Ok(false) => {
                warn!(
                    "槽位 {} 已不由 {} 持有，跳过释放",
                    lease.worker.slot_name(),
                    self.holder
                );
                Ok(false)
            }
            Err(e) => {
                warn!("释放槽位 {} 失败: {}", lease.worker.slot_name(), e);
                Err(e)
            }
        }
    }
}
