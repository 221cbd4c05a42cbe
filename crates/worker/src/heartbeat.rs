use std::sync::Arc;
use std::time::Duration;

use crawler_domain::WorkerRepository;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 持有租约期间定期刷新槽位心跳
pub struct HeartbeatManager {
    worker_id: Uuid,
    holder: String,
    worker_repo: Arc<dyn WorkerRepository>,
    heartbeat_interval: Duration,
}

impl HeartbeatManager {
    pub fn new(
        worker_id: Uuid,
        holder: impl Into<String>,
        worker_repo: Arc<dyn WorkerRepository>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            worker_id,
            holder: holder.into(),
            worker_repo,
            heartbeat_interval,
        }
    }

    /// 收到关闭信号或租约丢失时退出
    pub fn start_heartbeat_task(&self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut ticker = interval(self.heartbeat_interval);
        let worker_repo = Arc::clone(&self.worker_repo);
        let worker_id = self.worker_id;
        let holder = self.holder.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match worker_repo.heartbeat(worker_id, &holder).await {
                            Ok(true) => debug!("槽位 {} 心跳已刷新", worker_id),
                            Ok(false) => {
                                warn!("槽位 {} 已不由本进程持有，停止心跳", worker_id);
                                break;
                            }
                            Err(e) => error!("槽位 {} 心跳失败: {}", worker_id, e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("心跳任务退出");
                        break;
                    }
                }
            }
        })
    }
}
