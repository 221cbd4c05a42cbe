//! 领域仓储抽象
//!
//! 协调状态全部落在数据库里，这里的每个写操作都应在单个事务内完成

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::collaborators::DiscoveredUrl;
use crate::entities::{
    CrawlUrl, Metadata, PublishedPage, Task, TaskDetails, TaskStatus, UrlStatus, Worker,
};
use crawler_errors::CrawlerResult;

/// `begin_next` 的结果
#[derive(Debug, Clone)]
pub enum TaskClaim {
    /// 已有任务在处理中，本次不做任何事
    Busy(Task),
    /// 有任务处于error，流水线停在这里直到人工重置
    Halted(Task),
    /// 没有todo任务
    Idle,
    /// 该任务已被置为processing，由调用方负责收尾
    Claimed(Task),
}

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 插入缺失的预置任务，返回新插入的行数
    async fn seed(&self, tasks: &[Task]) -> CrawlerResult<u64>;
    async fn find_all(&self) -> CrawlerResult<Vec<Task>>;
    async fn find_by_id(&self, id: &str) -> CrawlerResult<Option<Task>>;
    /// 在锁住全部任务行的事务里挑选下一个todo任务，存在error任务时不推进
    async fn begin_next(&self) -> CrawlerResult<TaskClaim>;
    async fn finish(&self, id: &str, status: TaskStatus, error: Option<String>)
        -> CrawlerResult<()>;
    async fn update_details(&self, id: &str, details: &TaskDetails) -> CrawlerResult<()>;
    /// 置为todo并清空错误信息
    async fn reset(&self, ids: &[String]) -> CrawlerResult<u64>;
}

/// 一次批次认领的结果
#[derive(Debug, Clone)]
pub enum BatchClaim {
    Claimed { batch_id: i64, urls: Vec<CrawlUrl> },
    /// 还有未完成的URL，但没有可认领的批次
    Waiting { outstanding: i64 },
    /// 槽位已无剩余工作，已标记为completed
    Exhausted,
}

/// 写入URL处理结果时用来确认归属的租约信息
///
/// 槽位被回收或退役后，旧持有者的写入因不再匹配而不生效
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOwner {
    pub worker_id: Uuid,
    pub batch_id: i64,
    /// 认领槽位时写入的 lease_holder
    pub holder: String,
}

/// URL与元数据仓储抽象
#[async_trait]
pub trait UrlRepository: Send + Sync {
    /// 发现阶段写入URL，已存在的行保留其状态
    async fn upsert_discovered(&self, domain: &str, urls: &[DiscoveredUrl]) -> CrawlerResult<u64>;
    /// 重试次数未达上限的failed URL回到new
    async fn requeue_failed(&self, max_retries: u32) -> CrawlerResult<u64>;
    /// status=new 且未分配的URL，按优先级降序、url升序
    async fn find_unassigned(&self) -> CrawlerResult<Vec<CrawlUrl>>;
    /// 把URL写入一个新批次，只影响仍为new且未分配的行
    async fn assign_batch(
        &self,
        worker: &Worker,
        url_ids: &[Uuid],
    ) -> CrawlerResult<(i64, u64)>;
    /// new/processing 以及仍可重试的failed数量，`unroutable` 中的URL不计入
    async fn count_outstanding(&self, max_retries: u32, unroutable: &[Uuid])
        -> CrawlerResult<i64>;
    async fn count_by_status(&self) -> CrawlerResult<Vec<(UrlStatus, i64)>>;
    /// 下面三个写操作只在URL仍属于 `owner` 的批次、且槽位仍由 `owner.holder`
    /// 持有时生效；返回false表示租约已丢失，调用方应放弃这条URL
    async fn mark_processing(&self, url_id: Uuid, owner: &BatchOwner) -> CrawlerResult<bool>;
    /// 写入元数据、置为done并累加槽位的处理计数
    async fn complete(&self, url_id: Uuid, owner: &BatchOwner, metadata: &Metadata)
        -> CrawlerResult<bool>;
    /// 置为failed，清空归属字段并累加重试次数
    async fn fail(&self, url_id: Uuid, owner: &BatchOwner) -> CrawlerResult<bool>;
    async fn find_published(&self, domain: &str) -> CrawlerResult<Vec<PublishedPage>>;
    /// 删除元数据、URL回到new、删除全部槽位
    async fn reset_crawl_state(&self) -> CrawlerResult<()>;
}

/// Worker槽位仓储抽象
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn find_all(&self) -> CrawlerResult<Vec<Worker>>;
    async fn find_by_id(&self, id: Uuid) -> CrawlerResult<Option<Worker>>;
    async fn find_or_create(&self, worker_type: &str, instance_number: i32)
        -> CrawlerResult<Worker>;
    /// 删除不在配置里的槽位，并释放它们名下仍为new的URL
    async fn delete_retired(&self, configured: &[(String, i32)]) -> CrawlerResult<u64>;
    /// 槽位既无未完成URL也未被租用时删除
    async fn delete_if_unused(&self, id: Uuid, stale_before: DateTime<Utc>)
        -> CrawlerResult<bool>;
    /// 认领一个空闲或心跳过期的槽位
    async fn claim(&self, stale_threshold: Duration, holder: &str)
        -> CrawlerResult<Option<Worker>>;
    /// 仅在槽位仍为active且由 `holder` 持有时刷新心跳
    async fn heartbeat(&self, id: Uuid, holder: &str) -> CrawlerResult<bool>;
    async fn claim_next_batch(&self, id: Uuid) -> CrawlerResult<BatchClaim>;
    /// 清空current_batch_id，未completed时回到idle；槽位已被他人认领时不做修改并返回false
    async fn release(&self, id: Uuid, holder: &str) -> CrawlerResult<bool>;
}
