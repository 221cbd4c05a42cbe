//! Mock implementations for all repository and collaborator traits
//!
//! The in-memory repositories follow the same state transitions as the
//! PostgreSQL ones so that engine tests exercise real semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crawler_domain::{
    ArtifactUploader, BatchClaim, BatchOwner, CrawlUrl, DiscoveredUrl, ExtractionPhase, Metadata,
    MetadataExtractor, PageMetadata, PublishedPage, SignalStore, Task, TaskClaim, TaskDetails,
    TaskRepository, TaskStatus, UrlDiscovery, UrlRepository, UrlStatus, Worker,
    WorkerRepository, WorkerStatus, DEFAULT_CLASSIFICATION, DEFAULT_URL_PRIORITY,
};
use crawler_errors::{CrawlerError, CrawlerResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Mock implementation of TaskRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<Vec<Task>>>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let repo = Self::new();
        {
            let mut stored = repo.tasks.lock().unwrap();
            stored.extend(tasks);
            stored.sort_by_key(|t| t.position);
        }
        repo
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().iter().find(|t| t.id == id).cloned()
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.get(id).map(|t| t.status)
    }

    pub fn set_status(&self, id: &str, status: TaskStatus) {
        if let Some(task) = self.tasks.lock().unwrap().iter_mut().find(|t| t.id == id) {
            task.status = status;
        }
    }

    pub fn set_details(&self, id: &str, details: TaskDetails) {
        if let Some(task) = self.tasks.lock().unwrap().iter_mut().find(|t| t.id == id) {
            task.details = details;
        }
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn seed(&self, tasks: &[Task]) -> CrawlerResult<u64> {
        let mut stored = self.tasks.lock().unwrap();
        let mut inserted = 0;
        for task in tasks {
            if !stored.iter().any(|t| t.id == task.id) {
                stored.push(task.clone());
                inserted += 1;
            }
        }
        stored.sort_by_key(|t| t.position);
        Ok(inserted)
    }

    async fn find_all(&self) -> CrawlerResult<Vec<Task>> {
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn find_by_id(&self, id: &str) -> CrawlerResult<Option<Task>> {
        Ok(self.get(id))
    }

    async fn begin_next(&self) -> CrawlerResult<TaskClaim> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(running) = tasks.iter().find(|t| t.is_processing()) {
            return Ok(TaskClaim::Busy(running.clone()));
        }
        if let Some(failed) = tasks.iter().find(|t| t.status == TaskStatus::Error) {
            return Ok(TaskClaim::Halted(failed.clone()));
        }
        match tasks.iter_mut().find(|t| t.status == TaskStatus::Todo) {
            Some(task) => {
                task.status = TaskStatus::Processing;
                task.error = None;
                task.updated_at = Utc::now();
                Ok(TaskClaim::Claimed(task.clone()))
            }
            None => Ok(TaskClaim::Idle),
        }
    }

    async fn finish(
        &self,
        id: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> CrawlerResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| CrawlerError::task_not_found(id))?;
        task.status = status;
        task.error = error;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn update_details(&self, id: &str, details: &TaskDetails) -> CrawlerResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| CrawlerError::task_not_found(id))?;
        task.details = details.clone();
        Ok(())
    }

    async fn reset(&self, ids: &[String]) -> CrawlerResult<u64> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut count = 0;
        for task in tasks.iter_mut().filter(|t| ids.contains(&t.id)) {
            task.status = TaskStatus::Todo;
            task.error = None;
            count += 1;
        }
        Ok(count)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    urls: Vec<CrawlUrl>,
    metadata: HashMap<Uuid, Metadata>,
    workers: Vec<Worker>,
    next_batch_id: i64,
    unreadable_domains: HashSet<String>,
}

impl StoreState {
    fn clear_ownership(url: &mut CrawlUrl) {
        url.worker_id = None;
        url.batch_id = None;
        url.worker_type = None;
    }

    fn outstanding_for(&self, worker_id: Uuid) -> usize {
        self.urls
            .iter()
            .filter(|u| u.worker_id == Some(worker_id) && u.is_outstanding())
            .count()
    }

    /// Slot is still active and leased by `owner.holder`
    fn holds(&self, owner: &BatchOwner) -> bool {
        self.workers.iter().any(|w| {
            w.id == owner.worker_id
                && w.status == WorkerStatus::Active
                && w.lease_holder.as_deref() == Some(owner.holder.as_str())
        })
    }

    /// URL of `owner`'s batch in the given status, only while the lease is held
    fn owned_url(
        &mut self,
        url_id: Uuid,
        owner: &BatchOwner,
        status: UrlStatus,
    ) -> Option<&mut CrawlUrl> {
        if !self.holds(owner) {
            return None;
        }
        self.urls.iter_mut().find(|u| {
            u.id == url_id
                && u.worker_id == Some(owner.worker_id)
                && u.batch_id == Some(owner.batch_id)
                && u.status == status
        })
    }
}

/// Shared in-memory store backing both UrlRepository and WorkerRepository
#[derive(Debug, Clone, Default)]
pub struct MockCrawlStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockCrawlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_url(&self, url: CrawlUrl) {
        self.state.lock().unwrap().urls.push(url);
    }

    pub fn insert_metadata(&self, metadata: Metadata) {
        self.state
            .lock()
            .unwrap()
            .metadata
            .insert(metadata.url_id, metadata);
    }

    pub fn insert_worker(&self, worker: Worker) {
        self.state.lock().unwrap().workers.push(worker);
    }

    pub fn urls(&self) -> Vec<CrawlUrl> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn url(&self, link: &str) -> Option<CrawlUrl> {
        self.state
            .lock()
            .unwrap()
            .urls
            .iter()
            .find(|u| u.url == link)
            .cloned()
    }

    pub fn workers(&self) -> Vec<Worker> {
        let mut workers = self.state.lock().unwrap().workers.clone();
        workers.sort_by(|a, b| {
            (a.worker_type.as_str(), a.instance_number)
                .cmp(&(b.worker_type.as_str(), b.instance_number))
        });
        workers
    }

    pub fn worker(&self, id: Uuid) -> Option<Worker> {
        self.state
            .lock()
            .unwrap()
            .workers
            .iter()
            .find(|w| w.id == id)
            .cloned()
    }

    pub fn metadata_count(&self) -> usize {
        self.state.lock().unwrap().metadata.len()
    }

    pub fn set_heartbeat(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(worker) = self
            .state
            .lock()
            .unwrap()
            .workers
            .iter_mut()
            .find(|w| w.id == id)
        {
            worker.last_heartbeat = Some(at);
        }
    }

    pub fn set_worker_status(&self, id: Uuid, status: WorkerStatus) {
        if let Some(worker) = self
            .state
            .lock()
            .unwrap()
            .workers
            .iter_mut()
            .find(|w| w.id == id)
        {
            worker.status = status;
        }
    }

    /// 之后对该域名的 `find_published` 返回错误
    pub fn fail_reads_for(&self, domain: &str) {
        self.state
            .lock()
            .unwrap()
            .unreadable_domains
            .insert(domain.to_string());
    }

    pub fn set_url_status(&self, link: &str, status: UrlStatus) {
        if let Some(url) = self
            .state
            .lock()
            .unwrap()
            .urls
            .iter_mut()
            .find(|u| u.url == link)
        {
            url.status = status;
        }
    }
}

#[async_trait]
impl UrlRepository for MockCrawlStore {
    async fn upsert_discovered(&self, domain: &str, urls: &[DiscoveredUrl]) -> CrawlerResult<u64> {
        let mut state = self.state.lock().unwrap();
        let mut seen = HashSet::new();
        let mut written = 0;
        for found in urls.iter().filter(|u| seen.insert(u.url.clone())) {
            let classification = found
                .classification
                .clone()
                .unwrap_or_else(|| DEFAULT_CLASSIFICATION.to_string());
            let priority = found.priority.unwrap_or(DEFAULT_URL_PRIORITY);
            match state.urls.iter_mut().find(|u| u.url == found.url) {
                Some(existing) => {
                    existing.priority = priority;
                    existing.lastmod = found.lastmod.clone();
                    existing.classification = classification;
                    existing.updated_at = Utc::now();
                }
                None => {
                    let mut url = CrawlUrl::new(domain, &found.url, &classification);
                    url.priority = priority;
                    url.lastmod = found.lastmod.clone();
                    state.urls.push(url);
                }
            }
            written += 1;
        }
        Ok(written)
    }

    async fn requeue_failed(&self, max_retries: u32) -> CrawlerResult<u64> {
        let mut state = self.state.lock().unwrap();
        let mut count = 0;
        for url in state
            .urls
            .iter_mut()
            .filter(|u| u.status == UrlStatus::Failed && u.retries < max_retries as i32)
        {
            url.status = UrlStatus::New;
            StoreState::clear_ownership(url);
            count += 1;
        }
        Ok(count)
    }

    async fn find_unassigned(&self) -> CrawlerResult<Vec<CrawlUrl>> {
        let state = self.state.lock().unwrap();
        let mut urls: Vec<CrawlUrl> = state
            .urls
            .iter()
            .filter(|u| u.status == UrlStatus::New && !u.is_assigned())
            .cloned()
            .collect();
        urls.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| a.url.cmp(&b.url))
        });
        Ok(urls)
    }

    async fn assign_batch(&self, worker: &Worker, url_ids: &[Uuid]) -> CrawlerResult<(i64, u64)> {
        let mut state = self.state.lock().unwrap();
        if !state.workers.iter().any(|w| w.id == worker.id) {
            return Err(CrawlerError::worker_not_found(worker.id.to_string()));
        }

        state.next_batch_id += 1;
        let batch_id = state.next_batch_id;
        let mut assigned = 0;
        for url in state.urls.iter_mut().filter(|u| {
            url_ids.contains(&u.id) && u.status == UrlStatus::New && !u.is_assigned()
        }) {
            url.batch_id = Some(batch_id);
            url.worker_id = Some(worker.id);
            url.worker_type = Some(worker.worker_type.clone());
            assigned += 1;
        }

        if assigned > 0 {
            if let Some(slot) = state.workers.iter_mut().find(|w| w.id == worker.id) {
                if slot.status == WorkerStatus::Completed {
                    slot.status = WorkerStatus::Idle;
                }
            }
        }
        Ok((batch_id, assigned))
    }

    async fn count_outstanding(&self, max_retries: u32, unroutable: &[Uuid]) -> CrawlerResult<i64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .urls
            .iter()
            .filter(|u| !unroutable.contains(&u.id))
            .filter(|u| {
                u.is_outstanding()
                    || (u.status == UrlStatus::Failed && u.retries < max_retries as i32)
            })
            .count() as i64)
    }

    async fn count_by_status(&self) -> CrawlerResult<Vec<(UrlStatus, i64)>> {
        let state = self.state.lock().unwrap();
        let mut counts: HashMap<UrlStatus, i64> = HashMap::new();
        for url in &state.urls {
            *counts.entry(url.status).or_default() += 1;
        }
        let mut counts: Vec<(UrlStatus, i64)> = counts.into_iter().collect();
        counts.sort_by_key(|(status, _)| status.as_str());
        Ok(counts)
    }

    async fn mark_processing(&self, url_id: Uuid, owner: &BatchOwner) -> CrawlerResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.owned_url(url_id, owner, UrlStatus::New) {
            Some(url) => {
                url.status = UrlStatus::Processing;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete(
        &self,
        url_id: Uuid,
        owner: &BatchOwner,
        metadata: &Metadata,
    ) -> CrawlerResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.owned_url(url_id, owner, UrlStatus::Processing) {
            Some(url) => url.status = UrlStatus::Done,
            None => return Ok(false),
        }
        state
            .metadata
            .entry(url_id)
            .or_insert_with(|| metadata.clone());
        if let Some(worker) = state.workers.iter_mut().find(|w| w.id == owner.worker_id) {
            worker.urls_processed += 1;
        }
        Ok(true)
    }

    async fn fail(&self, url_id: Uuid, owner: &BatchOwner) -> CrawlerResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.owned_url(url_id, owner, UrlStatus::Processing) {
            Some(url) => {
                url.status = UrlStatus::Failed;
                url.retries += 1;
                StoreState::clear_ownership(url);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_published(&self, domain: &str) -> CrawlerResult<Vec<PublishedPage>> {
        let state = self.state.lock().unwrap();
        if state.unreadable_domains.contains(domain) {
            return Err(CrawlerError::database_error(format!(
                "reading {domain} failed"
            )));
        }
        let mut pages: Vec<(f64, PublishedPage)> = state
            .urls
            .iter()
            .filter(|u| u.domain == domain && u.status == UrlStatus::Done)
            .filter_map(|u| {
                state.metadata.get(&u.id).map(|m| {
                    (
                        u.priority,
                        PublishedPage {
                            url: u.url.clone(),
                            classification: u.classification.clone(),
                            metadata: m.clone(),
                        },
                    )
                })
            })
            .collect();
        pages.sort_by(|(pa, a), (pb, b)| {
            a.classification
                .cmp(&b.classification)
                .then_with(|| pb.total_cmp(pa))
                .then_with(|| a.url.cmp(&b.url))
        });
        Ok(pages.into_iter().map(|(_, p)| p).collect())
    }

    async fn reset_crawl_state(&self) -> CrawlerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.metadata.clear();
        for url in state.urls.iter_mut() {
            url.status = UrlStatus::New;
            url.retries = 0;
            StoreState::clear_ownership(url);
        }
        state.workers.clear();
        Ok(())
    }
}

#[async_trait]
impl WorkerRepository for MockCrawlStore {
    async fn find_all(&self) -> CrawlerResult<Vec<Worker>> {
        Ok(self.workers())
    }

    async fn find_by_id(&self, id: Uuid) -> CrawlerResult<Option<Worker>> {
        Ok(self.worker(id))
    }

    async fn find_or_create(
        &self,
        worker_type: &str,
        instance_number: i32,
    ) -> CrawlerResult<Worker> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .workers
            .iter()
            .find(|w| w.worker_type == worker_type && w.instance_number == instance_number)
        {
            return Ok(existing.clone());
        }
        let worker = Worker::new(worker_type, instance_number);
        state.workers.push(worker.clone());
        Ok(worker)
    }

    async fn delete_retired(&self, configured: &[(String, i32)]) -> CrawlerResult<u64> {
        let mut state = self.state.lock().unwrap();
        let retired: Vec<Uuid> = state
            .workers
            .iter()
            .filter(|w| {
                !configured
                    .iter()
                    .any(|(t, n)| *t == w.worker_type && *n == w.instance_number)
            })
            .map(|w| w.id)
            .collect();

        for url in state.urls.iter_mut().filter(|u| {
            u.worker_id.map(|id| retired.contains(&id)).unwrap_or(false) && u.is_outstanding()
        }) {
            url.status = UrlStatus::New;
            StoreState::clear_ownership(url);
        }
        // ON DELETE SET NULL
        for url in state.urls.iter_mut() {
            if url.worker_id.map(|id| retired.contains(&id)).unwrap_or(false) {
                url.worker_id = None;
            }
        }
        state.workers.retain(|w| !retired.contains(&w.id));
        Ok(retired.len() as u64)
    }

    async fn delete_if_unused(&self, id: Uuid, stale_before: DateTime<Utc>) -> CrawlerResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(worker) = state.workers.iter().find(|w| w.id == id) else {
            return Ok(false);
        };
        if worker.is_leased(stale_before) || state.outstanding_for(id) > 0 {
            return Ok(false);
        }
        state.workers.retain(|w| w.id != id);
        Ok(true)
    }

    async fn claim(
        &self,
        stale_threshold: Duration,
        holder: &str,
    ) -> CrawlerResult<Option<Worker>> {
        let stale_before = Utc::now()
            - chrono::Duration::from_std(stale_threshold)
                .map_err(|e| CrawlerError::Internal(e.to_string()))?;
        let mut state = self.state.lock().unwrap();

        let mut candidates: Vec<&Worker> = state
            .workers
            .iter()
            .filter(|w| w.is_claimable(stale_before))
            .collect();
        candidates.sort_by(|a, b| {
            (a.status != WorkerStatus::Idle, a.worker_type.as_str(), a.instance_number).cmp(&(
                b.status != WorkerStatus::Idle,
                b.worker_type.as_str(),
                b.instance_number,
            ))
        });
        let Some(id) = candidates.first().map(|w| w.id) else {
            return Ok(None);
        };

        for url in state
            .urls
            .iter_mut()
            .filter(|u| u.worker_id == Some(id) && u.status == UrlStatus::Processing)
        {
            url.status = UrlStatus::New;
        }

        let worker = state
            .workers
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| CrawlerError::worker_not_found(id.to_string()))?;
        worker.status = WorkerStatus::Active;
        worker.urls_processed = 0;
        worker.current_batch_id = None;
        worker.last_heartbeat = Some(Utc::now());
        worker.lease_holder = Some(holder.to_string());
        Ok(Some(worker.clone()))
    }

    async fn heartbeat(&self, id: Uuid, holder: &str) -> CrawlerResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.workers.iter_mut().find(|w| {
            w.id == id
                && w.status == WorkerStatus::Active
                && w.lease_holder.as_deref() == Some(holder)
        }) {
            Some(worker) => {
                worker.last_heartbeat = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn claim_next_batch(&self, id: Uuid) -> CrawlerResult<BatchClaim> {
        let mut state = self.state.lock().unwrap();
        if !state.workers.iter().any(|w| w.id == id) {
            return Err(CrawlerError::worker_not_found(id.to_string()));
        }

        let batch_id = state
            .urls
            .iter()
            .filter(|u| u.worker_id == Some(id) && u.status == UrlStatus::New)
            .filter_map(|u| u.batch_id)
            .min();

        if let Some(batch_id) = batch_id {
            let mut urls: Vec<CrawlUrl> = state
                .urls
                .iter()
                .filter(|u| {
                    u.worker_id == Some(id)
                        && u.batch_id == Some(batch_id)
                        && u.status == UrlStatus::New
                })
                .cloned()
                .collect();
            urls.sort_by(|a, b| {
                b.priority
                    .total_cmp(&a.priority)
                    .then_with(|| a.url.cmp(&b.url))
            });
            if let Some(worker) = state.workers.iter_mut().find(|w| w.id == id) {
                worker.current_batch_id = Some(batch_id);
            }
            return Ok(BatchClaim::Claimed { batch_id, urls });
        }

        let outstanding = state.outstanding_for(id);
        if outstanding > 0 {
            return Ok(BatchClaim::Waiting {
                outstanding: outstanding as i64,
            });
        }

        if let Some(worker) = state.workers.iter_mut().find(|w| w.id == id) {
            worker.status = WorkerStatus::Completed;
            worker.current_batch_id = None;
        }
        Ok(BatchClaim::Exhausted)
    }

    async fn release(&self, id: Uuid, holder: &str) -> CrawlerResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(worker) = state
            .workers
            .iter_mut()
            .find(|w| w.id == id && w.lease_holder.as_deref() == Some(holder))
        else {
            return Ok(false);
        };
        worker.current_batch_id = None;
        worker.lease_holder = None;
        if worker.status != WorkerStatus::Completed {
            worker.status = WorkerStatus::Idle;
        }
        Ok(true)
    }
}

/// Mock implementation of SignalStore for testing
#[derive(Debug, Clone)]
pub struct MockSignalStore {
    phase: Arc<Mutex<ExtractionPhase>>,
    history: Arc<Mutex<Vec<ExtractionPhase>>>,
}

impl MockSignalStore {
    pub fn new() -> Self {
        Self::with_phase(ExtractionPhase::NotRunning)
    }

    pub fn with_phase(phase: ExtractionPhase) -> Self {
        Self {
            phase: Arc::new(Mutex::new(phase)),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn phase(&self) -> ExtractionPhase {
        *self.phase.lock().unwrap()
    }

    /// Every phase written through `set_phase`, in order
    pub fn history(&self) -> Vec<ExtractionPhase> {
        self.history.lock().unwrap().clone()
    }
}

impl Default for MockSignalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalStore for MockSignalStore {
    async fn get_phase(&self) -> CrawlerResult<ExtractionPhase> {
        Ok(self.phase())
    }

    async fn set_phase(&self, phase: ExtractionPhase) -> CrawlerResult<()> {
        *self.phase.lock().unwrap() = phase;
        self.history.lock().unwrap().push(phase);
        Ok(())
    }
}

/// Discovery returning a fixed URL list per domain
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    by_domain: HashMap<String, Vec<DiscoveredUrl>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_urls(mut self, domain: &str, urls: Vec<DiscoveredUrl>) -> Self {
        self.by_domain.insert(domain.to_string(), urls);
        self
    }
}

#[async_trait]
impl UrlDiscovery for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    fn matches(&self, domain: &str) -> bool {
        self.by_domain.contains_key(domain)
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn discover(&self, domain: &str) -> Vec<DiscoveredUrl> {
        self.by_domain.get(domain).cloned().unwrap_or_default()
    }
}

/// Extractor that fails for chosen URLs and tracks its peak concurrency
#[derive(Debug, Default)]
pub struct ScriptedExtractor {
    failing: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataExtractor for ScriptedExtractor {
    fn name(&self) -> &str {
        "scripted"
    }

    fn matches(&self, _url: &str) -> bool {
        true
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn extract(&self, url: &str) -> CrawlerResult<PageMetadata> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(url) {
            return Err(CrawlerError::fetch_error(url, Some(404), "not found"));
        }
        Ok(PageMetadata {
            title: format!("Title of {url}"),
            description: Some(format!("About {url}")),
            author: None,
            date: None,
            extras: serde_json::json!({ "final_url": url }),
        })
    }
}

/// Uploader recording every call
#[derive(Debug, Default)]
pub struct RecordingUploader {
    uploads: Mutex<Vec<(PathBuf, String)>>,
    fail: bool,
}

impl RecordingUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactUploader for RecordingUploader {
    async fn upload(&self, local_tree: &Path, domain: &str) -> CrawlerResult<()> {
        self.uploads
            .lock()
            .unwrap()
            .push((local_tree.to_path_buf(), domain.to_string()));
        if self.fail {
            return Err(CrawlerError::Upload(format!("upload of {domain} rejected")));
        }
        Ok(())
    }
}
