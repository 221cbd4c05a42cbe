use chrono::{Duration, Utc};
use crawler_config::{AppConfig, WorkerTypeConfig};
use crawler_dispatcher::{AdvanceOutcome, CrawlSteps, StepDependencies, TaskPipeline};
use crawler_domain::{
    BatchClaim, BatchOwner, DiscoveredUrl, ExtractionPhase, Metadata, PageMetadata, TaskDetails,
    TaskRepository, TaskStatus, UrlRepository, UrlStatus, WorkerRepository,
};
use crawler_testing_utils::{
    domain_config, AppConfigBuilder, MockCrawlStore, MockSignalStore, MockTaskRepository,
    RecordingUploader, StaticDiscovery, WorkerTypeBuilder,
};
use std::path::Path;
use std::sync::Arc;

struct Harness {
    pipeline: TaskPipeline,
    tasks: MockTaskRepository,
    store: MockCrawlStore,
    signal: MockSignalStore,
    uploader: Arc<RecordingUploader>,
    config: Arc<AppConfig>,
}

async fn harness(root: &Path, discovery: StaticDiscovery, domains: &[&str]) -> Harness {
    let workers = vec![WorkerTypeBuilder::default_type()
        .with_instances(2)
        .with_batch_size(2)
        .build()];
    harness_with_workers(root, discovery, domains, workers).await
}

async fn harness_with_workers(
    root: &Path,
    discovery: StaticDiscovery,
    domains: &[&str],
    workers: Vec<WorkerTypeConfig>,
) -> Harness {
    let config = Arc::new(
        AppConfigBuilder::new(root)
            .with_domains(
                domains
                    .iter()
                    .enumerate()
                    .map(|(i, d)| domain_config(d, i as i32))
                    .collect(),
            )
            .with_workers(workers)
            .build(),
    );

    let tasks = MockTaskRepository::new();
    let store = MockCrawlStore::new();
    let signal = MockSignalStore::new();
    let uploader = Arc::new(RecordingUploader::new());

    let steps = CrawlSteps::new(
        config.clone(),
        StepDependencies {
            task_repo: Arc::new(tasks.clone()),
            url_repo: Arc::new(store.clone()),
            worker_repo: Arc::new(store.clone()),
            signal: Arc::new(signal.clone()),
            discovery: Arc::new(discovery),
            uploader: uploader.clone(),
        },
    );
    let pipeline = TaskPipeline::new(Arc::new(tasks.clone()), Arc::new(steps));
    let directories: Vec<String> = config
        .storage
        .paths
        .all()
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    pipeline.bootstrap(&directories).await.unwrap();

    Harness {
        pipeline,
        tasks,
        store,
        signal,
        uploader,
        config,
    }
}

/// 模拟worker进程：认领槽位，处理完全部批次
async fn drain_workers(store: &MockCrawlStore) {
    while let Some(lease) = store
        .claim(std::time::Duration::from_secs(600), "test:1")
        .await
        .unwrap()
    {
        loop {
            match store.claim_next_batch(lease.id).await.unwrap() {
                BatchClaim::Claimed { batch_id, urls } => {
                    let owner = BatchOwner {
                        worker_id: lease.id,
                        batch_id,
                        holder: "test:1".to_string(),
                    };
                    for url in urls {
                        assert!(store.mark_processing(url.id, &owner).await.unwrap());
                        let page = PageMetadata {
                            title: format!("Title {}", url.url),
                            ..Default::default()
                        };
                        assert!(store
                            .complete(url.id, &owner, &Metadata::from_page(url.id, page))
                            .await
                            .unwrap());
                    }
                }
                _ => break,
            }
        }
        store.release(lease.id, "test:1").await.unwrap();
    }
}

fn completed(outcome: AdvanceOutcome, id: &str) {
    assert_eq!(
        outcome,
        AdvanceOutcome::Completed {
            task_id: id.to_string()
        }
    );
}

#[tokio::test]
async fn test_full_crawl_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let discovery = StaticDiscovery::new().with_urls(
        "example.com",
        vec![
            DiscoveredUrl::new("https://example.com/a"),
            DiscoveredUrl::new("https://example.com/b"),
            DiscoveredUrl::new("https://example.com/c").with_classification("state"),
        ],
    );
    let h = harness(dir.path(), discovery, &["example.com"]).await;

    completed(h.pipeline.advance().await.unwrap(), "setup");
    assert!(h.config.storage.paths.current.exists());
    assert!(h.config.storage.paths.archive.exists());

    completed(h.pipeline.advance().await.unwrap(), "url_discovery");
    assert_eq!(h.store.urls().len(), 3);

    // 还有URL未处理，轮询步骤保持todo
    assert_eq!(
        h.pipeline.advance().await.unwrap(),
        AdvanceOutcome::Pending {
            task_id: "metadata_extraction".to_string()
        }
    );
    assert_eq!(h.signal.phase(), ExtractionPhase::Running);
    assert!(h.store.urls().iter().all(|u| u.is_assigned()));

    drain_workers(&h.store).await;

    completed(h.pipeline.advance().await.unwrap(), "metadata_extraction");
    assert_eq!(h.signal.phase(), ExtractionPhase::Completed);
    assert_eq!(
        h.tasks.get("metadata_extraction").unwrap().details,
        TaskDetails::MetadataExtraction {
            distribution_passes: 2
        }
    );

    completed(h.pipeline.advance().await.unwrap(), "file_generation");
    let current = h.config.storage.paths.current.join("example.com");
    assert!(current.join("llms.txt").exists());
    assert!(current.join("state/state-segment-1.md").exists());
    assert!(current.join("page/page-segment-1.md").exists());
    assert_eq!(h.uploader.uploads().len(), 1);

    completed(h.pipeline.advance().await.unwrap(), "set_next_schedule");
    let next_run = match h.tasks.get("cleanup").unwrap().details {
        TaskDetails::Cleanup { next_run } => next_run.expect("next_run set"),
        other => panic!("unexpected details: {other:?}"),
    };
    assert!(next_run > Utc::now());

    assert_eq!(
        h.pipeline.advance().await.unwrap(),
        AdvanceOutcome::Deferred {
            task_id: "cleanup".to_string()
        }
    );
    assert_eq!(h.store.metadata_count(), 3);

    h.tasks.set_details(
        "cleanup",
        TaskDetails::Cleanup {
            next_run: Some(Utc::now() - Duration::minutes(1)),
        },
    );
    completed(h.pipeline.advance().await.unwrap(), "cleanup");

    assert_eq!(h.store.metadata_count(), 0);
    assert!(h.store.workers().is_empty());
    assert!(h
        .store
        .urls()
        .iter()
        .all(|u| u.status == UrlStatus::New && !u.is_assigned() && u.retries == 0));
    assert_eq!(h.signal.phase(), ExtractionPhase::NotRunning);
    assert_eq!(
        h.tasks.status_of("url_discovery"),
        Some(TaskStatus::Todo)
    );
    assert_eq!(h.tasks.status_of("setup"), Some(TaskStatus::Done));

    // 下一轮从URL发现开始
    completed(h.pipeline.advance().await.unwrap(), "url_discovery");
}

#[tokio::test]
async fn test_publish_fault_is_isolated_per_domain() {
    let dir = tempfile::tempdir().unwrap();
    let discovery = StaticDiscovery::new()
        .with_urls("good.com", vec![DiscoveredUrl::new("https://good.com/x")])
        .with_urls("bad.com", vec![DiscoveredUrl::new("https://bad.com/y")]);
    let h = harness(dir.path(), discovery, &["good.com", "bad.com"]).await;

    for id in ["setup", "url_discovery"] {
        completed(h.pipeline.advance().await.unwrap(), id);
    }
    h.pipeline.advance().await.unwrap();
    drain_workers(&h.store).await;
    completed(h.pipeline.advance().await.unwrap(), "metadata_extraction");

    h.store.fail_reads_for("bad.com");

    completed(h.pipeline.advance().await.unwrap(), "file_generation");
    let current = &h.config.storage.paths.current;
    assert!(current.join("good.com/llms.txt").exists());
    assert!(!current.join("bad.com").exists());
    let uploads: Vec<String> = h.uploader.uploads().into_iter().map(|(_, d)| d).collect();
    assert_eq!(uploads, vec!["good.com".to_string()]);
}

#[tokio::test]
async fn test_failed_urls_are_retried_before_completion() {
    let dir = tempfile::tempdir().unwrap();
    let discovery = StaticDiscovery::new().with_urls(
        "example.com",
        vec![DiscoveredUrl::new("https://example.com/flaky")],
    );
    let h = harness(dir.path(), discovery, &["example.com"]).await;

    for id in ["setup", "url_discovery"] {
        completed(h.pipeline.advance().await.unwrap(), id);
    }

    for attempt in 1..=3 {
        assert!(matches!(
            h.pipeline.advance().await.unwrap(),
            AdvanceOutcome::Pending { .. }
        ));
        let url = h.store.url("https://example.com/flaky").unwrap();
        assert!(url.is_assigned(), "attempt {attempt} should be assigned");

        let lease = h
            .store
            .claim(std::time::Duration::from_secs(600), "test:1")
            .await
            .unwrap()
            .expect("slot available");
        let BatchClaim::Claimed { batch_id, .. } =
            h.store.claim_next_batch(lease.id).await.unwrap()
        else {
            panic!("attempt {attempt} should claim a batch");
        };
        let owner = BatchOwner {
            worker_id: lease.id,
            batch_id,
            holder: "test:1".to_string(),
        };
        assert!(h.store.mark_processing(url.id, &owner).await.unwrap());
        assert!(h.store.fail(url.id, &owner).await.unwrap());
        h.store.release(lease.id, "test:1").await.unwrap();
    }

    // 第三次失败后达到上限，不再回队，抽取步骤可以结束
    completed(h.pipeline.advance().await.unwrap(), "metadata_extraction");
    let url = h.store.url("https://example.com/flaky").unwrap();
    assert_eq!(url.status, UrlStatus::Failed);
    assert_eq!(url.retries, 3);
    assert!(h.tasks.find_by_id("metadata_extraction").await.unwrap().is_some());
}

#[tokio::test]
async fn test_unroutable_urls_do_not_block_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let discovery = StaticDiscovery::new().with_urls(
        "example.com",
        vec![
            DiscoveredUrl::new("https://example.com/news/1"),
            DiscoveredUrl::new("https://example.com/about"),
        ],
    );
    // 没有default类型，/about 无法路由
    let workers = vec![WorkerTypeBuilder::new("news")
        .with_patterns(&["/news/"])
        .build()];
    let h = harness_with_workers(dir.path(), discovery, &["example.com"], workers).await;

    for id in ["setup", "url_discovery"] {
        completed(h.pipeline.advance().await.unwrap(), id);
    }
    assert!(matches!(
        h.pipeline.advance().await.unwrap(),
        AdvanceOutcome::Pending { .. }
    ));

    drain_workers(&h.store).await;

    completed(h.pipeline.advance().await.unwrap(), "metadata_extraction");
    assert_eq!(h.signal.phase(), ExtractionPhase::Completed);

    let news = h.store.url("https://example.com/news/1").unwrap();
    assert_eq!(news.status, UrlStatus::Done);
    let about = h.store.url("https://example.com/about").unwrap();
    assert_eq!(about.status, UrlStatus::New);
    assert!(!about.is_assigned());
}
