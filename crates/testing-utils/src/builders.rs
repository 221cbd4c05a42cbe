//! Test data builders for configuration and crawl entities

use crawler_config::{
    AppConfig, DomainConfig, SitemapConfig, StoragePaths, WorkerTypeConfig, DEFAULT_WORKER_TYPE,
};
use crawler_domain::{CrawlUrl, DiscoveredUrl, UrlStatus, Worker};
use std::path::Path;
use uuid::Uuid;

/// Builder for a worker type entry
pub struct WorkerTypeBuilder {
    config: WorkerTypeConfig,
}

impl WorkerTypeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            config: WorkerTypeConfig {
                name: name.to_string(),
                url_patterns: vec![".*".to_string()],
                priority: 0,
                batch_size: 100,
                concurrency: 1,
                instances: 1,
            },
        }
    }

    pub fn default_type() -> Self {
        Self::new(DEFAULT_WORKER_TYPE)
    }

    pub fn with_patterns(mut self, patterns: &[&str]) -> Self {
        self.config.url_patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn with_instances(mut self, instances: u32) -> Self {
        self.config.instances = instances;
        self
    }

    pub fn build(self) -> WorkerTypeConfig {
        self.config
    }
}

pub fn domain_config(domain: &str, priority: i32) -> DomainConfig {
    DomainConfig {
        domain: domain.to_string(),
        priority,
        segment_size: 500,
        title: format!("LLMS.TXT for {domain}"),
        description: format!("Pages published by {domain}"),
        llms_path: "llms".to_string(),
        sitemaps: vec![SitemapConfig {
            name: "page".to_string(),
            title: "General Pages".to_string(),
            description: String::new(),
        }],
    }
}

/// Builder for an AppConfig whose storage lives under a test directory
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    pub fn new(root: &Path) -> Self {
        let mut config = AppConfig::default();
        config.storage.paths = StoragePaths {
            current: root.join("current"),
            temp: root.join("temp"),
            archive: root.join("archive"),
        };
        Self { config }
    }

    pub fn with_domains(mut self, domains: Vec<DomainConfig>) -> Self {
        self.config.domains = domains;
        self
    }

    pub fn with_workers(mut self, workers: Vec<WorkerTypeConfig>) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn with_retain_versions(mut self, retain: usize) -> Self {
        self.config.storage.retain_versions = retain;
        self
    }

    pub fn with_max_url_retries(mut self, max: u32) -> Self {
        self.config.pipeline.max_url_retries = max;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

/// Builder for CrawlUrl rows inserted straight into the mock store
pub struct CrawlUrlBuilder {
    url: CrawlUrl,
}

impl CrawlUrlBuilder {
    pub fn new(domain: &str, path: &str) -> Self {
        Self {
            url: CrawlUrl::new(domain, &format!("https://{domain}{path}"), "page"),
        }
    }

    pub fn with_status(mut self, status: UrlStatus) -> Self {
        self.url.status = status;
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.url.priority = priority;
        self
    }

    pub fn with_retries(mut self, retries: i32) -> Self {
        self.url.retries = retries;
        self
    }

    pub fn with_classification(mut self, classification: &str) -> Self {
        self.url.classification = classification.to_string();
        self
    }

    pub fn assigned_to(mut self, worker: &Worker, batch_id: i64) -> Self {
        self.url.worker_id = Some(worker.id);
        self.url.worker_type = Some(worker.worker_type.clone());
        self.url.batch_id = Some(batch_id);
        self
    }

    pub fn id(&self) -> Uuid {
        self.url.id
    }

    pub fn build(self) -> CrawlUrl {
        self.url
    }
}

/// `count` discovered URLs under `https://{domain}/page-{i}`
pub fn discovered_urls(domain: &str, count: usize) -> Vec<DiscoveredUrl> {
    (0..count)
        .map(|i| DiscoveredUrl::new(format!("https://{domain}/page-{i}")))
        .collect()
}
