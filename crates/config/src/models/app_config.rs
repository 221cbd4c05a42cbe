use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    crawl::{validate_domains, validate_workers, DomainConfig, SitemapConfig, WorkerTypeConfig},
    database::DatabaseConfig,
    redis::RedisConfig,
    runtime::{FetchConfig, LeaseConfig, PipelineConfig},
    schedule::ScheduleConfig,
    storage::StorageConfig,
};
use crate::validation::ConfigValidator;

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/crawler.toml",
    "crawler.toml",
    "/etc/llms-crawler/config.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub domains: Vec<DomainConfig>,
    pub workers: Vec<WorkerTypeConfig>,
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
            domains: vec![DomainConfig {
                domain: "example.com".to_string(),
                priority: 1,
                segment_size: 500,
                title: "LLMS.TXT for example.com".to_string(),
                description: String::new(),
                llms_path: "llms".to_string(),
                sitemaps: vec![SitemapConfig {
                    name: "page".to_string(),
                    title: "General Pages".to_string(),
                    description: String::new(),
                }],
            }],
            workers: vec![WorkerTypeConfig {
                name: super::crawl::DEFAULT_WORKER_TYPE.to_string(),
                url_patterns: vec![".*".to_string()],
                priority: 0,
                batch_size: 8000,
                concurrency: 1,
                instances: 5,
            }],
            lease: LeaseConfig::default(),
            fetch: FetchConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            match DEFAULT_CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
                Some(path) => {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
                None => {
                    let defaults = ConfigBuilder::try_from(&AppConfig::default())
                        .context("构建默认配置失败")?;
                    builder = builder.add_source(defaults);
                }
            }
        }

        // CRAWLER_DATABASE__URL, CRAWLER_LEASE__STALE_THRESHOLD_SECONDS ...
        builder = builder.add_source(
            Environment::with_prefix("CRAWLER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn domain(&self, name: &str) -> Option<&DomainConfig> {
        self.domains.iter().find(|d| d.domain == name)
    }

    pub fn worker_type(&self, name: &str) -> Option<&WorkerTypeConfig> {
        self.workers.iter().find(|w| w.name == name)
    }

    /// 按优先级降序排列的域名
    pub fn domains_by_priority(&self) -> Vec<&DomainConfig> {
        let mut domains: Vec<&DomainConfig> = self.domains.iter().collect();
        domains.sort_by(|a, b| b.priority.cmp(&a.priority));
        domains
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.database.validate()?;
        self.redis.validate()?;
        self.schedule.validate()?;
        self.storage.validate()?;
        validate_domains(&self.domains)?;
        validate_workers(&self.workers)?;
        self.lease.validate()?;
        self.fetch.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [database]
        url = "postgresql://localhost/crawler_test"

        [schedule]
        type = "daily"
        time_of_day = "02:00"
        timezone = "+08:00"

        [storage]
        retain_versions = 5

        [storage.paths]
        current = "/tmp/llms/current"
        temp = "/tmp/llms/temp"
        archive = "/tmp/llms/archive"

        [[domains]]
        domain = "a.example.com"
        priority = 1
        title = "A"

        [[domains]]
        domain = "b.example.com"
        priority = 5
        title = "B"

        [[workers]]
        name = "blog"
        url_patterns = ["/blog/"]
        batch_size = 50
        concurrency = 4
        instances = 2

        [[workers]]
        name = "default"
        url_patterns = [".*"]
        batch_size = 100
        instances = 1
    "#;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers[0].batch_size, 8000);
        assert_eq!(config.workers[0].instances, 5);
        assert_eq!(config.storage.retain_versions, 3);
    }

    #[test]
    fn test_from_toml() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.database.url, "postgresql://localhost/crawler_test");
        assert_eq!(config.storage.retain_versions, 5);
        assert_eq!(config.workers.len(), 2);
        assert_eq!(config.workers[1].concurrency, 1);
        assert_eq!(config.lease.stale_threshold_seconds, 600);
        assert_eq!(config.pipeline.max_url_retries, 3);
        assert!(config.worker_type("blog").is_some());
        assert!(config.domain("c.example.com").is_none());
    }

    #[test]
    fn test_domains_by_priority() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let names: Vec<&str> = config
            .domains_by_priority()
            .iter()
            .map(|d| d.domain.as_str())
            .collect();
        assert_eq!(names, vec!["b.example.com", "a.example.com"]);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let rendered = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed.workers[0].name, "blog");
        assert_eq!(parsed.schedule.timezone, "+08:00");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.domains.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(AppConfig::load(Some("/nonexistent/crawler.toml")).is_err());
    }

    #[test]
    fn test_invalid_worker_pattern_rejected() {
        let bad = SAMPLE.replace("[\"/blog/\"]", "[\"(\"]");
        assert!(AppConfig::from_toml(&bad).is_err());
    }
}
