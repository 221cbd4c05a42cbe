use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 未匹配任何URL模式时兜底的worker类型名
pub const DEFAULT_WORKER_TYPE: &str = "default";

/// 站点地图分类的展示信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapConfig {
    /// 分类标签，例如 `bbn_state`
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub domain: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_segment_size")]
    pub segment_size: usize,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_llms_path")]
    pub llms_path: String,
    #[serde(default)]
    pub sitemaps: Vec<SitemapConfig>,
}

fn default_segment_size() -> usize {
    500
}

fn default_llms_path() -> String {
    "llms".to_string()
}

impl DomainConfig {
    pub fn sitemap(&self, classification: &str) -> Option<&SitemapConfig> {
        self.sitemaps.iter().find(|s| s.name == classification)
    }
}

impl ConfigValidator for DomainConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.domain, "domains.domain")?;
        if self.domain.contains('/') || self.domain.contains("..") {
            return Err(crate::ConfigError::Validation(format!(
                "domains.domain \"{}\" must be a bare host name",
                self.domain
            )));
        }
        ValidationUtils::validate_count(self.segment_size, "domains.segment_size", 100_000)?;
        ValidationUtils::validate_not_empty(&self.title, "domains.title")?;
        for sitemap in &self.sitemaps {
            ValidationUtils::validate_not_empty(&sitemap.name, "domains.sitemaps.name")?;
        }
        Ok(())
    }
}

/// 一种worker类型：匹配哪些URL、批量多大、并发多少、几个实例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTypeConfig {
    pub name: String,
    pub url_patterns: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub instances: u32,
}

fn default_concurrency() -> usize {
    1
}

impl ConfigValidator for WorkerTypeConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.name, "workers.name")?;
        ValidationUtils::validate_patterns(&self.url_patterns, "workers.url_patterns")?;
        ValidationUtils::validate_count(self.batch_size, "workers.batch_size", 1_000_000)?;
        ValidationUtils::validate_count(self.concurrency, "workers.concurrency", 1000)?;
        ValidationUtils::validate_count(self.instances as usize, "workers.instances", 1000)?;
        Ok(())
    }
}

pub(crate) fn validate_domains(domains: &[DomainConfig]) -> crate::ConfigResult<()> {
    let mut seen = HashSet::new();
    for domain in domains {
        domain.validate()?;
        if !seen.insert(domain.domain.as_str()) {
            return Err(crate::ConfigError::Validation(format!(
                "domain \"{}\" is configured more than once",
                domain.domain
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_workers(workers: &[WorkerTypeConfig]) -> crate::ConfigResult<()> {
    if workers.is_empty() {
        return Err(crate::ConfigError::Validation(
            "at least one worker type must be configured".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for worker in workers {
        worker.validate()?;
        if !seen.insert(worker.name.as_str()) {
            return Err(crate::ConfigError::Validation(format!(
                "worker type \"{}\" is configured more than once",
                worker.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(name: &str) -> WorkerTypeConfig {
        WorkerTypeConfig {
            name: name.to_string(),
            url_patterns: vec![".*".to_string()],
            priority: 0,
            batch_size: 100,
            concurrency: 4,
            instances: 2,
        }
    }

    #[test]
    fn test_worker_validation() {
        assert!(worker("default").validate().is_ok());

        let mut w = worker("default");
        w.instances = 0;
        assert!(w.validate().is_err());

        let mut w = worker("default");
        w.url_patterns = vec!["[".to_string()];
        assert!(w.validate().is_err());

        assert!(validate_workers(&[]).is_err());
        assert!(validate_workers(&[worker("a"), worker("a")]).is_err());
        assert!(validate_workers(&[worker("a"), worker("b")]).is_ok());
    }

    #[test]
    fn test_domain_defaults_and_lookup() {
        let domain: DomainConfig = toml::from_str(
            r#"
            domain = "example.com"
            title = "Example"

            [[sitemaps]]
            name = "blog"
            title = "Blog Posts"
            "#,
        )
        .unwrap();

        assert_eq!(domain.segment_size, 500);
        assert_eq!(domain.llms_path, "llms");
        assert_eq!(domain.sitemap("blog").map(|s| s.title.as_str()), Some("Blog Posts"));
        assert!(domain.sitemap("page").is_none());
        assert!(domain.validate().is_ok());
    }

    #[test]
    fn test_domain_rejects_paths() {
        let domain = DomainConfig {
            domain: "../etc".to_string(),
            priority: 0,
            segment_size: 10,
            title: "x".to_string(),
            description: String::new(),
            llms_path: "llms".to_string(),
            sitemaps: vec![],
        };
        assert!(domain.validate().is_err());
    }
}
