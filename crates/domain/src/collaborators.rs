//! 外部协作者的调用边界

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::entities::PageMetadata;
use crawler_errors::CrawlerResult;

/// 发现阶段得到的一条URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    pub url: String,
    pub lastmod: Option<String>,
    pub priority: Option<f64>,
    pub classification: Option<String>,
}

impl DiscoveredUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            lastmod: None,
            priority: None,
            classification: None,
        }
    }

    pub fn with_classification(mut self, classification: impl Into<String>) -> Self {
        self.classification = Some(classification.into());
        self
    }
}

/// URL发现，失败时返回空列表而不是错误
#[async_trait]
pub trait UrlDiscovery: Send + Sync {
    fn name(&self) -> &str;
    fn matches(&self, domain: &str) -> bool;
    fn priority(&self) -> i32;
    async fn discover(&self, domain: &str) -> Vec<DiscoveredUrl>;
}

/// 页面元数据抽取
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    fn name(&self) -> &str;
    fn matches(&self, url: &str) -> bool;
    fn priority(&self) -> i32;
    async fn extract(&self, url: &str) -> CrawlerResult<PageMetadata>;
}

/// 把发布后的目录树上传到对象存储
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    async fn upload(&self, local_tree: &Path, domain: &str) -> CrawlerResult<()>;
}

/// 未配置上传目标时使用
#[derive(Debug, Default, Clone)]
pub struct NoopUploader;

#[async_trait]
impl ArtifactUploader for NoopUploader {
    async fn upload(&self, _local_tree: &Path, domain: &str) -> CrawlerResult<()> {
        tracing::debug!(domain, "未配置上传目标，跳过上传");
        Ok(())
    }
}
