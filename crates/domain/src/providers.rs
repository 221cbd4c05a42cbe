use async_trait::async_trait;
use std::sync::Arc;

use crate::collaborators::{DiscoveredUrl, MetadataExtractor, UrlDiscovery};
use crate::entities::PageMetadata;
use crawler_errors::CrawlerResult;

/// 按输入选择实现的提供者
pub trait Provider: Send + Sync {
    fn matches(&self, input: &str) -> bool;
    fn priority(&self) -> i32;
}

impl Provider for dyn UrlDiscovery {
    fn matches(&self, input: &str) -> bool {
        UrlDiscovery::matches(self, input)
    }

    fn priority(&self) -> i32 {
        UrlDiscovery::priority(self)
    }
}

impl Provider for dyn MetadataExtractor {
    fn matches(&self, input: &str) -> bool {
        MetadataExtractor::matches(self, input)
    }

    fn priority(&self) -> i32 {
        MetadataExtractor::priority(self)
    }
}

/// 有序的提供者列表：按优先级降序取第一个匹配的，否则用默认实现
pub struct ProviderRegistry<T: ?Sized + Provider> {
    providers: Vec<Arc<T>>,
    default: Arc<T>,
}

impl<T: ?Sized + Provider> ProviderRegistry<T> {
    pub fn new(default: Arc<T>) -> Self {
        Self {
            providers: Vec::new(),
            default,
        }
    }

    pub fn register(mut self, provider: Arc<T>) -> Self {
        self.providers.push(provider);
        // 稳定排序，同优先级保持注册顺序
        self.providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        self
    }

    pub fn select(&self, input: &str) -> Arc<T> {
        self.providers
            .iter()
            .find(|p| p.matches(input))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<T>> {
        self.providers.iter().chain(std::iter::once(&self.default))
    }
}

#[async_trait]
impl UrlDiscovery for ProviderRegistry<dyn UrlDiscovery> {
    fn name(&self) -> &str {
        "registry"
    }

    fn matches(&self, _domain: &str) -> bool {
        true
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn discover(&self, domain: &str) -> Vec<DiscoveredUrl> {
        let provider = self.select(domain);
        tracing::debug!(domain, provider = provider.name(), "选择URL发现实现");
        provider.discover(domain).await
    }
}

#[async_trait]
impl MetadataExtractor for ProviderRegistry<dyn MetadataExtractor> {
    fn name(&self) -> &str {
        "registry"
    }

    fn matches(&self, _url: &str) -> bool {
        true
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn extract(&self, url: &str) -> CrawlerResult<PageMetadata> {
        self.select(url).extract(url).await
    }
}
