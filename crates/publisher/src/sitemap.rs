//! 基于sitemap.xml的URL发现
//!
//! 从 `https://<domain>/sitemap.xml` 开始，递归展开 `<sitemapindex>` 子站点地图
//! (最多3层)。分类取自子站点地图文件名，例如 `bbn_state-sitemap2.xml` 得到
//! `bbn_state`；根站点地图中的URL不带分类，写库时取默认值。

use async_trait::async_trait;
use crawler_config::FetchConfig;
use crawler_domain::{DiscoveredUrl, UrlDiscovery};
use crawler_errors::{CrawlerError, CrawlerResult};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_DEPTH: usize = 3;

static SITEMAP_LOC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<sitemap>.*?<loc>\s*(.*?)\s*</loc>.*?</sitemap>").expect("valid regex")
});
static URL_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<url>(.*?)</url>").expect("valid regex"));
static LOC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<loc>\s*(.*?)\s*</loc>").expect("valid regex"));
static LASTMOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<lastmod>\s*(.*?)\s*</lastmod>").expect("valid regex"));
static PRIORITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<priority>\s*(.*?)\s*</priority>").expect("valid regex"));
static CHILD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^/]+?)-sitemap\d*\.xml(?:\.gz)?(?:\?.*)?$").expect("valid regex")
});

#[derive(Debug, Default, PartialEq)]
pub struct ParsedSitemap {
    pub children: Vec<String>,
    pub urls: Vec<DiscoveredUrl>,
}

/// 解析sitemap或sitemapindex文档
pub fn parse_sitemap(xml: &str) -> ParsedSitemap {
    if xml.contains("<sitemapindex") {
        return ParsedSitemap {
            children: SITEMAP_LOC
                .captures_iter(xml)
                .map(|c| unescape(&c[1]))
                .collect(),
            urls: Vec::new(),
        };
    }

    let urls = URL_ENTRY
        .captures_iter(xml)
        .filter_map(|entry| {
            let body = entry.get(1)?.as_str();
            let loc = LOC.captures(body)?;
            let mut url = DiscoveredUrl::new(unescape(&loc[1]));
            url.lastmod = LASTMOD.captures(body).map(|c| c[1].to_string());
            url.priority = PRIORITY
                .captures(body)
                .and_then(|c| c[1].parse::<f64>().ok());
            Some(url)
        })
        .collect();

    ParsedSitemap {
        children: Vec::new(),
        urls,
    }
}

/// `https://x.com/bbn_state-sitemap2.xml` -> `bbn_state`
pub fn classification_from_sitemap(sitemap_url: &str) -> Option<String> {
    CHILD_NAME
        .captures(sitemap_url)
        .map(|c| c[1].to_string())
        .filter(|name| !name.is_empty())
}

fn unescape(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

pub struct SitemapDiscovery {
    client: reqwest::Client,
    sitemap_path: String,
}

impl SitemapDiscovery {
    pub fn new(fetch: &FetchConfig) -> CrawlerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(fetch.timeout_seconds))
            .user_agent(fetch.user_agent.clone())
            .build()
            .map_err(|e| CrawlerError::Internal(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            sitemap_path: "sitemap.xml".to_string(),
        })
    }

    async fn fetch(&self, url: &str) -> CrawlerResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CrawlerError::fetch_error(url, None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlerError::fetch_error(
                url,
                Some(status.as_u16()),
                "sitemap请求失败",
            ));
        }

        response
            .text()
            .await
            .map_err(|e| CrawlerError::fetch_error(url, Some(status.as_u16()), e.to_string()))
    }
}

#[async_trait]
impl UrlDiscovery for SitemapDiscovery {
    fn name(&self) -> &str {
        "sitemap"
    }

    fn matches(&self, _domain: &str) -> bool {
        true
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn discover(&self, domain: &str) -> Vec<DiscoveredUrl> {
        let root = format!("https://{domain}/{}", self.sitemap_path);
        let mut pending: Vec<(String, usize, Option<String>)> = vec![(root, 0, None)];
        let mut found = Vec::new();

        while let Some((url, depth, classification)) = pending.pop() {
            let xml = match self.fetch(&url).await {
                Ok(xml) => xml,
                Err(e) => {
                    warn!("获取sitemap {} 失败: {}", url, e);
                    continue;
                }
            };

            let parsed = parse_sitemap(&xml);
            debug!(
                "sitemap {}: {} 个子sitemap, {} 个URL",
                url,
                parsed.children.len(),
                parsed.urls.len()
            );

            if depth < MAX_DEPTH {
                for child in parsed.children.into_iter().rev() {
                    let child_class = classification_from_sitemap(&child).or(classification.clone());
                    pending.push((child, depth + 1, child_class));
                }
            } else if !parsed.children.is_empty() {
                warn!("sitemap {} 超过最大嵌套深度，忽略子sitemap", url);
            }

            found.extend(parsed.urls.into_iter().map(|u| match &classification {
                Some(c) => u.with_classification(c.clone()),
                None => u,
            }));
        }

        found
    }
}
