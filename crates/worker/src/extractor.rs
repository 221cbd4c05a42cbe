//! 基于HTTP + HTML解析的默认元数据抽取器

use async_trait::async_trait;
use crawler_config::FetchConfig;
use crawler_domain::{MetadataExtractor, PageMetadata};
use crawler_errors::{CrawlerError, CrawlerResult};
use rand::Rng;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, warn};

const UNTITLED: &str = "Untitled";

pub struct HttpMetadataExtractor {
    client: reqwest::Client,
    retries: u32,
    backoff_base_ms: u64,
}

impl HttpMetadataExtractor {
    pub fn new(fetch: &FetchConfig) -> CrawlerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(fetch.timeout_seconds))
            .user_agent(fetch.user_agent.clone())
            .build()
            .map_err(|e| CrawlerError::Internal(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            retries: fetch.retries.max(1),
            backoff_base_ms: fetch.backoff_base_ms,
        })
    }

    /// 返回 (最终URL, 页面内容)
    async fn fetch_once(&self, url: &str) -> CrawlerResult<(String, String)> {
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
                status.canonical_reason().unwrap_or("请求失败"),
            ));
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| CrawlerError::fetch_error(url, Some(status.as_u16()), e.to_string()))?;
        Ok((final_url, body))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base_ms.saturating_mul(1u64 << attempt.min(16));
        let jitter = rand::rng().random_range(0..=self.backoff_base_ms / 2);
        Duration::from_millis(base + jitter)
    }
}

#[async_trait]
impl MetadataExtractor for HttpMetadataExtractor {
    fn name(&self) -> &str {
        "default"
    }

    fn matches(&self, _url: &str) -> bool {
        true
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn extract(&self, url: &str) -> CrawlerResult<PageMetadata> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok((final_url, body)) => return Ok(parse_page(&body, &final_url)),
                // 4xx 不重试
                Err(e) if e.is_client_error() || attempt + 1 >= self.retries => return Err(e),
                Err(e) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "抓取 {} 第 {} 次失败，{}ms 后重试: {}",
                        url,
                        attempt + 1,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// 从HTML中提取标题、描述、作者和日期
pub fn parse_page(html: &str, final_url: &str) -> PageMetadata {
    let document = Html::parse_document(html);

    let title = meta_content(&document, r#"meta[property="og:title"]"#)
        .or_else(|| element_text(&document, "title"))
        .unwrap_or_else(|| UNTITLED.to_string());

    let description = meta_content(&document, r#"meta[name="description"]"#)
        .or_else(|| meta_content(&document, r#"meta[property="og:description"]"#));

    let author = meta_content(&document, r#"meta[name="author"]"#)
        .or_else(|| meta_content(&document, r#"meta[property="article:author"]"#));

    let date = meta_content(&document, r#"meta[property="article:modified_time"]"#)
        .or_else(|| first_attr(&document, "time[datetime]", "datetime"));

    debug!("解析页面 {}: {}", final_url, title);

    PageMetadata {
        title,
        description,
        author,
        date,
        extras: serde_json::json!({ "final_url": final_url }),
    }
}

fn meta_content(document: &Html, css: &str) -> Option<String> {
    first_attr(document, css, "content")
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn element_text(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    let text = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}
