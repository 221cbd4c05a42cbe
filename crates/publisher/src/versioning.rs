use chrono::Utc;
use crawler_config::{DomainConfig, StorageConfig};
use crawler_domain::UrlRepository;
use crawler_errors::{CrawlerError, CrawlerResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::renderer::{self, RenderedSite};
use crate::tree;

/// 版本号格式，字典序即时间序
pub const VERSION_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";

#[derive(Debug, Clone)]
pub struct PublishReport {
    pub domain: String,
    pub version: String,
    pub pages: usize,
    pub segments: usize,
    /// 发布后的 `current/<domain>`
    pub output_dir: PathBuf,
}

/// 输出版本管理器
///
/// 每次发布先在 `temp/<domain>-<version>` 渲染完整目录树，再通过两次rename
/// 替换 `current/<domain>`：旧目录先移到 `temp/<domain>.previous`，新目录再移入。
/// 最后复制到 `archive/<domain>/<version>` 并按 `retain_versions` 清理旧归档。
/// 渲染或替换失败时丢弃临时目录，current不变。
///
/// 两次rename之间进程崩溃会留下 `.previous`，下一次发布开始时先把它恢复回current。
pub struct OutputVersionManager {
    storage: StorageConfig,
    domains: Vec<DomainConfig>,
    url_repo: Arc<dyn UrlRepository>,
}

impl OutputVersionManager {
    pub fn new(
        storage: StorageConfig,
        domains: Vec<DomainConfig>,
        url_repo: Arc<dyn UrlRepository>,
    ) -> Self {
        Self {
            storage,
            domains,
            url_repo,
        }
    }

    pub fn current_dir(&self, domain: &str) -> PathBuf {
        self.storage.paths.current.join(domain)
    }

    pub fn archive_dir(&self, domain: &str) -> PathBuf {
        self.storage.paths.archive.join(domain)
    }

    pub async fn publish(&self, domain: &str) -> CrawlerResult<PublishReport> {
        let config = self
            .domains
            .iter()
            .find(|d| d.domain == domain)
            .ok_or_else(|| CrawlerError::publish_error(domain, "域名未配置"))?;

        self.recover_interrupted_swap(domain)
            .await
            .map_err(|e| CrawlerError::publish_error(domain, e.to_string()))?;

        let pages = self.url_repo.find_published(domain).await?;
        let site = renderer::render(config, &pages);
        let version = Utc::now().format(VERSION_FORMAT).to_string();

        let scratch = self
            .storage
            .paths
            .temp
            .join(format!("{domain}-{version}"));

        if let Err(e) = self.stage_and_swap(domain, &site, &scratch).await {
            if let Err(cleanup) = tree::remove_tree(&scratch).await {
                warn!("清理临时目录 {} 失败: {}", scratch.display(), cleanup);
            }
            return Err(CrawlerError::publish_error(domain, e.to_string()));
        }

        let output_dir = self.current_dir(domain);
        // 归档失败不影响已发布的current
        if let Err(e) = self.archive(domain, &output_dir, &version).await {
            warn!("域名 {} 归档版本 {} 失败: {}", domain, version, e);
        }

        info!(
            domain,
            version = %version,
            pages = site.pages,
            segments = site.segments,
            "发布完成"
        );

        Ok(PublishReport {
            domain: domain.to_string(),
            version,
            pages: site.pages,
            segments: site.segments,
            output_dir,
        })
    }

    fn previous_dir(&self, domain: &str) -> PathBuf {
        self.storage.paths.temp.join(format!("{domain}.previous"))
    }

    /// 处理上一次替换中断留下的 `temp/<domain>.previous`
    ///
    /// current缺失时把它移回原位，否则说明新目录已经就位，直接删除
    async fn recover_interrupted_swap(&self, domain: &str) -> std::io::Result<()> {
        let previous = self.previous_dir(domain);
        if !fs::try_exists(&previous).await? {
            return Ok(());
        }

        let current = self.current_dir(domain);
        if fs::try_exists(&current).await? {
            debug!("删除残留的旧版本 {}", previous.display());
            return tree::remove_tree(&previous).await;
        }

        warn!(
            "上次发布在替换中途中断，恢复 {} 到 {}",
            previous.display(),
            current.display()
        );
        fs::create_dir_all(&self.storage.paths.current).await?;
        fs::rename(&previous, &current).await
    }

    async fn stage_and_swap(
        &self,
        domain: &str,
        site: &RenderedSite,
        scratch: &Path,
    ) -> std::io::Result<()> {
        fs::create_dir_all(scratch).await?;
        for file in &site.files {
            let target = scratch.join(&file.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&target, &file.contents).await?;
        }
        debug!("临时目录 {} 写入 {} 个文件", scratch.display(), site.files.len());

        fs::create_dir_all(&self.storage.paths.current).await?;
        let current = self.current_dir(domain);
        let previous = self.previous_dir(domain);

        let had_previous = fs::try_exists(&current).await?;
        if had_previous {
            fs::rename(&current, &previous).await?;
        }

        if let Err(e) = fs::rename(scratch, &current).await {
            if had_previous {
                if let Err(restore) = fs::rename(&previous, &current).await {
                    warn!("恢复 {} 失败: {}", current.display(), restore);
                }
            }
            return Err(e);
        }

        if had_previous {
            if let Err(e) = tree::remove_tree(&previous).await {
                warn!("删除旧版本 {} 失败: {}", previous.display(), e);
            }
        }
        Ok(())
    }

    async fn archive(&self, domain: &str, output_dir: &Path, version: &str) -> std::io::Result<()> {
        let archive_root = self.archive_dir(domain);
        tree::copy_tree(output_dir, &archive_root.join(version)).await?;

        let removed = self.prune_archive(&archive_root).await?;
        if removed > 0 {
            debug!("域名 {} 删除旧归档 {} 个", domain, removed);
        }
        Ok(())
    }

    async fn prune_archive(&self, archive_root: &Path) -> std::io::Result<usize> {
        let mut versions = Vec::new();
        let mut entries = fs::read_dir(archive_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                versions.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        versions.sort();

        let excess = versions.len().saturating_sub(self.storage.retain_versions);
        for version in &versions[..excess] {
            tree::remove_tree(&archive_root.join(version)).await?;
        }
        Ok(excess)
    }

    /// 归档中保留的版本，旧到新
    pub async fn archived_versions(&self, domain: &str) -> CrawlerResult<Vec<String>> {
        let root = self.archive_dir(domain);
        if !fs::try_exists(&root).await? {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            versions.push(entry.file_name().to_string_lossy().to_string());
        }
        versions.sort();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawler_domain::{Metadata, PageMetadata, UrlStatus};
    use crawler_testing_utils::{domain_config, AppConfigBuilder, CrawlUrlBuilder, MockCrawlStore};
    use std::time::Duration;

    async fn seed_done(store: &MockCrawlStore, domain: &str, paths: &[&str]) {
        for path in paths {
            let url = CrawlUrlBuilder::new(domain, path)
                .with_status(UrlStatus::Done)
                .build();
            let page = PageMetadata {
                title: format!("Page {path}"),
                ..Default::default()
            };
            let id = url.id;
            store.insert_url(url);
            store.insert_metadata(Metadata::from_page(id, page));
        }
    }

    fn manager(root: &Path, store: &MockCrawlStore, retain: usize) -> OutputVersionManager {
        let mut domain = domain_config("example.com", 1);
        domain.segment_size = 2;
        let config = AppConfigBuilder::new(root)
            .with_domains(vec![domain])
            .with_retain_versions(retain)
            .build();
        OutputVersionManager::new(config.storage, config.domains, Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn test_publish_writes_current_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockCrawlStore::new();
        seed_done(&store, "example.com", &["/a", "/b", "/c"]).await;
        let manager = manager(dir.path(), &store, 3);

        let report = manager.publish("example.com").await.unwrap();

        assert_eq!(report.pages, 3);
        assert_eq!(report.segments, 2);
        let files = tree::list_files(&report.output_dir).await.unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("llms.txt"),
                PathBuf::from("page/page-segment-1.md"),
                PathBuf::from("page/page-segment-2.md"),
            ]
        );
        assert_eq!(
            manager.archived_versions("example.com").await.unwrap(),
            vec![report.version.clone()]
        );
        // 临时目录不残留
        assert!(tree::list_files(&dir.path().join("temp"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_archive_keeps_newest_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockCrawlStore::new();
        seed_done(&store, "example.com", &["/a"]).await;
        let manager = manager(dir.path(), &store, 3);

        let mut versions = Vec::new();
        for _ in 0..4 {
            versions.push(manager.publish("example.com").await.unwrap().version);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let archived = manager.archived_versions("example.com").await.unwrap();
        assert_eq!(archived, versions[1..].to_vec());
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_current_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockCrawlStore::new();
        seed_done(&store, "example.com", &["/a"]).await;

        let good = manager(dir.path(), &store, 3);
        let first = good.publish("example.com").await.unwrap();
        let before = fs::read_to_string(first.output_dir.join("llms.txt"))
            .await
            .unwrap();

        // temp指向普通文件，暂存必然失败
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "x").await.unwrap();
        let mut broken = manager(dir.path(), &store, 3);
        broken.storage.paths.temp = blocker;
        seed_done(&store, "example.com", &["/b"]).await;

        let err = broken.publish("example.com").await.unwrap_err();
        assert!(matches!(err, CrawlerError::Publish { .. }));

        let after = fs::read_to_string(first.output_dir.join("llms.txt"))
            .await
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(
            good.archived_versions("example.com").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_domain_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockCrawlStore::new();
        let manager = manager(dir.path(), &store, 3);

        assert!(manager.publish("unknown.org").await.is_err());
        assert!(!manager.current_dir("unknown.org").exists());
    }

    #[tokio::test]
    async fn test_interrupted_swap_is_restored_before_next_publish() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockCrawlStore::new();
        seed_done(&store, "example.com", &["/a"]).await;
        let manager = manager(dir.path(), &store, 3);

        let first = manager.publish("example.com").await.unwrap();
        let before = fs::read_to_string(first.output_dir.join("llms.txt"))
            .await
            .unwrap();

        // 崩溃在两次rename之间：旧目录已移走，新目录未移入
        let previous = manager.previous_dir("example.com");
        fs::rename(&first.output_dir, &previous).await.unwrap();
        assert!(!first.output_dir.exists());

        // 本次发布读取失败，但恢复先于读取执行
        store.fail_reads_for("example.com");
        assert!(manager.publish("example.com").await.is_err());

        let restored = fs::read_to_string(first.output_dir.join("llms.txt"))
            .await
            .unwrap();
        assert_eq!(before, restored);
        assert!(!previous.exists());
        let current_entries = tree::list_files(&dir.path().join("current")).await.unwrap();
        assert!(current_entries.iter().all(|p| p.starts_with("example.com")));
    }

    #[tokio::test]
    async fn test_leftover_previous_is_dropped_when_current_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockCrawlStore::new();
        seed_done(&store, "example.com", &["/a"]).await;
        let manager = manager(dir.path(), &store, 3);
        manager.publish("example.com").await.unwrap();

        let previous = manager.previous_dir("example.com");
        fs::create_dir_all(&previous).await.unwrap();
        fs::write(previous.join("llms.txt"), "stale").await.unwrap();

        let report = manager.publish("example.com").await.unwrap();

        assert!(!previous.exists());
        let contents = fs::read_to_string(report.output_dir.join("llms.txt"))
            .await
            .unwrap();
        assert_ne!(contents, "stale");
    }
}
