use async_trait::async_trait;
use crawler_domain::ArtifactUploader;
use crawler_errors::{CrawlerError, CrawlerResult};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use crate::tree;

/// 把发布目录上传到对象存储
///
/// 支持的目标：
/// - `s3://bucket/prefix`，凭据取自 `AWS_*` 环境变量
/// - `file:///srv/llms`，本地目录
pub struct ObjectStoreUploader {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    target: String,
}

impl ObjectStoreUploader {
    pub fn new(target: &str) -> CrawlerResult<Self> {
        let url = Url::parse(target)
            .map_err(|e| CrawlerError::config_error(format!("无效的上传地址 {target}: {e}")))?;

        let (store, prefix): (Arc<dyn ObjectStore>, String) = match url.scheme() {
            "s3" => {
                let store = AmazonS3Builder::from_env()
                    .with_url(target)
                    .build()
                    .map_err(|e| CrawlerError::Upload(e.to_string()))?;
                (Arc::new(store), url.path().trim_matches('/').to_string())
            }
            "file" => {
                let root = url
                    .to_file_path()
                    .map_err(|_| CrawlerError::config_error(format!("无效的本地路径: {target}")))?;
                std::fs::create_dir_all(&root)?;
                let store = LocalFileSystem::new_with_prefix(&root)
                    .map_err(|e| CrawlerError::Upload(e.to_string()))?;
                (Arc::new(store), String::new())
            }
            other => {
                return Err(CrawlerError::config_error(format!(
                    "不支持的上传协议: {other}"
                )))
            }
        };

        Ok(Self {
            store,
            prefix,
            target: target.to_string(),
        })
    }

    fn location(&self, domain: &str, relative: &Path) -> ObjectPath {
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        if self.prefix.is_empty() {
            ObjectPath::from(format!("{domain}/{relative}"))
        } else {
            ObjectPath::from(format!("{}/{domain}/{relative}", self.prefix))
        }
    }
}

#[async_trait]
impl ArtifactUploader for ObjectStoreUploader {
    async fn upload(&self, local_tree: &Path, domain: &str) -> CrawlerResult<()> {
        let files = tree::list_files(local_tree).await?;

        for relative in &files {
            let bytes = fs::read(local_tree.join(relative)).await?;
            let location = self.location(domain, relative);
            self.store
                .put(&location, PutPayload::from(bytes))
                .await
                .map_err(|e| CrawlerError::Upload(format!("{location}: {e}")))?;
            debug!("已上传 {}", location);
        }

        info!(domain, files = files.len(), target = %self.target, "上传完成");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_to_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("current/example.com");
        fs::create_dir_all(source.join("page")).await.unwrap();
        fs::write(source.join("llms.txt"), "# index").await.unwrap();
        fs::write(source.join("page/page-segment-1.md"), "- [a](b)")
            .await
            .unwrap();

        let target_dir = dir.path().join("bucket");
        let target = Url::from_directory_path(&target_dir).unwrap();
        let uploader = ObjectStoreUploader::new(target.as_str()).unwrap();

        uploader.upload(&source, "example.com").await.unwrap();

        let uploaded = fs::read_to_string(target_dir.join("example.com/page/page-segment-1.md"))
            .await
            .unwrap();
        assert_eq!(uploaded, "- [a](b)");
        assert!(target_dir.join("example.com/llms.txt").exists());
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        assert!(ObjectStoreUploader::new("ftp://host/path").is_err());
    }
}
