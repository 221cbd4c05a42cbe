use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePaths {
    pub current: PathBuf,
    pub temp: PathBuf,
    pub archive: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self {
            current: PathBuf::from("data/current"),
            temp: PathBuf::from("data/temp"),
            archive: PathBuf::from("data/archive"),
        }
    }
}

impl StoragePaths {
    pub fn all(&self) -> Vec<PathBuf> {
        vec![self.current.clone(), self.temp.clone(), self.archive.clone()]
    }
}

/// 对象存储上传目标，例如 `s3://llms-txt/prod` 或 `file:///srv/llms`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub retain_versions: usize,
    pub paths: StoragePaths,
    pub upload: Option<UploadConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retain_versions: 3,
            paths: StoragePaths::default(),
            upload: None,
        }
    }
}

impl ConfigValidator for StorageConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(self.retain_versions, "storage.retain_versions", 1000)?;

        for (path, field) in [
            (&self.paths.current, "storage.paths.current"),
            (&self.paths.temp, "storage.paths.temp"),
            (&self.paths.archive, "storage.paths.archive"),
        ] {
            ValidationUtils::validate_not_empty(&path.to_string_lossy(), field)?;
        }

        if self.paths.current == self.paths.temp
            || self.paths.current == self.paths.archive
            || self.paths.temp == self.paths.archive
        {
            return Err(crate::ConfigError::Validation(
                "storage.paths must be three distinct directories".to_string(),
            ));
        }

        if let Some(upload) = &self.upload {
            ValidationUtils::validate_url(&upload.url, "storage.upload.url")?;
        }

        Ok(())
    }
}
