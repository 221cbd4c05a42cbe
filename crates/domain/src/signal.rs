use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crawler_errors::{CrawlerError, CrawlerResult};

/// 信号键名
pub const EXTRACTION_PHASE_KEY: &str = "metadata_extraction_status";

/// 元数据抽取阶段，master写入，worker据此决定是否认领槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPhase {
    NotRunning,
    Running,
    Completed,
}

impl ExtractionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionPhase::NotRunning => "not_running",
            ExtractionPhase::Running => "running",
            ExtractionPhase::Completed => "completed",
        }
    }
}

impl fmt::Display for ExtractionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionPhase {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "not_running" => Ok(ExtractionPhase::NotRunning),
            "running" => Ok(ExtractionPhase::Running),
            "completed" => Ok(ExtractionPhase::Completed),
            other => Err(CrawlerError::SignalStore(format!(
                "未知的抽取阶段: {other}"
            ))),
        }
    }
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    /// 键不存在时视为 NotRunning
    async fn get_phase(&self) -> CrawlerResult<ExtractionPhase>;
    async fn set_phase(&self, phase: ExtractionPhase) -> CrawlerResult<()>;
}
