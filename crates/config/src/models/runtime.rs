use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// worker租约参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// 心跳超过该时长的active槽位视为已放弃，可被重新认领
    pub stale_threshold_seconds: u64,
    pub heartbeat_interval_seconds: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            stale_threshold_seconds: 600,
            heartbeat_interval_seconds: 30,
        }
    }
}

impl LeaseConfig {
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }
}

impl ConfigValidator for LeaseConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.stale_threshold_seconds,
            "lease.stale_threshold_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.heartbeat_interval_seconds,
            "lease.heartbeat_interval_seconds",
        )?;
        if self.heartbeat_interval_seconds >= self.stale_threshold_seconds {
            return Err(crate::ConfigError::Validation(
                "lease.heartbeat_interval_seconds must be shorter than stale_threshold_seconds"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// 页面抓取参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_seconds: u64,
    /// 最多尝试次数（含首次）
    pub retries: u32,
    pub backoff_base_ms: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            retries: 3,
            backoff_base_ms: 500,
            user_agent: "llms-crawler/1.0".to_string(),
        }
    }
}

impl ConfigValidator for FetchConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(self.timeout_seconds, "fetch.timeout_seconds")?;
        ValidationUtils::validate_count(self.retries as usize, "fetch.retries", 10)?;
        ValidationUtils::validate_not_empty(&self.user_agent, "fetch.user_agent")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 失败URL重新分发的次数上限，达到后保持failed
    pub max_url_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_url_retries: 3 }
    }
}

impl ConfigValidator for PipelineConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.max_url_retries > 100 {
            return Err(crate::ConfigError::Validation(
                "pipeline.max_url_retries must be less than or equal to 100".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_defaults() {
        let lease = LeaseConfig::default();
        assert_eq!(lease.stale_threshold(), Duration::from_secs(600));
        assert_eq!(lease.heartbeat_interval(), Duration::from_secs(30));
        assert!(lease.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_threshold() {
        let lease = LeaseConfig {
            stale_threshold_seconds: 30,
            heartbeat_interval_seconds: 30,
        };
        assert!(lease.validate().is_err());
    }

    #[test]
    fn test_fetch_validation() {
        assert!(FetchConfig::default().validate().is_ok());
        let fetch = FetchConfig {
            retries: 0,
            ..Default::default()
        };
        assert!(fetch.validate().is_err());
    }
}
