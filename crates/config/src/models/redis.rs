use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// Redis连接配置，用于抽取阶段信号
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub connection_timeout_seconds: u64,
    /// 信号键前缀，多套部署共用一个Redis时区分
    pub key_prefix: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connection_timeout_seconds: 5,
            key_prefix: None,
        }
    }
}

impl RedisConfig {
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.database
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

impl ConfigValidator for RedisConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.host, "redis.host")?;
        ValidationUtils::validate_port(self.port, "redis.port")?;
        if !(0..=15).contains(&self.database) {
            return Err(crate::ConfigError::Validation(
                "redis.database must be between 0 and 15".to_string(),
            ));
        }
        ValidationUtils::validate_timeout_seconds(
            self.connection_timeout_seconds,
            "redis.connection_timeout_seconds",
        )?;
        Ok(())
    }
}
