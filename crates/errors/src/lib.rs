use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库迁移错误: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },
    #[error("URL未找到: {id}")]
    UrlNotFound { id: String },
    #[error("信号存储错误: {0}")]
    SignalStore(String),
    #[error("抓取失败: {url} (状态码: {status:?}) - {message}")]
    Fetch {
        url: String,
        status: Option<u16>,
        message: String,
    },
    #[error("元数据提取错误: {0}")]
    Extraction(String),
    #[error("发布失败: {domain} - {message}")]
    Publish { domain: String, message: String },
    #[error("上传失败: {0}")]
    Upload(String),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("无效的调度配置: {0}")]
    InvalidSchedule(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type CrawlerResult<T> = Result<T, CrawlerError>;

impl CrawlerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn publish_error<D: Into<String>, M: Into<String>>(domain: D, msg: M) -> Self {
        Self::Publish {
            domain: domain.into(),
            message: msg.into(),
        }
    }
    pub fn fetch_error<U: Into<String>, M: Into<String>>(
        url: U,
        status: Option<u16>,
        msg: M,
    ) -> Self {
        Self::Fetch {
            url: url.into(),
            status,
            message: msg.into(),
        }
    }
    /// 4xx 响应视为确定性失败，不再重试
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CrawlerError::Fetch {
                status: Some(code),
                ..
            } if (400..500).contains(code)
        )
    }
    pub fn is_retryable(&self) -> bool {
        match self {
            CrawlerError::Fetch { .. } => !self.is_client_error(),
            CrawlerError::DatabaseOperation(_) | CrawlerError::SignalStore(_) => true,
            _ => false,
        }
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrawlerError::Internal(_) | CrawlerError::Configuration(_) | CrawlerError::Migration(_)
        )
    }
}

impl From<serde_json::Error> for CrawlerError {
    fn from(err: serde_json::Error) -> Self {
        CrawlerError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for CrawlerError {
    fn from(err: redis::RedisError) -> Self {
        CrawlerError::SignalStore(err.to_string())
    }
}

impl From<anyhow::Error> for CrawlerError {
    fn from(err: anyhow::Error) -> Self {
        CrawlerError::Internal(err.to_string())
    }
}
