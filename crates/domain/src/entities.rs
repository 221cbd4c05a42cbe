use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crawler_errors::CrawlerError;

/// 流水线步骤类型，同时也是预置任务的id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Setup,
    UrlDiscovery,
    MetadataExtraction,
    FileGeneration,
    SetNextSchedule,
    Cleanup,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::Setup,
        TaskType::UrlDiscovery,
        TaskType::MetadataExtraction,
        TaskType::FileGeneration,
        TaskType::SetNextSchedule,
        TaskType::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Setup => "setup",
            TaskType::UrlDiscovery => "url_discovery",
            TaskType::MetadataExtraction => "metadata_extraction",
            TaskType::FileGeneration => "file_generation",
            TaskType::SetNextSchedule => "set_next_schedule",
            TaskType::Cleanup => "cleanup",
        }
    }

    /// 执行顺序，数值小的先执行
    pub fn position(&self) -> i32 {
        match self {
            TaskType::Setup => 1,
            TaskType::UrlDiscovery => 2,
            TaskType::MetadataExtraction => 3,
            TaskType::FileGeneration => 4,
            TaskType::SetNextSchedule => 5,
            TaskType::Cleanup => 6,
        }
    }

    /// 每轮清理后重新置为todo的步骤
    pub fn is_cyclic(&self) -> bool {
        matches!(
            self,
            TaskType::UrlDiscovery
                | TaskType::MetadataExtraction
                | TaskType::FileGeneration
                | TaskType::SetNextSchedule
        )
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CrawlerError::task_not_found(s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Processing,
    Done,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        }
    }
}

/// 每种任务自己的附加字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskDetails {
    Setup {
        directories: Vec<String>,
    },
    UrlDiscovery,
    MetadataExtraction {
        /// 已执行的分发轮数
        #[serde(default)]
        distribution_passes: u32,
    },
    FileGeneration,
    SetNextSchedule,
    Cleanup {
        #[serde(default)]
        next_run: Option<DateTime<Utc>>,
    },
}

impl TaskDetails {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskDetails::Setup { .. } => TaskType::Setup,
            TaskDetails::UrlDiscovery => TaskType::UrlDiscovery,
            TaskDetails::MetadataExtraction { .. } => TaskType::MetadataExtraction,
            TaskDetails::FileGeneration => TaskType::FileGeneration,
            TaskDetails::SetNextSchedule => TaskType::SetNextSchedule,
            TaskDetails::Cleanup { .. } => TaskType::Cleanup,
        }
    }

    /// 新建任务时的初始字段
    pub fn initial(task_type: TaskType, directories: &[String]) -> Self {
        match task_type {
            TaskType::Setup => TaskDetails::Setup {
                directories: directories.to_vec(),
            },
            TaskType::UrlDiscovery => TaskDetails::UrlDiscovery,
            TaskType::MetadataExtraction => TaskDetails::MetadataExtraction {
                distribution_passes: 0,
            },
            TaskType::FileGeneration => TaskDetails::FileGeneration,
            TaskType::SetNextSchedule => TaskDetails::SetNextSchedule,
            TaskType::Cleanup => TaskDetails::Cleanup { next_run: None },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub position: i32,
    pub details: TaskDetails,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_type: TaskType, name: &str, description: &str, details: TaskDetails) -> Self {
        let now = Utc::now();
        Self {
            id: task_type.as_str().to_string(),
            task_type,
            name: name.to_string(),
            description: description.to_string(),
            status: TaskStatus::Todo,
            position: task_type.position(),
            details,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_processing(&self) -> bool {
        self.status == TaskStatus::Processing
    }
}

/// 引导时写入的六个预置任务
pub fn predefined_tasks(directories: &[String]) -> Vec<Task> {
    TaskType::ALL
        .into_iter()
        .map(|task_type| {
            let (name, description) = match task_type {
                TaskType::Setup => (
                    "Initial Setup",
                    "Initialize system and create necessary directories",
                ),
                TaskType::UrlDiscovery => (
                    "URL Discovery",
                    "Discover and collect URLs from all configured domains",
                ),
                TaskType::MetadataExtraction => (
                    "Metadata Extraction",
                    "Extract metadata from discovered URLs",
                ),
                TaskType::FileGeneration => ("File Generation", "Generate final output files"),
                TaskType::SetNextSchedule => (
                    "Set Next Schedule",
                    "Calculate and set next run time for cleanup task",
                ),
                TaskType::Cleanup => (
                    "Cleanup",
                    "Reset crawl state once the scheduled time has passed",
                ),
            };
            Task::new(
                task_type,
                name,
                description,
                TaskDetails::initial(task_type, directories),
            )
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    New,
    Processing,
    Done,
    Failed,
}

impl UrlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlStatus::New => "new",
            UrlStatus::Processing => "processing",
            UrlStatus::Done => "done",
            UrlStatus::Failed => "failed",
        }
    }
}

/// 一个待抓取页面
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlUrl {
    pub id: Uuid,
    pub url: String,
    pub domain: String,
    pub status: UrlStatus,
    pub priority: f64,
    pub retries: i32,
    pub lastmod: Option<String>,
    pub worker_id: Option<Uuid>,
    pub batch_id: Option<i64>,
    pub worker_type: Option<String>,
    pub classification: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CrawlUrl {
    pub fn new(domain: &str, url: &str, classification: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.to_string(),
            domain: domain.to_string(),
            status: UrlStatus::New,
            priority: DEFAULT_URL_PRIORITY,
            retries: 0,
            lastmod: None,
            worker_id: None,
            batch_id: None,
            worker_type: None,
            classification: classification.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// batch_id 和 worker_id 都已设置
    pub fn is_assigned(&self) -> bool {
        self.batch_id.is_some() && self.worker_id.is_some()
    }

    pub fn is_outstanding(&self) -> bool {
        matches!(self.status, UrlStatus::New | UrlStatus::Processing)
    }
}

pub const DEFAULT_URL_PRIORITY: f64 = 0.5;
pub const DEFAULT_CLASSIFICATION: &str = "page";

/// 抽取器返回的页面字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
    #[serde(default)]
    pub extras: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub id: Uuid,
    pub url_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
    pub extras: serde_json::Value,
    pub parsed_at: DateTime<Utc>,
}

impl Metadata {
    pub fn from_page(url_id: Uuid, page: PageMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            url_id,
            title: page.title,
            description: page.description,
            author: page.author,
            date: page.date,
            extras: page.extras,
            parsed_at: Utc::now(),
        }
    }
}

/// 发布时使用的已完成页面
#[derive(Debug, Clone)]
pub struct PublishedPage {
    pub url: String,
    pub classification: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Active,
    Failed,
    Completed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Active => "active",
            WorkerStatus::Failed => "failed",
            WorkerStatus::Completed => "completed",
        }
    }
}

/// 一个(worker_type, instance_number)容量槽位
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub worker_type: String,
    pub instance_number: i32,
    pub status: WorkerStatus,
    pub current_batch_id: Option<i64>,
    pub urls_processed: i32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub lease_holder: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(worker_type: &str, instance_number: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            worker_type: worker_type.to_string(),
            instance_number,
            status: WorkerStatus::Idle,
            current_batch_id: None,
            urls_processed: 0,
            last_heartbeat: None,
            lease_holder: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn slot_name(&self) -> String {
        format!("{}#{}", self.worker_type, self.instance_number)
    }

    /// 空闲，或active但心跳早于 `stale_before`
    pub fn is_claimable(&self, stale_before: DateTime<Utc>) -> bool {
        match self.status {
            WorkerStatus::Idle => true,
            WorkerStatus::Active => self
                .last_heartbeat
                .map(|hb| hb < stale_before)
                .unwrap_or(true),
            WorkerStatus::Failed | WorkerStatus::Completed => false,
        }
    }

    /// 心跳未过期的active槽位
    pub fn is_leased(&self, stale_before: DateTime<Utc>) -> bool {
        self.status == WorkerStatus::Active && !self.is_claimable(stale_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_predefined_tasks_order() {
        let tasks = predefined_tasks(&["data/current".to_string()]);
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "setup",
                "url_discovery",
                "metadata_extraction",
                "file_generation",
                "set_next_schedule",
                "cleanup"
            ]
        );
        assert!(tasks.windows(2).all(|w| w[0].position < w[1].position));
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Todo));
        assert!(tasks.iter().all(|t| t.details.task_type() == t.task_type));
    }

    #[test]
    fn test_task_details_tagged_json() {
        let details = TaskDetails::Cleanup { next_run: None };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["type"], "cleanup");

        let parsed: TaskDetails =
            serde_json::from_str(r#"{"type":"setup","directories":["a","b"]}"#).unwrap();
        assert_eq!(
            parsed,
            TaskDetails::Setup {
                directories: vec!["a".to_string(), "b".to_string()]
            }
        );

        let parsed: TaskDetails =
            serde_json::from_str(r#"{"type":"metadata_extraction"}"#).unwrap();
        assert_eq!(
            parsed,
            TaskDetails::MetadataExtraction {
                distribution_passes: 0
            }
        );
    }

    #[test]
    fn test_task_type_parse() {
        assert_eq!("cleanup".parse::<TaskType>().unwrap(), TaskType::Cleanup);
        assert!("unknown".parse::<TaskType>().is_err());
        assert!(TaskType::FileGeneration.is_cyclic());
        assert!(!TaskType::Setup.is_cyclic());
        assert!(!TaskType::Cleanup.is_cyclic());
    }

    #[test]
    fn test_worker_claimable() {
        let now = Utc::now();
        let stale_before = now - Duration::minutes(10);

        let mut worker = Worker::new("default", 1);
        assert!(worker.is_claimable(stale_before));

        worker.status = WorkerStatus::Active;
        worker.last_heartbeat = Some(now - Duration::minutes(5));
        assert!(!worker.is_claimable(stale_before));
        assert!(worker.is_leased(stale_before));

        worker.last_heartbeat = Some(now - Duration::minutes(11));
        assert!(worker.is_claimable(stale_before));
        assert!(!worker.is_leased(stale_before));

        worker.status = WorkerStatus::Completed;
        assert!(!worker.is_claimable(stale_before));
    }

    #[test]
    fn test_url_assignment_flags() {
        let mut url = CrawlUrl::new("example.com", "https://example.com/a", "page");
        assert!(!url.is_assigned());
        assert!(url.is_outstanding());

        url.batch_id = Some(1);
        assert!(!url.is_assigned());
        url.worker_id = Some(Uuid::new_v4());
        assert!(url.is_assigned());

        url.status = UrlStatus::Failed;
        assert!(!url.is_outstanding());
    }
}
