use async_trait::async_trait;
use chrono::Utc;
use crawler_domain::schedule::is_due;
use crawler_domain::{predefined_tasks, Task, TaskClaim, TaskDetails, TaskRepository, TaskStatus};
use crawler_errors::CrawlerResult;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 步骤处理器的返回
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// 步骤完成，任务置为done
    Done,
    /// 轮询步骤，下次调用再检查，任务回到todo
    Pending,
    /// 未到执行时间，任务回到todo，步骤主体没有执行
    Deferred,
}

/// 一次 `advance` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Busy { task_id: String },
    Halted { task_id: String },
    Idle,
    Completed { task_id: String },
    Pending { task_id: String },
    Deferred { task_id: String },
    Failed { task_id: String, error: String },
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, task: &Task) -> CrawlerResult<StepOutcome>;
}

/// 任务流水线
///
/// 每次调用最多推进一个步骤。并发的master由 `begin_next` 的行锁串行化，
/// 同一时刻只有一个任务处于processing。
pub struct TaskPipeline {
    task_repo: Arc<dyn TaskRepository>,
    handler: Arc<dyn StepHandler>,
}

impl TaskPipeline {
    pub fn new(task_repo: Arc<dyn TaskRepository>, handler: Arc<dyn StepHandler>) -> Self {
        Self { task_repo, handler }
    }

    /// 写入缺失的预置任务
    pub async fn bootstrap(&self, directories: &[String]) -> CrawlerResult<u64> {
        self.task_repo.seed(&predefined_tasks(directories)).await
    }

    pub async fn advance(&self) -> CrawlerResult<AdvanceOutcome> {
        let task = match self.task_repo.begin_next().await? {
            TaskClaim::Busy(running) => {
                info!("任务 {} 正在处理中，本次跳过", running.id);
                return Ok(AdvanceOutcome::Busy {
                    task_id: running.id,
                });
            }
            TaskClaim::Halted(failed) => {
                warn!(
                    "任务 {} 处于error状态，等待人工重置: {}",
                    failed.id,
                    failed.error.as_deref().unwrap_or("-")
                );
                return Ok(AdvanceOutcome::Halted { task_id: failed.id });
            }
            TaskClaim::Idle => {
                info!("没有待执行的任务");
                return Ok(AdvanceOutcome::Idle);
            }
            TaskClaim::Claimed(task) => task,
        };

        info!("开始执行任务 {} ({})", task.id, task.name);

        let result = match &task.details {
            TaskDetails::Cleanup { next_run } if !is_due(*next_run, Utc::now()) => {
                Ok(StepOutcome::Deferred)
            }
            _ => self.handler.run(&task).await,
        };

        let task_id = task.id.clone();
        match result {
            Ok(StepOutcome::Done) => {
                self.task_repo
                    .finish(&task.id, TaskStatus::Done, None)
                    .await?;
                info!("任务 {} 完成", task.id);
                Ok(AdvanceOutcome::Completed { task_id })
            }
            Ok(StepOutcome::Pending) => {
                self.task_repo
                    .finish(&task.id, TaskStatus::Todo, None)
                    .await?;
                info!("任务 {} 尚未完成，等待下次检查", task.id);
                Ok(AdvanceOutcome::Pending { task_id })
            }
            Ok(StepOutcome::Deferred) => {
                self.task_repo
                    .finish(&task.id, TaskStatus::Todo, None)
                    .await?;
                info!("任务 {} 未到执行时间", task.id);
                Ok(AdvanceOutcome::Deferred { task_id })
            }
            Err(e) => {
                let message = e.to_string();
                error!("任务 {} 执行失败: {}", task.id, message);
                self.task_repo
                    .finish(&task.id, TaskStatus::Error, Some(message.clone()))
                    .await?;
                Ok(AdvanceOutcome::Failed {
                    task_id,
                    error: message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crawler_errors::CrawlerError;
    use crawler_testing_utils::MockTaskRepository;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 按任务id返回预设结果，并记录调用
    #[derive(Default)]
    struct ScriptedHandler {
        outcomes: Mutex<HashMap<String, Vec<CrawlerResult<StepOutcome>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedHandler {
        fn script(self, id: &str, outcomes: Vec<CrawlerResult<StepOutcome>>) -> Self {
            self.outcomes
                .lock()
                .unwrap()
                .insert(id.to_string(), outcomes);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StepHandler for ScriptedHandler {
        async fn run(&self, task: &Task) -> CrawlerResult<StepOutcome> {
            self.calls.lock().unwrap().push(task.id.clone());
            let mut outcomes = self.outcomes.lock().unwrap();
            match outcomes.get_mut(&task.id) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => Ok(StepOutcome::Done),
            }
        }
    }

    async fn pipeline(handler: Arc<ScriptedHandler>) -> (TaskPipeline, MockTaskRepository) {
        let repo = MockTaskRepository::new();
        let pipeline = TaskPipeline::new(Arc::new(repo.clone()), handler);
        pipeline.bootstrap(&[]).await.unwrap();
        (pipeline, repo)
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let handler = Arc::new(ScriptedHandler::default());
        let (pipeline, repo) = pipeline(handler.clone()).await;
        repo.set_details(
            "cleanup",
            TaskDetails::Cleanup {
                next_run: Some(Utc::now() - Duration::minutes(1)),
            },
        );

        for _ in 0..6 {
            assert!(matches!(
                pipeline.advance().await.unwrap(),
                AdvanceOutcome::Completed { .. }
            ));
        }
        assert_eq!(pipeline.advance().await.unwrap(), AdvanceOutcome::Idle);
        assert_eq!(
            handler.calls(),
            vec![
                "setup",
                "url_discovery",
                "metadata_extraction",
                "file_generation",
                "set_next_schedule",
                "cleanup"
            ]
        );
    }

    #[tokio::test]
    async fn test_busy_when_a_task_is_processing() {
        let handler = Arc::new(ScriptedHandler::default());
        let (pipeline, repo) = pipeline(handler.clone()).await;
        repo.set_status("setup", TaskStatus::Processing);

        assert_eq!(
            pipeline.advance().await.unwrap(),
            AdvanceOutcome::Busy {
                task_id: "setup".to_string()
            }
        );
        assert!(handler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pending_step_stays_todo() {
        let handler = Arc::new(ScriptedHandler::default().script(
            "setup",
            vec![Ok(StepOutcome::Pending), Ok(StepOutcome::Done)],
        ));
        let (pipeline, repo) = pipeline(handler.clone()).await;

        assert!(matches!(
            pipeline.advance().await.unwrap(),
            AdvanceOutcome::Pending { .. }
        ));
        assert_eq!(repo.status_of("setup"), Some(TaskStatus::Todo));

        assert!(matches!(
            pipeline.advance().await.unwrap(),
            AdvanceOutcome::Completed { .. }
        ));
        assert_eq!(repo.status_of("setup"), Some(TaskStatus::Done));
        assert_eq!(handler.calls(), vec!["setup", "setup"]);
    }

    #[tokio::test]
    async fn test_failed_step_records_error_and_halts() {
        let handler = Arc::new(ScriptedHandler::default().script(
            "setup",
            vec![Err(CrawlerError::Internal("disk full".to_string()))],
        ));
        let (pipeline, repo) = pipeline(handler.clone()).await;

        match pipeline.advance().await.unwrap() {
            AdvanceOutcome::Failed { task_id, error } => {
                assert_eq!(task_id, "setup");
                assert!(error.contains("disk full"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let task = repo.get("setup").unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.error.unwrap().contains("disk full"));

        // 不自动重试，也不越过出错的步骤
        assert!(matches!(
            pipeline.advance().await.unwrap(),
            AdvanceOutcome::Halted { .. }
        ));
        assert_eq!(handler.calls(), vec!["setup"]);
    }

    #[tokio::test]
    async fn test_cleanup_deferred_until_due() {
        let handler = Arc::new(ScriptedHandler::default());
        let (pipeline, repo) = pipeline(handler.clone()).await;
        for id in [
            "setup",
            "url_discovery",
            "metadata_extraction",
            "file_generation",
            "set_next_schedule",
        ] {
            repo.set_status(id, TaskStatus::Done);
        }

        // next_run 缺失
        assert!(matches!(
            pipeline.advance().await.unwrap(),
            AdvanceOutcome::Deferred { .. }
        ));

        repo.set_details(
            "cleanup",
            TaskDetails::Cleanup {
                next_run: Some(Utc::now() + Duration::hours(1)),
            },
        );
        assert!(matches!(
            pipeline.advance().await.unwrap(),
            AdvanceOutcome::Deferred { .. }
        ));
        assert_eq!(repo.status_of("cleanup"), Some(TaskStatus::Todo));
        assert!(handler.calls().is_empty());

        repo.set_details(
            "cleanup",
            TaskDetails::Cleanup {
                next_run: Some(Utc::now() - Duration::seconds(1)),
            },
        );
        assert!(matches!(
            pipeline.advance().await.unwrap(),
            AdvanceOutcome::Completed { .. }
        ));
        assert_eq!(handler.calls(), vec!["cleanup"]);
    }
}
