use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crawler_domain::{ExtractionPhase, Task, TaskStatus};
use llms_crawler::app::{AppMode, Application};
use llms_crawler::common::{init_logging, load_config, StartupConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliApp::parse();
    init_logging(&cli.log_level, "pretty")?;
    cli.run().await
}

/// CLI应用程序主结构
#[derive(Parser, Debug)]
#[command(name = "crawler-cli")]
#[command(version)]
#[command(about = "分布式站点爬取系统 - 命令行管理工具")]
struct CliApp {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径，默认查找 config/crawler.toml
    #[arg(short, long)]
    config: Option<String>,

    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 删除并重建数据库结构，重新写入预置任务
    Reset {
        /// 确认删除所有抓取数据
        #[arg(long)]
        yes: bool,
    },
    /// 打印任务、worker槽位和URL统计
    Status,
    /// 手动设置抽取阶段信号
    Signal {
        /// not_running | running | completed
        phase: String,
    },
    /// 把error状态的任务置回todo，流水线随后从它继续
    Retry {
        /// 任务ID，例如 metadata_extraction
        task: String,
        /// 同时允许重置processing状态的任务，仅在master已确认退出后使用
        #[arg(long)]
        force: bool,
    },
}

impl CliApp {
    async fn run(&self) -> Result<()> {
        if let Commands::Reset { yes: false } = self.command {
            bail!("reset 会删除所有抓取数据，请加 --yes 确认");
        }
        if let Commands::Signal { phase } = &self.command {
            // 连接前先校验参数
            phase.parse::<ExtractionPhase>()?;
        }

        let config = load_config(&StartupConfig {
            config_path: self.config.clone(),
            log_level: self.log_level.clone(),
            log_format: "pretty".to_string(),
        })?;
        let app = Application::new(config, AppMode::Master).await?;

        let result = match &self.command {
            Commands::Reset { .. } => reset(&app).await,
            Commands::Status => status(&app).await,
            Commands::Signal { phase } => signal(&app, phase).await,
            Commands::Retry { task, force } => retry(&app, task, *force).await,
        };

        app.close().await;
        result
    }
}

async fn reset(app: &Application) -> Result<()> {
    app.database()
        .reset_schema()
        .await
        .context("重置数据库结构失败")?;

    let seeded = app
        .pipeline()?
        .bootstrap(&app.output_directories())
        .await
        .context("写入预置任务失败")?;

    app.signal_store()
        .set_phase(ExtractionPhase::NotRunning)
        .await
        .context("重置抽取信号失败")?;

    println!("数据库已重置，写入 {seeded} 个预置任务");
    Ok(())
}

async fn status(app: &Application) -> Result<()> {
    let tasks = app.task_repository().find_all().await?;
    println!("任务:");
    for task in &tasks {
        println!(
            "  {:<20} {:<10} {}",
            task.id,
            task.status.as_str(),
            task.error.as_deref().unwrap_or("")
        );
    }

    let workers = app.worker_repository().find_all().await?;
    println!("\nWorker槽位:");
    if workers.is_empty() {
        println!("  (无)");
    }
    for worker in &workers {
        println!(
            "  {:<24} {:<10} batch={:<8} processed={:<6} holder={} heartbeat={}",
            worker.slot_name(),
            worker.status.as_str(),
            worker
                .current_batch_id
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
            worker.urls_processed,
            worker.lease_holder.as_deref().unwrap_or("-"),
            worker
                .last_heartbeat
                .map(|h| h.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    let counts = app.url_repository().count_by_status().await?;
    println!("\nURL:");
    for (status, count) in &counts {
        println!("  {:<12} {}", status.as_str(), count);
    }

    let phase = app.signal_store().get_phase().await?;
    println!("\n抽取阶段: {phase}");
    Ok(())
}

async fn signal(app: &Application, phase: &str) -> Result<()> {
    let phase: ExtractionPhase = phase.parse()?;
    app.signal_store().set_phase(phase).await?;
    println!("抽取阶段已设置为 {phase}");
    Ok(())
}

/// error总是可以重试；processing说明master被中断，需要 `--force`
fn ensure_retryable(task: &Task, force: bool) -> Result<()> {
    match task.status {
        TaskStatus::Error => Ok(()),
        TaskStatus::Processing if force => Ok(()),
        TaskStatus::Processing => bail!(
            "任务 {} 正在processing，若master已被中断请加 --force 重置",
            task.id
        ),
        _ => bail!(
            "任务 {} 当前状态为 {}，只有error状态的任务可以重试",
            task.id,
            task.status.as_str()
        ),
    }
}

async fn retry(app: &Application, task_id: &str, force: bool) -> Result<()> {
    let repo = app.task_repository();
    let Some(task) = repo.find_by_id(task_id).await? else {
        bail!("任务不存在: {task_id}");
    };
    ensure_retryable(&task, force)?;

    repo.reset(&[task_id.to_string()]).await?;
    println!("任务 {task_id} 已置回todo");
    Ok(())
}
