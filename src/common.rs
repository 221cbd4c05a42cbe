use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use crawler_config::AppConfig;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::{AppMode, Application};
use crate::shutdown::{wait_for_shutdown_signal, ShutdownManager};

/// 收到关闭信号后等待当前工作结束的上限
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 通用的启动参数
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// 未指定时按默认路径列表查找
    pub config_path: Option<String>,
    pub log_level: String,
    pub log_format: String,
}

impl StartupConfig {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches.get_one::<String>("config").cloned(),
            log_level: matches
                .get_one::<String>("log-level")
                .cloned()
                .unwrap_or_else(|| "info".to_string()),
            log_format: matches
                .get_one::<String>("log-format")
                .cloned()
                .unwrap_or_else(|| "pretty".to_string()),
        }
    }
}

/// 初始化日志系统，RUST_LOG 优先于 `log_level`
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let config = AppConfig::load(startup_config.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup_config.config_path.as_deref().unwrap_or("<默认路径>")
        )
    })?;
    Ok(config)
}

/// 公共的命令行参数
pub fn base_args() -> Vec<Arg> {
    vec![
        Arg::new("config")
            .short('c')
            .long("config")
            .value_name("FILE")
            .help("配置文件路径，默认查找 config/crawler.toml"),
        Arg::new("log-level")
            .short('l')
            .long("log-level")
            .value_name("LEVEL")
            .help("日志级别")
            .value_parser(["trace", "debug", "info", "warn", "error"])
            .default_value("info"),
        Arg::new("log-format")
            .long("log-format")
            .value_name("FORMAT")
            .help("日志格式")
            .value_parser(["json", "pretty"])
            .default_value("pretty"),
    ]
}

/// 启动一次master或worker进程
///
/// 进程做完自己的一份工作就退出；期间收到关闭信号会通知应用停止接新工作，
/// 最多等待 `SHUTDOWN_TIMEOUT`。超时后取消应用任务、释放持有的槽位并以错误退出。
pub async fn start_application(
    startup_config: StartupConfig,
    app_mode: AppMode,
    service_name: &str,
) -> Result<()> {
    init_logging(&startup_config.log_level, &startup_config.log_format)?;

    info!("启动 {}", service_name);
    let config = load_config(&startup_config)?;
    let app = Arc::new(Application::new(config, app_mode).await?);

    let shutdown_manager = ShutdownManager::new();
    let mut app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    let result = tokio::select! {
        joined = &mut app_handle => joined.context("应用任务异常退出")?,
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut app_handle).await {
                Ok(joined) => joined.context("应用任务异常退出")?,
                Err(_) => {
                    warn!("{} 关闭超时，强制退出", service_name);
                    app_handle.abort();
                    app.abandon().await;
                    Err(anyhow::anyhow!(
                        "{service_name} 未能在 {}s 内完成关闭",
                        SHUTDOWN_TIMEOUT.as_secs()
                    ))
                }
            }
        }
    };

    app.close().await;

    if let Err(ref e) = result {
        error!("{} 运行失败: {:#}", service_name, e);
    }
    info!("{} 已退出", service_name);
    result
}

/// master和worker共用的命令行入口
pub async fn run_cli(
    name: &'static str,
    about: &'static str,
    long_about: &'static str,
    app_mode: AppMode,
    service_name: &str,
) -> Result<()> {
    let matches = Command::new(name)
        .version(env!("CARGO_PKG_VERSION"))
        .about(about)
        .long_about(long_about)
        .args(base_args())
        .get_matches();

    start_application(StartupConfig::from_matches(&matches), app_mode, service_name).await
}
