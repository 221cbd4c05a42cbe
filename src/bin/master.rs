use anyhow::Result;
use llms_crawler::app::AppMode;
use llms_crawler::common::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli(
        "master",
        "分布式站点爬取系统 - Master",
        "推进一次任务流水线：URL发现、批次分配、文件生成、排期与清理，由外部定时器周期性调用",
        AppMode::Master,
        "Master",
    )
    .await
}
