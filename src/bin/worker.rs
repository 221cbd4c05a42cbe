use anyhow::Result;
use llms_crawler::app::AppMode;
use llms_crawler::common::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli(
        "worker",
        "分布式站点爬取系统 - Worker",
        "认领一个空闲槽位并处理其中一个批次的URL，没有可用槽位或抽取阶段未运行时直接退出",
        AppMode::Worker,
        "Worker",
    )
    .await
}
