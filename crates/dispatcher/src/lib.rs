//! Master侧：任务流水线与批次分配
//!
//! 外部调度器周期性启动master，每次调用 `TaskPipeline::advance` 推进一个步骤。

pub mod distribution;
pub mod pipeline;
pub mod steps;

pub use distribution::{BatchDistributor, DistributionReport};
pub use pipeline::{AdvanceOutcome, StepHandler, StepOutcome, TaskPipeline};
pub use steps::{CrawlSteps, StepDependencies};
