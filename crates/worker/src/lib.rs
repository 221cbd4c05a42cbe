//! worker进程：认领槽位、刷新心跳、并发抽取一个批次的页面元数据

pub mod execution;
pub mod extractor;
pub mod heartbeat;
pub mod lease;
pub mod lifecycle;

pub use execution::{BatchExecutor, BatchReport};
pub use extractor::{parse_page, HttpMetadataExtractor};
pub use heartbeat::HeartbeatManager;
pub use lease::{holder_identity, Lease, LeaseManager};
pub use lifecycle::{WorkerDependencies, WorkerLifecycle, WorkerRunOutcome};
