pub mod app_config;
pub mod crawl;
pub mod database;
pub mod redis;
pub mod runtime;
pub mod schedule;
pub mod storage;

pub use app_config::*;
pub use crawl::*;
pub use database::*;
pub use redis::*;
pub use runtime::*;
pub use schedule::*;
pub use storage::*;
