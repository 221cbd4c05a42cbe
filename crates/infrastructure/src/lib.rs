pub mod database;
pub mod signal;

pub use database::postgres::{
    PostgresTaskRepository, PostgresUrlRepository, PostgresWorkerRepository,
};
pub use database::DatabaseManager;
pub use signal::RedisSignalStore;
