pub mod postgres_task_repository;
pub mod postgres_url_repository;
pub mod postgres_worker_repository;

pub use postgres_task_repository::*;
pub use postgres_url_repository::*;
pub use postgres_worker_repository::*;
