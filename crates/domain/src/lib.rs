pub mod collaborators;
pub mod entities;
pub mod planner;
pub mod providers;
pub mod repositories;
pub mod schedule;
pub mod signal;
pub mod sqlx_impls;

pub use collaborators::*;
pub use crawler_errors::{CrawlerError, CrawlerResult};
pub use entities::*;
pub use providers::*;
pub use repositories::*;
pub use signal::*;
