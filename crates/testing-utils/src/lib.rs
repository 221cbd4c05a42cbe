//! # Crawler Testing Utils
//!
//! In-memory stand-ins for the repositories, the signal store and the
//! external collaborators, plus builders for configuration and entities.
//!
//! ```rust
//! use crawler_testing_utils::{MockCrawlStore, MockSignalStore, MockTaskRepository};
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
