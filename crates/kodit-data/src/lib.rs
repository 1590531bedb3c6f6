//! Persistence layer for kodit
//!
//! Models, the dual-dialect connection pool, schema migrations, entity
//! stores, the durable task queue, and the task-status store. Everything
//! the rest of the system touches goes through the traits in [`traits`].

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod repository;
pub mod status_store;
pub mod task_queue;
pub mod traits;

pub use error::{DatabaseError, DatabaseOperation, DatabaseResult};
pub use pool::{DbPool, Dialect};
pub use repository::SqlStore;
pub use status_store::SqlTaskStatusStore;
pub use task_queue::{RetryPolicy, SqlTaskQueue};
