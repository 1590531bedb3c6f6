//! Indexing pipeline and task orchestration for kodit
//!
//! The durable queue's handlers, the worker pool that drives them, the
//! prescribed-operation chains that decompose user intents, per-operation
//! progress tracking, status aggregation, and the repository service the
//! outer surfaces call into.

pub mod error;
pub mod handlers;
pub mod operations;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod tracker;
pub mod worker;

pub use error::{IndexingError, IndexingResult};
pub use handlers::{HandlerContext, HandlerRegistry, TaskHandler};
pub use operations::{PrescribedOperation, PRIORITY_BACKGROUND, PRIORITY_INTERACTIVE};
pub use scheduler::PeriodicSyncScheduler;
pub use service::{RepositoryService, SnippetSearchResult};
pub use status::summarize_repository_status;
pub use tracker::{InMemoryObserver, Reporter, TracingReporter, Tracker};
pub use worker::WorkerPool;
