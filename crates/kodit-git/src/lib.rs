//! Git adapter for kodit
//!
//! Wraps git2 behind an async trait. git2 is blocking, so every
//! operation runs under `spawn_blocking`; repository handles never
//! outlive a single call.

pub mod adapter;
pub mod error;
pub mod url;

pub use adapter::{BranchInfo, CommitDetails, FileEntry, Git2Adapter, GitAdapter, TagInfo};
pub use error::{GitError, GitResult};
pub use url::sanitize_remote_url;
