//! Prescribed operations
//!
//! Static templates mapping a user intent to the ordered list of
//! operation kinds to enqueue. These stay pure functions: the queue
//! binds payloads at enqueue time and the chain's strictly decreasing
//! priority offsets keep the order within a priority band.

use kodit_data::models::TaskOperation;

/// Priority band for user-initiated intents
pub const PRIORITY_INTERACTIVE: i64 = 100;

/// Priority band for scheduler-initiated re-syncs
pub const PRIORITY_BACKGROUND: i64 = 0;

/// A user intent the queue knows how to decompose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrescribedOperation {
    /// Register and fully index a new repository
    CreateNewRepository,
    /// Re-fetch the remote and index the target commit
    SyncRepository,
    /// Index one commit end to end
    ScanAndIndexCommit,
    /// Clean a commit's index rows, then re-run the full chain
    RescanCommit,
    /// Cascading removal of a repository
    DeleteRepository,
}

impl PrescribedOperation {
    /// The ordered operation kinds this intent enqueues
    ///
    /// `CreateNewRepository` seeds only the clone; the clone handler
    /// enqueues the sync, which fans out per discovered commit.
    /// `RescanCommit` likewise seeds a cleanup task whose handler
    /// re-enqueues the scan chain.
    pub fn operations(self) -> Vec<TaskOperation> {
        match self {
            Self::CreateNewRepository => vec![TaskOperation::CloneRepository],
            Self::SyncRepository => vec![TaskOperation::SyncRepository],
            Self::ScanAndIndexCommit => vec![
                TaskOperation::ScanCommit,
                TaskOperation::ExtractSnippetsForCommit,
                TaskOperation::CreateBm25IndexForCommit,
                TaskOperation::CreateCodeEmbeddingsForCommit,
                TaskOperation::EnrichCommit,
                TaskOperation::CreateTextEmbeddingsForCommit,
            ],
            Self::RescanCommit => vec![TaskOperation::RescanCommit],
            Self::DeleteRepository => vec![TaskOperation::DeleteRepository],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_chain_order_matches_data_dependencies() {
        let chain = PrescribedOperation::ScanAndIndexCommit.operations();

        let position = |op: TaskOperation| chain.iter().position(|&o| o == op).unwrap();
        assert!(position(TaskOperation::ScanCommit) < position(TaskOperation::ExtractSnippetsForCommit));
        assert!(
            position(TaskOperation::ExtractSnippetsForCommit)
                < position(TaskOperation::CreateBm25IndexForCommit)
        );
        // Text embeddings read the summary enrichment, so enrich must
        // land first or the first pass would index nothing
        assert!(
            position(TaskOperation::EnrichCommit)
                < position(TaskOperation::CreateTextEmbeddingsForCommit)
        );
        assert_eq!(chain.len(), 6);
    }

    #[test]
    fn test_seed_intents_enqueue_single_tasks() {
        assert_eq!(
            PrescribedOperation::CreateNewRepository.operations(),
            vec![TaskOperation::CloneRepository]
        );
        assert_eq!(
            PrescribedOperation::SyncRepository.operations(),
            vec![TaskOperation::SyncRepository]
        );
        assert_eq!(
            PrescribedOperation::DeleteRepository.operations(),
            vec![TaskOperation::DeleteRepository]
        );
        assert_eq!(
            PrescribedOperation::RescanCommit.operations(),
            vec![TaskOperation::RescanCommit]
        );
    }
}
