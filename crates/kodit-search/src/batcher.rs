//! Embedding batcher
//!
//! Shared by the code- and text-embedding handlers. Documents are
//! filtered, already-embedded ones subtracted, and the rest grouped into
//! batches under the provider's character budget. Batches embed and
//! persist concurrently under a bounded parallelism; a failed batch never
//! aborts its siblings, and the run only errors when the failure rate
//! crosses the caller's threshold.

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use kodit_providers::Embedder;

use crate::error::{SearchError, SearchResult};
use crate::vector::VectorStore;

/// One unit of embeddable content
#[derive(Debug, Clone)]
pub struct Document {
    pub snippet_id: String,
    pub text: String,
}

pub type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;
pub type BatchErrorFn = Box<dyn Fn(usize, usize, &SearchError) + Send + Sync>;

/// Per-run knobs and observers
pub struct IndexOptions {
    /// Called once per batch with `(completed_docs, total_docs)`;
    /// failed batches still count, so the final call reports the full
    /// document count
    pub on_progress: Option<ProgressFn>,
    /// Called with the document index range `[start, end)` of a failed
    /// batch
    pub on_batch_error: Option<BatchErrorFn>,
    /// Failed-batch fraction above which the whole run errors
    pub max_failure_rate: f64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            on_progress: None,
            on_batch_error: None,
            max_failure_rate: 0.5,
        }
    }
}

/// Batches documents into embedder calls and persists the vectors
pub struct VectorIndexer {
    embedder: Arc<dyn Embedder>,
    store: VectorStore,
    /// Concurrent batches in flight
    num_parallel: usize,
    /// Upper bound on documents per batch, on top of the char budget
    max_batch_size: usize,
}

impl VectorIndexer {
    pub fn new(embedder: Arc<dyn Embedder>, store: VectorStore, num_parallel: usize) -> Self {
        Self {
            embedder,
            store,
            num_parallel: num_parallel.max(1),
            max_batch_size: 64,
        }
    }

    pub const fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Embed and persist `documents` for one commit
    ///
    /// # Errors
    ///
    /// Returns `BatchFailures` when more than `max_failure_rate` of the
    /// batches failed; individual batch errors otherwise only reach the
    /// `on_batch_error` callback.
    pub async fn index(
        &self,
        commit_sha: &str,
        documents: Vec<Document>,
        options: IndexOptions,
    ) -> SearchResult<()> {
        let valid: Vec<Document> = documents
            .into_iter()
            .filter(|d| !d.snippet_id.is_empty() && !d.text.trim().is_empty())
            .collect();

        let shas: Vec<String> = valid.iter().map(|d| d.snippet_id.clone()).collect();
        let existing = self.store.existing(commit_sha, &shas).await?;
        let remaining: Vec<Document> = valid
            .into_iter()
            .filter(|d| !existing.contains(&d.snippet_id))
            .collect();

        let total_docs = remaining.len();
        if total_docs == 0 {
            tracing::debug!(commit_sha, "no new documents to embed");
            return Ok(());
        }

        let budget = self.embedder.max_batch_chars();
        let batches = build_batches(remaining, budget, self.max_batch_size);
        let total_batches = batches.len();

        let completed_docs = Arc::new(Mutex::new(0usize));
        let failed_batches = Arc::new(AtomicUsize::new(0));
        let options = Arc::new(options);

        stream::iter(batches)
            .map(|batch| {
                let completed_docs = Arc::clone(&completed_docs);
                let failed_batches = Arc::clone(&failed_batches);
                let options = Arc::clone(&options);
                let commit_sha = commit_sha.to_string();

                async move {
                    let batch_len = batch.documents.len();
                    if let Err(error) = self.process_batch(&commit_sha, &batch).await {
                        failed_batches.fetch_add(1, Ordering::SeqCst);
                        tracing::warn!(
                            commit_sha = %commit_sha,
                            start = batch.start,
                            len = batch_len,
                            error = %error,
                            "embedding batch failed, continuing with siblings"
                        );
                        if let Some(on_batch_error) = &options.on_batch_error {
                            on_batch_error(batch.start, batch.start + batch_len, &error);
                        }
                    }

                    // Exactly one progress tick per batch, success or not
                    let done = {
                        let mut completed = completed_docs.lock().expect("progress lock");
                        *completed += batch_len;
                        *completed
                    };
                    if let Some(on_progress) = &options.on_progress {
                        on_progress(done, total_docs);
                    }
                }
            })
            .buffer_unordered(self.num_parallel)
            .collect::<Vec<()>>()
            .await;

        let failed = failed_batches.load(Ordering::SeqCst);
        if failed > 0 && (failed as f64 / total_batches as f64) > options.max_failure_rate {
            return Err(SearchError::BatchFailures {
                failed,
                total: total_batches,
            });
        }
        Ok(())
    }

    async fn process_batch(&self, commit_sha: &str, batch: &Batch) -> SearchResult<()> {
        let texts: Vec<String> = batch.documents.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        if vectors.len() != texts.len() {
            return Err(SearchError::Provider(
                kodit_providers::ProviderError::InvalidResponse(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )),
            ));
        }

        let rows: Vec<(String, Vec<f32>)> = batch
            .documents
            .iter()
            .zip(vectors)
            .map(|(d, v)| (d.snippet_id.clone(), v))
            .collect();
        self.store.save(commit_sha, &rows).await
    }
}

struct Batch {
    /// Index of the first document within the filtered input
    start: usize,
    documents: Vec<Document>,
}

/// Group documents into batches under the char budget and size cap
///
/// A single document longer than the budget is truncated to the budget
/// and becomes its own batch.
fn build_batches(documents: Vec<Document>, budget: usize, max_batch_size: usize) -> Vec<Batch> {
    let mut batches: Vec<Batch> = Vec::new();
    let mut current: Vec<Document> = Vec::new();
    let mut current_chars = 0usize;
    let mut current_start = 0usize;

    let flush = |batches: &mut Vec<Batch>, current: &mut Vec<Document>, start: usize| {
        if !current.is_empty() {
            batches.push(Batch {
                start,
                documents: std::mem::take(current),
            });
        }
    };

    for (index, mut document) in documents.into_iter().enumerate() {
        let mut chars = document.text.chars().count();

        if chars > budget {
            document.text = document.text.chars().take(budget).collect();
            chars = budget;
            // Oversized documents travel alone
            flush(&mut batches, &mut current, current_start);
            batches.push(Batch {
                start: index,
                documents: vec![document],
            });
            current_start = index + 1;
            current_chars = 0;
            continue;
        }

        if !current.is_empty()
            && (current_chars + chars > budget || current.len() >= max_batch_size)
        {
            flush(&mut batches, &mut current, current_start);
            current_start = index;
            current_chars = 0;
        }

        if current.is_empty() {
            current_start = index;
        }
        current.push(document);
        current_chars += chars;
    }

    flush(&mut batches, &mut current, current_start);
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::VectorKind;
    use kodit_data::DbPool;
    use kodit_providers::MockEmbedder;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            snippet_id: id.to_string(),
            text: text.to_string(),
        }
    }

    async fn vector_store() -> VectorStore {
        let db = DbPool::initialize("sqlite::memory:", 1).await.unwrap();
        VectorStore::new(db, VectorKind::Code)
    }

    #[test]
    fn test_batches_respect_char_budget() {
        let docs = vec![doc("a", "12345"), doc("b", "12345"), doc("c", "12345")];
        let batches = build_batches(docs, 10, 64);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].documents.len(), 2);
        assert_eq!(batches[1].documents.len(), 1);
        assert_eq!(batches[1].start, 2);
    }

    #[test]
    fn test_oversized_document_truncates_into_own_batch() {
        let docs = vec![doc("a", "123"), doc("big", &"x".repeat(50)), doc("b", "456")];
        let batches = build_batches(docs, 10, 64);

        assert_eq!(batches.len(), 3);
        let big = &batches[1];
        assert_eq!(big.documents.len(), 1);
        assert_eq!(big.documents[0].text.chars().count(), 10);
    }

    #[test]
    fn test_max_batch_size_splits_further() {
        let docs = (0..5).map(|i| doc(&format!("d{i}"), "ab")).collect();
        let batches = build_batches(docs, 1000, 2);
        assert_eq!(batches.len(), 3);
    }

    #[tokio::test]
    async fn test_index_embeds_and_reports_full_progress() {
        let store = vector_store().await;
        let embedder = Arc::new(MockEmbedder::new(4).with_max_batch_chars(8));
        let indexer = VectorIndexer::new(embedder, store.clone(), 2);

        let progress: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let progress_sink = Arc::clone(&progress);

        indexer
            .index(
                "commit-a",
                vec![doc("s1", "abcd"), doc("s2", "efgh"), doc("s3", "ijkl")],
                IndexOptions {
                    on_progress: Some(Box::new(move |done, total| {
                        progress_sink.lock().unwrap().push((done, total));
                    })),
                    ..IndexOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(store.count_for_commit("commit-a").await.unwrap(), 3);

        let calls = progress.lock().unwrap();
        assert!(!calls.is_empty());
        assert!(calls.iter().all(|(_, total)| *total == 3));
        assert_eq!(calls.iter().map(|(done, _)| *done).max(), Some(3));
    }

    #[tokio::test]
    async fn test_existing_documents_are_subtracted() {
        let store = vector_store().await;
        store
            .save("commit-a", &[("s1".to_string(), vec![0.0; 4])])
            .await
            .unwrap();

        let embedder = Arc::new(MockEmbedder::new(4));
        let indexer = VectorIndexer::new(Arc::clone(&embedder) as Arc<dyn Embedder>, store.clone(), 2);

        indexer
            .index(
                "commit-a",
                vec![doc("s1", "already done"), doc("s2", "new one")],
                IndexOptions::default(),
            )
            .await
            .unwrap();

        // Only s2 needed embedding: one batch, one call
        assert_eq!(embedder.call_count(), 1);
        assert_eq!(store.count_for_commit("commit-a").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalid_documents_are_filtered() {
        let store = vector_store().await;
        let embedder = Arc::new(MockEmbedder::new(4));
        let indexer = VectorIndexer::new(embedder, store.clone(), 1);

        indexer
            .index(
                "commit-a",
                vec![doc("", "no id"), doc("s1", "   "), doc("s2", "real")],
                IndexOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(store.count_for_commit("commit-a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_abort_siblings() {
        let store = vector_store().await;
        // Budget of 6 chars forces one document per batch
        let embedder = Arc::new(MockEmbedder::new(4).with_max_batch_chars(6).poison("bad"));
        let indexer = VectorIndexer::new(embedder, store.clone(), 1);

        let errors: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let errors_sink = Arc::clone(&errors);

        indexer
            .index(
                "commit-a",
                vec![doc("s1", "good1"), doc("s2", "bad"), doc("s3", "good2")],
                IndexOptions {
                    on_batch_error: Some(Box::new(move |start, end, _| {
                        errors_sink.lock().unwrap().push((start, end));
                    })),
                    max_failure_rate: 0.5,
                    ..IndexOptions::default()
                },
            )
            .await
            .unwrap();

        // 1 of 3 batches failed: below the 0.5 threshold
        assert_eq!(store.count_for_commit("commit-a").await.unwrap(), 2);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_rate_above_threshold_errors() {
        let store = vector_store().await;
        let embedder = Arc::new(
            MockEmbedder::new(4)
                .with_max_batch_chars(6)
                .poison("bad1")
                .poison("bad2"),
        );
        let indexer = VectorIndexer::new(embedder, store.clone(), 1);

        let result = indexer
            .index(
                "commit-a",
                vec![doc("s1", "bad1"), doc("s2", "bad2"), doc("s3", "fine")],
                IndexOptions {
                    max_failure_rate: 0.5,
                    ..IndexOptions::default()
                },
            )
            .await;

        match result {
            Err(SearchError::BatchFailures { failed, total }) => {
                assert_eq!(failed, 2);
                assert_eq!(total, 3);
            }
            other => panic!("expected BatchFailures, got {other:?}"),
        }
    }
}
