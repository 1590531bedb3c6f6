//! In-database vector stores
//!
//! Embeddings persist as JSON float arrays keyed by
//! `(snippet_sha, commit_sha)`, one table per corpus (code text vs
//! summary text). Search loads candidates and scores cosine similarity
//! in-process, so behaviour is identical on SQLite and PostgreSQL.

use sqlx::Row;
use std::collections::{HashMap, HashSet};

use kodit_data::error::{DatabaseErrorExt, DatabaseOperation};
use kodit_data::DbPool;

use crate::bm25::SearchHit;
use crate::error::{SearchError, SearchResult};

/// Which embedding corpus a store addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorKind {
    /// Embeddings of snippet source code
    Code,
    /// Embeddings of snippet summary enrichments
    Text,
}

impl VectorKind {
    const fn table(self) -> &'static str {
        match self {
            Self::Code => "kodit_code_embeddings",
            Self::Text => "kodit_text_embeddings",
        }
    }
}

fn encode_embedding(vector: &[f32]) -> String {
    serde_json::to_string(vector).expect("float slice always serialises")
}

fn decode_embedding(snippet_sha: &str, raw: &str) -> SearchResult<Vec<f32>> {
    serde_json::from_str(raw).map_err(|e| SearchError::CorruptEmbedding {
        snippet_sha: snippet_sha.to_string(),
        message: e.to_string(),
    })
}

/// Cosine distance mapped to a 0..1 similarity by `1 - distance/2`
fn similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    let distance = 1.0 - cosine;
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// SQL-backed vector store for one corpus
#[derive(Clone)]
pub struct VectorStore {
    db: DbPool,
    kind: VectorKind,
}

impl VectorStore {
    pub const fn new(db: DbPool, kind: VectorKind) -> Self {
        Self { db, kind }
    }

    pub const fn kind(&self) -> VectorKind {
        self.kind
    }

    /// Persist embeddings for one commit, atomically per call
    pub async fn save(
        &self,
        commit_sha: &str,
        embeddings: &[(String, Vec<f32>)],
    ) -> SearchResult<()> {
        if embeddings.is_empty() {
            return Ok(());
        }
        let table = self.kind.table();
        let op = DatabaseOperation::Query {
            description: format!("vector_save({table}, commit={commit_sha})"),
        };

        let mut tx = self.db.inner().begin().await.map_db_err(op.clone())?;

        for (snippet_sha, vector) in embeddings {
            sqlx::query(&format!(
                "INSERT INTO {table} (snippet_sha, commit_sha, embedding) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (snippet_sha, commit_sha) DO UPDATE SET \
                     embedding = excluded.embedding"
            ))
            .bind(snippet_sha)
            .bind(commit_sha)
            .bind(encode_embedding(vector))
            .execute(&mut *tx)
            .await
            .map_db_err(op.clone())?;
        }

        tx.commit().await.map_db_err(op)?;
        Ok(())
    }

    /// Rank snippets by similarity to a query embedding
    pub async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        ids_filter: Option<&[String]>,
    ) -> SearchResult<Vec<SearchHit>> {
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let table = self.kind.table();

        let rows = sqlx::query(&format!("SELECT snippet_sha, embedding FROM {table}"))
            .fetch_all(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: format!("vector_search({table})"),
            })?;

        let filter: Option<HashSet<&str>> =
            ids_filter.map(|ids| ids.iter().map(String::as_str).collect());

        // A snippet present under several commits keeps its best score
        let mut best: HashMap<String, f64> = HashMap::new();
        for row in &rows {
            let snippet_sha: String = row.get("snippet_sha");
            if let Some(filter) = &filter
                && !filter.contains(snippet_sha.as_str())
            {
                continue;
            }
            let raw: String = row.get("embedding");
            let vector = match decode_embedding(&snippet_sha, &raw) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping corrupt embedding row");
                    continue;
                }
            };
            let score = similarity(query, &vector);
            let entry = best.entry(snippet_sha).or_insert(score);
            if score > *entry {
                *entry = score;
            }
        }

        let mut hits: Vec<SearchHit> = best
            .into_iter()
            .map(|(snippet_sha, score)| SearchHit { snippet_sha, score })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.snippet_sha.cmp(&b.snippet_sha))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Which of `shas` already have an embedding for this commit
    pub async fn existing(
        &self,
        commit_sha: &str,
        shas: &[String],
    ) -> SearchResult<HashSet<String>> {
        if shas.is_empty() {
            return Ok(HashSet::new());
        }
        let table = self.kind.table();

        let rows = sqlx::query(&format!(
            "SELECT snippet_sha FROM {table} WHERE commit_sha = $1"
        ))
        .bind(commit_sha)
        .fetch_all(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("vector_existing({table}, commit={commit_sha})"),
        })?;

        let wanted: HashSet<&str> = shas.iter().map(String::as_str).collect();
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("snippet_sha"))
            .filter(|sha| wanted.contains(sha.as_str()))
            .collect())
    }

    pub async fn delete_for_commit(&self, commit_sha: &str) -> SearchResult<u64> {
        let table = self.kind.table();
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE commit_sha = $1"))
            .bind(commit_sha)
            .execute(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: format!("vector_delete({table}, commit={commit_sha})"),
            })?;
        Ok(result.rows_affected())
    }

    pub async fn count_for_commit(&self, commit_sha: &str) -> SearchResult<i64> {
        let table = self.kind.table();
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM {table} WHERE commit_sha = $1"
        ))
        .bind(commit_sha)
        .fetch_one(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("vector_count({table}, commit={commit_sha})"),
        })?;
        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn stores() -> (VectorStore, VectorStore) {
        let db = DbPool::initialize("sqlite::memory:", 1).await.unwrap();
        (
            VectorStore::new(db.clone(), VectorKind::Code),
            VectorStore::new(db, VectorKind::Text),
        )
    }

    #[test]
    fn test_embedding_round_trip() {
        let vector = vec![0.25f32, -1.5, 3.0];
        let decoded = decode_embedding("s", &encode_embedding(&vector)).unwrap();
        assert_eq!(decoded, vector);
    }

    #[test]
    fn test_similarity_bounds() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        let opposite = vec![-1.0f32, 0.0];

        // Identical vectors: distance 0 -> similarity 1
        assert!((similarity(&a, &a) - 1.0).abs() < 1e-9);
        // Orthogonal: distance 1 -> similarity 0.5
        assert!((similarity(&a, &b) - 0.5).abs() < 1e-9);
        // Opposite: distance 2 -> similarity 0
        assert!(similarity(&a, &opposite).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_save_search_and_kind_isolation() {
        let (code, text) = stores().await;

        code.save("commit-a", &[("s1".to_string(), vec![1.0, 0.0])])
            .await
            .unwrap();
        code.save("commit-a", &[("s2".to_string(), vec![0.0, 1.0])])
            .await
            .unwrap();

        let hits = code.search(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits[0].snippet_sha, "s1");
        assert!(hits[0].score > hits[1].score);

        // The text table is untouched
        assert_eq!(text.count_for_commit("commit-a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_existing_and_delete_scoped_by_commit() {
        let (code, _) = stores().await;
        code.save("commit-a", &[("s1".to_string(), vec![1.0])])
            .await
            .unwrap();
        code.save("commit-b", &[("s1".to_string(), vec![1.0])])
            .await
            .unwrap();

        let existing = code
            .existing("commit-a", &["s1".to_string(), "s2".to_string()])
            .await
            .unwrap();
        assert_eq!(existing.len(), 1);

        assert_eq!(code.delete_for_commit("commit-a").await.unwrap(), 1);
        assert_eq!(code.count_for_commit("commit-a").await.unwrap(), 0);
        assert_eq!(code.count_for_commit("commit-b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let (code, _) = stores().await;
        let rows = vec![("s1".to_string(), vec![0.5, 0.5])];
        code.save("commit-a", &rows).await.unwrap();
        code.save("commit-a", &rows).await.unwrap();
        assert_eq!(code.count_for_commit("commit-a").await.unwrap(), 1);
    }
}
