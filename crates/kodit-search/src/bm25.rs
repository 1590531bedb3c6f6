//! BM25 document store
//!
//! The index keeps one row per `(snippet_sha, commit_sha)` holding the
//! document's tokenisation (term -> frequency as JSON) and length.
//! Scoring runs in-process with Okapi BM25 over the stored term maps,
//! identical across both persistence dialects.

use sqlx::Row;
use std::collections::{HashMap, HashSet};

use kodit_data::error::{DatabaseErrorExt, DatabaseOperation};
use kodit_data::DbPool;

use crate::error::SearchResult;
use crate::tokenizer::tokenize;

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// One scored hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub snippet_sha: String,
    pub score: f64,
}

/// SQL-backed BM25 store
#[derive(Clone)]
pub struct Bm25Store {
    db: DbPool,
}

impl Bm25Store {
    pub const fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Index `(snippet_sha, content)` documents for one commit
    ///
    /// Re-indexing the same pair overwrites the stored tokenisation, so
    /// re-runs converge.
    pub async fn index(
        &self,
        commit_sha: &str,
        documents: &[(String, String)],
    ) -> SearchResult<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let op = DatabaseOperation::Query {
            description: format!("bm25_index(commit={commit_sha}, count={})", documents.len()),
        };

        let mut tx = self.db.inner().begin().await.map_db_err(op.clone())?;

        for (snippet_sha, content) in documents {
            let tokens = tokenize(content);
            let doc_len = tokens.len() as i64;
            let mut frequencies: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *frequencies.entry(token).or_insert(0) += 1;
            }
            let terms = serde_json::to_string(&frequencies)
                .expect("string->u32 map always serialises");

            sqlx::query(
                "INSERT INTO kodit_bm25_documents (snippet_sha, commit_sha, terms, doc_len) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (snippet_sha, commit_sha) DO UPDATE SET \
                     terms = excluded.terms, doc_len = excluded.doc_len",
            )
            .bind(snippet_sha)
            .bind(commit_sha)
            .bind(&terms)
            .bind(doc_len)
            .execute(&mut *tx)
            .await
            .map_db_err(op.clone())?;
        }

        tx.commit().await.map_db_err(op)?;
        Ok(())
    }

    /// Rank snippets against a raw query string
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        ids_filter: Option<&[String]>,
    ) -> SearchResult<Vec<SearchHit>> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        // Corpus-level statistics for length normalisation and IDF
        let stats = sqlx::query(
            "SELECT COUNT(*) AS n, CAST(COALESCE(SUM(doc_len), 0) AS BIGINT) AS total_len \
             FROM kodit_bm25_documents",
        )
        .fetch_one(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: "bm25_corpus_stats".to_string(),
        })?;
        let corpus_size: i64 = stats.get("n");
        if corpus_size == 0 {
            return Ok(Vec::new());
        }
        let doc_count = corpus_size as f64;
        let avgdl = (stats.get::<i64, _>("total_len") as f64 / doc_count).max(1.0);

        // Candidate fetch by term match: tokens are alphanumeric, so a
        // quoted-key LIKE against the stored JSON term map hits exactly
        // the documents containing the term
        let sql = format!(
            "SELECT snippet_sha, terms, doc_len FROM kodit_bm25_documents WHERE {}",
            (1..=query_terms.len())
                .map(|i| format!("terms LIKE ${i}"))
                .collect::<Vec<_>>()
                .join(" OR ")
        );
        let mut candidate_query = sqlx::query(&sql);
        for term in &query_terms {
            candidate_query = candidate_query.bind(format!("%\"{term}\"%"));
        }
        let rows = candidate_query
            .fetch_all(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: "bm25_search".to_string(),
            })?;

        let filter: Option<HashSet<&str>> = ids_filter
            .map(|ids| ids.iter().map(String::as_str).collect());

        // A snippet indexed under several commits dedupes to one document
        let mut documents: HashMap<String, (HashMap<String, u32>, i64)> = HashMap::new();
        for row in &rows {
            let snippet_sha: String = row.get("snippet_sha");
            if let Some(filter) = &filter
                && !filter.contains(snippet_sha.as_str())
            {
                continue;
            }
            let terms_raw: String = row.get("terms");
            let Ok(frequencies) = serde_json::from_str::<HashMap<String, u32>>(&terms_raw) else {
                tracing::warn!(snippet_sha = %snippet_sha, "skipping document with corrupt term map");
                continue;
            };
            documents.insert(snippet_sha, (frequencies, row.get("doc_len")));
        }

        if documents.is_empty() {
            return Ok(Vec::new());
        }

        // The candidate set holds every document that can score above
        // zero, so frequencies computed over it lose nothing
        let mut df: HashMap<&str, f64> = HashMap::new();
        for term in &query_terms {
            let n = documents
                .values()
                .filter(|(freqs, _)| freqs.contains_key(term))
                .count() as f64;
            df.insert(term.as_str(), n);
        }

        let mut hits: Vec<SearchHit> = documents
            .iter()
            .filter_map(|(snippet_sha, (frequencies, doc_len))| {
                let mut score = 0.0;
                for term in &query_terms {
                    let Some(&tf) = frequencies.get(term) else {
                        continue;
                    };
                    let tf = f64::from(tf);
                    let n = df[term.as_str()];
                    let idf = (((doc_count - n + 0.5) / (n + 0.5)) + 1.0).ln();
                    let norm = K1 * (1.0 - B + B * (*doc_len as f64) / avgdl);
                    score += idf * (tf * (K1 + 1.0)) / (tf + norm);
                }
                (score > 0.0).then(|| SearchHit {
                    snippet_sha: snippet_sha.clone(),
                    score,
                })
            })
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

    /// Snippet SHAs among `shas` already indexed for the commit
    pub async fn existing(
        &self,
        commit_sha: &str,
        shas: &[String],
    ) -> SearchResult<HashSet<String>> {
        if shas.is_empty() {
            return Ok(HashSet::new());
        }

        let rows =
            sqlx::query("SELECT snippet_sha FROM kodit_bm25_documents WHERE commit_sha = $1")
                .bind(commit_sha)
                .fetch_all(self.db.inner())
                .await
                .map_db_err(DatabaseOperation::Query {
                    description: format!("bm25_existing(commit={commit_sha})"),
                })?;

        let wanted: HashSet<&str> = shas.iter().map(String::as_str).collect();
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("snippet_sha"))
            .filter(|sha| wanted.contains(sha.as_str()))
            .collect())
    }

    pub async fn delete_for_commit(&self, commit_sha: &str) -> SearchResult<u64> {
        let result = sqlx::query("DELETE FROM kodit_bm25_documents WHERE commit_sha = $1")
            .bind(commit_sha)
            .execute(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: format!("bm25_delete(commit={commit_sha})"),
            })?;
        Ok(result.rows_affected())
    }

    pub async fn count_for_commit(&self, commit_sha: &str) -> SearchResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kodit_bm25_documents WHERE commit_sha = $1")
            .bind(commit_sha)
            .fetch_one(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: format!("bm25_count(commit={commit_sha})"),
            })?;
        Ok(row.get("n"))
    }
}
