//! Enrichment handler
//!
//! Asks the text generator for a short summary of every snippet that
//! does not have one yet and stores it as a `summary` enrichment. A
//! single snippet failing is a warning; the task only fails when no
//! snippet could be summarised at all.

use async_trait::async_trait;
use std::sync::Arc;

use kodit_data::models::{EnrichmentEntityType, EnrichmentType, Task, TaskOperation};
use kodit_providers::ChatMessage;

use crate::error::{IndexingError, IndexingResult};
use crate::handlers::{require_commit_sha, HandlerContext, TaskHandler};
use crate::tracker::Tracker;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a code documentation assistant. Summarise the \
     given code snippet in two or three plain-English sentences: what it does, its inputs, \
     and its outputs. Do not repeat the code.";

const SUMMARY_MAX_TOKENS: u32 = 256;

pub struct EnrichCommitHandler {
    ctx: Arc<HandlerContext>,
}

impl EnrichCommitHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for EnrichCommitHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::EnrichCommit
    }

    async fn run(&self, task: &Task, tracker: Arc<Tracker>) -> IndexingResult<()> {
        let commit_sha = require_commit_sha(task)?;

        let snippets = self.ctx.snippets.snippets_for_commit(commit_sha).await?;
        if snippets.is_empty() {
            tracker.skip("no snippets to enrich").await;
            return Ok(());
        }

        let shas: Vec<String> = snippets.iter().map(|s| s.sha.clone()).collect();
        let existing = self
            .ctx
            .enrichments
            .for_entities(EnrichmentEntityType::Snippet, &shas, EnrichmentType::Summary)
            .await?;

        let missing: Vec<_> = snippets
            .iter()
            .filter(|s| !existing.contains_key(&s.sha))
            .collect();
        if missing.is_empty() {
            tracker.skip("all snippets already summarised").await;
            return Ok(());
        }

        tracker.set_total(missing.len() as i64).await;
        let mut summarised = 0i64;
        let mut last_error: Option<IndexingError> = None;

        for snippet in &missing {
            let completion = self
                .ctx
                .text_generator
                .chat_completion(
                    &[
                        ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
                        ChatMessage::user(snippet.content.clone()),
                    ],
                    Some(SUMMARY_MAX_TOKENS),
                    Some(0.2),
                )
                .await;

            let content = match completion {
                Ok(completion) => completion.content,
                Err(e) => {
                    tracing::warn!(
                        snippet_sha = %snippet.sha,
                        error = %e,
                        "summarisation failed, continuing with remaining snippets"
                    );
                    last_error = Some(e.into());
                    continue;
                }
            };

            self.ctx
                .enrichments
                .save_for_entity(
                    EnrichmentEntityType::Snippet,
                    &snippet.sha,
                    EnrichmentType::Summary,
                    None,
                    content.trim(),
                )
                .await?;
            summarised += 1;
            tracker.set_current(summarised, None).await;
        }

        // Total provider outage: let the retry path have the task
        if summarised == 0
            && let Some(error) = last_error
        {
            return Err(error);
        }
        Ok(())
    }
}
