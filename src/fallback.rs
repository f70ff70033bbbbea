//! LLM fallback classifier for messages the rule stage could not resolve
//!
//! Messages are sent to the model in fixed-size batches, one batch at a
//! time. Every entry of the model's answer is validated before it is
//! trusted: the id must belong to the batch, the category must be one of
//! `action`, `fyi` or `skip`, and the reason must be a string. A batch whose
//! answer is not valid JSON (or whose call fails) contributes nothing; the
//! remaining batches still run.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, TriageError};
use crate::models::{Category, Classification, ClassifyResponse, EmailInput};

/// Messages per model call
pub const DEFAULT_BATCH_SIZE: usize = 40;

/// Snippet characters included per message
pub const SNIPPET_LIMIT: usize = 200;

pub const SYSTEM_PROMPT: &str = "You triage unread email for a busy recruiter. \
For every email in the user message assign exactly one category:\n\
- \"action\": a human is waiting on a reply, decision, signature or scheduling answer\n\
- \"fyi\": worth reading but needs no response (updates, receipts, confirmations)\n\
- \"skip\": bulk, automated or promotional mail that can be ignored\n\
Respond with a single JSON object of the form \
{\"classifications\": [{\"id\": \"<id>\", \"category\": \"action|fyi|skip\", \"reason\": \"<short reason>\"}]}. \
Use only ids from the input. Keep each reason under 12 words.";

/// A chat-completion model returning one JSON object per call
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send a system + user prompt pair and return the raw response text
    async fn complete_json(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct PromptEntry<'a> {
    id: &'a str,
    from: String,
    account: &'a str,
    subject: &'a str,
    snippet: String,
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Serialize one batch into the compact JSON prompt sent to the model
pub fn build_prompt(batch: &[EmailInput]) -> Result<String> {
    let entries: Vec<PromptEntry<'_>> = batch
        .iter()
        .map(|email| PromptEntry {
            id: &email.id,
            from: if email.from_name.is_empty() {
                email.from.clone()
            } else {
                format!("{} <{}>", email.from_name, email.from)
            },
            account: &email.account,
            subject: &email.subject,
            snippet: truncate_chars(&email.snippet, SNIPPET_LIMIT),
        })
        .collect();

    Ok(format!(
        "Classify these {} emails:\n{}",
        entries.len(),
        serde_json::to_string(&entries)?
    ))
}

/// Validated result of one batch
#[derive(Debug, Default, PartialEq)]
pub struct BatchOutcome {
    pub classifications: Vec<Classification>,
    pub dropped: usize,
}

/// Parse and validate a model response against the ids of its batch.
///
/// Errors only when the response is not a JSON object carrying a
/// `classifications` array; malformed entries are dropped and counted.
/// Valid entries come back in the batch's input order.
pub fn parse_response(content: &str, batch: &[EmailInput]) -> Result<BatchOutcome> {
    let value: Value = serde_json::from_str(content)?;
    let entries = value
        .get("classifications")
        .and_then(Value::as_array)
        .ok_or_else(|| TriageError::LlmError("response has no classifications array".to_string()))?;

    let position = |id: &str| batch.iter().position(|email| email.id == id);

    let mut seen = HashSet::new();
    let mut accepted: Vec<(usize, Classification)> = Vec::new();
    let mut dropped = 0;

    for entry in entries {
        match validate_entry(entry) {
            Some(classification) => match position(&classification.id) {
                Some(index) if seen.insert(classification.id.clone()) => {
                    accepted.push((index, classification))
                }
                _ => {
                    debug!(
                        "Dropping classification for unknown or repeated id {}",
                        classification.id
                    );
                    dropped += 1;
                }
            },
            None => {
                debug!("Dropping malformed classification entry: {}", entry);
                dropped += 1;
            }
        }
    }

    accepted.sort_by_key(|(index, _)| *index);
    Ok(BatchOutcome {
        classifications: accepted.into_iter().map(|(_, c)| c).collect(),
        dropped,
    })
}

fn validate_entry(entry: &Value) -> Option<Classification> {
    let id = entry.get("id")?.as_str()?;
    let category: Category = entry.get("category")?.as_str()?.parse().ok()?;
    if !category.is_assignable() {
        return None;
    }
    let reason = entry.get("reason")?.as_str()?;

    Some(Classification {
        id: id.to_string(),
        category,
        reason: reason.to_string(),
    })
}

/// Batches unresolved messages through a language model
pub struct FallbackClassifier {
    provider: Arc<dyn CompletionProvider>,
    batch_size: usize,
}

impl FallbackClassifier {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Classify emails batch by batch, sequentially.
    ///
    /// Only an empty input is an error; per-batch failures are counted in
    /// the response.
    pub async fn classify(&self, emails: &[EmailInput]) -> Result<ClassifyResponse> {
        if emails.is_empty() {
            return Err(TriageError::EmptyInput("no emails to classify".to_string()));
        }

        let mut response = ClassifyResponse::default();
        for (index, batch) in emails.chunks(self.batch_size).enumerate() {
            response.batches += 1;
            match self.classify_batch(batch).await {
                Ok(outcome) => {
                    debug!(
                        "Batch {} classified {} of {} emails ({} dropped)",
                        index + 1,
                        outcome.classifications.len(),
                        batch.len(),
                        outcome.dropped
                    );
                    response.dropped_entries += outcome.dropped;
                    response.classifications.extend(outcome.classifications);
                }
                Err(e) => {
                    warn!("Batch {} of {} emails failed: {}", index + 1, batch.len(), e);
                    response.failed_batches += 1;
                }
            }
        }

        info!(
            "Fallback classified {} of {} emails in {} batches ({} failed, {} entries dropped)",
            response.classifications.len(),
            emails.len(),
            response.batches,
            response.failed_batches,
            response.dropped_entries
        );
        Ok(response)
    }

    async fn classify_batch(&self, batch: &[EmailInput]) -> Result<BatchOutcome> {
        let prompt = build_prompt(batch)?;
        let content = self.provider.complete_json(SYSTEM_PROMPT, &prompt).await?;
        parse_response(&content, batch)
    }
}
