//! Read-only Gmail API client for the triage engine

use async_trait::async_trait;
use google_gmail1::api::Message;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{GmailHub, READONLY_SCOPES};
use crate::error::{Result, TriageError};

/// Headers requested for every message metadata fetch
pub const METADATA_HEADERS: &[&str] = &["From", "To", "Subject", "Date"];

/// Per-call timeout for catalog and listing calls
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest server-requested wait honoured between retries
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Retries for a transient label catalog failure
const LABEL_RETRIES: u32 = 2;

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// Raw per-message metadata as returned by the provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMetadata {
    pub id: String,
    pub thread_id: Option<String>,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
    pub snippet: String,
    /// Epoch milliseconds
    pub internal_date: i64,
    pub label_ids: Vec<String>,
}

/// Operations the triage engine needs from a mailbox provider
#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// List the account's full label catalog
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// List message ids matching a provider query, at most `max_results`
    async fn list_message_ids(&self, query: &str, max_results: u32) -> Result<Vec<String>>;

    /// Fetch headers, snippet, internal date and label ids of one message
    async fn get_message_metadata(&self, id: &str) -> Result<MessageMetadata>;
}

/// Gmail-backed mailbox client for one account
pub struct GmailMailboxClient {
    hub: GmailHub,
}

impl GmailMailboxClient {
    pub fn new(hub: GmailHub) -> Self {
        Self { hub }
    }

    /// Check if an error is retryable
    fn should_retry(error: &TriageError) -> bool {
        matches!(
            error,
            TriageError::ServerError { .. }
                | TriageError::RateLimitExceeded { .. }
                | TriageError::NetworkError(_)
        )
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_millis(250);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        retry_delay(&e, delay)
                    );
                    tokio::time::sleep(retry_delay(&e, delay)).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(4));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wait before the next attempt: the server's Retry-After when rate limited, else the backoff
fn retry_delay(error: &TriageError, backoff: Duration) -> Duration {
    match error {
        TriageError::RateLimitExceeded { retry_after } => {
            backoff.max(Duration::from_secs(*retry_after).min(MAX_RETRY_AFTER))
        }
        _ => backoff,
    }
}

/// Run a provider call under the per-call timeout
async fn with_timeout<T, Fut>(operation_name: &str, call: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(CALL_TIMEOUT, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Gmail API {} call timed out after {:?}", operation_name, CALL_TIMEOUT);
            Err(TriageError::NetworkError(format!(
                "API call timed out after {:?}",
                CALL_TIMEOUT
            )))
        }
    }
}

#[async_trait]
impl MailboxClient for GmailMailboxClient {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Self::with_retry("list_labels", LABEL_RETRIES, || async {
            let (_, response) = with_timeout("list_labels", async {
                debug!("Calling Gmail API to list labels...");
                self.hub
                    .users()
                    .labels_list("me")
                    .add_scope(READONLY_SCOPES[0])
                    .doit()
                    .await
                    .map_err(TriageError::from)
            })
            .await?;

            let labels: Vec<LabelInfo> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                    _ => None,
                })
                .collect();

            debug!("Successfully parsed {} labels", labels.len());
            Ok(labels)
        })
        .await
    }

    async fn list_message_ids(&self, query: &str, max_results: u32) -> Result<Vec<String>> {
        let (_, response) = with_timeout("list_messages", async {
            self.hub
                .users()
                .messages_list("me")
                .q(query)
                .max_results(max_results)
                .add_scope(READONLY_SCOPES[0])
                .doit()
                .await
                .map_err(TriageError::from)
        })
        .await?;

        let ids: Vec<String> = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|msg_ref| msg_ref.id)
            .take(max_results as usize)
            .collect();

        debug!("Listed {} message ids for query '{}'", ids.len(), query);
        Ok(ids)
    }

    async fn get_message_metadata(&self, id: &str) -> Result<MessageMetadata> {
        let mut call = self.hub.users().messages_get("me", id).format("metadata");
        for header in METADATA_HEADERS {
            call = call.add_metadata_headers(header);
        }

        let (_, msg) = call.add_scope(READONLY_SCOPES[0]).doit().await?;
        parse_message_metadata(msg)
    }
}

/// Parse Gmail API Message into our MessageMetadata structure
pub fn parse_message_metadata(msg: Message) -> Result<MessageMetadata> {
    let id = msg
        .id
        .ok_or_else(|| TriageError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let mut metadata = MessageMetadata {
        id,
        thread_id: msg.thread_id,
        snippet: msg.snippet.unwrap_or_default(),
        internal_date: msg.internal_date.unwrap_or(0),
        label_ids: msg.label_ids.unwrap_or_default(),
        ..Default::default()
    };

    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default();

    for header in headers {
        if let (Some(name), Some(value)) = (header.name, header.value) {
            match name.to_lowercase().as_str() {
                "from" => metadata.from = value,
                "to" => metadata.to = value,
                "subject" => metadata.subject = value,
                "date" => metadata.date = value,
                _ => {}
            }
        }
    }

    Ok(metadata)
}

/// Parse email header in "Name <email@example.com>" format
pub fn parse_email_header(header: &str) -> Option<(String, String)> {
    let start = header.find('<')?;
    let end = header[start..].find('>')? + start;
    let name = header[..start].trim().trim_matches('"').to_string();
    let email = header[start + 1..end].trim().to_string();
    Some((name, email))
}

/// Split a From header into (address, display name)
///
/// A bare address yields an empty display name.
pub fn split_sender(from_header: &str) -> (String, String) {
    match parse_email_header(from_header) {
        Some((name, email)) => (email, name),
        None => (from_header.trim().to_string(), String::new()),
    }
}
