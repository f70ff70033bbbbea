//! Common test utilities and fixtures
#![allow(dead_code)]

use mail_triage::client::{LabelInfo, MailboxClient, MessageMetadata};
use mail_triage::error::{Result, TriageError};
use mail_triage::fallback::CompletionProvider;
use mail_triage::models::{Category, EmailInput, EmailMessage};
use mail_triage::pool::AccountClient;
use mockall::mock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Create test metadata as the provider would return it
pub fn create_test_metadata(
    id: &str,
    thread_id: &str,
    from: &str,
    subject: &str,
    internal_date: i64,
) -> MessageMetadata {
    MessageMetadata {
        id: id.to_string(),
        thread_id: Some(thread_id.to_string()),
        from: from.to_string(),
        to: "me@example.com".to_string(),
        subject: subject.to_string(),
        date: "Mon, 1 Jan 2024 10:00:00 -0800".to_string(),
        snippet: "Email snippet...".to_string(),
        internal_date,
        label_ids: vec!["INBOX".to_string(), "UNREAD".to_string()],
    }
}

/// Same as `create_test_metadata` with extra label ids
pub fn create_labeled_metadata(
    id: &str,
    thread_id: &str,
    from: &str,
    subject: &str,
    internal_date: i64,
    label_ids: &[&str],
) -> MessageMetadata {
    let mut metadata = create_test_metadata(id, thread_id, from, subject, internal_date);
    metadata.label_ids.extend(label_ids.iter().map(|l| l.to_string()));
    metadata
}

/// Create a test LabelInfo
pub fn create_test_label_info(id: &str, name: &str) -> LabelInfo {
    LabelInfo {
        id: id.to_string(),
        name: name.to_string(),
    }
}

/// Create an already-normalized message
pub fn create_test_message(
    id: &str,
    thread_id: Option<&str>,
    timestamp: i64,
    category: Category,
) -> EmailMessage {
    EmailMessage {
        id: id.to_string(),
        thread_id: thread_id.map(str::to_string),
        account: "work".to_string(),
        from: "sender@example.com".to_string(),
        from_name: "Sender".to_string(),
        to: "me@example.com".to_string(),
        subject: format!("Subject {}", id),
        snippet: String::new(),
        date: String::new(),
        timestamp,
        labels: vec![],
        category,
        reason: if category == Category::Unclassified {
            None
        } else {
            Some(format!("{} reason for {}", category, id))
        },
    }
}

pub fn create_email_input(id: &str) -> EmailInput {
    EmailInput {
        id: id.to_string(),
        from: format!("person{}@example.com", id),
        from_name: format!("Person {}", id),
        subject: format!("Question {}", id),
        snippet: "Could you take a look at this when you get a chance?".to_string(),
        account: "work".to_string(),
    }
}

pub fn create_email_inputs(count: usize) -> Vec<EmailInput> {
    (0..count).map(|i| create_email_input(&i.to_string())).collect()
}

/// Model response classifying every id with one category
pub fn mock_classification_response(ids: &[&str], category: &str) -> String {
    let classifications: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "category": category,
                "reason": format!("{} for {}", category, id),
            })
        })
        .collect();
    json!({ "classifications": classifications }).to_string()
}

/// Ids listed in a fallback prompt (the JSON array after the first line)
pub fn prompt_ids(user_prompt: &str) -> Vec<String> {
    let body = user_prompt.split_once('\n').map(|(_, rest)| rest).unwrap_or("[]");
    let entries: Vec<serde_json::Value> = serde_json::from_str(body).unwrap_or_default();
    entries
        .iter()
        .filter_map(|e| e["id"].as_str().map(str::to_string))
        .collect()
}

// Mock implementation of MailboxClient for testing
mock! {
    pub MailboxClient {}

    #[async_trait::async_trait]
    impl MailboxClient for MailboxClient {
        async fn list_labels(&self) -> Result<Vec<LabelInfo>>;
        async fn list_message_ids(&self, query: &str, max_results: u32) -> Result<Vec<String>>;
        async fn get_message_metadata(&self, id: &str) -> Result<MessageMetadata>;
    }
}

// Mock implementation of CompletionProvider for testing
mock! {
    pub CompletionProvider {}

    #[async_trait::async_trait]
    impl CompletionProvider for CompletionProvider {
        async fn complete_json(&self, system: &str, user: &str) -> Result<String>;
    }
}

/// A mailbox serving a fixed label catalog and message set
pub fn mock_mailbox(labels: Vec<LabelInfo>, messages: Vec<MessageMetadata>) -> MockMailboxClient {
    let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
    let by_id: HashMap<String, MessageMetadata> =
        messages.into_iter().map(|m| (m.id.clone(), m)).collect();

    let mut client = MockMailboxClient::new();
    client
        .expect_list_labels()
        .returning(move || Ok(labels.clone()));
    client
        .expect_list_message_ids()
        .returning(move |_, _| Ok(ids.clone()));
    client.expect_get_message_metadata().returning(move |id| {
        by_id
            .get(id)
            .cloned()
            .ok_or_else(|| TriageError::MessageNotFound(id.to_string()))
    });
    client
}

pub fn account_client(name: &str, client: MockMailboxClient) -> AccountClient {
    AccountClient::new(name, Arc::new(client))
}
