//! Scan orchestration: concurrent per-account fetch, rule classification and thread rollup

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::RuleClassifier;
use crate::client::{split_sender, MessageMetadata};
use crate::config::ScanConfig;
use crate::error::{Result, TriageError};
use crate::labels::{resolve_labels, LabelMap};
use crate::models::{
    AccountFailure, AccountMessages, AccountScanResult, Category, CategoryBreakdown, Classification,
    EmailInput, EmailMessage, ScanReport,
};
use crate::pool::{AccountClient, MailboxPool};
use crate::threads::aggregate_threads;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 21;
pub const MIN_LOOKBACK_DAYS: u32 = 1;
pub const MAX_LOOKBACK_DAYS: u32 = 90;

/// Clamp a requested lookback into `[1, 90]` days.
///
/// Missing or NaN values use the default; everything else is rounded and
/// clamped, never rejected.
pub fn clamp_lookback_days(requested: Option<f64>) -> u32 {
    match requested {
        Some(days) if !days.is_nan() => {
            days.round()
                .clamp(MIN_LOOKBACK_DAYS as f64, MAX_LOOKBACK_DAYS as f64) as u32
        }
        _ => DEFAULT_LOOKBACK_DAYS,
    }
}

/// Interpret a raw request value as a day count; non-numeric input becomes NaN
pub fn parse_lookback(raw: &Value) -> Option<f64> {
    match raw {
        Value::Null => None,
        Value::Number(n) => Some(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => Some(s.trim().parse::<f64>().unwrap_or(f64::NAN)),
        _ => Some(f64::NAN),
    }
}

fn lenient_days<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(parse_lookback))
}

/// Scan request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default, deserialize_with = "lenient_days")]
    pub newer_than_days: Option<f64>,
}

impl ScanRequest {
    pub fn new(newer_than_days: Option<f64>) -> Self {
        Self { newer_than_days }
    }

    pub fn lookback_days(&self) -> u32 {
        clamp_lookback_days(self.newer_than_days)
    }
}

/// Provider query for unread mail in the window, minus bulk categories
pub fn build_query(days: u32, excluded_categories: &[String]) -> String {
    let mut query = format!("is:unread newer_than:{}d", days);
    for category in excluded_categories {
        query.push_str(" -category:");
        query.push_str(category);
    }
    query
}

/// Runtime knobs for a scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_results: u32,
    pub max_concurrent_fetches: usize,
    pub timeout: Duration,
    /// Budget for one account's label catalog fetch
    pub label_timeout: Duration,
    pub excluded_categories: Vec<String>,
}

impl From<&ScanConfig> for ScanOptions {
    fn from(config: &ScanConfig) -> Self {
        Self {
            max_results: config.max_results,
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            label_timeout: label_budget(Duration::from_secs(config.timeout_secs)),
            excluded_categories: config.excluded_categories.clone(),
        }
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

/// Label resolution gets a quarter of the scan budget
pub fn label_budget(scan_timeout: Duration) -> Duration {
    scan_timeout / 4
}

/// Fans a scan out over every account of a pool
pub struct ScanOrchestrator {
    pool: MailboxPool,
    classifier: Arc<RuleClassifier>,
    options: ScanOptions,
}

impl ScanOrchestrator {
    pub fn new(pool: MailboxPool, classifier: RuleClassifier, options: ScanOptions) -> Self {
        Self {
            pool,
            classifier: Arc::new(classifier),
            options,
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan all accounts and return the aggregated report.
    ///
    /// Fails when no accounts are configured or the wall-clock budget runs
    /// out; account and message failures are reported, not raised.
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanReport> {
        if self.pool.is_empty() {
            return Err(TriageError::NoAccountsConfigured);
        }

        let days = request.lookback_days();
        let query = build_query(days, &self.options.excluded_categories);
        info!(
            "Scanning {} accounts (newer than {} days)",
            self.pool.clients().len(),
            days
        );

        tokio::time::timeout(self.options.timeout, self.run(days, &query))
            .await
            .map_err(|_| TriageError::Timeout {
                secs: self.options.timeout.as_secs(),
            })
    }

    async fn run(&self, days: u32, query: &str) -> ScanReport {
        let results: Vec<AccountScanResult> = join_all(
            self.pool
                .clients()
                .iter()
                .map(|account| self.scan_account(account, query)),
        )
        .await;

        let mut accounts_failed = self.pool.failures().to_vec();
        let mut accounts_scanned = 0;
        let mut fetch_failures = 0;
        let mut messages = Vec::new();

        for result in results {
            match result {
                Ok(account) => {
                    accounts_scanned += 1;
                    fetch_failures += account.fetch_failures;
                    messages.extend(account.messages);
                }
                Err(failure) => accounts_failed.push(failure),
            }
        }

        let report = build_report(
            days,
            messages,
            accounts_scanned,
            accounts_failed,
            fetch_failures,
        );
        info!(
            "Scan {} complete: {} messages in {} threads, {} resolved by rules, {} accounts failed",
            report.scan_id,
            report.total,
            report.thread_count,
            report.rule_filtered,
            report.accounts_failed.len()
        );
        report
    }

    async fn scan_account(&self, account: &AccountClient, query: &str) -> AccountScanResult {
        let client = account.client.as_ref();
        let (labels, listing) = tokio::join!(
            resolve_labels(&account.account, client, self.options.label_timeout),
            client.list_message_ids(query, self.options.max_results)
        );

        let ids = listing.map_err(|e| {
            warn!("Account {} failed: {}", account.account, e);
            AccountFailure {
                account: account.account.clone(),
                error: e.to_string(),
            }
        })?;

        debug!("Account {}: fetching {} messages", account.account, ids.len());
        let fetched: Vec<Result<MessageMetadata>> = stream::iter(ids)
            .map(|id| async move {
                client.get_message_metadata(&id).await.map_err(|e| {
                    warn!("Failed to fetch message {} from {}: {}", id, account.account, e);
                    e
                })
            })
            .buffer_unordered(self.options.max_concurrent_fetches)
            .collect()
            .await;

        let mut result = AccountMessages {
            account: account.account.clone(),
            ..Default::default()
        };
        for item in fetched {
            match item {
                Ok(metadata) => {
                    let mut message = to_email_message(&account.account, metadata, &labels);
                    self.classifier.apply(&mut message);
                    result.messages.push(message);
                }
                Err(_) => result.fetch_failures += 1,
            }
        }

        info!(
            "Account {}: {} messages ({} fetch failures)",
            account.account,
            result.messages.len(),
            result.fetch_failures
        );
        Ok(result)
    }
}

/// Normalize provider metadata into an unclassified message
pub fn to_email_message(
    account: &str,
    metadata: MessageMetadata,
    labels: &LabelMap,
) -> EmailMessage {
    let (from, from_name) = split_sender(&metadata.from);
    EmailMessage {
        labels: labels.resolve(&metadata.label_ids),
        id: metadata.id,
        thread_id: metadata.thread_id,
        account: account.to_string(),
        from,
        from_name,
        to: metadata.to,
        subject: metadata.subject,
        snippet: metadata.snippet,
        date: metadata.date,
        timestamp: metadata.internal_date,
        category: Category::Unclassified,
        reason: None,
    }
}

fn sort_newest_first(messages: &mut [EmailMessage]) {
    messages.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.account.cmp(&b.account))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Assemble the report from merged per-account results
pub fn build_report(
    lookback_days: u32,
    mut messages: Vec<EmailMessage>,
    accounts_scanned: usize,
    accounts_failed: Vec<AccountFailure>,
    fetch_failures: usize,
) -> ScanReport {
    sort_newest_first(&mut messages);
    let threads = aggregate_threads(&messages);

    ScanReport {
        scan_id: Uuid::new_v4().to_string(),
        lookback_days,
        total: messages.len(),
        thread_count: threads.len(),
        rule_filtered: messages.iter().filter(|m| !m.is_unclassified()).count(),
        breakdown: CategoryBreakdown::from_messages(&messages),
        threads,
        messages,
        accounts_scanned,
        accounts_failed,
        fetch_failures,
    }
}

/// Messages the rule stage left unresolved, ready for the fallback classifier
pub fn unclassified_inputs(report: &ScanReport) -> Vec<EmailInput> {
    report
        .messages
        .iter()
        .filter(|m| m.is_unclassified())
        .map(EmailInput::from)
        .collect()
}

/// Merge fallback classifications into a report.
///
/// Only still-unclassified messages are updated, so rule and label
/// decisions are never overridden. Threads and the category breakdown are
/// recomputed; `rule_filtered` keeps counting the rule stage alone.
/// Returns the number of messages updated.
pub fn apply_classifications(report: &mut ScanReport, classifications: &[Classification]) -> usize {
    let by_id: HashMap<&str, &Classification> = classifications
        .iter()
        .filter(|c| c.category.is_assignable())
        .map(|c| (c.id.as_str(), c))
        .collect();

    let mut applied = 0;
    for message in report.messages.iter_mut().filter(|m| m.is_unclassified()) {
        if let Some(classification) = by_id.get(message.id.as_str()) {
            message.assign(classification.category, classification.reason.clone());
            applied += 1;
        }
    }

    report.threads = aggregate_threads(&report.messages);
    report.thread_count = report.threads.len();
    report.breakdown = CategoryBreakdown::from_messages(&report.messages);
    debug!("Applied {} fallback classifications", applied);
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, thread: &str, ts: i64, category: Category) -> EmailMessage {
        EmailMessage {
            id: id.to_string(),
            thread_id: Some(thread.to_string()),
            account: "work".to_string(),
            from: "sender@example.com".to_string(),
            from_name: String::new(),
            to: String::new(),
            subject: String::new(),
            snippet: String::new(),
            date: String::new(),
            timestamp: ts,
            labels: vec![],
            category,
            reason: None,
        }
    }

    #[test]
    fn test_clamp_lookback_days() {
        assert_eq!(clamp_lookback_days(None), 21);
        assert_eq!(clamp_lookback_days(Some(0.0)), 1);
        assert_eq!(clamp_lookback_days(Some(-5.0)), 1);
        assert_eq!(clamp_lookback_days(Some(500.0)), 90);
        assert_eq!(clamp_lookback_days(Some(7.4)), 7);
        assert_eq!(clamp_lookback_days(Some(f64::NAN)), 21);
        assert_eq!(clamp_lookback_days(Some(f64::INFINITY)), 90);
        assert_eq!(clamp_lookback_days(Some(f64::NEG_INFINITY)), 1);
    }

    #[test]
    fn test_scan_request_lenient_parsing() {
        let request: ScanRequest = serde_json::from_str(r#"{"newer_than_days": "abc"}"#).unwrap();
        assert_eq!(request.lookback_days(), 21);

        let request: ScanRequest = serde_json::from_str(r#"{"newer_than_days": "14"}"#).unwrap();
        assert_eq!(request.lookback_days(), 14);

        let request: ScanRequest = serde_json::from_str(r#"{"newer_than_days": 500}"#).unwrap();
        assert_eq!(request.lookback_days(), 90);

        let request: ScanRequest = serde_json::from_str(r#"{"newer_than_days": null}"#).unwrap();
        assert_eq!(request.lookback_days(), 21);

        let request: ScanRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.lookback_days(), 21);

        let request: ScanRequest = serde_json::from_str(r#"{"newer_than_days": true}"#).unwrap();
        assert_eq!(request.lookback_days(), 21);
    }

    #[test]
    fn test_build_query() {
        let excluded = ScanConfig::default().excluded_categories;
        assert_eq!(
            build_query(21, &excluded),
            "is:unread newer_than:21d -category:promotions -category:social -category:updates -category:forums"
        );
        assert_eq!(build_query(3, &[]), "is:unread newer_than:3d");
    }

    #[test]
    fn test_to_email_message_resolves_labels_and_sender() {
        let labels = LabelMap::from_labels(vec![crate::client::LabelInfo {
            id: "Label_1".to_string(),
            name: "!Action".to_string(),
        }]);
        let metadata = MessageMetadata {
            id: "m1".to_string(),
            thread_id: Some("t1".to_string()),
            from: "Ann Lee <ann@example.com>".to_string(),
            subject: "Offer".to_string(),
            internal_date: 42,
            label_ids: vec!["Label_1".to_string(), "UNREAD".to_string()],
            ..Default::default()
        };

        let message = to_email_message("work", metadata, &labels);
        assert_eq!(message.from, "ann@example.com");
        assert_eq!(message.from_name, "Ann Lee");
        assert_eq!(message.labels, vec!["!Action".to_string(), "UNREAD".to_string()]);
        assert_eq!(message.timestamp, 42);
        assert!(message.is_unclassified());
    }

    #[test]
    fn test_build_report_counts() {
        let report = build_report(
            21,
            vec![
                message("a", "t1", 10, Category::Skip),
                message("b", "t1", 30, Category::Unclassified),
                message("c", "t2", 20, Category::Action),
            ],
            1,
            vec![],
            2,
        );

        assert_eq!(report.total, 3);
        assert_eq!(report.thread_count, 2);
        assert_eq!(report.rule_filtered, 2);
        assert_eq!(report.fetch_failures, 2);
        assert_eq!(report.messages[0].id, "b");
        assert_eq!(report.threads[0].id, "t1");
        assert_eq!(report.threads[0].category, Category::Unclassified);
        assert_eq!(report.breakdown.action, 1);
        assert!(Uuid::parse_str(&report.scan_id).is_ok());
    }

    #[test]
    fn test_apply_classifications_only_touches_unclassified() {
        let mut report = build_report(
            21,
            vec![
                message("a", "t1", 10, Category::Skip),
                message("b", "t1", 30, Category::Unclassified),
            ],
            1,
            vec![],
            0,
        );
        assert_eq!(unclassified_inputs(&report).len(), 1);

        let applied = apply_classifications(
            &mut report,
            &[
                Classification {
                    id: "a".to_string(),
                    category: Category::Action,
                    reason: "should not override".to_string(),
                },
                Classification {
                    id: "b".to_string(),
                    category: Category::Fyi,
                    reason: "status update".to_string(),
                },
            ],
        );

        assert_eq!(applied, 1);
        let a = report.messages.iter().find(|m| m.id == "a").unwrap();
        assert_eq!(a.category, Category::Skip);
        assert_eq!(report.threads[0].category, Category::Fyi);
        assert_eq!(report.breakdown.unclassified, 0);
        assert_eq!(report.rule_filtered, 1);
        assert!(unclassified_inputs(&report).is_empty());
    }

    #[test]
    fn test_label_budget_fits_inside_scan_budget() {
        let options = ScanOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert_eq!(options.label_timeout, Duration::from_secs(15));
        assert!(options.label_timeout < options.timeout);
    }
}
