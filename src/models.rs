use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Triage outcome for a message or thread
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Action,
    Fyi,
    Skip,
    #[default]
    Unclassified,
}

impl Category {
    /// Every category, in descending priority
    pub const ALL: [Category; 4] = [
        Category::Action,
        Category::Unclassified,
        Category::Fyi,
        Category::Skip,
    ];

    /// Rollup priority: action > unclassified > fyi > skip.
    ///
    /// An unresolved message outranks a known-benign one, so a thread with a
    /// single unread unknown never collapses to `skip`.
    pub fn priority(self) -> u8 {
        match self {
            Category::Action => 3,
            Category::Unclassified => 2,
            Category::Fyi => 1,
            Category::Skip => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Action => "action",
            Category::Fyi => "fyi",
            Category::Skip => "skip",
            Category::Unclassified => "unclassified",
        }
    }

    /// Categories a classifier is allowed to assign
    pub fn is_assignable(self) -> bool {
        !matches!(self, Category::Unclassified)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "action" => Ok(Category::Action),
            "fyi" => Ok(Category::Fyi),
            "skip" => Ok(Category::Skip),
            "unclassified" => Ok(Category::Unclassified),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// One unread message as seen by the triage engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailMessage {
    pub id: String,
    pub thread_id: Option<String>,
    pub account: String,
    pub from: String,
    pub from_name: String,
    pub to: String,
    pub subject: String,
    pub snippet: String,
    pub date: String,
    /// Provider internal date, epoch milliseconds
    pub timestamp: i64,
    pub labels: Vec<String>,
    pub category: Category,
    pub reason: Option<String>,
}

impl EmailMessage {
    /// Key used for thread grouping; single messages without a thread form their own group
    pub fn thread_key(&self) -> &str {
        match self.thread_id.as_deref() {
            Some(thread_id) if !thread_id.is_empty() => thread_id,
            _ => &self.id,
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.category == Category::Unclassified
    }

    /// Assign a category and reason
    pub fn assign(&mut self, category: Category, reason: impl Into<String>) {
        self.category = category;
        self.reason = Some(reason.into());
    }
}

/// A conversation aggregated to a single triage signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailThread {
    pub id: String,
    pub subject: String,
    pub account: String,
    pub last_message: EmailMessage,
    pub message_count: usize,
    /// Ascending by timestamp; the last element is `last_message`
    pub messages: Vec<EmailMessage>,
    pub category: Category,
    pub reason: Option<String>,
    pub timestamp: i64,
}

/// LLM fallback output unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub id: String,
    pub category: Category,
    pub reason: String,
}

/// Message as submitted to the classify operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailInput {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub account: String,
}

impl From<&EmailMessage> for EmailInput {
    fn from(message: &EmailMessage) -> Self {
        Self {
            id: message.id.clone(),
            from: message.from.clone(),
            from_name: message.from_name.clone(),
            subject: message.subject.clone(),
            snippet: message.snippet.clone(),
            account: message.account.clone(),
        }
    }
}

/// Request body of the classify operation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClassifyRequest {
    #[serde(default)]
    pub emails: Vec<EmailInput>,
}

/// Response body of the classify operation
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClassifyResponse {
    pub classifications: Vec<Classification>,
    pub batches: usize,
    pub failed_batches: usize,
    pub dropped_entries: usize,
}

/// An account whose scan failed as a whole
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountFailure {
    pub account: String,
    pub error: String,
}

/// Messages successfully collected from one account
#[derive(Debug, Clone, Default)]
pub struct AccountMessages {
    pub account: String,
    pub messages: Vec<EmailMessage>,
    pub fetch_failures: usize,
}

/// Outcome of one account's scan: messages or a failure, never both
pub type AccountScanResult = std::result::Result<AccountMessages, AccountFailure>;

/// Number of messages per category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CategoryBreakdown {
    pub action: usize,
    pub fyi: usize,
    pub skip: usize,
    pub unclassified: usize,
}

impl CategoryBreakdown {
    pub fn from_messages(messages: &[EmailMessage]) -> Self {
        let mut breakdown = Self::default();
        for message in messages {
            match message.category {
                Category::Action => breakdown.action += 1,
                Category::Fyi => breakdown.fyi += 1,
                Category::Skip => breakdown.skip += 1,
                Category::Unclassified => breakdown.unclassified += 1,
            }
        }
        breakdown
    }

    pub fn get(&self, category: Category) -> usize {
        match category {
            Category::Action => self.action,
            Category::Fyi => self.fyi,
            Category::Skip => self.skip,
            Category::Unclassified => self.unclassified,
        }
    }
}

/// Response body of the scan operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub lookback_days: u32,
    pub threads: Vec<EmailThread>,
    pub messages: Vec<EmailMessage>,
    pub total: usize,
    pub thread_count: usize,
    pub rule_filtered: usize,
    pub accounts_scanned: usize,
    pub accounts_failed: Vec<AccountFailure>,
    pub fetch_failures: usize,
    pub breakdown: CategoryBreakdown,
}
