//! Mail Triage
//!
//! Scans unread mail across several Gmail accounts, classifies every message
//! as `action`, `fyi` or `skip`, and rolls messages up into threads so a busy
//! reader sees one signal per conversation.
//!
//! # Overview
//!
//! - **Authentication**: per-account OAuth2 token caches, read-only scope
//! - **Scanning**: all accounts concurrently, message fetches fanned out per account
//! - **Classification**: user labels first, then an ordered regex rule table
//! - **Threads**: highest-priority member category wins (action > unclassified > fyi > skip)
//! - **Fallback**: optional language-model pass for what the rules leave unclassified
//!
//! # Example Usage
//!
//! ```no_run
//! use mail_triage::{config::Config, pool::MailboxPool};
//! use mail_triage::scanner::{ScanOptions, ScanOrchestrator, ScanRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let pool = MailboxPool::connect(&config, "credentials.json".as_ref()).await?;
//!
//!     let orchestrator = ScanOrchestrator::new(
//!         pool,
//!         config.rule_classifier()?,
//!         ScanOptions::from(&config.scan),
//!     );
//!     let report = orchestrator.scan(&ScanRequest::new(Some(7.0))).await?;
//!     println!("{} unread messages in {} threads", report.total, report.thread_count);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Read-only mailbox client trait and its Gmail implementation
//! - [`pool`] - Per-account clients built from configuration
//! - [`labels`] - Label id to name resolution
//! - [`classifier`] - Label table and regex rule classifier
//! - [`threads`] - Thread aggregation and category rollup
//! - [`scanner`] - Scan orchestration and report assembly
//! - [`fallback`] - Language-model fallback classifier
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fallback;
pub mod labels;
pub mod models;
#[cfg(feature = "ml")]
pub mod openai;
pub mod pool;
pub mod scanner;
pub mod threads;

// Re-export commonly used types for convenience
pub use error::{Result, TriageError};

// Core data models
pub use models::{
    AccountFailure, Category, Classification, ClassifyRequest, ClassifyResponse, EmailInput,
    EmailMessage, EmailThread, ScanReport,
};

// Classifier types
pub use classifier::{LabelMapping, Rule, RuleClassifier, RuleSpec};
pub use fallback::{CompletionProvider, FallbackClassifier};
#[cfg(feature = "ml")]
pub use openai::OpenAiProvider;

// Scanning
pub use pool::{AccountClient, MailboxPool};
pub use scanner::{apply_classifications, ScanOptions, ScanOrchestrator, ScanRequest};
pub use threads::aggregate_threads;

// Config types
pub use config::{AccountConfig, ClassificationConfig, Config, LlmConfig, ScanConfig};

// Client traits
pub use client::{GmailMailboxClient, LabelInfo, MailboxClient, MessageMetadata};

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter};
