//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::auth::{self, READONLY_SCOPES};
use crate::classifier::RuleClassifier;
use crate::config::Config;
use crate::error::{Result, TriageError};
use crate::fallback::FallbackClassifier;
use crate::models::{Category, ClassifyRequest, ClassifyResponse, ScanReport};
use crate::pool::MailboxPool;
use crate::scanner::{
    apply_classifications, parse_lookback, unclassified_inputs, ScanOptions, ScanOrchestrator,
    ScanRequest,
};

#[derive(Parser, Debug)]
#[command(name = "mail-triage")]
#[command(version)]
#[command(about = "Triage unread mail across several Gmail accounts", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file shared by all accounts
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authorize one configured account (read-only scope)
    Auth {
        /// Account name from the config file
        #[arg(short, long)]
        account: String,

        /// Force re-authentication even if a token is cached
        #[arg(long)]
        force: bool,
    },

    /// Scan unread mail and classify it
    Scan {
        /// Lookback window in days (clamped to 1..=90)
        #[arg(short = 'd', long)]
        newer_than_days: Option<String>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        /// Also write the JSON report to a file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Send messages the rules left unclassified to the language model
        #[arg(long)]
        llm_fallback: bool,
    },

    /// Classify a batch of emails with the language model
    Classify {
        /// JSON request file (`{"emails": [...]}`); reads stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective label table and rule list
    Rules,
}

/// Truncate a string to max_len characters, adding "..." if truncated
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a MultiProgress with the tracing writer so log lines print above spinners
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Interpret the `--newer-than-days` argument, falling back to the config default
pub fn scan_request(newer_than_days: Option<&str>, config: &Config) -> ScanRequest {
    match newer_than_days {
        Some(raw) => ScanRequest::new(parse_lookback(&Value::String(raw.to_string()))),
        None => ScanRequest::new(Some(config.scan.default_days as f64)),
    }
}

/// Build the fallback classifier described by the `[llm]` section
#[cfg(feature = "ml")]
pub fn fallback_classifier(config: &Config) -> Result<FallbackClassifier> {
    let provider = crate::openai::OpenAiProvider::from_config(&config.llm)?;
    Ok(FallbackClassifier::new(std::sync::Arc::new(provider))
        .with_batch_size(config.llm.batch_size))
}

#[cfg(not(feature = "ml"))]
pub fn fallback_classifier(_config: &Config) -> Result<FallbackClassifier> {
    Err(TriageError::ConfigError(
        "this build has no language model support; rebuild with --features ml".to_string(),
    ))
}

/// Run the OAuth flow for one account and return its email address
pub async fn authenticate_account(cli: &Cli, account: &str, force: bool) -> Result<String> {
    let config = Config::load(&cli.config).await?;
    let account = config.account(account).ok_or_else(|| {
        TriageError::ConfigError(format!("Account '{}' is not in {:?}", account, cli.config))
    })?;

    let token_cache = account.token_cache_path();
    if let Some(parent) = token_cache.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if force && token_cache.exists() {
        tokio::fs::remove_file(&token_cache).await?;
        info!("Removed existing token cache for {}", account.name);
    }

    let secret = auth::application_secret(&cli.credentials).await?;
    let hub = auth::initialize_gmail_hub(secret, &token_cache).await?;

    let (_, profile) = hub
        .users()
        .get_profile("me")
        .add_scope(READONLY_SCOPES[0])
        .doit()
        .await?;
    Ok(profile.email_address.unwrap_or_default())
}

/// Scan every configured account, optionally resolving leftovers with the model
pub async fn run_scan(
    cli: &Cli,
    newer_than_days: Option<&str>,
    llm_fallback: bool,
    multi: MultiProgress,
) -> Result<ScanReport> {
    let reporter = ProgressReporter::with_multi_progress(multi);

    let config_spinner = reporter.add_spinner("Loading configuration...");
    let config = Config::load(&cli.config).await?;
    let classifier = config.rule_classifier()?;
    reporter.finish_spinner(
        &config_spinner,
        &format!(
            "Configuration loaded ({} accounts, {} rules)",
            config.accounts.len(),
            classifier.rules().len()
        ),
    );

    // Build the model client up front so a missing key fails before any mail is read
    let fallback = if llm_fallback {
        Some(fallback_classifier(&config)?)
    } else {
        None
    };

    let auth_spinner = reporter.add_spinner("Connecting accounts...");
    let pool = MailboxPool::connect(&config, &cli.credentials).await?;
    reporter.finish_spinner(
        &auth_spinner,
        &format!(
            "{} of {} accounts connected",
            pool.clients().len(),
            pool.configured()
        ),
    );

    let request = scan_request(newer_than_days, &config);
    let scan_spinner = reporter.add_spinner(&format!(
        "Scanning unread mail from the last {} days...",
        request.lookback_days()
    ));
    let orchestrator = ScanOrchestrator::new(pool, classifier, ScanOptions::from(&config.scan));
    let mut report = orchestrator.scan(&request).await?;
    reporter.finish_spinner(
        &scan_spinner,
        &format!(
            "Found {} unread messages in {} threads ({} resolved by rules)",
            report.total, report.thread_count, report.rule_filtered
        ),
    );

    if let Some(fallback) = fallback {
        let inputs = unclassified_inputs(&report);
        if !inputs.is_empty() {
            let llm_spinner =
                reporter.add_spinner(&format!(
                    "Classifying {} messages with the model...",
                    inputs.len()
                ));
            let response = fallback.classify(&inputs).await?;
            let applied = apply_classifications(&mut report, &response.classifications);
            reporter.finish_spinner(
                &llm_spinner,
                &format!("Model classified {} of {} messages", applied, inputs.len()),
            );
        }
    }

    Ok(report)
}

/// Read a classify request from a file, or stdin when no file is given
pub async fn read_classify_request(input: Option<&PathBuf>) -> Result<ClassifyRequest> {
    let content = match input {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            use tokio::io::AsyncReadExt;
            let mut buffer = String::new();
            tokio::io::stdin().read_to_string(&mut buffer).await?;
            buffer
        }
    };
    Ok(serde_json::from_str(&content)?)
}

pub async fn run_classify(cli: &Cli, request: &ClassifyRequest) -> Result<ClassifyResponse> {
    let config = Config::load(&cli.config).await?;
    let classifier = fallback_classifier(&config)?;
    classifier.classify(&request.emails).await
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Human-readable scan summary, one thread per line grouped by category
pub fn render_summary(report: &ScanReport) -> String {
    let mut out = String::new();

    out.push_str("\n========================================\n");
    out.push_str("Triage Summary\n");
    out.push_str("========================================\n");
    out.push_str(&format!("Scan ID: {}\n", report.scan_id));
    out.push_str(&format!("Window: last {} days\n", report.lookback_days));
    out.push_str(&format!(
        "Accounts scanned: {} ({} failed)\n",
        report.accounts_scanned,
        report.accounts_failed.len()
    ));
    out.push_str(&format!(
        "Messages: {} in {} threads ({} resolved by rules, {} fetch failures)\n",
        report.total, report.thread_count, report.rule_filtered, report.fetch_failures
    ));
    for category in Category::ALL {
        out.push_str(&format!(
            "  {:<13} {}\n",
            category.as_str(),
            report.breakdown.get(category)
        ));
    }

    for failure in &report.accounts_failed {
        out.push_str(&format!("  ! {}: {}\n", failure.account, failure.error));
    }

    for category in Category::ALL {
        let threads: Vec<_> = report
            .threads
            .iter()
            .filter(|t| t.category == category)
            .collect();
        if threads.is_empty() {
            continue;
        }

        out.push_str(&format!("\n## {} ({})\n", category.as_str().to_uppercase(), threads.len()));
        for thread in threads {
            let sender = if thread.last_message.from_name.is_empty() {
                &thread.last_message.from
            } else {
                &thread.last_message.from_name
            };
            out.push_str(&format!(
                "  {} | {:<10} | {:<24} | {}",
                format_timestamp(thread.timestamp),
                truncate_string(&thread.account, 10),
                truncate_string(sender, 24),
                truncate_string(&thread.subject, 60)
            ));
            if thread.message_count > 1 {
                out.push_str(&format!(" ({})", thread.message_count));
            }
            if let Some(reason) = &thread.reason {
                out.push_str(&format!("\n      ↳ {}", reason));
            }
            out.push('\n');
        }
    }

    out.push_str("========================================\n");
    out
}

/// Printable label table and rule list
pub fn render_rules(classifier: &RuleClassifier) -> String {
    let mut out = String::from("Labels (checked first, in order):\n");
    for mapping in classifier.label_mappings() {
        out.push_str(&format!(
            "  {:<16} -> {:<6} \"{}\"\n",
            mapping.label,
            mapping.category.as_str(),
            mapping.reason()
        ));
    }

    out.push_str("\nRules (first match wins):\n");
    for (index, rule) in classifier.rules().iter().enumerate() {
        out.push_str(&format!(
            "  {:>2}. {:<20} -> {:<6} \"{}\"\n",
            index + 1,
            rule.name,
            rule.category.as_str(),
            rule.reason
        ));
        if let Some(pattern) = rule.from_pattern() {
            out.push_str(&format!("        from:    {}\n", pattern));
        }
        if let Some(pattern) = rule.subject_pattern() {
            out.push_str(&format!("        subject: {}\n", pattern));
        }
    }
    out
}

/// Process exit code: 2 for configuration mistakes, 1 for everything else
pub fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<TriageError>() {
        Some(e) if e.is_configuration() => 2,
        _ => 1,
    }
}
