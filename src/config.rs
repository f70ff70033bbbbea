use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::classifier::{
    default_label_mappings, default_rule_specs, LabelMapping, RuleClassifier, RuleSpec,
};
use crate::error::{Result, TriageError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

/// One mailbox to triage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountConfig {
    pub name: String,
    /// Token cache file; defaults to `.mail-triage/tokens/<name>.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_cache: Option<PathBuf>,
}

impl AccountConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            token_cache: None,
        }
    }

    pub fn token_cache_path(&self) -> PathBuf {
        self.token_cache.clone().unwrap_or_else(|| {
            PathBuf::from(".mail-triage/tokens").join(format!("{}.json", self.name))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_lookback_days")]
    pub default_days: u32,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_scan_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_excluded_categories")]
    pub excluded_categories: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_days: default_lookback_days(),
            max_results: default_max_results(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            timeout_secs: default_scan_timeout_secs(),
            excluded_categories: default_excluded_categories(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default = "default_label_mappings")]
    pub labels: Vec<LabelMapping>,
    #[serde(default = "default_rule_specs")]
    pub rules: Vec<RuleSpec>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            labels: default_label_mappings(),
            rules: default_rule_specs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// OpenAI-compatible endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            batch_size: default_batch_size(),
            api_key_env: default_api_key_env(),
            api_base: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_lookback_days() -> u32 {
    21
}

fn default_max_results() -> u32 {
    50
}

fn default_max_concurrent_fetches() -> usize {
    50
}

fn default_scan_timeout_secs() -> u64 {
    60
}

fn default_excluded_categories() -> Vec<String> {
    vec![
        "promotions".to_string(),
        "social".to_string(),
        "updates".to_string(),
        "forums".to_string(),
    ]
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_batch_size() -> usize {
    40
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TriageError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    TriageError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TriageError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for account in &self.accounts {
            if account.name.trim().is_empty() {
                return Err(TriageError::ConfigError(
                    "accounts.name cannot be empty".to_string(),
                ));
            }
            if !names.insert(account.name.as_str()) {
                return Err(TriageError::ConfigError(format!(
                    "Duplicate account name: '{}'",
                    account.name
                )));
            }
        }

        if !(1..=90).contains(&self.scan.default_days) {
            return Err(TriageError::ConfigError(
                "scan.default_days must be between 1 and 90".to_string(),
            ));
        }
        if self.scan.max_results == 0 || self.scan.max_results > 500 {
            return Err(TriageError::ConfigError(
                "scan.max_results must be between 1 and 500".to_string(),
            ));
        }
        if self.scan.max_concurrent_fetches == 0 {
            return Err(TriageError::ConfigError(
                "scan.max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        if self.scan.timeout_secs == 0 {
            return Err(TriageError::ConfigError(
                "scan.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self
            .scan
            .excluded_categories
            .iter()
            .any(|c| c.trim().is_empty() || c.contains(char::is_whitespace))
        {
            return Err(TriageError::ConfigError(
                "scan.excluded_categories entries must be single non-empty words".to_string(),
            ));
        }

        if self.classification.labels.iter().any(|m| m.label.is_empty()) {
            return Err(TriageError::ConfigError(
                "classification.labels cannot contain empty label names".to_string(),
            ));
        }
        if self
            .classification
            .labels
            .iter()
            .any(|m| !m.category.is_assignable())
        {
            return Err(TriageError::ConfigError(
                "classification.labels cannot map to the unclassified category".to_string(),
            ));
        }
        // Compiling the classifier checks every rule pattern
        self.rule_classifier()?;

        if self.llm.batch_size == 0 {
            return Err(TriageError::ConfigError(
                "llm.batch_size must be greater than 0".to_string(),
            ));
        }
        if self.llm.model.is_empty() {
            return Err(TriageError::ConfigError(
                "llm.model cannot be empty".to_string(),
            ));
        }
        if self.llm.timeout_secs == 0 {
            return Err(TriageError::ConfigError(
                "llm.timeout_secs must be greater than 0".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Build the rule classifier described by the `[classification]` section
    pub fn rule_classifier(&self) -> Result<RuleClassifier> {
        RuleClassifier::from_specs(
            self.classification.labels.clone(),
            &self.classification.rules,
        )
    }

    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.name == name)
    }

    /// Example configuration with two placeholder accounts
    pub fn example() -> Self {
        Self {
            accounts: vec![AccountConfig::new("personal"), AccountConfig::new("work")],
            ..Self::default()
        }
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        Self::example().save(path).await
    }
}
