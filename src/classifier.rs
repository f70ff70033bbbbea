//! Deterministic rule classifier: label precedence, then ordered regex rules

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TriageError};
use crate::models::{Category, EmailMessage};

/// One entry of the label→category table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelMapping {
    pub label: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LabelMapping {
    pub fn new(label: &str, category: Category) -> Self {
        Self {
            label: label.to_string(),
            category,
            reason: None,
        }
    }

    pub fn reason(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| format!("Labeled {}", self.label))
    }
}

/// Declarative rule as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub category: Category,
    pub reason: String,
}

impl RuleSpec {
    fn new(
        name: &str,
        from: Option<&str>,
        subject: Option<&str>,
        category: Category,
        reason: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            from: from.map(str::to_string),
            subject: subject.map(str::to_string),
            category,
            reason: reason.to_string(),
        }
    }
}

/// A compiled rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    from: Option<Regex>,
    subject: Option<Regex>,
    pub category: Category,
    pub reason: String,
}

impl Rule {
    /// Compile a rule; patterns are matched case-insensitively
    pub fn compile(spec: &RuleSpec) -> Result<Self> {
        if spec.from.is_none() && spec.subject.is_none() {
            return Err(TriageError::ConfigError(format!(
                "rule '{}' must specify a from or subject pattern",
                spec.name
            )));
        }
        if !spec.category.is_assignable() {
            return Err(TriageError::ConfigError(format!(
                "rule '{}' cannot target the unclassified category",
                spec.name
            )));
        }

        Ok(Self {
            name: spec.name.clone(),
            from: spec.from.as_deref().map(|p| compile_pattern(&spec.name, p)).transpose()?,
            subject: spec
                .subject
                .as_deref()
                .map(|p| compile_pattern(&spec.name, p))
                .transpose()?,
            category: spec.category,
            reason: spec.reason.clone(),
        })
    }

    pub fn from_pattern(&self) -> Option<&str> {
        self.from.as_ref().map(Regex::as_str)
    }

    pub fn subject_pattern(&self) -> Option<&str> {
        self.subject.as_ref().map(Regex::as_str)
    }

    /// A rule matches only if every pattern it specifies matches
    pub fn matches(&self, from: &str, subject: &str) -> bool {
        self.from.as_ref().map_or(true, |re| re.is_match(from))
            && self.subject.as_ref().map_or(true, |re| re.is_match(subject))
    }
}

fn compile_pattern(rule_name: &str, pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| {
            TriageError::ConfigError(format!("rule '{}' has an invalid pattern: {}", rule_name, e))
        })
}

/// Category and reason chosen by the deterministic stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub category: Category,
    pub reason: String,
}

/// Label table shipped as the default configuration
pub fn default_label_mappings() -> Vec<LabelMapping> {
    vec![
        LabelMapping::new("!Action", Category::Action),
        LabelMapping::new("!FYI", Category::Fyi),
        LabelMapping::new("!Skip", Category::Skip),
        LabelMapping::new("Newsletters", Category::Skip),
    ]
}

/// Rule list shipped as the default configuration
pub fn default_rule_specs() -> Vec<RuleSpec> {
    vec![
        RuleSpec::new(
            "vercel",
            Some(r"@vercel\.com$"),
            None,
            Category::Skip,
            "Vercel deployment notification",
        ),
        RuleSpec::new(
            "github",
            Some(r"^notifications@github\.com$"),
            None,
            Category::Fyi,
            "GitHub notification",
        ),
        RuleSpec::new(
            "signature-request",
            Some(r"@(docusign\.(net|com)|hellosign\.com|dropboxsign\.com)$"),
            None,
            Category::Action,
            "Signature request",
        ),
        RuleSpec::new(
            "calendar-response",
            None,
            Some(r"^(accepted|declined|tentatively accepted|updated invitation|invitation):"),
            Category::Fyi,
            "Calendar response",
        ),
        RuleSpec::new(
            "follow-up-sequence",
            None,
            Some(r"^(re:\s*)?(just\s+)?(following up|checking in|bumping this)"),
            Category::Skip,
            "Automated follow-up sequence",
        ),
        RuleSpec::new(
            "receipt",
            None,
            Some(r"\b(receipt|invoice|payment received|your order)\b"),
            Category::Fyi,
            "Receipt or invoice",
        ),
        RuleSpec::new(
            "linkedin",
            Some(r"@(e\.)?linkedin\.com$"),
            None,
            Category::Skip,
            "LinkedIn notification",
        ),
        RuleSpec::new(
            "newsletter-platform",
            Some(r"@(substack\.com|beehiiv\.com|mailchimpapp\.net|convertkit-mail\d*\.com)$"),
            None,
            Category::Skip,
            "Newsletter platform",
        ),
        RuleSpec::new(
            "scheduling",
            None,
            Some(r"\b(interview|schedule a call|your availability|time to chat)\b"),
            Category::Action,
            "Scheduling request",
        ),
    ]
}

static DEFAULT_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    default_rule_specs()
        .iter()
        .filter_map(|spec| Rule::compile(spec).ok())
        .collect()
});

/// Label-precedence, first-match-wins rule classifier
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    labels: Vec<LabelMapping>,
    rules: Vec<Rule>,
}

impl RuleClassifier {
    pub fn new(labels: Vec<LabelMapping>, rules: Vec<Rule>) -> Self {
        Self { labels, rules }
    }

    /// Build a classifier from configuration records, compiling every rule
    pub fn from_specs(labels: Vec<LabelMapping>, specs: &[RuleSpec]) -> Result<Self> {
        let rules = specs.iter().map(Rule::compile).collect::<Result<Vec<_>>>()?;
        Ok(Self::new(labels, rules))
    }

    pub fn label_mappings(&self) -> &[LabelMapping] {
        &self.labels
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Classify a message given its resolved label names.
    ///
    /// Label matches are trusted completely and short-circuit rule
    /// evaluation. `None` means the message stays unclassified.
    pub fn classify(&self, message: &EmailMessage, label_names: &[String]) -> Option<RuleMatch> {
        for name in label_names {
            if let Some(mapping) = self.labels.iter().find(|m| &m.label == name) {
                return Some(RuleMatch {
                    category: mapping.category,
                    reason: mapping.reason(),
                });
            }
        }

        self.rules
            .iter()
            .find(|rule| rule.matches(&message.from, &message.subject))
            .map(|rule| RuleMatch {
                category: rule.category,
                reason: rule.reason.clone(),
            })
    }

    /// Classify a still-unclassified message in place using its own labels.
    ///
    /// Returns true when the message was resolved by this stage.
    pub fn apply(&self, message: &mut EmailMessage) -> bool {
        if !message.is_unclassified() {
            return false;
        }
        match self.classify(message, &message.labels) {
            Some(found) => {
                debug!(
                    "Message {} classified as {} ({})",
                    message.id, found.category, found.reason
                );
                message.assign(found.category, found.reason);
                true
            }
            None => false,
        }
    }
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new(default_label_mappings(), DEFAULT_RULES.clone())
    }
}
