use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GmailError, Result};
use crate::matcher::{validate_patterns, MessageField};

/// A message observed in the inbox by a discovery pass
///
/// Missing header fields deserialize as empty strings so matching never has to
/// deal with absent values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Message {
    /// Text used for body matching: the body, or the snippet when the body is
    /// absent or empty
    pub fn body_text(&self) -> &str {
        match self.body.as_deref() {
            Some(body) if !body.is_empty() => body,
            _ => self.snippet.as_deref().unwrap_or(""),
        }
    }
}

/// Per-rule match bookkeeping, written only by the batch processor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStats {
    #[serde(default)]
    pub count: u64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_matched: Option<DateTime<Utc>>,
}

/// Mailbox mutations applied when a rule matches
///
/// Every field has an explicit default; an absent field is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionSet {
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
    pub mark_as_read: bool,
    pub mark_as_important: bool,
    pub star: bool,
    pub archive: bool,
    pub trash: bool,
}

impl ActionSet {
    pub fn is_empty(&self) -> bool {
        self.add_labels.is_empty()
            && self.remove_labels.is_empty()
            && !self.mark_as_read
            && !self.mark_as_important
            && !self.star
            && !self.archive
            && !self.trash
    }

    /// Human readable one-line summary, e.g. `Add:Work,GitHub; star; archive`
    pub fn summary(&self) -> String {
        let mut out = Vec::new();
        if !self.add_labels.is_empty() {
            out.push(format!("Add:{}", self.add_labels.join(",")));
        }
        if !self.remove_labels.is_empty() {
            out.push(format!("Remove:{}", self.remove_labels.join(",")));
        }
        for (flag, name) in [
            (self.mark_as_read, "markAsRead"),
            (self.mark_as_important, "markAsImportant"),
            (self.star, "star"),
            (self.archive, "archive"),
            (self.trash, "trash"),
        ] {
            if flag {
                out.push(name.to_string());
            }
        }
        out.join("; ")
    }
}

/// User-defined pattern + action configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_pattern: Option<String>,
    #[serde(default)]
    pub actions: ActionSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RuleStats>,
}

impl Rule {
    /// Record one match at `now`
    pub fn record_match(&mut self, now: DateTime<Utc>) {
        let stats = self.stats.get_or_insert_with(RuleStats::default);
        stats.count += 1;
        stats.last_matched = Some(now);
    }

    pub fn match_count(&self) -> u64 {
        self.stats.as_ref().map(|s| s.count).unwrap_or(0)
    }

    /// True when at least one pattern is set to a non-empty string
    pub fn has_patterns(&self) -> bool {
        MessageField::ALL.iter().any(|f| f.pattern(self).is_some())
    }

    /// Check that the rule is usable: named, with at least one pattern, and
    /// every pattern compiling
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GmailError::InvalidInput("Rule name is required".to_string()));
        }
        if !self.has_patterns() {
            return Err(GmailError::InvalidInput(format!(
                "Rule '{}' needs at least one pattern",
                self.name
            )));
        }
        validate_patterns(self)
    }
}

/// One recorded summary of a batch's matching/processing statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfEntry {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub emails: usize,
    pub rules: usize,
    pub match_checks: usize,
    pub rule_matches: usize,
    pub processed_count: usize,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!(
                "invalid log level '{}', expected error, warn, info or debug",
                other
            )),
        }
    }
}

pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const DEFAULT_PERF_RETENTION: usize = 50;
pub const MIN_PERF_RETENTION: usize = 5;
pub const MAX_PERF_RETENTION: usize = 500;

/// Process-wide runtime settings, persisted under the `settings` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_interval_minutes: Option<u32>,
    /// Legacy name for the interval, read when the new field is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_interval: Option<u32>,
    #[serde(default = "default_perf_retention")]
    pub perf_retention_limit: usize,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_checked: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

fn default_perf_retention() -> usize {
    DEFAULT_PERF_RETENTION
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            processing_interval_minutes: Some(MIN_INTERVAL_MINUTES),
            check_interval: None,
            perf_retention_limit: DEFAULT_PERF_RETENTION,
            log_level: LogLevel::Info,
            last_checked: None,
        }
    }
}

impl Settings {
    /// Effective timer interval in minutes, never below 1
    pub fn interval_minutes(&self) -> u32 {
        let configured = self
            .processing_interval_minutes
            .filter(|m| *m > 0)
            .or(self.check_interval.filter(|m| *m > 0))
            .unwrap_or(MIN_INTERVAL_MINUTES);
        clamp_interval(configured)
    }

    /// Retention cap clamped to [5, 500]
    pub fn retention_limit(&self) -> usize {
        clamp_retention(self.perf_retention_limit)
    }
}

pub fn clamp_interval(minutes: u32) -> u32 {
    minutes.max(MIN_INTERVAL_MINUTES)
}

pub fn clamp_retention(limit: usize) -> usize {
    limit.clamp(MIN_PERF_RETENTION, MAX_PERF_RETENTION)
}

/// Result of one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub processed: usize,
    pub duration_ms: f64,
    pub match_checks: usize,
    pub rule_matches: usize,
    /// Messages in the batch
    pub emails: usize,
    /// Rules loaded for the batch, enabled or not
    pub rules: usize,
}
