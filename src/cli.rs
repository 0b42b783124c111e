//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GmailError, Result};
use crate::logging::LogFormat;
use crate::matcher;
use crate::models::{Message, PerfEntry, Rule, Settings};
use crate::stats::StatsTotals;

#[derive(Parser, Debug)]
#[command(name = "gmail-rules")]
#[command(version)]
#[command(about = "Regex rules engine for a Gmail inbox", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Storage directory, overrides `[storage] dir`
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Static bearer token; skips the OAuth flow
    #[arg(long, env = "GMAIL_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Start the scheduler; ctrl-c stops it
    Run {
        /// Perform a single discovery and processing pass, then exit
        #[arg(long)]
        once: bool,
    },

    /// Process the messages in a JSON file with the stored rules
    Process {
        /// JSON file holding a message or an array of messages
        #[arg(short, long)]
        messages: PathBuf,
    },

    /// Evaluate rules against sample messages without touching Gmail
    TestRules {
        /// JSON file holding an array of rules
        #[arg(long)]
        rules: PathBuf,

        /// JSON file holding an array of messages
        #[arg(long, conflicts_with = "email", required_unless_present = "email")]
        emails: Option<PathBuf>,

        /// Single inline message JSON
        #[arg(long)]
        email: Option<String>,

        /// One line per match instead of JSON
        #[arg(long)]
        compact: bool,
    },

    /// Check a single pattern against a sample value
    TestPattern {
        pattern: String,
        sample: String,
    },

    /// Change the processing interval in minutes (at least 1)
    Reschedule { minutes: u32 },

    /// Handle one JSON request, read from stdin when omitted, and print the
    /// JSON response
    Request { json: Option<String> },

    /// Manage stored rules
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },

    /// Show recorded batch statistics
    Stats {
        /// Number of most recent entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show or change runtime settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
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
}

#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    /// List rules with their match statistics
    List,
    /// Append rules from a JSON file
    Import { file: PathBuf },
    /// Write rules as JSON to a file, or stdout
    Export { file: Option<PathBuf> },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Show,
    Set {
        /// Turn scheduled processing on or off
        #[arg(long)]
        enabled: Option<bool>,

        /// Performance entries to keep (5-500)
        #[arg(long)]
        retention: Option<usize>,

        /// error, warn, info or debug
        #[arg(long)]
        log_level: Option<crate::models::LogLevel>,
    },
}

/// Truncate a string to max_len characters, adding "..." if truncated
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// Steady-ticking spinner for long remote calls
pub fn spinner(msg: &str) -> ProgressBar {
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed:>6}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");
    let pb = ProgressBar::new_spinner();
    pb.set_style(style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// One rule that matched a sample message
#[derive(Debug, Clone, Serialize)]
pub struct OfflineMatch {
    pub rule: Value,
    pub actions: String,
}

/// Matching rules for one sample message
#[derive(Debug, Clone, Serialize)]
pub struct OfflineResult {
    pub email: Message,
    pub matched: Vec<OfflineMatch>,
}

impl OfflineResult {
    fn label(&self) -> String {
        let id = [&self.email.subject, &self.email.from]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("email");
        id.chars().take(60).collect()
    }
}

/// Rule records are taken as raw JSON: a rule without `enabled` counts as
/// enabled here, and a record without `id` is still evaluated
fn offline_rule(value: &Value) -> Option<Rule> {
    let object = value.as_object()?;
    if object.get("enabled").and_then(Value::as_bool) == Some(false) {
        return None;
    }
    let mut object = object.clone();
    object
        .entry("id")
        .or_insert_with(|| Value::String(String::new()));
    object.insert("enabled".to_string(), Value::Bool(true));
    // Records that do not fit the rule layout never match
    serde_json::from_value(Value::Object(object)).ok()
}

/// Evaluate every sample message against every rule, offline
pub fn evaluate_offline(rules: &[Value], messages: &[Message]) -> Vec<OfflineResult> {
    let parsed: Vec<(&Value, Rule)> = rules
        .iter()
        .filter_map(|value| offline_rule(value).map(|rule| (value, rule)))
        .collect();

    messages
        .iter()
        .map(|message| OfflineResult {
            email: message.clone(),
            matched: parsed
                .iter()
                .filter(|(_, rule)| matcher::matches(message, rule))
                .map(|(value, rule)| OfflineMatch {
                    rule: (*value).clone(),
                    actions: rule.actions.summary(),
                })
                .collect(),
        })
        .collect()
}

/// Parse the `--rules` file content, which must be a JSON array
pub fn parse_rule_values(json: &str) -> Result<Vec<Value>> {
    match serde_json::from_str(json)? {
        Value::Array(values) => Ok(values),
        _ => Err(GmailError::InvalidInput(
            "Rules file must contain an array".to_string(),
        )),
    }
}

pub fn render_offline_compact(results: &[OfflineResult]) -> String {
    let mut out = String::new();
    for result in results {
        out.push_str(&format!("Email: {}\n", result.label()));
        if result.matched.is_empty() {
            out.push_str("  (no matches)\n");
        }
        for m in &result.matched {
            let name = m.rule.get("name").and_then(Value::as_str).unwrap_or("");
            out.push_str(&format!("  - {}: {}\n", name, m.actions));
        }
    }
    out
}

pub fn offline_footer(results: &[OfflineResult]) -> String {
    let total: usize = results.iter().map(|r| r.matched.len()).sum();
    format!(
        "Processed {} email(s); {} total rule matches.",
        results.len(),
        total
    )
}

fn format_time(timestamp: Option<chrono::DateTime<chrono::Utc>>) -> String {
    timestamp
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

pub fn render_rules(rules: &[Rule]) -> String {
    if rules.is_empty() {
        return "No rules stored.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<3} {:<28} {:<38} {:>7}  {:<19}  {}\n",
        "On", "Name", "Id", "Matches", "Last matched", "Actions"
    ));
    out.push_str(&format!("{}\n", "-".repeat(110)));
    for rule in rules {
        let status = if rule.enabled { "✓" } else { "-" };
        let last = rule.stats.as_ref().and_then(|s| s.last_matched);
        out.push_str(&format!(
            "{:<3} {:<28} {:<38} {:>7}  {:<19}  {}\n",
            status,
            truncate_string(&rule.name, 28),
            truncate_string(&rule.id, 38),
            rule.match_count(),
            format_time(last),
            rule.actions.summary()
        ));
    }
    out
}

/// Most recent `limit` entries, newest first, followed by totals over all
pub fn render_stats(entries: &[PerfEntry], limit: usize) -> String {
    if entries.is_empty() {
        return "No performance entries recorded yet.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<19}  {:>6} {:>6} {:>7} {:>7} {:>9} {:>12}\n",
        "Time", "Emails", "Rules", "Checks", "Matches", "Processed", "Duration ms"
    ));
    out.push_str(&format!("{}\n", "-".repeat(74)));
    for entry in entries.iter().rev().take(limit) {
        out.push_str(&format!(
            "{:<19}  {:>6} {:>6} {:>7} {:>7} {:>9} {:>12.2}\n",
            format_time(Some(entry.timestamp)),
            entry.emails,
            entry.rules,
            entry.match_checks,
            entry.rule_matches,
            entry.processed_count,
            entry.duration_ms
        ));
    }

    let totals = StatsTotals::from_entries(entries);
    out.push_str(&format!("{}\n", "-".repeat(74)));
    out.push_str(&format!(
        "{} run(s): {} email(s), {} check(s), {} match(es), {} processed, avg {:.2} ms\n",
        totals.runs,
        totals.emails,
        totals.match_checks,
        totals.rule_matches,
        totals.processed,
        totals.avg_duration_ms
    ));
    out
}

pub fn render_settings(settings: &Settings) -> String {
    let mut out = String::new();
    out.push_str(&format!("Enabled:            {}\n", settings.enabled));
    out.push_str(&format!(
        "Interval:           {} minute(s)\n",
        settings.interval_minutes()
    ));
    out.push_str(&format!(
        "Perf retention:     {} entries\n",
        settings.retention_limit()
    ));
    out.push_str(&format!("Log level:          {}\n", settings.log_level.as_str()));
    out.push_str(&format!(
        "Last checked:       {}\n",
        format_time(settings.last_checked)
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::create_perf_entry;
    use crate::models::RunSummary;
    use serde_json::json;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from([
            "gmail-rules",
            "--log-format",
            "json",
            "test-rules",
            "--rules",
            "rules.json",
            "--email",
            r#"{"from":"a@b.com"}"#,
            "--compact",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::TestRules { compact: true, .. }));

        // --emails and --email are exclusive, one is required
        assert!(Cli::try_parse_from(["gmail-rules", "test-rules", "--rules", "r.json"]).is_err());
    }

    #[test]
    fn test_offline_skips_explicitly_disabled_only() {
        let rules = vec![
            json!({"name": "Invoices", "subjectPattern": "invoice", "actions": {"addLabels": ["Bills"], "archive": true}}),
            json!({"name": "Off", "enabled": false, "subjectPattern": ".*"}),
            json!({"name": "Broken", "subjectPattern": "(unclosed"}),
            json!("not a rule"),
        ];
        let messages = vec![
            Message {
                id: "1".to_string(),
                from: "billing@acme.com".to_string(),
                subject: "Invoice 123".to_string(),
                ..Default::default()
            },
            Message {
                from: "friend@example.com".to_string(),
                ..Default::default()
            },
        ];

        let results = evaluate_offline(&rules, &messages);
        assert_eq!(results[0].matched.len(), 1);
        assert_eq!(results[0].matched[0].actions, "Add:Bills; archive");
        assert!(results[1].matched.is_empty());

        let compact = render_offline_compact(&results);
        assert!(compact.contains("Email: Invoice 123\n  - Invoices: Add:Bills; archive\n"));
        assert!(compact.contains("Email: friend@example.com\n  (no matches)\n"));
        assert_eq!(
            offline_footer(&results),
            "Processed 2 email(s); 1 total rule matches."
        );
    }

    #[test]
    fn test_parse_rule_values_requires_array() {
        assert_eq!(parse_rule_values("[{}]").unwrap().len(), 1);
        assert!(matches!(
            parse_rule_values("{}"),
            Err(GmailError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("a very long rule name", 10), "a very ...");
    }

    #[test]
    fn test_render_stats_newest_first_with_totals() {
        let entries: Vec<PerfEntry> = (1..=3)
            .map(|n| {
                create_perf_entry(&RunSummary {
                    processed: n,
                    duration_ms: 10.0 * n as f64,
                    emails: n,
                    ..Default::default()
                })
            })
            .collect();
        let out = render_stats(&entries, 2);
        assert_eq!(out.lines().count(), 2 + 2 + 2);
        assert!(out.contains("3 run(s): 6 email(s)"));
        assert!(out.contains("avg 20.00 ms"));
        assert_eq!(render_stats(&[], 5), "No performance entries recorded yet.\n");
    }

    #[test]
    fn test_render_rules() {
        let mut rule = Rule {
            id: "r1".to_string(),
            name: "GitHub".to_string(),
            enabled: true,
            ..Default::default()
        };
        rule.actions.star = true;
        rule.record_match(chrono::Utc::now());
        let out = render_rules(&[rule]);
        assert!(out.contains("GitHub"));
        assert!(out.contains("star"));
        assert_eq!(render_rules(&[]), "No rules stored.\n");
    }

    #[test]
    fn test_render_settings() {
        let out = render_settings(&Settings::default());
        assert!(out.contains("1 minute(s)"));
        assert!(out.contains("50 entries"));
        assert!(out.contains("never"));
    }
}
