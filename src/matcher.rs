//! Rule pattern matching
//!
//! Each of the four optional rule patterns is compiled as a case-insensitive
//! regular expression and searched (not anchored) in the corresponding message
//! field. All defined patterns must match. Empty patterns are treated as not
//! provided, and a rule that fails to compile never matches.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::{GmailError, Result};
use crate::models::{Message, Rule};

/// Message field a pattern is tested against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageField {
    From,
    To,
    Subject,
    Body,
}

impl MessageField {
    pub const ALL: [MessageField; 4] = [
        MessageField::From,
        MessageField::To,
        MessageField::Subject,
        MessageField::Body,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MessageField::From => "from",
            MessageField::To => "to",
            MessageField::Subject => "subject",
            MessageField::Body => "body",
        }
    }

    /// The rule's pattern for this field, `None` when unset or empty
    pub fn pattern<'r>(&self, rule: &'r Rule) -> Option<&'r str> {
        let pattern = match self {
            MessageField::From => rule.from_pattern.as_deref(),
            MessageField::To => rule.to_pattern.as_deref(),
            MessageField::Subject => rule.subject_pattern.as_deref(),
            MessageField::Body => rule.body_pattern.as_deref(),
        };
        pattern.filter(|p| !p.is_empty())
    }

    pub fn value<'m>(&self, message: &'m Message) -> &'m str {
        match self {
            MessageField::From => &message.from,
            MessageField::To => &message.to,
            MessageField::Subject => &message.subject,
            MessageField::Body => message.body_text(),
        }
    }
}

/// Compile one pattern the way rules are matched: case-insensitive, unanchored
pub fn compile_pattern(field: MessageField, pattern: &str) -> Result<Regex> {
    build_regex(pattern).map_err(|e| GmailError::InvalidPattern {
            field: field.name(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn build_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// A rule with its patterns compiled once, reusable across many messages
#[derive(Debug, Clone)]
pub struct CompiledRule {
    patterns: Vec<(MessageField, Regex)>,
}

impl CompiledRule {
    /// Compile every non-empty pattern of `rule`
    pub fn compile(rule: &Rule) -> Result<Self> {
        let mut patterns = Vec::with_capacity(4);
        for field in MessageField::ALL {
            if let Some(pattern) = field.pattern(rule) {
                patterns.push((field, compile_pattern(field, pattern)?));
            }
        }
        Ok(Self { patterns })
    }

    /// True when every compiled pattern finds a match in its field
    pub fn is_match(&self, message: &Message) -> bool {
        self.patterns
            .iter()
            .all(|(field, re)| re.is_match(field.value(message)))
    }

    /// Number of patterns the rule defines
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

/// Decide whether `message` matches `rule`
///
/// Never fails: a malformed pattern yields `false`.
pub fn matches(message: &Message, rule: &Rule) -> bool {
    match CompiledRule::compile(rule) {
        Ok(compiled) => compiled.is_match(message),
        Err(e) => {
            debug!(rule_id = %rule.id, "Rule treated as non-matching: {}", e);
            false
        }
    }
}

/// Outcome of evaluating a single pattern against a sample string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternEvaluation {
    /// No pattern given
    Empty,
    /// Pattern does not compile
    Error(String),
    Match,
    NoMatch,
}

impl PatternEvaluation {
    pub fn symbol(&self) -> &'static str {
        match self {
            PatternEvaluation::Empty => "—",
            PatternEvaluation::Error(_) => "!",
            PatternEvaluation::Match => "✔",
            PatternEvaluation::NoMatch => "✖",
        }
    }
}

/// Evaluate one pattern against a sample, as a rule editor preview would
pub fn evaluate_pattern(pattern: Option<&str>, sample: Option<&str>) -> PatternEvaluation {
    let pattern = match pattern {
        Some(p) if !p.is_empty() => p,
        _ => return PatternEvaluation::Empty,
    };

    let re = match build_regex(pattern) {
        Ok(re) => re,
        Err(e) => return PatternEvaluation::Error(e.to_string()),
    };

    match sample {
        Some(s) if !s.is_empty() && re.is_match(s) => PatternEvaluation::Match,
        _ => PatternEvaluation::NoMatch,
    }
}

/// Check that every non-empty pattern of `rule` compiles
pub fn validate_patterns(rule: &Rule) -> Result<()> {
    CompiledRule::compile(rule).map(|_| ())
}
