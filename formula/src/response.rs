use crate::model::FactId;
use serde::Serialize;
use std::fmt;

/// Report of one formula run
///
/// Contains the results of every rule that ran, the messages produced,
/// and the facts written to output instances.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub results: Vec<RuleResult>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub cancelled: bool,
}

impl RunReport {
    pub fn add_result(&mut self, result: RuleResult) {
        self.results.push(result);
    }

    pub fn result(&self, rule_id: &str) -> Option<&RuleResult> {
        self.results.iter().find(|r| r.rule == rule_id)
    }

    /// Facts produced across all rules
    pub fn produced_facts(&self) -> impl Iterator<Item = &FactId> {
        self.results.iter().flat_map(|r| r.produced.iter())
    }

    pub fn messages_with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a Message> {
        self.messages.iter().filter(move |m| m.code == code)
    }

    /// Total unsatisfied assertion evaluations of error severity
    pub fn error_count(&self) -> usize {
        self.results.iter().map(|r| r.stats.error).sum()
    }
}

/// How a rule run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleOutcome {
    Completed,
    /// An expression error aborted the rule
    Aborted { code: String, message: String },
    Cancelled,
}

/// Result of running a single rule
#[derive(Debug, Clone, Serialize)]
pub struct RuleResult {
    pub rule: String,
    pub kind: &'static str,
    pub outcome: RuleOutcome,
    pub stats: RuleStats,
    /// Facts written to the output instance
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub produced: Vec<FactId>,
}

/// Evaluation counters of a rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    /// Evaluations that reached the rule body
    pub evaluations: usize,
    /// Evaluations dropped as duplicates or with every variable fallen back
    pub skipped: usize,
    /// Evaluations blocked by a precondition
    pub blocked: usize,
    pub satisfied: usize,
    pub not_satisfied: usize,
    /// Unsatisfied evaluations by severity
    pub ok: usize,
    pub warning: usize,
    pub error: usize,
    pub facts_produced: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub elapsed_ms: Option<u64>,
}

impl RuleStats {
    /// Accumulate counters of another invocation of the same rule
    pub fn merge(&mut self, other: &RuleStats) {
        self.evaluations += other.evaluations;
        self.skipped += other.skipped;
        self.blocked += other.blocked;
        self.satisfied += other.satisfied;
        self.not_satisfied += other.not_satisfied;
        self.ok += other.ok;
        self.warning += other.warning;
        self.error += other.error;
        self.facts_produced += other.facts_produced;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A message reported during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub severity: Severity,
    pub code: String,
    pub text: String,
    /// Id of the rule that produced the message
    pub rule: String,
    /// Facts the message refers to
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub facts: Vec<FactId>,
}

impl Message {
    pub fn new(
        severity: Severity,
        code: impl Into<String>,
        text: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            code: code.into(),
            text: text.into(),
            rule: rule.into(),
            facts: Vec::new(),
        }
    }

    pub fn with_facts(mut self, facts: Vec<FactId>) -> Self {
        self.facts = facts;
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({}): {}", self.severity, self.code, self.rule, self.text)
    }
}

/// Receives messages as they are reported
pub trait MessageSink {
    fn report(&mut self, message: &Message);
}

impl MessageSink for Vec<Message> {
    fn report(&mut self, message: &Message) {
        self.push(message.clone());
    }
}
