use crate::{FormulaError, FormulaResult};
use regex::Regex;
use serde::Deserialize;

/// Run options for the formula engine
///
/// All switches default to off; `max_run_time_ms` defaults to no limit.
/// Options deserialize from JSON with missing fields taking their defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FormulaOptions {
    /// Maximum wall-clock time for one run in milliseconds
    /// Checked cooperatively at every leaf evaluation.
    pub max_run_time_ms: Option<u64>,

    /// Only rules whose id matches this pattern are run
    pub run_ids: Option<String>,

    /// Log each variable set evaluation and its result
    pub trace_variable_set_expression_result: bool,

    /// Log the candidate count after each filter
    pub trace_variable_filter_winnowing: bool,

    /// Log the final candidates of each fact variable
    pub trace_variable_filters_result: bool,

    /// Log every computed variable value
    pub trace_variable_expression_result: bool,

    pub trace_satisfied_assertions: bool,
    pub trace_unsatisfied_assertions: bool,

    /// Log unsatisfied assertions that carry no unsatisfied message
    pub trace_unmessaged_unsatisfied_assertions: bool,

    /// Report an unsatisfied assertion as an error regardless of its severity
    pub error_unsatisfied_assertions: bool,

    /// Record per-rule evaluation time in the report
    pub timing: bool,
}

impl FormulaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from a JSON document
    pub fn from_json(json: &str) -> FormulaResult<Self> {
        serde_json::from_str(json).map_err(|e| FormulaError::InvalidOption(e.to_string()))
    }

    /// Compile the run-ID restriction, if any
    pub fn run_id_pattern(&self) -> FormulaResult<Option<Regex>> {
        match &self.run_ids {
            None => Ok(None),
            Some(pattern) => Regex::new(&format!("^(?:{})$", pattern))
                .map(Some)
                .map_err(|e| FormulaError::InvalidOption(format!("run_ids: {}", e))),
        }
    }

    /// True when any winnowing or result trace is on
    pub fn traces_filters(&self) -> bool {
        self.trace_variable_filter_winnowing || self.trace_variable_filters_result
    }
}
