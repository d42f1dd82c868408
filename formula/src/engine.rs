use crate::ast::QName;
use crate::evaluator::context::EvaluationContext;
use crate::evaluator::expression::ExpressionEvaluator;
use crate::evaluator::timeout::{CancellationToken, RunClock};
use crate::evaluator::evaluate_rule;
use crate::model::{InstanceId, ModelRepository, Sequence};
use crate::resolver::order_variables;
use crate::response::{Message, MessageSink, RuleOutcome, RuleResult, RunReport, Severity};
use crate::semantic::Rule;
use crate::{FormulaError, FormulaOptions, FormulaResult};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// The formula evaluation engine.
///
/// Holds the rules of a formula linkbase, the parameter values and the run
/// options. Each call to [`Engine::run`] evaluates every top-level rule
/// against a source instance and writes output facts through the
/// repository.
#[derive(Debug, Default)]
pub struct Engine {
    rules: Vec<Arc<Rule>>,
    parameters: BTreeMap<QName, Sequence>,
    options: FormulaOptions,
    token: CancellationToken,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with custom run options
    pub fn with_options(options: FormulaOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &FormulaOptions {
        &self.options
    }

    /// Add a rule, ordering its variables by dependency
    pub fn add_rule(&mut self, mut rule: Rule) -> FormulaResult<()> {
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(FormulaError::Engine(format!("duplicate rule id {}", rule.id)));
        }
        rule.variables = order_variables(std::mem::take(&mut rule.variables))?;
        self.rules.push(Arc::new(rule));
        Ok(())
    }

    pub fn remove_rule(&mut self, id: &str) {
        self.rules.retain(|r| r.id != id);
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    /// Set the value of a parameter, visible to every rule
    pub fn set_parameter(&mut self, name: QName, value: Sequence) {
        self.parameters.insert(name, value);
    }

    /// Token cancelling the current or next run from any thread
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run every rule against `source`
    pub fn run(
        &self,
        repository: &mut dyn ModelRepository,
        evaluator: &dyn ExpressionEvaluator,
        source: InstanceId,
    ) -> FormulaResult<RunReport> {
        let mut messages = Vec::new();
        self.run_with_sink(repository, evaluator, source, &mut messages)
    }

    /// Run every rule against `source`, reporting messages to `sink` as
    /// each rule completes
    pub fn run_with_sink(
        &self,
        repository: &mut dyn ModelRepository,
        evaluator: &dyn ExpressionEvaluator,
        source: InstanceId,
        sink: &mut dyn MessageSink,
    ) -> FormulaResult<RunReport> {
        if repository.instance(source).is_none() {
            return Err(FormulaError::UnknownInstance(source.to_string()));
        }
        let pattern = self.options.run_id_pattern()?;
        let clock = RunClock::new(&self.options, self.token.clone());
        let mut ctx = EvaluationContext::new(repository, evaluator, &self.options, &clock, source);
        for (name, value) in &self.parameters {
            ctx.scope.insert(name.clone(), value.clone());
        }

        let scoped = self.scoped_rule_ids();
        let mut report = RunReport::default();

        for rule in &self.rules {
            if scoped.contains(rule.id.as_str()) {
                continue;
            }
            if let Some(pattern) = &pattern {
                if !pattern.is_match(&rule.id) {
                    debug!(rule = %rule.id, "rule not selected by run ids");
                    continue;
                }
            }

            let started = Instant::now();
            let outcome = match evaluate_rule(&mut ctx, rule) {
                Ok(()) => RuleOutcome::Completed,
                Err(FormulaError::Cancelled) => {
                    info!(code = "formula:cancelled", rule = %rule.id, "formula run cancelled");
                    report.cancelled = true;
                    RuleOutcome::Cancelled
                }
                Err(e) => {
                    error!(rule = %rule.id, "{}", e);
                    ctx.emit(Message::new(Severity::Error, e.code(), e.to_string(), &rule.id));
                    RuleOutcome::Aborted {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    }
                }
            };
            let elapsed_ms = self
                .options
                .timing
                .then(|| started.elapsed().as_millis() as u64);

            let mut result = rule_result(&mut ctx, rule, outcome);
            result.stats.elapsed_ms = elapsed_ms;
            log_counts(&result);
            report.add_result(result);
            for dependent in scoped_descendants(rule) {
                let outcome = match ctx.scoped_failures.remove(&dependent.id) {
                    Some(failure) => failure,
                    None if result_cancelled(&report, &rule.id) => RuleOutcome::Cancelled,
                    None => RuleOutcome::Completed,
                };
                let result = rule_result(&mut ctx, &dependent, outcome);
                log_counts(&result);
                report.add_result(result);
            }

            for message in ctx.messages.drain(..) {
                sink.report(&message);
                report.messages.push(message);
            }
        }

        Ok(report)
    }

    /// Ids of rules reached through a variables-scope arc; they run only
    /// from their parent
    fn scoped_rule_ids(&self) -> HashSet<&str> {
        let mut ids = HashSet::new();
        let mut pending: Vec<&Rule> = self.rules.iter().map(|r| r.as_ref()).collect();
        while let Some(rule) = pending.pop() {
            for scoped in &rule.scoped_rules {
                if ids.insert(scoped.rule.id.as_str()) {
                    pending.push(&scoped.rule);
                }
            }
        }
        ids
    }
}

fn rule_result(ctx: &mut EvaluationContext<'_>, rule: &Rule, outcome: RuleOutcome) -> RuleResult {
    RuleResult {
        rule: rule.id.clone(),
        kind: rule.kind_name(),
        outcome,
        stats: ctx.stats.remove(&rule.id).unwrap_or_default(),
        produced: ctx.produced.remove(&rule.id).unwrap_or_default(),
    }
}

fn result_cancelled(report: &RunReport, rule_id: &str) -> bool {
    report
        .result(rule_id)
        .is_some_and(|r| r.outcome == RuleOutcome::Cancelled)
}

/// Rules chained below `rule`, each once, parents first
fn scoped_descendants(rule: &Rule) -> Vec<Arc<Rule>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut pending: Vec<&Arc<Rule>> = rule.scoped_rules.iter().map(|s| &s.rule).collect();
    pending.reverse();
    while let Some(next) = pending.pop() {
        if seen.insert(next.id.clone()) {
            order.push(Arc::clone(next));
            pending.extend(next.scoped_rules.iter().rev().map(|s| &s.rule));
        }
    }
    order
}

fn log_counts(result: &RuleResult) {
    let stats = &result.stats;
    if result.kind == "formula" || result.kind == "tuple" {
        debug!(
            rule = %result.rule,
            evaluations = stats.evaluations,
            skipped = stats.skipped,
            produced = stats.facts_produced,
            "rule finished"
        );
    } else {
        info!(
            code = "formula:assertionResults",
            rule = %result.rule,
            satisfied = stats.satisfied,
            not_satisfied = stats.not_satisfied,
            ok = stats.ok,
            warning = stats.warning,
            error = stats.error,
            "assertion results"
        );
    }
}
