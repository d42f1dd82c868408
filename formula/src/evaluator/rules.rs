//! Rule bodies
//!
//! Runs the body of a rule once per surviving evaluation: a value assertion
//! tests the evaluation, an existence assertion counts it, a formula
//! computes a value and writes an output fact, a tuple rule writes an output
//! tuple. The returned value is what variables-scope rules see.

use super::context::{BoundValue, EvaluationContext, RuleRun};
use super::expression::Item;
use super::messages;
use super::output::produce_output_fact;
use crate::error::ExpressionError;
use crate::model::{FactId, Value};
use crate::response::{Message, Severity};
use crate::semantic::{AssertionMessages, Rule, RuleKind, UnsatisfiedSeverity};
use crate::{FormulaError, FormulaResult};
use tracing::info;

/// Evaluate the body of `run.rule` with the current bindings
pub fn evaluate_body(
    ctx: &mut EvaluationContext<'_>,
    run: &mut RuleRun<'_>,
) -> FormulaResult<BoundValue> {
    let rule = run.rule;
    let in_rule = |e: ExpressionError| FormulaError::expression(rule.id.clone(), e);

    match &rule.kind {
        RuleKind::ValueAssertion(assertion) => {
            let satisfied = ctx
                .evaluate_boolean(&assertion.test, None)
                .map_err(in_rule)?;
            if ctx.options.trace_variable_set_expression_result {
                info!(
                    code = "formula:trace",
                    rule = %rule.id,
                    "value assertion {} result: {}",
                    assertion.test,
                    satisfied
                );
            }
            let facts = bound_facts(ctx);
            report_assertion(ctx, rule, &assertion.messages, satisfied, facts, None)
                .map_err(in_rule)?;
            Ok(result_value(vec![Value::Boolean(satisfied)], None))
        }
        RuleKind::ExistenceAssertion(_) => {
            run.existence_count += 1;
            Ok(result_value(vec![Value::Integer(run.existence_count as i64)], None))
        }
        RuleKind::Formula(formula) => {
            let value = ctx
                .evaluate_sequence(&formula.value, None)
                .map_err(in_rule)?;
            if ctx.options.trace_variable_set_expression_result {
                info!(
                    code = "formula:trace",
                    rule = %rule.id,
                    "formula {} result: {}",
                    formula.value,
                    render_values(&value)
                );
            }
            let fact = produce_output_fact(ctx, rule, Some(&value))?;
            record_produced(ctx, rule, fact);
            Ok(result_value(value, fact))
        }
        RuleKind::Tuple(_) => {
            let fact = produce_output_fact(ctx, rule, None)?;
            record_produced(ctx, rule, fact);
            let value = fact.map(Value::Fact).into_iter().collect();
            Ok(result_value(value, fact))
        }
    }
}

/// Judge an existence assertion once its search is complete
pub fn judge_existence(ctx: &mut EvaluationContext<'_>, run: &RuleRun<'_>) -> FormulaResult<()> {
    let rule = run.rule;
    let RuleKind::ExistenceAssertion(assertion) = &rule.kind else {
        return Ok(());
    };
    let count = run.existence_count;
    let satisfied = match &assertion.test {
        Some(test) => ctx
            .evaluate_boolean(test, Some(Item::Count(count)))
            .map_err(|e| FormulaError::expression(&rule.id, e))?,
        None => count > 0,
    };
    if ctx.options.trace_variable_set_expression_result {
        info!(
            code = "formula:trace",
            rule = %rule.id,
            "existence assertion over {} evaluations result: {}",
            count,
            satisfied
        );
    }
    report_assertion(
        ctx,
        rule,
        &assertion.messages,
        satisfied,
        Vec::new(),
        Some(Item::Count(count)),
    )
    .map_err(|e| FormulaError::expression(&rule.id, e))
}

fn result_value(value: Vec<Value>, fact: Option<FactId>) -> BoundValue {
    BoundValue::RuleResult { value, fact }
}

fn record_produced(ctx: &mut EvaluationContext<'_>, rule: &Rule, fact: Option<FactId>) {
    if let Some(fact) = fact {
        ctx.stats_mut(rule).facts_produced += 1;
        ctx.produced.entry(rule.id.clone()).or_default().push(fact);
    }
}

/// Facts of the current non-fallback fact bindings
fn bound_facts(ctx: &EvaluationContext<'_>) -> Vec<FactId> {
    ctx.bindings
        .iter()
        .filter(|b| b.is_fact_variable() && !b.is_fallback())
        .flat_map(|b| b.yielded_facts())
        .collect()
}

fn render_values(values: &[Value]) -> String {
    let items: Vec<String> = values.iter().map(Value::to_string).collect();
    format!("({})", items.join(", "))
}

/// Count an assertion outcome and report its messages.
fn report_assertion(
    ctx: &mut EvaluationContext<'_>,
    rule: &Rule,
    messages: &AssertionMessages,
    satisfied: bool,
    facts: Vec<FactId>,
    item: Option<Item<'_>>,
) -> Result<(), ExpressionError> {
    let unsatisfied = messages.unsatisfied_severity;
    {
        let stats = ctx.stats_mut(rule);
        if satisfied {
            stats.satisfied += 1;
        } else {
            stats.not_satisfied += 1;
            match unsatisfied {
                UnsatisfiedSeverity::Ok => stats.ok += 1,
                UnsatisfiedSeverity::Warning => stats.warning += 1,
                UnsatisfiedSeverity::Error => stats.error += 1,
            }
        }
    }

    let template = if satisfied {
        messages.satisfied.as_ref()
    } else {
        messages.unsatisfied.as_ref()
    };
    let options = ctx.options;
    let unmessaged = template.is_none()
        && !satisfied
        && options.trace_unmessaged_unsatisfied_assertions
        && unsatisfied != UnsatisfiedSeverity::Ok;
    let traced = if satisfied {
        options.trace_satisfied_assertions
    } else {
        options.trace_unsatisfied_assertions || options.error_unsatisfied_assertions
    };

    if unmessaged || traced {
        let severity = if satisfied {
            Severity::Info
        } else if options.trace_unmessaged_unsatisfied_assertions {
            severity_of(unsatisfied)
        } else if options.error_unsatisfied_assertions {
            Severity::Error
        } else {
            Severity::Info
        };
        let code = if satisfied {
            "formula:assertionSatisfied"
        } else {
            "formula:assertionUnsatisfied"
        };
        let text = describe_bindings(ctx, rule);
        ctx.emit(Message::new(severity, code, text, &rule.id).with_facts(facts.clone()));
    }

    if let Some(template) = template {
        let text = messages::render(ctx, template, item)?;
        let severity = if satisfied {
            Severity::Info
        } else {
            severity_of(unsatisfied)
        };
        ctx.emit(
            Message::new(severity, format!("message:{}", rule.id), text, &rule.id)
                .with_facts(facts),
        );
    }
    Ok(())
}

fn severity_of(severity: UnsatisfiedSeverity) -> Severity {
    match severity {
        UnsatisfiedSeverity::Ok => Severity::Info,
        UnsatisfiedSeverity::Warning => Severity::Warning,
        UnsatisfiedSeverity::Error => Severity::Error,
    }
}

/// Rule label followed by one line per binding
fn describe_bindings(ctx: &EvaluationContext<'_>, rule: &Rule) -> String {
    let mut bindings: Vec<_> = ctx.bindings.iter().filter(|b| b.is_fact_variable()).collect();
    bindings.sort_by(|a, b| a.name.cmp(&b.name));

    let mut text = rule.to_string();
    for binding in bindings {
        match (&binding.value, binding.yielded_fact()) {
            (BoundValue::Fallback(value), _) => {
                text.push_str(&format!("\n${}: fallback {}", binding.name, render_values(value)))
            }
            (_, Some(fact)) => {
                if let Some(f) = ctx.repository.fact(fact) {
                    match ctx.repository.fact_context(fact) {
                        Some(context) => text.push_str(&format!(
                            "\n${}: {} context {}",
                            binding.name, f.concept, context.id
                        )),
                        None => text.push_str(&format!("\n${}: {}", binding.name, f.concept)),
                    }
                }
            }
            _ => {}
        }
    }
    text
}
