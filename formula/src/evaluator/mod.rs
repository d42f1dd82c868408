//! Evaluation engine internals
//!
//! A rule is evaluated by a depth-first search over its variables:
//! 1. Resolve the candidates of the next declaration against the bindings made so far
//! 2. For each candidate, bind it under a scope guard and recurse
//! 3. At the leaf, drop redundant evaluations, check preconditions and run the body
//! 4. Run the rules chained through variables-scope arcs with the result in scope

pub mod binding;
pub mod context;
pub mod dedup;
pub mod equality;
pub mod expression;
pub mod filter;
pub mod implicit;
pub mod lexical;
pub mod messages;
pub mod output;
pub mod rules;
pub mod scope;
pub mod timeout;

use crate::aspect::Aspect;
use crate::model::FactId;
use crate::response::{Message, RuleOutcome, Severity};
use crate::semantic::Rule;
use crate::{FormulaError, FormulaResult};
use context::{BindingKind, BoundValue, BoundVariable, EvaluationContext, RuleRun};
use dedup::Deduplicator;
use scope::ScopeGuard;
use tracing::{debug, error, info};

/// Evaluate every evaluation of `rule` against the current context.
///
/// Top-level rules start from an empty binding table; rules reached
/// through a variables-scope arc see the bindings of their parent.
pub fn evaluate_rule(ctx: &mut EvaluationContext<'_>, rule: &Rule) -> FormulaResult<()> {
    debug!(rule = %rule.id, kind = rule.kind_name(), "evaluating rule");
    // reported even when no evaluation reaches the body
    ctx.stats_mut(rule);
    let mut run = RuleRun::new(rule);
    evaluate_variable(ctx, &mut run, 0)?;
    rules::judge_existence(ctx, &run)?;
    if ctx.options.trace_variable_set_expression_result {
        info!(
            code = "formula:trace",
            rule = %rule.id,
            "{} evaluations recorded",
            run.dedup.len()
        );
    }
    Ok(())
}

fn evaluate_variable(
    ctx: &mut EvaluationContext<'_>,
    run: &mut RuleRun<'_>,
    index: usize,
) -> FormulaResult<()> {
    let rule = run.rule;
    let Some(declaration) = rule.variables.get(index) else {
        return evaluate_leaf(ctx, run);
    };
    let cursor = binding::resolve(ctx, run, declaration)?;

    for bound in cursor {
        let contributions = aspect_contributions(&bound);
        if ctx.options.trace_variable_expression_result {
            info!(
                code = "formula:trace",
                variable = %bound.name,
                "bound to {:?}",
                bound.value
            );
        }

        let mut guard = ScopeGuard::new(ctx);
        guard.bind_variable(bound.name.clone(), bound.value.to_sequence());
        guard.push_binding(bound);
        for (aspect, exemplar) in contributions {
            guard.contribute_aspect(aspect, exemplar);
        }
        evaluate_variable(&mut guard, run, index + 1)?;
    }
    Ok(())
}

/// Exemplars a fact binding offers to later implicit filtering: the yielded
/// fact for uncovered aspects, no constraint for covered ones
fn aspect_contributions(bound: &BoundVariable) -> Vec<(Aspect, Option<FactId>)> {
    if !bound.is_fact_variable() || bound.is_fallback() {
        return Vec::new();
    }
    let fact = bound.yielded_fact();
    bound
        .aspects_defined
        .union(&bound.aspects_covered)
        .map(|aspect| {
            let exemplar = if bound.has_aspect_covered(aspect) {
                None
            } else {
                fact
            };
            (aspect.clone(), exemplar)
        })
        .collect()
}

fn evaluate_leaf(ctx: &mut EvaluationContext<'_>, run: &mut RuleRun<'_>) -> FormulaResult<()> {
    let rule = run.rule;
    ctx.clock.check()?;

    if all_fallen_back(&ctx.bindings) {
        ctx.stats_mut(rule).skipped += 1;
        if ctx.options.trace_variable_set_expression_result {
            info!(
                code = "formula:trace",
                rule = %rule.id,
                "skipped evaluation, all fact variables have fallen back"
            );
        }
        return Ok(());
    }

    let tuple = Deduplicator::tuple_of(&ctx.bindings);
    if run.dedup.is_redundant(&tuple, &ctx.bindings) {
        ctx.stats_mut(rule).skipped += 1;
        if ctx.options.trace_variable_set_expression_result {
            info!(
                code = "formula:trace",
                rule = %rule.id,
                "skipped evaluation, duplicates another evaluation"
            );
        }
        return ctx.clock.check();
    }
    run.dedup.record(tuple);

    for precondition in &rule.preconditions {
        let passed = ctx
            .evaluate_boolean(&precondition.test, None)
            .map_err(|e| FormulaError::expression(&rule.id, e))?;
        if !passed {
            ctx.stats_mut(rule).blocked += 1;
            if ctx.options.trace_variable_set_expression_result {
                info!(
                    code = "formula:trace",
                    rule = %rule.id,
                    "precondition {} blocked evaluation",
                    precondition.test
                );
            }
            return Ok(());
        }
    }

    ctx.stats_mut(rule).evaluations += 1;
    let result = rules::evaluate_body(ctx, run)?;
    evaluate_scoped_rules(ctx, rule, &result)
}

/// Fact variables exist and every one of them has fallen back
fn all_fallen_back(bindings: &[BoundVariable]) -> bool {
    let mut facts = bindings.iter().filter(|b| b.is_fact_variable()).peekable();
    facts.peek().is_some() && facts.all(|b| b.is_fallback())
}

fn evaluate_scoped_rules(
    ctx: &mut EvaluationContext<'_>,
    rule: &Rule,
    result: &BoundValue,
) -> FormulaResult<()> {
    for scoped in &rule.scoped_rules {
        let mut guard = ScopeGuard::new(ctx);
        if let Some(name) = &scoped.name {
            guard.bind_variable(name.clone(), result.to_sequence());
            let mut binding = BoundVariable::new(name.clone(), BindingKind::RuleResult);
            binding.value = result.clone();
            guard.push_binding(binding);
        }

        match evaluate_rule(&mut guard, &scoped.rule) {
            Ok(()) => {}
            Err(FormulaError::Cancelled) => {
                guard
                    .scoped_failures
                    .insert(scoped.rule.id.clone(), RuleOutcome::Cancelled);
                return Err(FormulaError::Cancelled);
            }
            Err(e) => {
                error!(rule = %scoped.rule.id, parent = %rule.id, "{}", e);
                guard
                    .scoped_failures
                    .entry(scoped.rule.id.clone())
                    .or_insert_with(|| RuleOutcome::Aborted {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                let message = Message::new(Severity::Error, e.code(), e.to_string(), &scoped.rule.id);
                guard.emit(message);
            }
        }
    }
    Ok(())
}
