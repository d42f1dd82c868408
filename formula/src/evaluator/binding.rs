//! Variable binding
//!
//! [`resolve`] computes everything a declaration can be bound to at the
//! current depth of the search: candidate facts after explicit, group and
//! implicit filtering, the aspects the variable defines and covers, and an
//! optional fallback. The [`BindingCursor`] then yields one binding per
//! value.

use super::context::{BindingKind, BoundValue, BoundVariable, EvaluationContext, RuleRun};
use super::expression::Item;
use super::filter::{apply_filters, cover_aspect_cover_dimensions, FilterMode};
use super::implicit::implicit_filter;
use crate::aspect::{Aspect, AspectSet};
use crate::ast::QName;
use crate::error::ExpressionError;
use crate::model::{FactId, InstanceId, Sequence, Value};
use crate::semantic::{FactVariable, GeneralVariable, VariableDeclaration, VariableKind};
use crate::{FormulaError, FormulaResult};
use std::collections::HashMap;
use std::iter::FusedIterator;
use tracing::info;

/// Key of facts cached after group filtering
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    /// Source instance, with or without nil facts
    SourceInstance { nils: bool },
    /// Instances named by the variable
    FromInstances(QName),
}

#[derive(Debug, Clone)]
struct FilteredCandidates {
    facts: Vec<FactId>,
    aspects_defined: AspectSet,
    aspects_covered: AspectSet,
}

/// Candidates of one rule invocation
///
/// Group-filtered facts are cached per source; fully filtered candidates are
/// cached per variable, for variables without dependencies only.
#[derive(Debug, Default)]
pub struct CandidateCache {
    groups: HashMap<GroupKey, Vec<FactId>>,
    variables: HashMap<QName, FilteredCandidates>,
}

impl CandidateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len() + self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.variables.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.variables.clear();
    }
}

/// Resolve `declaration` against the current bindings
pub fn resolve(
    ctx: &mut EvaluationContext<'_>,
    run: &mut RuleRun<'_>,
    declaration: &VariableDeclaration,
) -> FormulaResult<BindingCursor> {
    let rule_id = run.rule.id.clone();
    let in_rule = |e: ExpressionError| FormulaError::expression(rule_id.clone(), e);

    let mut template = BoundVariable::new(declaration.name.clone(), BindingKind::Fact);
    template.depends_on = declaration.depends_on.clone();

    match &declaration.kind {
        VariableKind::Fact(variable) => {
            template.bind_as_sequence = variable.bind_as_sequence;
            resolve_fact_variable(ctx, run, declaration, variable, template)
        }
        VariableKind::General(variable) => {
            template.kind = BindingKind::General;
            template.bind_as_sequence = variable.bind_as_sequence;
            let values = resolve_general_variable(ctx, variable).map_err(in_rule)?;
            if ctx.options.trace_variable_expression_result {
                info!(
                    code = "formula:trace",
                    variable = %declaration.name,
                    "general variable select result {}",
                    display_sequence(&values)
                );
            }
            let values = if variable.bind_as_sequence {
                vec![BoundValue::Value(values)]
            } else {
                values.into_iter().map(|v| BoundValue::Value(vec![v])).collect()
            };
            Ok(BindingCursor::new(template, values, None))
        }
        VariableKind::Parameter(parameter) => {
            template.kind = BindingKind::Parameter;
            let value = ctx
                .scope
                .get(parameter)
                .cloned()
                .ok_or_else(|| FormulaError::MissingParameter(parameter.clone()))?;
            Ok(BindingCursor::new(template, vec![BoundValue::Value(value)], None))
        }
    }
}

fn resolve_general_variable(
    ctx: &EvaluationContext<'_>,
    variable: &GeneralVariable,
) -> Result<Sequence, ExpressionError> {
    let instances = if variable.from_instances.is_empty() {
        vec![ctx.source_instance]
    } else {
        instances_named(ctx, &variable.from_instances)?
    };
    ctx.evaluate_sequence(&variable.select, Some(Item::Instances(&instances)))
}

/// Instances bound in scope under `names`, or registered under them
fn instances_named(
    ctx: &EvaluationContext<'_>,
    names: &[QName],
) -> Result<Vec<InstanceId>, ExpressionError> {
    let mut instances = Vec::new();
    for name in names {
        match ctx.scope.get(name) {
            Some(values) => instances.extend(values.iter().filter_map(|v| match v {
                Value::Instance(id) => Some(*id),
                _ => None,
            })),
            None => match ctx.repository.instance_by_name(name) {
                Some(id) => instances.push(id),
                None => {
                    return Err(ExpressionError::new(
                        "xbrlve:unresolvedDependency",
                        format!("instance {} is not known", name),
                    ))
                }
            },
        }
    }
    Ok(instances)
}

fn resolve_fact_variable(
    ctx: &mut EvaluationContext<'_>,
    run: &mut RuleRun<'_>,
    declaration: &VariableDeclaration,
    variable: &FactVariable,
    mut draft: BoundVariable,
) -> FormulaResult<BindingCursor> {
    let rule = run.rule;
    let in_rule = |e: ExpressionError| FormulaError::expression(rule.id.clone(), e);
    let name = &declaration.name;
    let independent = !declaration.has_variable_dependencies();

    let cached = if independent {
        run.candidates.variables.get(name).cloned()
    } else {
        None
    };
    let facts = match cached {
        Some(cached) => {
            if ctx.options.trace_variable_filter_winnowing {
                info!(
                    code = "formula:trace",
                    variable = %name,
                    "start with {} facts previously cached after explicit filters",
                    cached.facts.len()
                );
            }
            draft.aspects_defined = cached.aspects_defined;
            draft.aspects_covered = cached.aspects_covered;
            cached.facts
        }
        None => {
            draft.aspects_defined = rule.aspect_model.aspects();
            let facts = group_filtered(ctx, run, &mut draft, variable).map_err(|e| match e {
                GroupError::Instance(name) => FormulaError::UnknownInstance(name.to_string()),
                GroupError::Expression(e) => in_rule(e),
            })?;
            let facts = apply_filters(ctx, &mut draft, facts, &variable.filters, FilterMode::Variable)
                .map_err(in_rule)?;

            let defaults = ctx.repository.dimension_defaults().clone();
            if rule.aspect_model.is_dimensional() {
                for fact in &facts {
                    if let Some(context) = ctx.repository.fact_context(*fact) {
                        draft.aspects_defined.extend(
                            context
                                .dimension_aspects(&defaults)
                                .into_iter()
                                .map(Aspect::Dimension),
                        );
                    }
                }
            }
            cover_aspect_cover_dimensions(&mut draft, &variable.filters);
            if independent {
                run.candidates.variables.insert(
                    name.clone(),
                    FilteredCandidates {
                        facts: facts.clone(),
                        aspects_defined: draft.aspects_defined.clone(),
                        aspects_covered: draft.aspects_covered.clone(),
                    },
                );
            }
            facts
        }
    };

    let mut consider_fallback = variable.fallback.is_some();
    let mut facts = facts;
    if rule.implicit_filtering
        && ctx
            .bindings
            .iter()
            .any(|b| b.is_fact_variable() && !b.is_fallback())
    {
        let before = facts.len();
        facts = implicit_filter(ctx, &draft, facts).map_err(in_rule)?;
        if consider_fallback
            && independent
            && before > 0
            && !facts.is_empty()
            && ctx.bindings.len() > 1
            && aspects_completely_defined(&draft, &ctx.bindings)
        {
            consider_fallback = false;
        }
    }

    if ctx.options.trace_variable_filters_result {
        info!(
            code = "formula:trace",
            variable = %name,
            "filters result {} facts",
            facts.len()
        );
    }

    let fallback = match (&variable.fallback, consider_fallback) {
        (Some(expression), true) => {
            let value = ctx.evaluate_sequence(expression, None).map_err(in_rule)?;
            if ctx.options.trace_variable_expression_result {
                info!(
                    code = "formula:trace",
                    variable = %name,
                    "fallback value result {}",
                    display_sequence(&value)
                );
            }
            Some(value).filter(|v| !v.is_empty())
        }
        _ => None,
    };

    let values = if variable.bind_as_sequence {
        sequence_values(ctx, &draft, variable.matches, &facts).map_err(in_rule)?
    } else {
        facts.into_iter().map(BoundValue::Fact).collect()
    };
    Ok(BindingCursor::new(draft, values, fallback))
}

enum GroupError {
    Instance(QName),
    Expression(ExpressionError),
}

impl From<ExpressionError> for GroupError {
    fn from(e: ExpressionError) -> Self {
        GroupError::Expression(e)
    }
}

/// Facts of the variable's instances after group filters
fn group_filtered(
    ctx: &mut EvaluationContext<'_>,
    run: &mut RuleRun<'_>,
    draft: &mut BoundVariable,
    variable: &FactVariable,
) -> Result<Vec<FactId>, GroupError> {
    let key = if variable.from_instances.is_empty() {
        GroupKey::SourceInstance {
            nils: variable.nils,
        }
    } else {
        GroupKey::FromInstances(draft.name.clone())
    };
    if let Some(facts) = run.candidates.groups.get(&key) {
        if ctx.options.trace_variable_filter_winnowing {
            info!(
                code = "formula:trace",
                variable = %draft.name,
                "start with {} facts previously cached before variable filters",
                facts.len()
            );
        }
        return Ok(facts.clone());
    }

    let instances = if variable.from_instances.is_empty() {
        vec![ctx.source_instance]
    } else {
        let mut instances = Vec::new();
        for name in &variable.from_instances {
            let named = instances_named(ctx, std::slice::from_ref(name))
                .map_err(|_| GroupError::Instance(name.clone()))?;
            instances.extend(named);
        }
        instances
    };
    let mut facts = Vec::new();
    for instance in instances {
        facts.extend(ctx.repository.facts_of_instance(instance, variable.nils));
    }
    if ctx.options.trace_variable_filter_winnowing {
        info!(
            code = "formula:trace",
            variable = %draft.name,
            "filtering: start with {} facts",
            facts.len()
        );
    }

    let rule = run.rule;
    let facts = apply_filters(ctx, draft, facts, &rule.group_filters, FilterMode::Group)?;
    draft.aspects_covered.clear();
    run.candidates.groups.insert(key, facts.clone());
    Ok(facts)
}

/// Every bound variable defines as many aspects as the draft, or a subset
/// of its aspects
fn aspects_completely_defined(draft: &BoundVariable, bindings: &[BoundVariable]) -> bool {
    let count = draft.aspects_defined.len();
    bindings.iter().all(|b| {
        let other = b.aspects_defined.len();
        other == count || (count > other && b.aspects_defined.is_subset(&draft.aspects_defined))
    })
}

/// Sequence values: partitions of aspect-matched facts, split unless
/// `matches` so no sequence holds two facts matching on every aspect
fn sequence_values(
    ctx: &mut EvaluationContext<'_>,
    draft: &BoundVariable,
    matches: bool,
    facts: &[FactId],
) -> Result<Vec<BoundValue>, ExpressionError> {
    let uncovered: AspectSet = draft
        .aspects_defined
        .difference(&draft.aspects_covered)
        .cloned()
        .collect();
    let mut values = Vec::new();
    for partition in partition_groups(ctx, facts, &uncovered)? {
        if matches {
            values.push(BoundValue::Facts(partition));
            continue;
        }
        let groups = partition_groups(ctx, &partition, &draft.aspects_defined)?;
        values.extend(cartesian_product(&groups).into_iter().map(BoundValue::Facts));
    }
    Ok(values)
}

/// Group facts into classes matching the class's first fact on `aspects`
fn partition_groups(
    ctx: &mut EvaluationContext<'_>,
    facts: &[FactId],
    aspects: &AspectSet,
) -> Result<Vec<Vec<FactId>>, ExpressionError> {
    let mut groups: Vec<Vec<FactId>> = Vec::new();
    'facts: for &fact in facts {
        for group in groups.iter_mut() {
            if ctx.aspects_match(Some(fact), group[0], aspects)? {
                group.push(fact);
                continue 'facts;
            }
        }
        groups.push(vec![fact]);
    }
    Ok(groups)
}

/// One pick from each group, in every combination
fn cartesian_product(groups: &[Vec<FactId>]) -> Vec<Vec<FactId>> {
    groups.iter().fold(vec![Vec::new()], |acc, group| {
        acc.iter()
            .flat_map(|prefix| {
                group.iter().map(move |fact| {
                    let mut next = prefix.clone();
                    next.push(*fact);
                    next
                })
            })
            .collect()
    })
}

fn display_sequence(seq: &Sequence) -> String {
    let items: Vec<String> = seq.iter().map(|v| v.to_string()).collect();
    format!("({})", items.join(", "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Facts,
    Fallback,
    Exhausted,
}

/// Yields the bindings of one variable activation.
///
/// Fact values come first. A fallback follows them for single-fact
/// variables, and is used by sequence variables only when no fact value was
/// produced. Fallback bindings carry no fact.
#[derive(Debug)]
pub struct BindingCursor {
    template: BoundVariable,
    values: std::vec::IntoIter<BoundValue>,
    fallback: Option<Sequence>,
    phase: Phase,
    produced: usize,
}

impl BindingCursor {
    fn new(template: BoundVariable, values: Vec<BoundValue>, fallback: Option<Sequence>) -> Self {
        Self {
            template,
            values: values.into_iter(),
            fallback,
            phase: Phase::Facts,
            produced: 0,
        }
    }

    /// Binding with no value, carrying the resolved aspects
    pub fn template(&self) -> &BoundVariable {
        &self.template
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    fn bound(&self, value: BoundValue) -> BoundVariable {
        BoundVariable {
            value,
            ..self.template.clone()
        }
    }
}

impl Iterator for BindingCursor {
    type Item = BoundVariable;

    fn next(&mut self) -> Option<BoundVariable> {
        loop {
            match self.phase {
                Phase::Facts => match self.values.next() {
                    Some(value) => {
                        self.produced += 1;
                        return Some(self.bound(value));
                    }
                    None => self.phase = Phase::Fallback,
                },
                Phase::Fallback => {
                    self.phase = Phase::Exhausted;
                    let usable = !self.template.bind_as_sequence || self.produced == 0;
                    if let (Some(value), true) = (self.fallback.take(), usable) {
                        return Some(self.bound(BoundValue::Fallback(value)));
                    }
                }
                Phase::Exhausted => return None,
            }
        }
    }
}

impl FusedIterator for BindingCursor {}
