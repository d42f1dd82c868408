//! Explicit filter pipeline
//!
//! Filters narrow a candidate fact set in declaration order. A filter arc
//! with the cover flag adds the filter's aspects to the variable's covered
//! set, which exempts them from implicit filtering. Group filters and the
//! sub-filters they contain never cover.

use super::context::{BoundVariable, EvaluationContext};
use super::expression::Item;
use crate::aspect::{Aspect, AspectSet};
use crate::ast::QName;
use crate::error::ExpressionError;
use crate::model::{
    AtomicType, Context, DimensionLookup, Fact, FactId, InstanceId, ModelRepository, Period,
    Value,
};
use crate::semantic::{AspectCover, Boundary, Filter, FilterArc, FilterKind, MemberSelector};
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Filters attached to the variable itself
    Variable,
    /// Group filters of the rule
    Group,
    And,
    Or,
}

/// Apply `arcs` to `facts`, accumulating covered aspects into `draft`
pub fn apply_filters(
    ctx: &mut EvaluationContext<'_>,
    draft: &mut BoundVariable,
    facts: Vec<FactId>,
    arcs: &[FilterArc],
    mode: FilterMode,
) -> Result<Vec<FactId>, ExpressionError> {
    let mut facts = facts;
    let mut union: HashSet<FactId> = HashSet::new();

    for arc in arcs {
        if !(mode == FilterMode::Variable && facts.is_empty()) {
            let result = filter_facts(ctx, draft, &arc.filter, &facts, arc.complement, mode)?;
            if ctx.options.trace_variable_filter_winnowing {
                info!(
                    code = "formula:trace",
                    variable = %draft.name,
                    filter = %arc.filter,
                    "{}filter passes {} facts",
                    if mode == FilterMode::Group { "group " } else { "" },
                    result.len()
                );
            }
            if mode == FilterMode::Or {
                union.extend(result);
            } else {
                facts = result;
            }
        }
        if mode != FilterMode::Group && arc.cover {
            let covered = aspects_covered(&arc.filter, draft);
            draft.aspects_covered.extend(covered);
        }
    }

    if mode == FilterMode::Or {
        facts.retain(|f| union.contains(f));
    }
    Ok(facts)
}

/// Aspects a filter covers when attached with the cover flag
pub fn aspects_covered(filter: &Filter, draft: &BoundVariable) -> AspectSet {
    let one = |a: Aspect| -> AspectSet { [a].into_iter().collect() };
    match &filter.kind {
        FilterKind::And(_) | FilterKind::Or(_) | FilterKind::General(_) | FilterKind::Nil => {
            AspectSet::new()
        }
        FilterKind::ConceptName { .. }
        | FilterKind::ConceptPeriodType(_)
        | FilterKind::ConceptDataType(_) => one(Aspect::Concept),
        FilterKind::Period(_)
        | FilterKind::Forever
        | FilterKind::PeriodInstant(_)
        | FilterKind::InstantDuration { .. } => one(Aspect::Period),
        FilterKind::EntitySpecificIdentifier { .. }
        | FilterKind::EntityScheme(_)
        | FilterKind::EntityRegexpIdentifier(_)
        | FilterKind::EntityRegexpScheme(_) => one(Aspect::EntityIdentifier),
        FilterKind::ExplicitDimension { dimension, .. }
        | FilterKind::TypedDimension { dimension, .. } => one(Aspect::Dimension(dimension.clone())),
        FilterKind::SingleMeasure(_) | FilterKind::GeneralMeasures(_) => one(Aspect::Unit),
        FilterKind::Match { aspect, .. } => one(aspect.clone()),
        FilterKind::Relative(_) => draft.aspects_defined.clone(),
        FilterKind::Sibling(_) => one(Aspect::Location),
        FilterKind::AspectCover(cover) => cover.aspects.clone(),
    }
}

/// Dimensions covered by aspect cover filters.
///
/// Runs after the dimensions defined by the surviving facts are known.
pub fn cover_aspect_cover_dimensions(draft: &mut BoundVariable, arcs: &[FilterArc]) {
    for arc in arcs {
        if !arc.cover {
            continue;
        }
        match &arc.filter.kind {
            FilterKind::AspectCover(cover) => {
                let dims = covered_dimensions(cover, &draft.aspects_defined);
                draft.aspects_covered.extend(dims);
            }
            FilterKind::And(children) | FilterKind::Or(children) => {
                cover_aspect_cover_dimensions(draft, children)
            }
            _ => {}
        }
    }
}

fn covered_dimensions(cover: &AspectCover, defined: &AspectSet) -> AspectSet {
    let mut dims: AspectSet = cover
        .dimensions
        .iter()
        .map(|d| Aspect::Dimension(d.clone()))
        .collect();
    if cover.all_dimensions {
        dims.extend(defined.iter().filter(|a| a.is_dimension()).cloned());
    }
    dims.retain(|a| {
        a.dimension()
            .is_some_and(|d| !cover.excluded_dimensions.contains(d))
    });
    dims
}

fn filter_facts(
    ctx: &mut EvaluationContext<'_>,
    draft: &mut BoundVariable,
    filter: &Filter,
    facts: &[FactId],
    complement: bool,
    mode: FilterMode,
) -> Result<Vec<FactId>, ExpressionError> {
    let boolean_mode = if mode == FilterMode::Group {
        FilterMode::Group
    } else {
        FilterMode::And
    };
    match &filter.kind {
        FilterKind::And(children) => {
            let passed = apply_filters(ctx, draft, facts.to_vec(), children, boolean_mode)?;
            Ok(complemented(facts, &passed, complement))
        }
        FilterKind::Or(children) => {
            let passed = if mode == FilterMode::Group {
                or_in_group(ctx, draft, facts, children)?
            } else {
                apply_filters(ctx, draft, facts.to_vec(), children, FilterMode::Or)?
            };
            Ok(complemented(facts, &passed, complement))
        }
        FilterKind::ConceptName { names, expressions } if expressions.is_empty() => {
            let mut indexed: HashSet<FactId> = HashSet::new();
            for instance in instances_of(facts) {
                for name in names {
                    indexed.extend(ctx.repository.facts_by_concept(instance, name));
                }
            }
            Ok(keep_indexed(facts, &indexed, complement))
        }
        FilterKind::ConceptName { names, expressions } => retain(ctx, facts, complement, |ctx, fact| {
            if names.contains(&fact.concept) {
                return Ok(true);
            }
            for expression in expressions {
                let value = ctx.evaluator.evaluate_atomic(
                    expression,
                    AtomicType::QName,
                    &ctx.env().with_item(Item::Fact(fact.id)),
                )?;
                if value.as_ref().and_then(Value::as_qname) == Some(&fact.concept) {
                    return Ok(true);
                }
            }
            Ok(false)
        }),
        FilterKind::ConceptPeriodType(period_type) => {
            let indexed: HashSet<FactId> = instances_of(facts)
                .into_iter()
                .flat_map(|inst| ctx.repository.facts_by_period_type(inst, *period_type))
                .collect();
            Ok(keep_indexed(facts, &indexed, complement))
        }
        FilterKind::ConceptDataType(data_type) => {
            let indexed: HashSet<FactId> = instances_of(facts)
                .into_iter()
                .flat_map(|inst| ctx.repository.facts_by_datatype(inst, data_type))
                .collect();
            Ok(keep_indexed(facts, &indexed, complement))
        }
        FilterKind::General(test) => retain(ctx, facts, complement, |ctx, fact| {
            ctx.evaluate_boolean(test, Some(Item::Fact(fact.id)))
        }),
        FilterKind::Period(test) => retain(ctx, facts, complement, |ctx, fact| {
            match ctx.repository.fact_context(fact.id) {
                Some(context) => ctx.evaluate_boolean(test, Some(Item::Period(&context.period))),
                None => Ok(false),
            }
        }),
        // tuples have no period and pass both filters
        FilterKind::Forever => retain(ctx, facts, complement, |ctx, fact| {
            Ok(fact.is_tuple()
                || period_of(&*ctx.repository, fact).is_some_and(|p| *p == Period::Forever))
        }),
        FilterKind::PeriodInstant(date) => retain(ctx, facts, complement, |ctx, fact| {
            if fact.is_tuple() {
                return Ok(true);
            }
            let Some(Period::Instant { at }) = period_of(&*ctx.repository, fact) else {
                return Ok(false);
            };
            let value = ctx.evaluator.evaluate_atomic(
                date,
                AtomicType::DateTime,
                &ctx.env().with_item(Item::Fact(fact.id)),
            )?;
            Ok(value.and_then(|v| v.as_datetime(true)) == Some(*at))
        }),
        FilterKind::InstantDuration { variable, boundary } => {
            let other = ctx.yielded_fact_of(variable)?;
            let boundary_date = other
                .and_then(|id| ctx.repository.fact_context(id))
                .and_then(|c| match (&c.period, boundary) {
                    (Period::Duration { start, .. }, Boundary::Start) => Some(*start),
                    (Period::Duration { end, .. }, Boundary::End) => Some(*end),
                    _ => None,
                });
            retain(ctx, facts, complement, |ctx, fact| {
                Ok(match (period_of(&*ctx.repository, fact), boundary_date) {
                    (Some(Period::Instant { at }), Some(date)) => *at == date,
                    _ => false,
                })
            })
        }
        FilterKind::EntitySpecificIdentifier { scheme, value } => {
            retain(ctx, facts, complement, |ctx, fact| {
                Ok(context_of(&*ctx.repository, fact)
                    .is_some_and(|c| c.entity.scheme == *scheme && c.entity.value == *value))
            })
        }
        FilterKind::EntityScheme(scheme) => retain(ctx, facts, complement, |ctx, fact| {
            Ok(context_of(&*ctx.repository, fact).is_some_and(|c| c.entity.scheme == *scheme))
        }),
        FilterKind::EntityRegexpIdentifier(pattern) => {
            retain(ctx, facts, complement, |ctx, fact| {
                Ok(context_of(&*ctx.repository, fact).is_some_and(|c| pattern.is_match(&c.entity.value)))
            })
        }
        FilterKind::EntityRegexpScheme(pattern) => retain(ctx, facts, complement, |ctx, fact| {
            Ok(context_of(&*ctx.repository, fact).is_some_and(|c| pattern.is_match(&c.entity.scheme)))
        }),
        FilterKind::ExplicitDimension { dimension, members } => {
            if let ([MemberSelector::Name(member)], false) = (members.as_slice(), complement) {
                let indexed: HashSet<FactId> = instances_of(facts)
                    .into_iter()
                    .flat_map(|inst| {
                        ctx.repository
                            .facts_by_dimension_member(inst, dimension, member)
                    })
                    .collect();
                return Ok(keep_indexed(facts, &indexed, false));
            }
            let mut wanted: Vec<Option<QName>> = Vec::new();
            for selector in members {
                if let MemberSelector::Variable(variable) = selector {
                    let member = ctx
                        .yielded_fact_of(variable)?
                        .and_then(|id| explicit_member_of(&*ctx.repository, id, dimension));
                    wanted.push(member);
                }
            }
            retain(ctx, facts, complement, |ctx, fact| {
                let Some(member) = explicit_member_of(&*ctx.repository, fact.id, dimension) else {
                    return Ok(false);
                };
                if members.is_empty() {
                    return Ok(true);
                }
                if wanted.iter().any(|w| w.as_ref() == Some(&member)) {
                    return Ok(true);
                }
                for selector in members {
                    let matched = match selector {
                        MemberSelector::Name(name) => *name == member,
                        MemberSelector::Variable(_) => false,
                        MemberSelector::Expression(expression) => {
                            let value = ctx.evaluator.evaluate_atomic(
                                expression,
                                AtomicType::QName,
                                &ctx.env().with_item(Item::Fact(fact.id)),
                            )?;
                            value.as_ref().and_then(Value::as_qname) == Some(&member)
                        }
                    };
                    if matched {
                        return Ok(true);
                    }
                }
                Ok(false)
            })
        }
        FilterKind::TypedDimension { dimension, test } => {
            retain(ctx, facts, complement, |ctx, fact| {
                let Some(context) = context_of(&*ctx.repository, fact) else {
                    return Ok(false);
                };
                let Some(node) = context
                    .dimensions
                    .get(dimension)
                    .and_then(|v| v.member.typed_member())
                else {
                    return Ok(false);
                };
                match test {
                    Some(test) => ctx.evaluate_boolean(test, Some(Item::Node(node))),
                    None => Ok(true),
                }
            })
        }
        FilterKind::SingleMeasure(measure) => retain(ctx, facts, complement, |ctx, fact| {
            Ok(ctx
                .repository
                .fact_unit(fact.id)
                .is_some_and(|u| u.multiply == [measure.clone()] && u.divide.is_empty()))
        }),
        FilterKind::GeneralMeasures(test) => retain(ctx, facts, complement, |ctx, fact| {
            match ctx.repository.fact_unit(fact.id) {
                Some(unit) => ctx.evaluate_boolean(test, Some(Item::Unit(unit))),
                None => Ok(false),
            }
        }),
        FilterKind::Match { aspect, variable } => {
            let other = ctx.yielded_fact_of(variable)?;
            let aspects = [aspect.clone()];
            retain_mut(ctx, facts, complement, |ctx, fact| {
                ctx.aspects_match(other, fact, &aspects)
            })
        }
        FilterKind::Relative(variable) => {
            let other = ctx.yielded_fact_of(variable)?;
            let aspects: AspectSet = draft
                .aspects_defined
                .difference(&draft.aspects_covered)
                .filter(|a| **a != Aspect::Dimensions)
                .cloned()
                .collect();
            retain_mut(ctx, facts, complement, |ctx, fact| {
                ctx.aspects_match(other, fact, &aspects)
            })
        }
        FilterKind::Sibling(variable) => {
            let other = ctx.yielded_fact_of(variable)?;
            let parent = other.and_then(|id| ctx.repository.fact(id).map(|f| (id.instance, f.parent)));
            retain(ctx, facts, complement, |_, fact| {
                Ok(parent.is_some_and(|(instance, parent)| {
                    fact.id.instance == instance && fact.parent == parent
                }))
            })
        }
        FilterKind::Nil => retain(ctx, facts, complement, |_, fact| Ok(fact.nil)),
        FilterKind::AspectCover(_) => Ok(facts.to_vec()),
    }
}

/// Or filter inside a group: union of the children, without cover
fn or_in_group(
    ctx: &mut EvaluationContext<'_>,
    draft: &mut BoundVariable,
    facts: &[FactId],
    children: &[FilterArc],
) -> Result<Vec<FactId>, ExpressionError> {
    let mut union: HashSet<FactId> = HashSet::new();
    for arc in children {
        let passed = filter_facts(ctx, draft, &arc.filter, facts, arc.complement, FilterMode::Group)?;
        union.extend(passed);
    }
    Ok(facts.iter().copied().filter(|f| union.contains(f)).collect())
}

fn complemented(facts: &[FactId], passed: &[FactId], complement: bool) -> Vec<FactId> {
    if !complement {
        return passed.to_vec();
    }
    let passed: HashSet<&FactId> = passed.iter().collect();
    facts.iter().copied().filter(|f| !passed.contains(f)).collect()
}

fn keep_indexed(facts: &[FactId], indexed: &HashSet<FactId>, complement: bool) -> Vec<FactId> {
    facts
        .iter()
        .copied()
        .filter(|f| indexed.contains(f) != complement)
        .collect()
}

fn instances_of(facts: &[FactId]) -> Vec<InstanceId> {
    let mut instances: Vec<InstanceId> = facts.iter().map(|f| f.instance).collect();
    instances.sort();
    instances.dedup();
    instances
}

fn context_of<'r>(repository: &'r dyn ModelRepository, fact: &Fact) -> Option<&'r Context> {
    fact.context.and_then(|c| repository.context(c))
}

fn period_of<'r>(repository: &'r dyn ModelRepository, fact: &Fact) -> Option<&'r Period> {
    context_of(repository, fact).map(|c| &c.period)
}

fn explicit_member_of(
    repository: &dyn ModelRepository,
    fact: FactId,
    dimension: &QName,
) -> Option<QName> {
    let context = repository.fact_context(fact)?;
    match context.dimension_value(dimension, repository.dimension_defaults()) {
        DimensionLookup::Absent => None,
        lookup => lookup.explicit_member().cloned(),
    }
}

/// Keep facts whose test result differs from `complement`
fn retain<F>(
    ctx: &EvaluationContext<'_>,
    facts: &[FactId],
    complement: bool,
    mut test: F,
) -> Result<Vec<FactId>, ExpressionError>
where
    F: FnMut(&EvaluationContext<'_>, &Fact) -> Result<bool, ExpressionError>,
{
    let mut out = Vec::with_capacity(facts.len());
    for &id in facts {
        let Some(fact) = ctx.repository.fact(id) else {
            continue;
        };
        if test(ctx, fact)? != complement {
            out.push(id);
        }
    }
    Ok(out)
}

/// As [`retain`] for tests that use the equality cache
fn retain_mut<F>(
    ctx: &mut EvaluationContext<'_>,
    facts: &[FactId],
    complement: bool,
    mut test: F,
) -> Result<Vec<FactId>, ExpressionError>
where
    F: FnMut(&mut EvaluationContext<'_>, FactId) -> Result<bool, ExpressionError>,
{
    let mut out = Vec::with_capacity(facts.len());
    for &id in facts {
        if test(ctx, id)? != complement {
            out.push(id);
        }
    }
    Ok(out)
}
