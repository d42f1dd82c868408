//! Output fact production
//!
//! Every aspect of an output fact is resolved in the same order: an
//! expression declared by the aspect rule, then the fact bound to the rule's
//! source (a named variable, or whichever fact variable left the aspect
//! uncovered), then a missing-aspect error when the aspect is mandatory.
//! Contexts and units are reused when an equal one already exists in the
//! output instance.

use super::context::EvaluationContext;
use super::expression::atomize;
use super::lexical;
use crate::aspect::{Aspect, AspectModel};
use crate::ast::{Expression, QName, XBRLDI_NS};
use crate::error::{AspectRuleError, ExpressionError};
use crate::model::{
    cancel_measures, Accuracy, AtomicType, Container, Context, DimensionMember, DimensionValue,
    Digits, DocumentItem, EntityIdentifier, FactId, Instance, InstanceId, NewFact, Period, Unit,
    Value, XmlNode,
};
use crate::model::{Anchor, Sequence};
use crate::response::{Message, Severity};
use crate::semantic::{
    AccuracyRule, AspectSource, MeasureRule, OutputRules, PeriodSpec, Rule, RuleKind,
};
use crate::{FormulaError, FormulaResult};
use rust_decimal::prelude::ToPrimitive;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Produce the output fact of one formula or tuple evaluation.
///
/// `value` is the formula's computed value; tuples pass `None`. Aspect
/// errors are reported and yield `Ok(None)`; expression errors abort the
/// rule.
pub fn produce_output_fact(
    ctx: &mut EvaluationContext<'_>,
    rule: &Rule,
    value: Option<&Sequence>,
) -> FormulaResult<Option<FactId>> {
    let Some(rules) = rule.kind.output_rules() else {
        return Ok(None);
    };
    let instance = output_instance(ctx, &rules.instance)?;

    let draft = match resolve_output(ctx, rule, rules, instance, value) {
        Ok(draft) => draft,
        Err(AspectRuleError::Expression(e)) => return Err(FormulaError::expression(&rule.id, e)),
        Err(e) => {
            let facts = ctx.bindings.iter().flat_map(|b| b.yielded_facts()).collect();
            ctx.emit(
                Message::new(Severity::Error, e.code(), format!("{}: {}", rule, e), &rule.id)
                    .with_facts(facts),
            );
            return Ok(None);
        }
    };

    let fact = write_output(ctx, instance, draft)?;
    debug!(rule = %rule.id, fact = %fact, "created output fact");
    Ok(Some(fact))
}

/// Everything needed to write an output fact
#[derive(Debug)]
struct OutputDraft {
    concept: QName,
    parent: Option<FactId>,
    item: Option<ItemDraft>,
}

#[derive(Debug)]
struct ItemDraft {
    context: Context,
    unit: Option<(Vec<QName>, Vec<QName>)>,
    value: Option<Value>,
    accuracy: Option<Accuracy>,
}

fn output_instance(ctx: &EvaluationContext<'_>, name: &QName) -> FormulaResult<InstanceId> {
    if let Some([Value::Instance(id)]) = ctx.scope.get(name).map(Vec::as_slice) {
        return Ok(*id);
    }
    ctx.repository
        .instance_by_name(name)
        .ok_or_else(|| FormulaError::UnknownInstance(name.to_string()))
}

fn resolve_output(
    ctx: &EvaluationContext<'_>,
    rule: &Rule,
    rules: &OutputRules,
    instance: InstanceId,
    value: Option<&Sequence>,
) -> Result<OutputDraft, AspectRuleError> {
    let concept = output_concept(ctx, rules)?;
    let is_tuple = matches!(rule.kind, RuleKind::Tuple(_));
    let definition = ctx
        .repository
        .concept(&concept)
        .filter(|c| c.is_tuple() == is_tuple)
        .cloned()
        .ok_or_else(|| AspectRuleError::UndefinedConcept(concept.clone()))?;
    let parent = output_location(ctx, rules, instance)?;

    if is_tuple {
        return Ok(OutputDraft {
            concept,
            parent,
            item: None,
        });
    }

    let entity = output_entity(ctx, rules)?;
    let period = output_period(ctx, rules)?;
    let unit = if definition.numeric {
        Some(output_unit(ctx, rules, &concept)?)
    } else {
        None
    };
    let mut context = Context::new(String::new(), entity, period);
    if rule.aspect_model.is_dimensional() {
        context.dimensions = output_dimensions(ctx, rules)?;
    }
    context.segment = open_component(ctx, rules, Container::Segment, rule.aspect_model)?;
    context.scenario = open_component(ctx, rules, Container::Scenario, rule.aspect_model)?;

    let value = match value.map(|seq| atomize(&*ctx.repository, seq)) {
        None => None,
        Some(atoms) if atoms.len() > 1 => {
            return Err(AspectRuleError::NonSingletonOutputValue(atoms.len()))
        }
        Some(mut atoms) => atoms.pop(),
    };
    let accuracy = match (&rule.kind, &value) {
        (RuleKind::Formula(formula), Some(_)) if definition.numeric && !definition.fraction => {
            Some(match &formula.accuracy {
                Some(AccuracyRule::Decimals(e)) => Accuracy::Decimals(digits_of(ctx, e)?),
                Some(AccuracyRule::Precision(e)) => Accuracy::Precision(digits_of(ctx, e)?),
                None => Accuracy::Precision(Digits::Finite(0)),
            })
        }
        _ => None,
    };

    Ok(OutputDraft {
        concept,
        parent,
        item: Some(ItemDraft {
            context,
            unit,
            value,
            accuracy,
        }),
    })
}

fn write_output(
    ctx: &mut EvaluationContext<'_>,
    instance: InstanceId,
    draft: OutputDraft,
) -> FormulaResult<FactId> {
    let Some(item) = draft.item else {
        let mut fact = NewFact::tuple(draft.concept);
        if let Some(parent) = draft.parent {
            fact = fact.in_tuple(parent);
        }
        return ctx.repository.create_fact(instance, fact, Anchor::End);
    };

    let context = match ctx.repository.match_context(instance, &item.context) {
        Some(id) => id,
        None => {
            let mut context = item.context;
            context.id = fresh_id(ctx, instance, "c", |i| {
                i.contexts().iter().map(|c| c.id.clone()).collect()
            });
            let anchor = ctx
                .anchors
                .last_context
                .get(&instance)
                .map(|last| Anchor::After(*last))
                .unwrap_or(Anchor::BeforeFacts);
            let id = ctx.repository.create_context(instance, context, anchor)?;
            ctx.anchors
                .last_context
                .insert(instance, DocumentItem::Context(id));
            id
        }
    };

    let mut fact = NewFact::item(draft.concept, context);
    if let Some((multiply, divide)) = item.unit {
        let unit = match ctx.repository.match_unit(instance, &multiply, &divide) {
            Some(id) => id,
            None => {
                let id = fresh_id(ctx, instance, "u", |i| {
                    i.units().iter().map(|u| u.id.clone()).collect()
                });
                let anchor = ctx
                    .anchors
                    .last_unit
                    .get(&instance)
                    .map(|last| Anchor::After(*last))
                    .unwrap_or(Anchor::BeforeFacts);
                let unit =
                    ctx.repository
                        .create_unit(instance, Unit::new(id, multiply, divide), anchor)?;
                ctx.anchors.last_unit.insert(instance, DocumentItem::Unit(unit));
                unit
            }
        };
        fact = fact.with_unit(unit);
    }
    if let Some(parent) = draft.parent {
        fact = fact.in_tuple(parent);
    }
    fact = match item.value {
        Some(value) => {
            let lexical = lexical::render(&value, item.accuracy);
            let mut fact = fact.with_value(value);
            fact.lexical = Some(lexical);
            match item.accuracy {
                Some(accuracy) => fact.with_accuracy(accuracy),
                None => fact,
            }
        }
        None => fact.nil(),
    };
    ctx.repository.create_fact(instance, fact, Anchor::End)
}

/// First `{prefix}{n}` not already used as an id in the instance
fn fresh_id<F>(ctx: &EvaluationContext<'_>, instance: InstanceId, prefix: &str, ids: F) -> String
where
    F: Fn(&Instance) -> HashSet<String>,
{
    let taken = ctx.repository.instance(instance).map(ids).unwrap_or_default();
    (taken.len()..)
        .map(|n| format!("{}{}", prefix, n))
        .find(|id| !taken.contains(id))
        .unwrap_or_else(|| prefix.to_string())
}

/// Rule-specific source, else the rule-wide one
fn source_of<'r>(
    rules: &'r OutputRules,
    specific: Option<&'r AspectSource>,
) -> Option<&'r AspectSource> {
    specific.or(rules.source.as_ref())
}

/// Fact supplying `aspect` from `source`
fn source_fact(
    ctx: &EvaluationContext<'_>,
    source: Option<&AspectSource>,
    aspect: &Aspect,
) -> Result<Option<FactId>, AspectRuleError> {
    let mut fact_bindings = ctx
        .bindings
        .iter()
        .filter(|b| b.is_fact_variable() && !b.is_fallback());
    match source {
        None => Ok(None),
        Some(AspectSource::Uncovered) => Ok(fact_bindings
            .find(|b| b.has_aspect_uncovered(aspect))
            .and_then(|b| b.yielded_fact())),
        Some(AspectSource::Variable(name)) => match fact_bindings.find(|b| b.name == *name) {
            None => Ok(None),
            Some(b) if !b.bind_as_sequence || b.has_aspect_uncovered(aspect) => {
                Ok(b.yielded_fact())
            }
            Some(_) => Err(AspectRuleError::SequenceSourceConflict(name.clone())),
        },
    }
}

fn source_context<'c>(
    ctx: &'c EvaluationContext<'_>,
    source: Option<&AspectSource>,
    aspect: &Aspect,
) -> Result<Option<&'c Context>, AspectRuleError> {
    Ok(source_fact(ctx, source, aspect)?.and_then(|f| ctx.repository.fact_context(f)))
}

fn atomic(
    ctx: &EvaluationContext<'_>,
    expression: &Expression,
    expected: AtomicType,
) -> Result<Option<Value>, ExpressionError> {
    ctx.evaluator
        .evaluate_atomic(expression, expected, &ctx.env())
}

fn output_concept(
    ctx: &EvaluationContext<'_>,
    rules: &OutputRules,
) -> Result<QName, AspectRuleError> {
    if let Some(expression) = &rules.concept.name {
        return match atomic(ctx, expression, AtomicType::QName)? {
            Some(Value::QName(name)) => Ok(name),
            _ => Err(AspectRuleError::MissingConceptRule),
        };
    }
    let source = source_of(rules, rules.concept.source.as_ref());
    source_fact(ctx, source, &Aspect::Concept)?
        .and_then(|f| ctx.repository.fact(f))
        .map(|f| f.concept.clone())
        .ok_or(AspectRuleError::MissingConceptRule)
}

fn output_location(
    ctx: &EvaluationContext<'_>,
    rules: &OutputRules,
    instance: InstanceId,
) -> Result<Option<FactId>, AspectRuleError> {
    let Some(variable) = &rules.location else {
        return Ok(None);
    };
    let parent = ctx
        .binding(variable)
        .and_then(|b| b.yielded_fact())
        .filter(|f| f.instance == instance)
        .filter(|f| ctx.repository.fact(*f).is_some_and(|f| f.is_tuple()));
    parent
        .map(Some)
        .ok_or_else(|| AspectRuleError::BadLocation(format!("${}", variable)))
}

fn output_entity(
    ctx: &EvaluationContext<'_>,
    rules: &OutputRules,
) -> Result<EntityIdentifier, AspectRuleError> {
    let rule = &rules.entity_identifier;
    let source = source_of(rules, rule.source.as_ref());
    let inherited = source_context(ctx, source, &Aspect::EntityIdentifier)?.map(|c| &c.entity);

    let scheme = match &rule.scheme {
        Some(expression) => atomic(ctx, expression, AtomicType::AnyAtomic)?.map(|v| v.to_string()),
        None => inherited.map(|e| e.scheme.clone()),
    };
    let value = match &rule.value {
        Some(expression) => atomic(ctx, expression, AtomicType::AnyAtomic)?.map(|v| v.to_string()),
        None => inherited.map(|e| e.value.clone()),
    };
    match (scheme, value) {
        (Some(scheme), Some(value)) => Ok(EntityIdentifier::new(scheme, value)),
        _ => Err(AspectRuleError::MissingEntityIdentifierRule),
    }
}

fn output_period(ctx: &EvaluationContext<'_>, rules: &OutputRules) -> Result<Period, AspectRuleError> {
    let rule = &rules.period;
    let date = |expression: &Expression, end_of_day: bool| -> Result<_, AspectRuleError> {
        atomic(ctx, expression, AtomicType::DateTime)?
            .and_then(|v| v.as_datetime(end_of_day))
            .ok_or(AspectRuleError::MissingPeriodRule)
    };
    match &rule.spec {
        Some(PeriodSpec::Forever) => Ok(Period::Forever),
        Some(PeriodSpec::Instant(at)) => Ok(Period::Instant { at: date(at, true)? }),
        Some(PeriodSpec::Duration { start, end }) => Ok(Period::Duration {
            start: date(start, false)?,
            end: date(end, true)?,
        }),
        None => {
            let source = source_of(rules, rule.source.as_ref());
            source_context(ctx, source, &Aspect::Period)?
                .map(|c| c.period.clone())
                .ok_or(AspectRuleError::MissingPeriodRule)
        }
    }
}

/// Sorted (multiply, divide) measures after cancellation
fn output_unit(
    ctx: &EvaluationContext<'_>,
    rules: &OutputRules,
    concept: &QName,
) -> Result<(Vec<QName>, Vec<QName>), AspectRuleError> {
    let rule = &rules.unit;
    let source = source_of(rules, rule.source.as_ref());
    let inherited = match source_fact(ctx, source, &Aspect::Unit)? {
        Some(fact) if rule.augment => ctx.repository.fact_unit(fact),
        _ => None,
    };
    if inherited.is_none() && !rule.has_measure_rules() {
        return Err(AspectRuleError::MissingUnitRule(concept.clone()));
    }

    let mut multiply = Vec::new();
    let mut divide = Vec::new();
    if let Some(unit) = inherited {
        multiply.extend(unit.multiply.iter().cloned());
        divide.extend(unit.divide.iter().cloned());
    }
    for measure in &rule.multiply_by {
        let (m, d) = measures_of(ctx, measure, concept)?;
        multiply.extend(m);
        divide.extend(d);
    }
    for measure in &rule.divide_by {
        let (m, d) = measures_of(ctx, measure, concept)?;
        multiply.extend(d);
        divide.extend(m);
    }

    let (mut multiply, divide) = cancel_measures(&multiply, &divide);
    if multiply.is_empty() {
        // an inherited unit cancelling to nothing needs an explicit rule
        if !rule.has_measure_rules() {
            return Err(AspectRuleError::MissingUnitRule(concept.clone()));
        }
        multiply.push(QName::pure());
    }
    Ok((multiply, divide))
}

fn measures_of(
    ctx: &EvaluationContext<'_>,
    rule: &MeasureRule,
    concept: &QName,
) -> Result<(Vec<QName>, Vec<QName>), AspectRuleError> {
    match rule {
        MeasureRule::Measure(expression) => {
            let values = atomize(&*ctx.repository, &ctx.evaluate_sequence(expression, None)?);
            let measures = values
                .into_iter()
                .map(|v| match v {
                    Value::QName(q) => Ok(q),
                    other => Err(ExpressionError::type_error(format!(
                        "measure {} is not a QName",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((measures, Vec::new()))
        }
        MeasureRule::Source(source) => source_fact(ctx, Some(source), &Aspect::Unit)?
            .and_then(|f| ctx.repository.fact_unit(f))
            .map(|u| (u.multiply.clone(), u.divide.clone()))
            .ok_or_else(|| AspectRuleError::MissingUnitRule(concept.clone())),
    }
}

fn output_dimensions(
    ctx: &EvaluationContext<'_>,
    rules: &OutputRules,
) -> Result<BTreeMap<QName, DimensionValue>, AspectRuleError> {
    let defaults = ctx.repository.dimension_defaults();
    let mut dimensions: BTreeSet<QName> = match &rules.source {
        None => BTreeSet::new(),
        Some(AspectSource::Uncovered) => ctx
            .bindings
            .iter()
            .filter(|b| b.is_fact_variable() && !b.is_fallback())
            .filter_map(|b| b.yielded_fact())
            .filter_map(|f| ctx.repository.fact_context(f))
            .flat_map(|c| c.dimension_aspects(defaults))
            .collect(),
        Some(source) => source_context(ctx, Some(source), &Aspect::Dimensions)?
            .map(|c| c.dimension_aspects(defaults))
            .unwrap_or_default(),
    };
    dimensions.extend(rules.explicit_dimensions.iter().map(|r| r.dimension.clone()));
    dimensions.extend(rules.typed_dimensions.iter().map(|r| r.dimension.clone()));
    for rule in &rules.explicit_dimensions {
        if rule.omit {
            dimensions.remove(&rule.dimension);
        }
    }
    for rule in &rules.typed_dimensions {
        if rule.omit {
            dimensions.remove(&rule.dimension);
        }
    }

    let mut resolved = BTreeMap::new();
    for dimension in dimensions {
        let explicit = rules
            .explicit_dimensions
            .iter()
            .find(|r| r.dimension == dimension);
        let typed = rules.typed_dimensions.iter().find(|r| r.dimension == dimension);

        let declared = match (explicit, typed) {
            (Some(rule), _) => match &rule.member {
                Some(expression) => match atomic(ctx, expression, AtomicType::QName)? {
                    Some(Value::QName(member)) => Some(DimensionValue::explicit(member)),
                    _ => {
                        return Err(AspectRuleError::MissingExplicitDimensionRule(dimension))
                    }
                },
                None => None,
            },
            (None, Some(rule)) => match &rule.value {
                Some(expression) => {
                    let nodes = ctx.evaluate_sequence(expression, None)?;
                    match nodes.as_slice() {
                        [Value::Node(node)] => Some(DimensionValue::typed(node.clone())),
                        _ => return Err(AspectRuleError::MissingTypedDimensionRule(dimension)),
                    }
                }
                None => None,
            },
            (None, None) => None,
        };

        let value = match declared {
            Some(value) => Some(value),
            None => {
                let specific = explicit
                    .and_then(|r| r.source.as_ref())
                    .or_else(|| typed.and_then(|r| r.source.as_ref()));
                let source = source_of(rules, specific);
                let aspect = Aspect::Dimension(dimension.clone());
                match (source, source_context(ctx, source, &aspect)?) {
                    (_, Some(context)) => context.dimensions.get(&dimension).cloned(),
                    (Some(AspectSource::Uncovered), None) => None,
                    (_, None) if typed.is_some() => {
                        return Err(AspectRuleError::MissingTypedDimensionRule(dimension))
                    }
                    (_, None) => {
                        return Err(AspectRuleError::MissingExplicitDimensionRule(dimension))
                    }
                }
            }
        };

        let Some(value) = value else {
            continue;
        };
        let is_default = match &value.member {
            DimensionMember::Explicit(member) => defaults.get(&dimension) == Some(member),
            DimensionMember::Typed(_) => false,
        };
        if !is_default {
            resolved.insert(dimension, value);
        }
    }
    Ok(resolved)
}

/// Segment or scenario content outside dimensions, or the complete
/// content under the non-dimensional model
fn open_component(
    ctx: &EvaluationContext<'_>,
    rules: &OutputRules,
    container: Container,
    model: AspectModel,
) -> Result<Vec<XmlNode>, AspectRuleError> {
    let aspect = match (model, container) {
        (AspectModel::Dimensional, Container::Segment) => Aspect::NonXdtSegment,
        (AspectModel::Dimensional, Container::Scenario) => Aspect::NonXdtScenario,
        (AspectModel::NonDimensional, Container::Segment) => Aspect::CompleteSegment,
        (AspectModel::NonDimensional, Container::Scenario) => Aspect::CompleteScenario,
    };
    let rule = rules.open_components.iter().find(|r| r.container == container);
    let source = source_of(rules, rule.and_then(|r| r.source.as_ref()));

    let mut nodes = Vec::new();
    if !rule.is_some_and(|r| r.empty) {
        if let Some(context) = source_context(ctx, source, &aspect)? {
            match model {
                AspectModel::Dimensional => {
                    nodes.extend(context.non_dimensional(container).iter().cloned())
                }
                AspectModel::NonDimensional => nodes.extend(context.complete(container)),
            }
        }
    }
    if let Some(rule) = rule {
        nodes.extend(rule.fragments.iter().cloned());
        if let Some(select) = &rule.select {
            for value in ctx.evaluate_sequence(select, None)? {
                match value {
                    Value::Node(node) => nodes.push(node),
                    other => {
                        return Err(ExpressionError::type_error(format!(
                            "open component content {} is not a node",
                            other
                        ))
                        .into())
                    }
                }
            }
        }
    }

    if model.is_dimensional() {
        if let Some(node) = nodes.iter().find(|n| n.name.namespace() == XBRLDI_NS) {
            return Err(AspectRuleError::BadSubsequentOccValue(node.name.clone()));
        }
    }
    Ok(nodes)
}

/// `decimals` / `precision` value: an integer or `INF`
fn digits_of(ctx: &EvaluationContext<'_>, expression: &Expression) -> Result<Digits, ExpressionError> {
    match atomic(ctx, expression, AtomicType::AnyAtomic)? {
        Some(Value::Integer(i)) => i32::try_from(i)
            .map(Digits::Finite)
            .map_err(|_| ExpressionError::type_error(format!("{} digits out of range", i))),
        Some(Value::Decimal(d)) if d.fract().is_zero() => d
            .to_i32()
            .map(Digits::Finite)
            .ok_or_else(|| ExpressionError::type_error(format!("{} digits out of range", d))),
        Some(Value::Double(f)) if f.is_infinite() && f > 0.0 => Ok(Digits::Infinite),
        Some(Value::String(s)) if s.trim() == "INF" => Ok(Digits::Infinite),
        other => Err(ExpressionError::type_error(format!(
            "{} is not a valid accuracy: {:?}",
            expression.source(),
            other
        ))),
    }
}
