//! Implicit filtering
//!
//! A fact variable's candidates must agree with the facts already bound on
//! every aspect that neither side covers. Exemplars come from the
//! [`UncoveredAspects`](super::context::UncoveredAspects) map.

use super::context::{BoundVariable, EvaluationContext};
use crate::aspect::{Aspect, AspectSet};
use crate::ast::QName;
use crate::error::ExpressionError;
use crate::model::FactId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Aspects the variable is matched on: those it defines plus those any bound
/// variable contributed, minus what it covers
pub fn matchable_aspects(ctx: &EvaluationContext<'_>, draft: &BoundVariable) -> AspectSet {
    draft
        .aspects_defined
        .iter()
        .chain(ctx.uncovered.aspects())
        .filter(|a| **a != Aspect::Dimensions && !draft.aspects_covered.contains(*a))
        .cloned()
        .collect()
}

/// Keep the facts that match each exemplar on its aspects.
///
/// Entries without an exemplar constrain nothing. With winnowing traces on,
/// aspects are tested one at a time and logged; otherwise aspects sharing an
/// exemplar are tested together.
pub fn implicit_filter(
    ctx: &mut EvaluationContext<'_>,
    draft: &BoundVariable,
    facts: Vec<FactId>,
) -> Result<Vec<FactId>, ExpressionError> {
    if facts.is_empty() {
        return Ok(facts);
    }
    let aspects = matchable_aspects(ctx, draft);
    if aspects.is_empty() {
        if tuple_with_only_uncovered_dimensions(ctx, draft, &facts) {
            return Ok(Vec::new());
        }
        return Ok(facts);
    }

    // a single prior tuple binding leaves only its dimensions to match on
    if let [prior] = ctx.bindings.as_slice() {
        if let Some(tuple) = lone_tuple_exemplar(ctx) {
            if tuple_with_only_uncovered_dimensions(ctx, prior, &[tuple]) {
                return Ok(Vec::new());
            }
            return Ok(facts);
        }
    }

    if ctx.options.trace_variable_filter_winnowing {
        let mut facts = facts;
        for aspect in &aspects {
            let Some(exemplar) = ctx.uncovered.exemplar(aspect) else {
                continue;
            };
            let mut passed = Vec::with_capacity(facts.len());
            for fact in facts {
                if ctx.aspects_match(Some(exemplar), fact, [aspect])? {
                    passed.push(fact);
                }
            }
            facts = passed;
            info!(
                code = "formula:trace",
                variable = %draft.name,
                aspect = %aspect,
                "implicit filter passes {} facts",
                facts.len()
            );
            if facts.is_empty() {
                break;
            }
        }
        return Ok(facts);
    }

    let mut by_exemplar: BTreeMap<FactId, Vec<Aspect>> = BTreeMap::new();
    for aspect in &aspects {
        if let Some(exemplar) = ctx.uncovered.exemplar(aspect) {
            by_exemplar.entry(exemplar).or_default().push(aspect.clone());
        }
    }
    if by_exemplar.is_empty() {
        return Ok(facts);
    }

    let mut passed = Vec::with_capacity(facts.len());
    'facts: for fact in facts {
        for (exemplar, aspects) in &by_exemplar {
            if !ctx.aspects_match(Some(*exemplar), fact, aspects)? {
                continue 'facts;
            }
        }
        passed.push(fact);
    }
    Ok(passed)
}

/// Dimensions reported anywhere in the source instance, plus every
/// defaulted dimension
fn dimension_universe(ctx: &EvaluationContext<'_>) -> BTreeSet<QName> {
    let defaults = ctx.repository.dimension_defaults();
    let mut universe: BTreeSet<QName> = defaults.keys().cloned().collect();
    if let Some(instance) = ctx.repository.instance(ctx.source_instance) {
        for context in instance.contexts() {
            universe.extend(context.dimension_aspects(defaults));
        }
    }
    universe
}

/// The binding is over tuples and leaves nothing but dimensions uncovered.
/// Tuples report no dimensions, so such a binding matches no item.
fn tuple_with_only_uncovered_dimensions(
    ctx: &EvaluationContext<'_>,
    binding: &BoundVariable,
    facts: &[FactId],
) -> bool {
    let uncovered: AspectSet = binding
        .aspects_defined
        .iter()
        .cloned()
        .chain(dimension_universe(ctx).into_iter().map(Aspect::Dimension))
        .filter(|a| *a != Aspect::Dimensions && !binding.aspects_covered.contains(a))
        .collect();
    !uncovered.is_empty()
        && uncovered.iter().all(Aspect::is_dimension)
        && facts
            .iter()
            .all(|f| ctx.repository.fact(*f).is_some_and(|f| f.is_tuple()))
}

/// Tuple recorded for the dimensions aspect when every other entry is
/// covered
fn lone_tuple_exemplar(ctx: &EvaluationContext<'_>) -> Option<FactId> {
    let tuple = ctx
        .uncovered
        .exemplar(&Aspect::Dimensions)
        .filter(|f| ctx.repository.fact(*f).is_some_and(|f| f.is_tuple()))?;
    ctx.uncovered
        .aspects()
        .filter(|a| **a != Aspect::Dimensions)
        .all(|a| ctx.uncovered.exemplar(a).is_none())
        .then_some(tuple)
}
