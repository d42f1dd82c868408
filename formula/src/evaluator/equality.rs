//! Aspect equality between an exemplar fact and a candidate fact

use super::expression::{ExprEnv, ExpressionEvaluator, Scope};
use crate::aspect::Aspect;
use crate::ast::QName;
use crate::error::ExpressionError;
use crate::model::{
    node_lists_correspond, Container, DimensionLookup, DimensionMember, FactId,
    ModelRepository, Value, XmlNode,
};
use std::collections::{HashMap, HashSet};

/// Whether `candidate` has the same value as `exemplar` for `aspect`.
///
/// A missing exemplar (a fallen-back variable) never matches. Facts from
/// different instances always match on location, and a defaulted dimension
/// matches an absent one across instances.
pub fn aspect_matches(
    repository: &dyn ModelRepository,
    evaluator: &dyn ExpressionEvaluator,
    exemplar: Option<FactId>,
    candidate: FactId,
    aspect: &Aspect,
) -> Result<bool, ExpressionError> {
    let Some(exemplar) = exemplar else {
        return Ok(false);
    };
    if exemplar == candidate {
        return Ok(true);
    }
    let (Some(f1), Some(f2)) = (repository.fact(exemplar), repository.fact(candidate)) else {
        return Ok(false);
    };
    let same_instance = exemplar.instance == candidate.instance;

    match aspect {
        Aspect::Location => return Ok(!same_instance || f1.parent == f2.parent),
        Aspect::Concept => return Ok(f1.concept == f2.concept),
        _ => {}
    }
    if f1.is_tuple() || f2.is_tuple() {
        return Ok(f1.is_tuple() && f2.is_tuple());
    }
    if *aspect == Aspect::Unit {
        return Ok(match (repository.fact_unit(exemplar), repository.fact_unit(candidate)) {
            (Some(u1), Some(u2)) => f1.unit == f2.unit || u1.is_equal_to(u2),
            (None, None) => true,
            _ => false,
        });
    }

    let (Some(c1), Some(c2)) = (
        repository.fact_context(exemplar),
        repository.fact_context(candidate),
    ) else {
        return Ok(false);
    };
    if f1.context == f2.context {
        return Ok(true);
    }

    Ok(match aspect {
        Aspect::Period => c1.is_period_equal_to(c2),
        Aspect::EntityIdentifier => c1.is_entity_identifier_equal_to(c2),
        Aspect::CompleteSegment => node_lists_correspond(
            &c1.complete(Container::Segment),
            &c2.complete(Container::Segment),
        ),
        Aspect::CompleteScenario => node_lists_correspond(
            &c1.complete(Container::Scenario),
            &c2.complete(Container::Scenario),
        ),
        Aspect::NonXdtSegment => node_lists_correspond(
            c1.non_dimensional(Container::Segment),
            c2.non_dimensional(Container::Segment),
        ),
        Aspect::NonXdtScenario => node_lists_correspond(
            c1.non_dimensional(Container::Scenario),
            c2.non_dimensional(Container::Scenario),
        ),
        Aspect::Dimension(dimension) => {
            let defaults = repository.dimension_defaults();
            let v1 = c1.dimension_value(dimension, defaults);
            let v2 = c2.dimension_value(dimension, defaults);
            return dimension_values_match(
                repository,
                evaluator,
                dimension,
                v1,
                v2,
                same_instance,
            );
        }
        Aspect::Dimensions => true,
        Aspect::Location | Aspect::Concept | Aspect::Unit => true,
    })
}

fn dimension_values_match(
    repository: &dyn ModelRepository,
    evaluator: &dyn ExpressionEvaluator,
    dimension: &QName,
    v1: DimensionLookup<'_>,
    v2: DimensionLookup<'_>,
    same_instance: bool,
) -> Result<bool, ExpressionError> {
    use DimensionLookup::*;
    Ok(match (v1, v2) {
        (Reported(a), Reported(b)) => match (&a.member, &b.member) {
            (DimensionMember::Explicit(m1), DimensionMember::Explicit(m2)) => m1 == m2,
            (DimensionMember::Typed(n1), DimensionMember::Typed(n2)) => {
                return typed_members_equal(repository, evaluator, dimension, n1, n2);
            }
            _ => false,
        },
        (Reported(a), Default(d)) | (Default(d), Reported(a)) => {
            a.member.explicit_member() == Some(d)
        }
        (Reported(_), Absent) | (Absent, Reported(_)) => false,
        // both facts take the default; across instances the member is not compared
        (Default(d1), Default(d2)) => !same_instance || d1 == d2,
        (Default(_), Absent) | (Absent, Default(_)) => !same_instance,
        (Absent, Absent) => true,
    })
}

fn typed_members_equal(
    repository: &dyn ModelRepository,
    evaluator: &dyn ExpressionEvaluator,
    dimension: &QName,
    a: &XmlNode,
    b: &XmlNode,
) -> Result<bool, ExpressionError> {
    match repository.typed_dimension_equality(dimension) {
        Some(test) => {
            let mut scope = Scope::new();
            scope.insert(QName::local("a"), vec![Value::Node(a.clone())]);
            scope.insert(QName::local("b"), vec![Value::Node(b.clone())]);
            evaluator.evaluate_boolean(test, &ExprEnv::new(repository, &scope))
        }
        None => Ok(crate::model::nodes_correspond(a, b)),
    }
}

/// Memo of aspect comparisons for one run
///
/// Results are keyed by (exemplar, candidate, aspect). Aspects that have
/// failed before are tested first, so mismatches short-circuit early.
#[derive(Debug, Default)]
pub struct EqualityCache {
    results: HashMap<(FactId, FactId, Aspect), bool>,
    failed_aspects: HashSet<Aspect>,
}

impl EqualityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conjunction of [`aspect_matches`] over `aspects`
    pub fn aspects_match<'s, I>(
        &mut self,
        repository: &dyn ModelRepository,
        evaluator: &dyn ExpressionEvaluator,
        exemplar: Option<FactId>,
        candidate: FactId,
        aspects: I,
    ) -> Result<bool, ExpressionError>
    where
        I: IntoIterator<Item = &'s Aspect>,
    {
        let Some(exemplar_id) = exemplar else {
            return Ok(false);
        };
        if exemplar_id == candidate {
            return Ok(true);
        }

        let mut uncached = Vec::new();
        for aspect in aspects {
            match self.results.get(&(exemplar_id, candidate, aspect.clone())) {
                Some(false) => return Ok(false),
                Some(true) => {}
                None => uncached.push(aspect),
            }
        }
        uncached.sort_by_key(|a| !self.failed_aspects.contains(*a));

        for aspect in uncached {
            let matches = aspect_matches(repository, evaluator, exemplar, candidate, aspect)?;
            self.results
                .insert((exemplar_id, candidate, aspect.clone()), matches);
            if !matches {
                self.failed_aspects.insert(aspect.clone());
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn clear(&mut self) {
        self.results.clear();
        self.failed_aspects.clear();
    }
}
