//! Evaluation deduplication
//!
//! Every evaluation that reaches a rule body is recorded as a tuple of
//! per-variable [`Matchable`] values. A new tuple is redundant when a
//! recorded one agrees with it on all of its non-wildcard positions.
//! Candidates are narrowed through a per-position value index before any
//! tuple is compared.

use super::context::{BoundVariable, Matchable};
use crate::ast::QName;
use std::collections::{BTreeSet, HashMap};

/// One completed variable assignment
pub type EvaluationTuple = Vec<(QName, Matchable)>;

#[derive(Debug, Default)]
pub struct Deduplicator {
    recorded: Vec<EvaluationTuple>,
    index: HashMap<QName, HashMap<Matchable, BTreeSet<usize>>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.recorded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty()
    }

    pub fn recorded(&self) -> &[EvaluationTuple] {
        &self.recorded
    }

    /// Tuple for the current bindings
    pub fn tuple_of(bindings: &[BoundVariable]) -> EvaluationTuple {
        bindings
            .iter()
            .map(|b| (b.name.clone(), b.matchable()))
            .collect()
    }

    pub fn record(&mut self, tuple: EvaluationTuple) {
        let position = self.recorded.len();
        for (name, value) in &tuple {
            self.index
                .entry(name.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(position);
        }
        self.recorded.push(tuple);
    }

    /// Whether `tuple` duplicates a recorded evaluation.
    ///
    /// A position is left out of the comparison when its variable depends
    /// on a variable that has fallen back here but is bound in one of the
    /// candidate evaluations.
    pub fn is_redundant(&self, tuple: &EvaluationTuple, bindings: &[BoundVariable]) -> bool {
        if self.recorded.is_empty() {
            return false;
        }
        let bound: Vec<&(QName, Matchable)> =
            tuple.iter().filter(|(_, v)| !v.is_wildcard()).collect();
        if bound.is_empty() {
            return true;
        }

        let mut candidate_sets = bound.iter().filter_map(|(name, value)| {
            self.index.get(name).and_then(|by_value| by_value.get(value))
        });
        let candidates: Vec<&EvaluationTuple> = match candidate_sets.next() {
            None => self.recorded.iter().collect(),
            Some(first) => {
                let mut common = first.clone();
                for set in candidate_sets {
                    common.retain(|i| set.contains(i));
                }
                common.iter().map(|&i| &self.recorded[i]).collect()
            }
        };

        let is_fallback = |name: &QName| {
            bindings
                .iter()
                .any(|b| b.name == *name && b.is_fallback())
        };
        let bound_elsewhere = |name: &QName| {
            candidates.iter().any(|recorded| {
                recorded
                    .iter()
                    .any(|(n, v)| n == name && !v.is_wildcard())
            })
        };
        let compared: Vec<&(QName, Matchable)> = bound
            .into_iter()
            .filter(|(name, _)| {
                let Some(binding) = bindings.iter().find(|b| b.name == *name) else {
                    return true;
                };
                !binding
                    .depends_on
                    .iter()
                    .any(|dep| is_fallback(dep) && bound_elsewhere(dep))
            })
            .collect();

        candidates.iter().any(|recorded| {
            compared.iter().all(|(name, value)| {
                recorded
                    .iter()
                    .any(|(n, v)| n == name && v == value)
            })
        })
    }
}
