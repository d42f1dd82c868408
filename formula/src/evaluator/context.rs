//! Evaluation context for running formula rules
//!
//! Contains all state shared by the depth-first search over variable
//! bindings. Per-rule state (candidate cache, recorded evaluations,
//! counters) lives in [`RuleRun`] instead, so a rule chained through a
//! variables-scope arc starts with its own.

use super::dedup::Deduplicator;
use super::equality::EqualityCache;
use super::expression::{ExprEnv, ExpressionEvaluator, Item, Scope};
use super::timeout::RunClock;
use crate::aspect::{Aspect, AspectSet};
use crate::ast::QName;
use crate::error::ExpressionError;
use crate::model::{DocumentItem, FactId, InstanceId, ModelRepository, Sequence};
use crate::response::{Message, RuleOutcome, RuleStats};
use crate::semantic::Rule;
use crate::FormulaOptions;
use std::collections::{BTreeSet, HashMap};
use tracing::{error, info, warn};

/// What kind of declaration produced a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Fact,
    General,
    Parameter,
    /// Result of a parent rule, visible to a variables-scope rule
    RuleResult,
}

/// Value currently held by a binding
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Unbound,
    Fact(FactId),
    /// One partition of a sequence-bound fact variable
    Facts(Vec<FactId>),
    Fallback(Sequence),
    Value(Sequence),
    RuleResult {
        value: Sequence,
        fact: Option<FactId>,
    },
}

impl BoundValue {
    /// Sequence installed in scope for this value
    pub fn to_sequence(&self) -> Sequence {
        use crate::model::Value;
        match self {
            BoundValue::Unbound => Vec::new(),
            BoundValue::Fact(id) => vec![Value::Fact(*id)],
            BoundValue::Facts(ids) => ids.iter().map(|id| Value::Fact(*id)).collect(),
            BoundValue::Fallback(seq) | BoundValue::Value(seq) => seq.clone(),
            BoundValue::RuleResult { value, .. } => value.clone(),
        }
    }
}

/// Value of one position of an evaluation tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Matchable {
    /// Matches anything: fallback, parameter and general variable positions
    Wildcard,
    Fact(FactId),
    Facts(Vec<FactId>),
}

impl Matchable {
    pub fn is_wildcard(&self) -> bool {
        *self == Matchable::Wildcard
    }
}

/// A variable bound at some depth of the search
#[derive(Debug, Clone)]
pub struct BoundVariable {
    pub name: QName,
    pub kind: BindingKind,
    pub depends_on: BTreeSet<QName>,
    pub bind_as_sequence: bool,
    pub aspects_defined: AspectSet,
    pub aspects_covered: AspectSet,
    pub value: BoundValue,
}

impl BoundVariable {
    pub fn new(name: QName, kind: BindingKind) -> Self {
        Self {
            name,
            kind,
            depends_on: BTreeSet::new(),
            bind_as_sequence: false,
            aspects_defined: AspectSet::new(),
            aspects_covered: AspectSet::new(),
            value: BoundValue::Unbound,
        }
    }

    pub fn is_fact_variable(&self) -> bool {
        self.kind == BindingKind::Fact
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.value, BoundValue::Fallback(_))
    }

    /// Fact whose aspects this binding exposes
    pub fn yielded_fact(&self) -> Option<FactId> {
        match &self.value {
            BoundValue::Fact(id) => Some(*id),
            BoundValue::Facts(ids) => ids.first().copied(),
            BoundValue::RuleResult { fact, .. } => *fact,
            _ => None,
        }
    }

    /// Facts bound, one for a single binding, all for a sequence
    pub fn yielded_facts(&self) -> Vec<FactId> {
        match &self.value {
            BoundValue::Fact(id) => vec![*id],
            BoundValue::Facts(ids) => ids.clone(),
            BoundValue::RuleResult { fact: Some(id), .. } => vec![*id],
            _ => Vec::new(),
        }
    }

    pub fn has_aspect_covered(&self, aspect: &Aspect) -> bool {
        self.aspects_covered.contains(aspect)
    }

    pub fn has_aspect_uncovered(&self, aspect: &Aspect) -> bool {
        self.aspects_defined.contains(aspect) && !self.aspects_covered.contains(aspect)
    }

    /// Position value in an evaluation tuple
    pub fn matchable(&self) -> Matchable {
        match (&self.kind, &self.value) {
            (BindingKind::General | BindingKind::Parameter, _) => Matchable::Wildcard,
            (_, BoundValue::Fact(id)) => Matchable::Fact(*id),
            (_, BoundValue::Facts(ids)) => Matchable::Facts(ids.clone()),
            (_, BoundValue::RuleResult { fact: Some(id), .. }) => Matchable::Fact(*id),
            _ => Matchable::Wildcard,
        }
    }
}

/// Aspect → exemplar fact contributed by the variables bound so far
///
/// An entry of `None` means the contributing variable covered the aspect,
/// so it constrains nothing. A missing entry means no bound variable
/// defines the aspect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UncoveredAspects {
    entries: HashMap<Aspect, Option<FactId>>,
}

impl UncoveredAspects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, aspect: &Aspect) -> Option<Option<FactId>> {
        self.entries.get(aspect).copied()
    }

    /// Exemplar recorded for the aspect, if any
    pub fn exemplar(&self, aspect: &Aspect) -> Option<FactId> {
        self.entries.get(aspect).copied().flatten()
    }

    pub fn aspects(&self) -> impl Iterator<Item = &Aspect> {
        self.entries.keys()
    }

    /// Set an entry, returning the previous state for restoring
    pub(crate) fn set(&mut self, aspect: Aspect, exemplar: Option<FactId>) -> Option<Option<FactId>> {
        self.entries.insert(aspect, exemplar)
    }

    pub(crate) fn restore(&mut self, aspect: Aspect, prior: Option<Option<FactId>>) {
        match prior {
            Some(p) => {
                self.entries.insert(aspect, p);
            }
            None => {
                self.entries.remove(&aspect);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Last context and unit created in each output instance
#[derive(Debug, Default)]
pub struct OutputAnchors {
    pub last_context: HashMap<InstanceId, DocumentItem>,
    pub last_unit: HashMap<InstanceId, DocumentItem>,
}

/// Shared state of one formula run
pub struct EvaluationContext<'a> {
    pub repository: &'a mut dyn ModelRepository,
    pub evaluator: &'a dyn ExpressionEvaluator,
    pub options: &'a FormulaOptions,
    pub clock: &'a RunClock,

    /// Instance facts are drawn from when a variable names none
    pub source_instance: InstanceId,

    /// In-scope variables (parameters, instances, bound variables)
    pub scope: Scope,

    /// Bindings in the order they were made
    pub bindings: Vec<BoundVariable>,

    pub uncovered: UncoveredAspects,
    pub equality: EqualityCache,
    pub anchors: OutputAnchors,

    /// Counters by rule id, accumulated across invocations
    pub stats: HashMap<String, RuleStats>,
    /// Output facts by rule id
    pub produced: HashMap<String, Vec<FactId>>,
    /// First failure of each variables-scope rule
    pub scoped_failures: HashMap<String, RuleOutcome>,
    pub messages: Vec<Message>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        repository: &'a mut dyn ModelRepository,
        evaluator: &'a dyn ExpressionEvaluator,
        options: &'a FormulaOptions,
        clock: &'a RunClock,
        source_instance: InstanceId,
    ) -> Self {
        Self {
            repository,
            evaluator,
            options,
            clock,
            source_instance,
            scope: Scope::new(),
            bindings: Vec::new(),
            uncovered: UncoveredAspects::new(),
            equality: EqualityCache::new(),
            anchors: OutputAnchors::default(),
            stats: HashMap::new(),
            produced: HashMap::new(),
            scoped_failures: HashMap::new(),
            messages: Vec::new(),
        }
    }

    /// Expression environment over the current scope
    pub fn env(&self) -> ExprEnv<'_> {
        ExprEnv::new(&*self.repository, &self.scope)
    }

    pub fn binding(&self, name: &QName) -> Option<&BoundVariable> {
        self.bindings.iter().find(|b| b.name == *name)
    }

    pub fn binding_mut(&mut self, name: &QName) -> Option<&mut BoundVariable> {
        self.bindings.iter_mut().find(|b| b.name == *name)
    }

    /// Fact yielded by another variable, for filters that refer to it
    pub fn yielded_fact_of(&self, name: &QName) -> Result<Option<FactId>, ExpressionError> {
        self.binding(name)
            .map(|b| b.yielded_fact())
            .ok_or_else(|| {
                ExpressionError::new(
                    "xbrlve:unresolvedDependency",
                    format!("variable ${} is not bound", name),
                )
            })
    }

    /// Cached conjunction of aspect comparisons
    pub fn aspects_match<'s, I>(
        &mut self,
        exemplar: Option<FactId>,
        candidate: FactId,
        aspects: I,
    ) -> Result<bool, ExpressionError>
    where
        I: IntoIterator<Item = &'s Aspect>,
    {
        self.equality.aspects_match(
            &*self.repository,
            self.evaluator,
            exemplar,
            candidate,
            aspects,
        )
    }

    pub fn evaluate_sequence<'s>(
        &'s self,
        expression: &crate::ast::Expression,
        item: Option<Item<'s>>,
    ) -> Result<Sequence, ExpressionError> {
        let mut env = self.env();
        env.item = item;
        self.evaluator.evaluate_sequence(expression, &env)
    }

    pub fn evaluate_boolean<'s>(
        &'s self,
        expression: &crate::ast::Expression,
        item: Option<Item<'s>>,
    ) -> Result<bool, ExpressionError> {
        let mut env = self.env();
        env.item = item;
        self.evaluator.evaluate_boolean(expression, &env)
    }

    pub fn stats_mut(&mut self, rule: &Rule) -> &mut RuleStats {
        self.stats.entry(rule.id.clone()).or_default()
    }

    /// Record a message and log it
    pub fn emit(&mut self, message: Message) {
        use crate::response::Severity;
        match message.severity {
            Severity::Info => info!(code = %message.code, rule = %message.rule, "{}", message.text),
            Severity::Warning => {
                warn!(code = %message.code, rule = %message.rule, "{}", message.text)
            }
            Severity::Error => {
                error!(code = %message.code, rule = %message.rule, "{}", message.text)
            }
        }
        self.messages.push(message);
    }
}

/// State of one invocation of a rule
pub struct RuleRun<'r> {
    pub rule: &'r Rule,
    pub candidates: super::binding::CandidateCache,
    pub dedup: Deduplicator,
    /// Evaluations of an existence assertion that reached its body
    pub existence_count: usize,
}

impl<'r> RuleRun<'r> {
    pub fn new(rule: &'r Rule) -> Self {
        Self {
            rule,
            candidates: Default::default(),
            dedup: Deduplicator::new(),
            existence_count: 0,
        }
    }
}
