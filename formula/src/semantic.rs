//! Rule declarations
//!
//! Rules arrive fully resolved: variables are in dependency order, filters
//! are attached through arcs carrying complement and cover flags, and every
//! expression is a handle owned by the expression evaluator.

use crate::aspect::{Aspect, AspectModel, AspectSet};
use crate::ast::{Expression, QName};
use crate::model::{Container, PeriodType, XmlNode};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A variable set with a body: formula, tuple or assertion
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub label: Option<String>,
    pub kind: RuleKind,
    pub aspect_model: AspectModel,
    pub implicit_filtering: bool,
    /// Declarations in dependency order
    pub variables: Vec<VariableDeclaration>,
    pub group_filters: Vec<FilterArc>,
    pub preconditions: Vec<Precondition>,
    /// Rules evaluated once per evaluation of this one (variables-scope arcs)
    pub scoped_rules: Vec<ScopedRule>,
}

impl Rule {
    pub fn new(id: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            id: id.into(),
            label: None,
            kind,
            aspect_model: AspectModel::Dimensional,
            implicit_filtering: true,
            variables: Vec::new(),
            group_filters: Vec::new(),
            preconditions: Vec::new(),
            scoped_rules: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_variable(mut self, variable: VariableDeclaration) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_group_filter(mut self, arc: FilterArc) -> Self {
        self.group_filters.push(arc);
        self
    }

    pub fn with_precondition(mut self, test: Expression) -> Self {
        self.preconditions.push(Precondition { test });
        self
    }

    pub fn with_scoped_rule(mut self, name: Option<QName>, rule: Rule) -> Self {
        self.scoped_rules.push(ScopedRule {
            name,
            rule: Arc::new(rule),
        });
        self
    }

    pub fn with_aspect_model(mut self, model: AspectModel) -> Self {
        self.aspect_model = model;
        self
    }

    pub fn without_implicit_filtering(mut self) -> Self {
        self.implicit_filtering = false;
        self
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn variable(&self, name: &QName) -> Option<&VariableDeclaration> {
        self.variables.iter().find(|v| v.name == *name)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} {} ({})", self.kind.name(), self.id, label),
            None => write!(f, "{} {}", self.kind.name(), self.id),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RuleKind {
    Formula(Formula),
    Tuple(TupleRule),
    ExistenceAssertion(ExistenceAssertion),
    ValueAssertion(ValueAssertion),
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Formula(_) => "formula",
            RuleKind::Tuple(_) => "tuple",
            RuleKind::ExistenceAssertion(_) => "existenceAssertion",
            RuleKind::ValueAssertion(_) => "valueAssertion",
        }
    }

    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            RuleKind::ExistenceAssertion(_) | RuleKind::ValueAssertion(_)
        )
    }

    pub fn output_rules(&self) -> Option<&OutputRules> {
        match self {
            RuleKind::Formula(f) => Some(&f.output),
            RuleKind::Tuple(t) => Some(&t.output),
            _ => None,
        }
    }
}

/// Derives one output fact per evaluation
#[derive(Debug, Clone)]
pub struct Formula {
    pub value: Expression,
    pub accuracy: Option<AccuracyRule>,
    pub output: OutputRules,
}

/// Derives one output tuple per evaluation
#[derive(Debug, Clone)]
pub struct TupleRule {
    pub output: OutputRules,
}

#[derive(Debug, Clone)]
pub enum AccuracyRule {
    Decimals(Expression),
    Precision(Expression),
}

/// Counts evaluations and judges the count once per run
#[derive(Debug, Clone, Default)]
pub struct ExistenceAssertion {
    /// Test over the evaluation count (the count is the context item);
    /// defaults to `count > 0`
    pub test: Option<Expression>,
    pub messages: AssertionMessages,
}

/// Tests every evaluation
#[derive(Debug, Clone)]
pub struct ValueAssertion {
    pub test: Expression,
    pub messages: AssertionMessages,
}

#[derive(Debug, Clone, Default)]
pub struct AssertionMessages {
    pub satisfied: Option<MessageTemplate>,
    pub unsatisfied: Option<MessageTemplate>,
    pub unsatisfied_severity: UnsatisfiedSeverity,
}

/// Severity reported for an unsatisfied assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnsatisfiedSeverity {
    Ok,
    Warning,
    #[default]
    Error,
}

/// Message text with `{$variable}` and `{expression}` placeholders
///
/// Expression placeholders are matched by source text against `expressions`.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub text: String,
    pub expressions: Vec<Expression>,
}

impl MessageTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expressions: Vec::new(),
        }
    }

    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.expressions.push(expression);
        self
    }
}

/// Guard evaluated before the body of every evaluation
#[derive(Debug, Clone)]
pub struct Precondition {
    pub test: Expression,
}

/// Rule reached through a variables-scope arc
///
/// When `name` is set, the parent's result is visible to the scoped rule
/// under that variable name.
#[derive(Debug, Clone)]
pub struct ScopedRule {
    pub name: Option<QName>,
    pub rule: Arc<Rule>,
}

/// Declared variable in dependency order
#[derive(Debug, Clone)]
pub struct VariableDeclaration {
    pub name: QName,
    pub kind: VariableKind,
    /// Variables referenced by this declaration's expressions and filters
    pub depends_on: BTreeSet<QName>,
}

impl VariableDeclaration {
    pub fn fact(name: QName, variable: FactVariable) -> Self {
        Self {
            name,
            kind: VariableKind::Fact(variable),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn general(name: QName, variable: GeneralVariable) -> Self {
        Self {
            name,
            kind: VariableKind::General(variable),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn parameter(name: QName, parameter: QName) -> Self {
        Self {
            name,
            kind: VariableKind::Parameter(parameter),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn depending_on(mut self, variable: QName) -> Self {
        self.depends_on.insert(variable);
        self
    }

    pub fn has_variable_dependencies(&self) -> bool {
        !self.depends_on.is_empty()
    }

    pub fn is_fact_variable(&self) -> bool {
        matches!(self.kind, VariableKind::Fact(_))
    }
}

#[derive(Debug, Clone)]
pub enum VariableKind {
    Fact(FactVariable),
    General(GeneralVariable),
    /// Reference to a run parameter by name
    Parameter(QName),
}

#[derive(Debug, Clone, Default)]
pub struct FactVariable {
    /// Instances to draw candidates from; the source instance when empty
    pub from_instances: Vec<QName>,
    pub bind_as_sequence: bool,
    pub nils: bool,
    /// Allow aspect-matched facts in one sequence
    pub matches: bool,
    pub filters: Vec<FilterArc>,
    pub fallback: Option<Expression>,
}

impl FactVariable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, arc: FilterArc) -> Self {
        self.filters.push(arc);
        self
    }

    pub fn with_fallback(mut self, fallback: Expression) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn bind_as_sequence(mut self) -> Self {
        self.bind_as_sequence = true;
        self
    }

    pub fn with_nils(mut self) -> Self {
        self.nils = true;
        self
    }

    pub fn with_matches(mut self) -> Self {
        self.matches = true;
        self
    }

    pub fn from_instance(mut self, instance: QName) -> Self {
        self.from_instances.push(instance);
        self
    }
}

#[derive(Debug, Clone)]
pub struct GeneralVariable {
    pub select: Expression,
    pub bind_as_sequence: bool,
    pub from_instances: Vec<QName>,
}

impl GeneralVariable {
    pub fn new(select: Expression) -> Self {
        Self {
            select,
            bind_as_sequence: false,
            from_instances: Vec::new(),
        }
    }

    pub fn bind_as_sequence(mut self) -> Self {
        self.bind_as_sequence = true;
        self
    }
}

/// Filter attached to a variable, a group or a boolean filter
#[derive(Debug, Clone)]
pub struct FilterArc {
    pub filter: Arc<Filter>,
    pub complement: bool,
    pub cover: bool,
}

impl FilterArc {
    /// Covering, non-complemented arc
    pub fn new(filter: Filter) -> Self {
        Self {
            filter: Arc::new(filter),
            complement: false,
            cover: true,
        }
    }

    pub fn complemented(mut self) -> Self {
        self.complement = true;
        self
    }

    pub fn uncovering(mut self) -> Self {
        self.cover = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub label: Option<String>,
    pub kind: FilterKind,
}

impl Filter {
    pub fn new(kind: FilterKind) -> Self {
        Self { label: None, kind }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn concept_name(name: QName) -> Self {
        Self::new(FilterKind::ConceptName {
            names: vec![name],
            expressions: Vec::new(),
        })
    }

    pub fn explicit_dimension(dimension: QName, member: QName) -> Self {
        Self::new(FilterKind::ExplicitDimension {
            dimension,
            members: vec![MemberSelector::Name(member)],
        })
    }

    pub fn match_aspect(aspect: Aspect, variable: QName) -> Self {
        Self::new(FilterKind::Match { aspect, variable })
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(l) => write!(f, "{} {}", self.kind.name(), l),
            None => write!(f, "{}", self.kind.name()),
        }
    }
}

/// Which end of the other variable's period an instant filter uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

#[derive(Debug, Clone)]
pub enum MemberSelector {
    Name(QName),
    /// Member taken from another variable's bound fact
    Variable(QName),
    /// QName expression evaluated against the candidate fact
    Expression(Expression),
}

#[derive(Debug, Clone)]
pub enum FilterKind {
    And(Vec<FilterArc>),
    Or(Vec<FilterArc>),
    ConceptName {
        names: Vec<QName>,
        expressions: Vec<Expression>,
    },
    ConceptPeriodType(PeriodType),
    ConceptDataType(QName),
    /// Boolean test with the candidate fact as context item
    General(Expression),
    /// Boolean test with the candidate's period as context item
    Period(Expression),
    Forever,
    /// Instant equal to the evaluated date
    PeriodInstant(Expression),
    /// Instant equal to the start or end of another variable's period
    InstantDuration {
        variable: QName,
        boundary: Boundary,
    },
    EntitySpecificIdentifier {
        scheme: String,
        value: String,
    },
    EntityScheme(String),
    EntityRegexpIdentifier(Regex),
    EntityRegexpScheme(Regex),
    ExplicitDimension {
        dimension: QName,
        members: Vec<MemberSelector>,
    },
    /// Facts reporting the dimension, optionally passing a test on the member
    TypedDimension {
        dimension: QName,
        test: Option<Expression>,
    },
    SingleMeasure(QName),
    /// Boolean test with the candidate's unit measures as context
    GeneralMeasures(Expression),
    /// Same value as another variable's fact for one aspect
    Match {
        aspect: Aspect,
        variable: QName,
    },
    /// Same value as another variable's fact for every uncovered aspect
    Relative(QName),
    /// Same parent as another variable's fact
    Sibling(QName),
    Nil,
    AspectCover(AspectCover),
}

impl FilterKind {
    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::And(_) => "andFilter",
            FilterKind::Or(_) => "orFilter",
            FilterKind::ConceptName { .. } => "conceptName",
            FilterKind::ConceptPeriodType(_) => "conceptPeriodType",
            FilterKind::ConceptDataType(_) => "conceptDataType",
            FilterKind::General(_) => "generalFilter",
            FilterKind::Period(_) => "period",
            FilterKind::Forever => "forever",
            FilterKind::PeriodInstant(_) => "instant",
            FilterKind::InstantDuration { .. } => "instantDuration",
            FilterKind::EntitySpecificIdentifier { .. } => "identifier",
            FilterKind::EntityScheme(_) => "specificScheme",
            FilterKind::EntityRegexpIdentifier(_) => "regexpIdentifier",
            FilterKind::EntityRegexpScheme(_) => "regexpScheme",
            FilterKind::ExplicitDimension { .. } => "explicitDimension",
            FilterKind::TypedDimension { .. } => "typedDimension",
            FilterKind::SingleMeasure(_) => "singleMeasure",
            FilterKind::GeneralMeasures(_) => "generalMeasures",
            FilterKind::Match { .. } => "match",
            FilterKind::Relative(_) => "relativeFilter",
            FilterKind::Sibling(_) => "parentFilter",
            FilterKind::Nil => "nil",
            FilterKind::AspectCover(_) => "aspectCover",
        }
    }
}

/// Aspect cover filter: passes every fact, covers the named aspects
#[derive(Debug, Clone, Default)]
pub struct AspectCover {
    pub aspects: AspectSet,
    /// Cover every dimension the variable defines
    pub all_dimensions: bool,
    pub dimensions: BTreeSet<QName>,
    pub excluded_dimensions: BTreeSet<QName>,
}

impl AspectCover {
    /// Covers every aspect of the dimensional model
    pub fn all() -> Self {
        Self {
            aspects: AspectModel::Dimensional
                .aspects()
                .into_iter()
                .chain(AspectModel::NonDimensional.aspects())
                .collect(),
            all_dimensions: true,
            ..Self::default()
        }
    }

    pub fn aspect(aspect: Aspect) -> Self {
        Self {
            aspects: [aspect].into_iter().collect(),
            ..Self::default()
        }
    }
}

/// Source of an aspect value in an output rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AspectSource {
    Variable(QName),
    /// The first bound fact variable for which the aspect is uncovered
    Uncovered,
}

/// Aspect rules of a formula or tuple
///
/// Each aspect rule may name its own source; otherwise `source` applies.
#[derive(Debug, Clone)]
pub struct OutputRules {
    /// Name of the instance receiving output facts
    pub instance: QName,
    pub source: Option<AspectSource>,
    /// Variable bound to the parent tuple; instance root otherwise
    pub location: Option<QName>,
    pub concept: ConceptRule,
    pub entity_identifier: EntityIdentifierRule,
    pub period: PeriodRule,
    pub unit: UnitRule,
    pub explicit_dimensions: Vec<ExplicitDimensionRule>,
    pub typed_dimensions: Vec<TypedDimensionRule>,
    pub open_components: Vec<OpenComponentRule>,
}

impl OutputRules {
    pub fn new(instance: QName) -> Self {
        Self {
            instance,
            source: None,
            location: None,
            concept: ConceptRule::default(),
            entity_identifier: EntityIdentifierRule::default(),
            period: PeriodRule::default(),
            unit: UnitRule::default(),
            explicit_dimensions: Vec::new(),
            typed_dimensions: Vec::new(),
            open_components: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: AspectSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_concept(mut self, name: Expression) -> Self {
        self.concept.name = Some(name);
        self
    }

    pub fn with_location(mut self, variable: QName) -> Self {
        self.location = Some(variable);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConceptRule {
    pub source: Option<AspectSource>,
    pub name: Option<Expression>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityIdentifierRule {
    pub source: Option<AspectSource>,
    pub scheme: Option<Expression>,
    pub value: Option<Expression>,
}

#[derive(Debug, Clone, Default)]
pub struct PeriodRule {
    pub source: Option<AspectSource>,
    pub spec: Option<PeriodSpec>,
}

#[derive(Debug, Clone)]
pub enum PeriodSpec {
    Forever,
    Instant(Expression),
    Duration { start: Expression, end: Expression },
}

#[derive(Debug, Clone)]
pub struct UnitRule {
    pub source: Option<AspectSource>,
    /// Start from the source unit's measures
    pub augment: bool,
    pub multiply_by: Vec<MeasureRule>,
    pub divide_by: Vec<MeasureRule>,
}

impl Default for UnitRule {
    fn default() -> Self {
        Self {
            source: None,
            augment: true,
            multiply_by: Vec::new(),
            divide_by: Vec::new(),
        }
    }
}

impl UnitRule {
    pub fn has_measure_rules(&self) -> bool {
        !self.multiply_by.is_empty() || !self.divide_by.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum MeasureRule {
    /// QName expression
    Measure(Expression),
    /// All measures of a source fact's unit
    Source(AspectSource),
}

#[derive(Debug, Clone)]
pub struct ExplicitDimensionRule {
    pub dimension: QName,
    pub source: Option<AspectSource>,
    pub member: Option<Expression>,
    pub omit: bool,
}

#[derive(Debug, Clone)]
pub struct TypedDimensionRule {
    pub dimension: QName,
    pub source: Option<AspectSource>,
    /// Expression returning the member node
    pub value: Option<Expression>,
    pub omit: bool,
}

/// Segment or scenario open content rule
#[derive(Debug, Clone)]
pub struct OpenComponentRule {
    pub container: Container,
    pub source: Option<AspectSource>,
    /// Discard source content
    pub empty: bool,
    pub fragments: Vec<XmlNode>,
    /// Expression returning nodes to append
    pub select: Option<Expression>,
}
