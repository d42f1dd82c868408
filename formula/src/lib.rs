//! # Formula Engine
//!
//! **Variable binding and evaluation for XBRL Formula rules**
//!
//! The engine evaluates value assertions, existence assertions, formulas and
//! tuple rules against the facts of an XBRL instance. Each rule declares
//! variables; the engine binds every combination of facts that passes the
//! variables' filters and agrees on the aspects the filters leave
//! uncovered, and runs the rule body once per combination.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use formula::model::{Concept, MemoryRepository, PeriodType};
//! use formula::{
//!     Engine, FactVariable, Filter, FilterArc, FormulaResult, NativeEvaluator, QName, Rule,
//!     RuleKind, ValueAssertion, VariableDeclaration,
//! };
//!
//! fn main() -> FormulaResult<()> {
//!     let mut repository = MemoryRepository::new();
//!     let instance = repository.add_instance(QName::local("source"));
//!     let assets = QName::new("http://example.com", "Assets");
//!     repository.add_concept(Concept::item(
//!         assets.clone(),
//!         QName::xbrli("monetaryItemType"),
//!         PeriodType::Instant,
//!     ));
//!
//!     let mut evaluator = NativeEvaluator::new();
//!     let test = evaluator.define("$a ge 0", |env| {
//!         let non_negative = env
//!             .number(&QName::local("a"))
//!             .is_some_and(|a| !a.is_sign_negative());
//!         Ok(vec![non_negative.into()])
//!     });
//!
//!     let variable = FactVariable::new().with_filter(FilterArc::new(Filter::concept_name(assets)));
//!     let rule = Rule::new(
//!         "assets-non-negative",
//!         RuleKind::ValueAssertion(ValueAssertion {
//!             test,
//!             messages: Default::default(),
//!         }),
//!     )
//!     .with_variable(VariableDeclaration::fact(QName::local("a"), variable));
//!
//!     let mut engine = Engine::new();
//!     engine.add_rule(rule)?;
//!     let report = engine.run(&mut repository, &evaluator, instance)?;
//!     println!("{}", report.error_count());
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Aspects
//! Every fact is characterised by its aspects: concept, entity identifier,
//! period, unit, dimensions, open context content and location. Filters
//! cover the aspects they constrain; the remaining aspects must match
//! between the facts bound in one evaluation.
//!
//! ### Fallback
//! A fact variable with no matching fact may bind its fallback value
//! instead. Evaluations in which every fact variable has fallen back are
//! skipped, as are evaluations that duplicate an earlier one.
//!
//! ### Output
//! Formulas write one fact per evaluation into an output instance, taking
//! each aspect from an aspect rule or from a source variable.

pub mod aspect;
pub mod ast;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod options;
pub mod resolver;
pub mod response;
pub mod semantic;

pub use aspect::{Aspect, AspectModel, AspectSet};
pub use ast::{Expression, ExpressionId, ExpressionIdGenerator, QName};
pub use engine::Engine;
pub use error::{AspectRuleError, ExpressionError, FormulaError};
pub use evaluator::expression::{ExprEnv, ExpressionEvaluator, Item, NativeEvaluator, Scope};
pub use evaluator::timeout::CancellationToken;
pub use options::FormulaOptions;
pub use response::{
    Message, MessageSink, RuleOutcome, RuleResult, RuleStats, RunReport, Severity,
};
pub use semantic::*;

/// Result type for formula operations
pub type FormulaResult<T> = Result<T, FormulaError>;

#[cfg(test)]
mod tests;
