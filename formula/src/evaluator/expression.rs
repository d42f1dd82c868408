//! Expression evaluation boundary
//!
//! The engine never interprets expression text. Every test, select, value
//! and fallback expression is handed to an [`ExpressionEvaluator`] together
//! with the variables in scope and an optional context item.

use crate::ast::{Expression, ExpressionId, ExpressionIdGenerator, QName};
use crate::error::ExpressionError;
use crate::model::{
    AtomicType, Fact, FactId, InstanceId, ModelRepository, Period, Sequence, Unit, Value, XmlNode,
};
use rust_decimal::prelude::*;
use std::collections::HashMap;
use std::fmt;

/// In-scope variables: name → bound sequence
#[derive(Debug, Clone, Default)]
pub struct Scope {
    variables: HashMap<QName, Sequence>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &QName) -> Option<&Sequence> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &QName) -> bool {
        self.variables.contains_key(name)
    }

    /// Binds `name`, returning what it shadowed
    pub fn insert(&mut self, name: QName, value: Sequence) -> Option<Sequence> {
        self.variables.insert(name, value)
    }

    pub fn remove(&mut self, name: &QName) -> Option<Sequence> {
        self.variables.remove(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &QName> {
        self.variables.keys()
    }
}

/// Context item of an evaluation
#[derive(Debug, Clone, Copy)]
pub enum Item<'a> {
    Fact(FactId),
    Value(&'a Value),
    Period(&'a Period),
    Unit(&'a Unit),
    Node(&'a XmlNode),
    Instances(&'a [InstanceId]),
    /// Evaluation count of an existence assertion
    Count(usize),
}

/// Everything an expression may read
#[derive(Clone, Copy)]
pub struct ExprEnv<'a> {
    pub repository: &'a dyn ModelRepository,
    pub scope: &'a Scope,
    pub item: Option<Item<'a>>,
}

impl<'a> ExprEnv<'a> {
    pub fn new(repository: &'a dyn ModelRepository, scope: &'a Scope) -> Self {
        Self {
            repository,
            scope,
            item: None,
        }
    }

    pub fn with_item(self, item: Item<'a>) -> Self {
        Self {
            item: Some(item),
            ..self
        }
    }

    pub fn variable(&self, name: &QName) -> Option<&'a Sequence> {
        self.scope.get(name)
    }

    /// The single fact bound to `name`
    pub fn fact(&self, name: &QName) -> Option<&'a Fact> {
        match self.variable(name)?.as_slice() {
            [Value::Fact(id)] => self.repository.fact(*id),
            _ => None,
        }
    }

    /// Atomized value of a variable: fact values replace facts
    pub fn atomized(&self, name: &QName) -> Option<Sequence> {
        self.variable(name).map(|seq| atomize(self.repository, seq))
    }

    /// Numeric value of a single-valued variable
    pub fn number(&self, name: &QName) -> Option<Decimal> {
        match self.atomized(name)?.as_slice() {
            [v] => to_decimal(v),
            _ => None,
        }
    }

    /// Fact given as the context item
    pub fn item_fact(&self) -> Option<&'a Fact> {
        match self.item {
            Some(Item::Fact(id)) => self.repository.fact(id),
            _ => None,
        }
    }
}

impl fmt::Debug for ExprEnv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExprEnv")
            .field("scope", self.scope)
            .field("item", &self.item)
            .finish()
    }
}

/// Replace facts by their values; nil facts atomize to nothing
pub fn atomize(repository: &dyn ModelRepository, seq: &[Value]) -> Sequence {
    seq.iter()
        .filter_map(|v| match v {
            Value::Fact(id) => repository.fact(*id).and_then(|f| f.value.clone()),
            other => Some(other.clone()),
        })
        .collect()
}

pub fn to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Decimal(d) => Some(*d),
        Value::Integer(i) => Some(Decimal::from(*i)),
        Value::Double(d) => Decimal::from_f64(*d),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Effective boolean value of a sequence
pub fn effective_boolean_value(seq: &[Value]) -> Result<bool, ExpressionError> {
    match seq {
        [] => Ok(false),
        [first, ..] if !first.is_atomic() => Ok(true),
        [single] => match single {
            Value::Boolean(b) => Ok(*b),
            Value::String(s) => Ok(!s.is_empty()),
            Value::Decimal(d) => Ok(!d.is_zero()),
            Value::Integer(i) => Ok(*i != 0),
            Value::Double(d) => Ok(*d != 0.0 && !d.is_nan()),
            other => Err(ExpressionError::new(
                "err:FORG0006",
                format!("no effective boolean value for {}", other),
            )),
        },
        _ => Err(ExpressionError::new(
            "err:FORG0006",
            format!(
                "no effective boolean value for a sequence of {} atomic values",
                seq.len()
            ),
        )),
    }
}

/// Evaluates compiled expressions
pub trait ExpressionEvaluator {
    fn evaluate_sequence(
        &self,
        expression: &Expression,
        env: &ExprEnv<'_>,
    ) -> Result<Sequence, ExpressionError>;

    fn evaluate_boolean(
        &self,
        expression: &Expression,
        env: &ExprEnv<'_>,
    ) -> Result<bool, ExpressionError> {
        let seq = self.evaluate_sequence(expression, env)?;
        effective_boolean_value(&seq)
    }

    /// Zero or one atomic value of the expected type
    fn evaluate_atomic(
        &self,
        expression: &Expression,
        expected: AtomicType,
        env: &ExprEnv<'_>,
    ) -> Result<Option<Value>, ExpressionError> {
        let seq = self.evaluate_sequence(expression, env)?;
        let mut atoms = atomize(env.repository, &seq);
        match atoms.len() {
            0 => Ok(None),
            1 => {
                let value = atoms.remove(0);
                if value.conforms_to(expected) {
                    Ok(Some(value))
                } else {
                    Err(ExpressionError::type_error(format!(
                        "{} returned {}, expected {:?}",
                        expression.source(),
                        value,
                        expected
                    )))
                }
            }
            n => Err(ExpressionError::type_error(format!(
                "{} returned {} items, expected at most one",
                expression.source(),
                n
            ))),
        }
    }
}

type NativeFn = Box<dyn Fn(&ExprEnv<'_>) -> Result<Sequence, ExpressionError>>;

/// Evaluator backed by Rust closures, one per defined expression
///
/// Used where rules are assembled in code rather than compiled from a
/// linkbase, and throughout the tests.
#[derive(Default)]
pub struct NativeEvaluator {
    ids: ExpressionIdGenerator,
    functions: HashMap<ExpressionId, NativeFn>,
}

impl NativeEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure and return the handle rules refer to it by
    pub fn define<F>(&mut self, source: &str, function: F) -> Expression
    where
        F: Fn(&ExprEnv<'_>) -> Result<Sequence, ExpressionError> + 'static,
    {
        let id = self.ids.next_id();
        self.functions.insert(id, Box::new(function));
        Expression::new(id, source)
    }

    /// Expression always returning `value`
    pub fn constant(&mut self, source: &str, value: Sequence) -> Expression {
        self.define(source, move |_| Ok(value.clone()))
    }

    /// Expression returning the value bound to a variable
    pub fn variable(&mut self, name: &QName) -> Expression {
        let variable = name.clone();
        self.define(&format!("${}", name), move |env| {
            env.variable(&variable)
                .cloned()
                .ok_or_else(|| {
                    ExpressionError::new(
                        "err:XPST0008",
                        format!("variable ${} is not in scope", variable),
                    )
                })
        })
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for NativeEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEvaluator")
            .field("expressions", &self.functions.len())
            .finish()
    }
}

impl ExpressionEvaluator for NativeEvaluator {
    fn evaluate_sequence(
        &self,
        expression: &Expression,
        env: &ExprEnv<'_>,
    ) -> Result<Sequence, ExpressionError> {
        let function = self
            .functions
            .get(&expression.id())
            .ok_or_else(|| ExpressionError::unknown_expression(expression.source()))?;
        function(env)
    }
}
