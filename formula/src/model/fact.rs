use super::{PeriodType, Value};
use crate::ast::QName;
use serde::Serialize;
use std::fmt;

/// Identifies an instance document held by the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceId(pub usize);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance_{}", self.0)
    }
}

/// Identifies a fact by instance and position in that instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FactId {
    pub instance: InstanceId,
    pub index: usize,
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fact_{}_{}", self.instance.0, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextId {
    pub instance: InstanceId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnitId {
    pub instance: InstanceId,
    pub index: usize,
}

/// `decimals` / `precision` attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Digits {
    Finite(i32),
    Infinite,
}

impl fmt::Display for Digits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Digits::Finite(n) => write!(f, "{}", n),
            Digits::Infinite => write!(f, "INF"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    Decimals(Digits),
    Precision(Digits),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptKind {
    Item,
    Tuple,
}

/// Taxonomy concept
#[derive(Debug, Clone, PartialEq)]
pub struct Concept {
    pub name: QName,
    pub kind: ConceptKind,
    pub data_type: QName,
    pub period_type: PeriodType,
    pub numeric: bool,
    /// `xbrli:fractionItemType` and derived types
    pub fraction: bool,
}

impl Concept {
    pub fn item(name: QName, data_type: QName, period_type: PeriodType) -> Self {
        let numeric = matches!(
            data_type.local_name(),
            "monetaryItemType"
                | "decimalItemType"
                | "sharesItemType"
                | "pureItemType"
                | "integerItemType"
                | "nonNegativeIntegerItemType"
                | "perShareItemType"
                | "percentItemType"
        );
        Self {
            name,
            kind: ConceptKind::Item,
            data_type,
            period_type,
            numeric,
            fraction: false,
        }
    }

    pub fn tuple(name: QName) -> Self {
        Self {
            name,
            kind: ConceptKind::Tuple,
            data_type: QName::xbrli("tupleType"),
            period_type: PeriodType::Duration,
            numeric: false,
            fraction: false,
        }
    }

    pub fn is_tuple(&self) -> bool {
        self.kind == ConceptKind::Tuple
    }
}

/// A fact in an instance
///
/// Item facts have a context (and a unit when numeric); tuple facts have
/// neither and parent other facts.
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub id: FactId,
    pub concept: QName,
    pub kind: ConceptKind,
    pub context: Option<ContextId>,
    pub unit: Option<UnitId>,
    pub value: Option<Value>,
    /// Lexical form as it appears in the instance
    pub lexical: Option<String>,
    pub nil: bool,
    pub accuracy: Option<Accuracy>,
    /// Enclosing tuple; `None` for facts at the instance root
    pub parent: Option<FactId>,
}

impl Fact {
    pub fn is_tuple(&self) -> bool {
        self.kind == ConceptKind::Tuple
    }

    pub fn is_item(&self) -> bool {
        self.kind == ConceptKind::Item
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.concept, self.id)
    }
}
