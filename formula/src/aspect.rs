//! Aspects: the structural attributes on which facts are compared

use crate::ast::QName;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// One comparable attribute of a fact
///
/// The derived order is the order in which aspect sets are iterated, which
/// keeps partitioning deterministic from run to run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Aspect {
    Location,
    Concept,
    EntityIdentifier,
    Period,
    Unit,
    CompleteSegment,
    CompleteScenario,
    NonXdtSegment,
    NonXdtScenario,
    /// All dimensions together; never compared directly
    Dimensions,
    Dimension(QName),
}

pub type AspectSet = BTreeSet<Aspect>;

impl Aspect {
    pub fn is_dimension(&self) -> bool {
        matches!(self, Aspect::Dimension(_))
    }

    pub fn dimension(&self) -> Option<&QName> {
        match self {
            Aspect::Dimension(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aspect::Location => write!(f, "location"),
            Aspect::Concept => write!(f, "concept"),
            Aspect::EntityIdentifier => write!(f, "entity-identifier"),
            Aspect::Period => write!(f, "period"),
            Aspect::Unit => write!(f, "unit"),
            Aspect::CompleteSegment => write!(f, "complete-segment"),
            Aspect::CompleteScenario => write!(f, "complete-scenario"),
            Aspect::NonXdtSegment => write!(f, "non-XDT-segment"),
            Aspect::NonXdtScenario => write!(f, "non-XDT-scenario"),
            Aspect::Dimensions => write!(f, "dimensions"),
            Aspect::Dimension(d) => write!(f, "dimension {}", d),
        }
    }
}

impl Serialize for Aspect {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Aspect model of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectModel {
    /// Dimensions compared individually, open content outside dimensions
    #[default]
    Dimensional,
    /// Segment and scenario compared as a whole
    NonDimensional,
}

impl AspectModel {
    /// Aspects every fact variable defines under this model
    pub fn aspects(&self) -> AspectSet {
        let mut set: AspectSet = [
            Aspect::Location,
            Aspect::Concept,
            Aspect::EntityIdentifier,
            Aspect::Period,
            Aspect::Unit,
        ]
        .into_iter()
        .collect();
        match self {
            AspectModel::Dimensional => {
                set.insert(Aspect::NonXdtSegment);
                set.insert(Aspect::NonXdtScenario);
                set.insert(Aspect::Dimensions);
            }
            AspectModel::NonDimensional => {
                set.insert(Aspect::CompleteSegment);
                set.insert(Aspect::CompleteScenario);
            }
        }
        set
    }

    pub fn is_dimensional(&self) -> bool {
        *self == AspectModel::Dimensional
    }
}
