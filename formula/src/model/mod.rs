//! Instance data model: facts, contexts, units, XML fragments and the
//! repository through which the engine reads and writes them.

pub mod context;
pub mod fact;
pub mod node;
pub mod repository;
pub mod value;

pub use context::{
    cancel_measures, Container, Context, DimensionLookup, DimensionMember, DimensionValue,
    EntityIdentifier, Period, PeriodType, Unit,
};
pub use fact::{
    Accuracy, Concept, ConceptKind, ContextId, Digits, Fact, FactId, InstanceId, UnitId,
};
pub use node::{node_lists_correspond, nodes_correspond, XmlContent, XmlNode};
pub use repository::{Anchor, DocumentItem, Instance, MemoryRepository, ModelRepository, NewFact};
pub use value::{AtomicType, Sequence, Value};
