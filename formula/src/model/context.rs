//! Contexts and units
//!
//! A context supplies the entity, period and dimensional aspects of an item
//! fact; a unit supplies its measures.

use super::node::{node_lists_correspond, nodes_correspond, XmlNode};
use crate::ast::{QName, XBRLDI_NS};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityIdentifier {
    pub scheme: String,
    pub value: String,
}

impl EntityIdentifier {
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }
}

/// Reporting period, compared on datetime equality
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Period {
    Instant { at: NaiveDateTime },
    Duration { start: NaiveDateTime, end: NaiveDateTime },
    Forever,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Instant,
    Duration,
}

impl Period {
    pub fn period_type(&self) -> PeriodType {
        match self {
            Period::Instant { .. } => PeriodType::Instant,
            Period::Duration { .. } | Period::Forever => PeriodType::Duration,
        }
    }

    /// Instant date or the end of a duration
    pub fn end_or_instant(&self) -> Option<NaiveDateTime> {
        match self {
            Period::Instant { at } => Some(*at),
            Period::Duration { end, .. } => Some(*end),
            Period::Forever => None,
        }
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        match self {
            Period::Duration { start, .. } => Some(*start),
            _ => None,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Instant { at } => write!(f, "{}", at.format("%Y-%m-%dT%H:%M:%S")),
            Period::Duration { start, end } => write!(
                f,
                "{}/{}",
                start.format("%Y-%m-%dT%H:%M:%S"),
                end.format("%Y-%m-%dT%H:%M:%S")
            ),
            Period::Forever => write!(f, "forever"),
        }
    }
}

/// Context element holding a dimension or open content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Segment,
    Scenario,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DimensionMember {
    Explicit(QName),
    Typed(XmlNode),
}

impl DimensionMember {
    /// Explicit members compare by QName, typed members by node correspondence
    pub fn is_equal_to(&self, other: &DimensionMember) -> bool {
        match (self, other) {
            (DimensionMember::Explicit(a), DimensionMember::Explicit(b)) => a == b,
            (DimensionMember::Typed(a), DimensionMember::Typed(b)) => nodes_correspond(a, b),
            _ => false,
        }
    }

    pub fn explicit_member(&self) -> Option<&QName> {
        match self {
            DimensionMember::Explicit(q) => Some(q),
            DimensionMember::Typed(_) => None,
        }
    }

    pub fn typed_member(&self) -> Option<&XmlNode> {
        match self {
            DimensionMember::Typed(n) => Some(n),
            DimensionMember::Explicit(_) => None,
        }
    }
}

impl fmt::Display for DimensionMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionMember::Explicit(q) => write!(f, "{}", q),
            DimensionMember::Typed(n) => write!(f, "{}", n),
        }
    }
}

/// A reported dimension value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimensionValue {
    pub member: DimensionMember,
    pub container: Container,
}

impl DimensionValue {
    pub fn explicit(member: QName) -> Self {
        Self {
            member: DimensionMember::Explicit(member),
            container: Container::Segment,
        }
    }

    pub fn typed(member: XmlNode) -> Self {
        Self {
            member: DimensionMember::Typed(member),
            container: Container::Segment,
        }
    }

    pub fn in_scenario(mut self) -> Self {
        self.container = Container::Scenario;
        self
    }
}

/// Result of looking up a dimension on a context
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DimensionLookup<'a> {
    /// Reported in the context
    Reported(&'a DimensionValue),
    /// Not reported, but the dimension has a default member
    Default(&'a QName),
    Absent,
}

impl<'a> DimensionLookup<'a> {
    /// Explicit member QName, including a default member
    pub fn explicit_member(&self) -> Option<&'a QName> {
        match self {
            DimensionLookup::Reported(v) => v.member.explicit_member(),
            DimensionLookup::Default(q) => Some(q),
            DimensionLookup::Absent => None,
        }
    }
}

/// Content of a context, also used to request a new one
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub id: String,
    pub entity: EntityIdentifier,
    pub period: Period,
    pub dimensions: BTreeMap<QName, DimensionValue>,
    /// Non-dimensional segment content
    pub segment: Vec<XmlNode>,
    /// Non-dimensional scenario content
    pub scenario: Vec<XmlNode>,
}

impl Context {
    pub fn new(id: impl Into<String>, entity: EntityIdentifier, period: Period) -> Self {
        Self {
            id: id.into(),
            entity,
            period,
            dimensions: BTreeMap::new(),
            segment: Vec::new(),
            scenario: Vec::new(),
        }
    }

    pub fn with_dimension(mut self, dimension: QName, value: DimensionValue) -> Self {
        self.dimensions.insert(dimension, value);
        self
    }

    pub fn with_segment_node(mut self, node: XmlNode) -> Self {
        self.segment.push(node);
        self
    }

    pub fn with_scenario_node(mut self, node: XmlNode) -> Self {
        self.scenario.push(node);
        self
    }

    pub fn dimension_value<'a>(
        &'a self,
        dimension: &QName,
        defaults: &'a BTreeMap<QName, QName>,
    ) -> DimensionLookup<'a> {
        if let Some(v) = self.dimensions.get(dimension) {
            DimensionLookup::Reported(v)
        } else if let Some(d) = defaults.get(dimension) {
            DimensionLookup::Default(d)
        } else {
            DimensionLookup::Absent
        }
    }

    /// Dimensions reported in the context plus every defaulted dimension
    pub fn dimension_aspects(&self, defaults: &BTreeMap<QName, QName>) -> BTreeSet<QName> {
        self.dimensions
            .keys()
            .chain(defaults.keys())
            .cloned()
            .collect()
    }

    pub fn non_dimensional(&self, container: Container) -> &[XmlNode] {
        match container {
            Container::Segment => &self.segment,
            Container::Scenario => &self.scenario,
        }
    }

    /// Every child of the segment or scenario, dimensions rendered as
    /// `xbrldi:explicitMember` / `xbrldi:typedMember` elements.
    pub fn complete(&self, container: Container) -> Vec<XmlNode> {
        let dimension_attr = QName::local("dimension");
        let mut nodes: Vec<XmlNode> = self
            .dimensions
            .iter()
            .filter(|(_, v)| v.container == container)
            .map(|(dim, v)| match &v.member {
                DimensionMember::Explicit(m) => {
                    XmlNode::element(QName::new(XBRLDI_NS, "explicitMember"))
                        .with_attribute(dimension_attr.clone(), dim.to_string())
                        .with_text(m.to_string())
                }
                DimensionMember::Typed(n) => {
                    XmlNode::element(QName::new(XBRLDI_NS, "typedMember"))
                        .with_attribute(dimension_attr.clone(), dim.to_string())
                        .with_child(n.clone())
                }
            })
            .collect();
        nodes.extend(self.non_dimensional(container).iter().cloned());
        nodes
    }

    pub fn is_period_equal_to(&self, other: &Context) -> bool {
        self.period == other.period
    }

    pub fn is_entity_identifier_equal_to(&self, other: &Context) -> bool {
        self.entity == other.entity
    }

    /// Same reported dimensions with equal members
    pub fn dimensions_equal(&self, other: &Context) -> bool {
        self.dimensions.len() == other.dimensions.len()
            && self.dimensions.iter().all(|(dim, v)| {
                other
                    .dimensions
                    .get(dim)
                    .is_some_and(|o| o.container == v.container && v.member.is_equal_to(&o.member))
            })
    }

    /// Structural equality ignoring the context id
    pub fn is_equal_to(&self, other: &Context) -> bool {
        self.is_period_equal_to(other)
            && self.is_entity_identifier_equal_to(other)
            && self.dimensions_equal(other)
            && node_lists_correspond(&self.segment, &other.segment)
            && node_lists_correspond(&self.scenario, &other.scenario)
    }
}

/// Measures of a unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Unit {
    pub id: String,
    pub multiply: Vec<QName>,
    pub divide: Vec<QName>,
}

impl Unit {
    pub fn new(id: impl Into<String>, multiply: Vec<QName>, divide: Vec<QName>) -> Self {
        Self {
            id: id.into(),
            multiply,
            divide,
        }
    }

    pub fn simple(id: impl Into<String>, measure: QName) -> Self {
        Self::new(id, vec![measure], Vec::new())
    }

    /// Sorted (multiply, divide) measure lists
    pub fn measures(&self) -> (Vec<QName>, Vec<QName>) {
        let mut multiply = self.multiply.clone();
        let mut divide = self.divide.clone();
        multiply.sort();
        divide.sort();
        (multiply, divide)
    }

    pub fn is_equal_to(&self, other: &Unit) -> bool {
        self.measures() == other.measures()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (multiply, divide) = self.measures();
        let mul: Vec<String> = multiply.iter().map(|m| m.to_string()).collect();
        write!(f, "{}", mul.join(" "))?;
        if !divide.is_empty() {
            let div: Vec<String> = divide.iter().map(|m| m.to_string()).collect();
            write!(f, " / {}", div.join(" "))?;
        }
        Ok(())
    }
}

/// Cancel measures that appear on both sides.
///
/// While some measure is on both sides, every occurrence of it is removed
/// from both. Results are sorted.
pub fn cancel_measures(multiply: &[QName], divide: &[QName]) -> (Vec<QName>, Vec<QName>) {
    let mut multiply = multiply.to_vec();
    let mut divide = divide.to_vec();
    while let Some(common) = multiply.iter().find(|m| divide.contains(m)).cloned() {
        multiply.retain(|m| *m != common);
        divide.retain(|m| *m != common);
    }
    multiply.sort();
    divide.sort();
    (multiply, divide)
}
