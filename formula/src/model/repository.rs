//! Model repository
//!
//! The engine reads source facts and writes output facts exclusively through
//! [`ModelRepository`]. [`MemoryRepository`] is the in-memory implementation.

use super::{
    Accuracy, Concept, ConceptKind, Context, ContextId, Fact, FactId, InstanceId, PeriodType,
    Unit, UnitId, Value,
};
use crate::ast::{Expression, QName};
use crate::{FormulaError, FormulaResult};
use std::collections::{BTreeMap, HashMap};

/// Entry in an instance's document order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentItem {
    Context(ContextId),
    Unit(UnitId),
    Fact(FactId),
}

/// Where a created object is placed in document order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    /// Immediately after an existing item
    After(DocumentItem),
    /// Before the first fact of the instance
    BeforeFacts,
    #[default]
    End,
}

/// Content of a fact to be created
#[derive(Debug, Clone, PartialEq)]
pub struct NewFact {
    pub concept: QName,
    pub context: Option<ContextId>,
    pub unit: Option<UnitId>,
    pub value: Option<Value>,
    pub lexical: Option<String>,
    pub nil: bool,
    pub accuracy: Option<Accuracy>,
    pub parent: Option<FactId>,
}

impl NewFact {
    pub fn item(concept: QName, context: ContextId) -> Self {
        Self {
            concept,
            context: Some(context),
            unit: None,
            value: None,
            lexical: None,
            nil: false,
            accuracy: None,
            parent: None,
        }
    }

    pub fn tuple(concept: QName) -> Self {
        Self {
            concept,
            context: None,
            unit: None,
            value: None,
            lexical: None,
            nil: false,
            accuracy: None,
            parent: None,
        }
    }

    pub fn with_unit(mut self, unit: UnitId) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the value and its lexical form
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.lexical = Some(value.to_string());
        self.value = Some(value);
        self
    }

    pub fn with_accuracy(mut self, accuracy: Accuracy) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn nil(mut self) -> Self {
        self.nil = true;
        self.value = None;
        self.lexical = None;
        self
    }

    pub fn in_tuple(mut self, parent: FactId) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Read and write access to the instances, taxonomy and indexes
pub trait ModelRepository {
    fn instance(&self, id: InstanceId) -> Option<&Instance>;
    fn instance_by_name(&self, name: &QName) -> Option<InstanceId>;
    fn fact(&self, id: FactId) -> Option<&Fact>;
    fn context(&self, id: ContextId) -> Option<&Context>;
    fn unit(&self, id: UnitId) -> Option<&Unit>;
    fn concept(&self, name: &QName) -> Option<&Concept>;

    /// Dimension → default member
    fn dimension_defaults(&self) -> &BTreeMap<QName, QName>;

    /// Custom equality test declared for a typed dimension, evaluated with
    /// the two member values bound to `$a` and `$b`
    fn typed_dimension_equality(&self, dimension: &QName) -> Option<&Expression>;

    fn facts_of_instance(&self, instance: InstanceId, include_nils: bool) -> Vec<FactId>;
    fn facts_by_concept(&self, instance: InstanceId, concept: &QName) -> Vec<FactId>;
    /// Facts whose explicit member for `dimension` is `member`, defaults included
    fn facts_by_dimension_member(
        &self,
        instance: InstanceId,
        dimension: &QName,
        member: &QName,
    ) -> Vec<FactId>;
    fn facts_by_datatype(&self, instance: InstanceId, data_type: &QName) -> Vec<FactId>;
    fn facts_by_period_type(&self, instance: InstanceId, period_type: PeriodType) -> Vec<FactId>;

    /// Existing context structurally equal to `context`
    fn match_context(&self, instance: InstanceId, context: &Context) -> Option<ContextId>;
    /// Existing unit with the given sorted measures
    fn match_unit(&self, instance: InstanceId, multiply: &[QName], divide: &[QName])
        -> Option<UnitId>;

    fn create_context(
        &mut self,
        instance: InstanceId,
        context: Context,
        anchor: Anchor,
    ) -> FormulaResult<ContextId>;
    fn create_unit(&mut self, instance: InstanceId, unit: Unit, anchor: Anchor)
        -> FormulaResult<UnitId>;
    fn create_fact(
        &mut self,
        instance: InstanceId,
        fact: NewFact,
        anchor: Anchor,
    ) -> FormulaResult<FactId>;

    fn fact_context(&self, id: FactId) -> Option<&Context> {
        self.fact(id)
            .and_then(|f| f.context)
            .and_then(|c| self.context(c))
    }

    fn fact_unit(&self, id: FactId) -> Option<&Unit> {
        self.fact(id).and_then(|f| f.unit).and_then(|u| self.unit(u))
    }

    fn fact_concept(&self, id: FactId) -> Option<&Concept> {
        self.fact(id).and_then(|f| self.concept(&f.concept))
    }
}

/// One instance document
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: InstanceId,
    pub name: QName,
    facts: Vec<Fact>,
    contexts: Vec<Context>,
    units: Vec<Unit>,
    document: Vec<DocumentItem>,
}

impl Instance {
    fn new(id: InstanceId, name: QName) -> Self {
        Self {
            id,
            name,
            facts: Vec::new(),
            contexts: Vec::new(),
            units: Vec::new(),
            document: Vec::new(),
        }
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Contexts, units and facts in document order
    pub fn document_order(&self) -> &[DocumentItem] {
        &self.document
    }

    fn place(&mut self, item: DocumentItem, anchor: Anchor) {
        let position = match anchor {
            Anchor::After(existing) => self
                .document
                .iter()
                .position(|i| *i == existing)
                .map(|p| p + 1),
            Anchor::BeforeFacts => self
                .document
                .iter()
                .position(|i| matches!(i, DocumentItem::Fact(_))),
            Anchor::End => None,
        };
        match position {
            Some(p) => self.document.insert(p, item),
            None => self.document.push(item),
        }
    }
}

/// In-memory repository
#[derive(Debug, Default)]
pub struct MemoryRepository {
    instances: Vec<Instance>,
    concepts: HashMap<QName, Concept>,
    dimension_defaults: BTreeMap<QName, QName>,
    typed_equality: HashMap<QName, Expression>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(&mut self, name: QName) -> InstanceId {
        let id = InstanceId(self.instances.len());
        self.instances.push(Instance::new(id, name));
        id
    }

    pub fn add_concept(&mut self, concept: Concept) {
        self.concepts.insert(concept.name.clone(), concept);
    }

    pub fn set_dimension_default(&mut self, dimension: QName, member: QName) {
        self.dimension_defaults.insert(dimension, member);
    }

    pub fn set_typed_dimension_equality(&mut self, dimension: QName, test: Expression) {
        self.typed_equality.insert(dimension, test);
    }

    pub fn add_context(&mut self, instance: InstanceId, context: Context) -> FormulaResult<ContextId> {
        self.create_context(instance, context, Anchor::BeforeFacts)
    }

    pub fn add_unit(&mut self, instance: InstanceId, unit: Unit) -> FormulaResult<UnitId> {
        self.create_unit(instance, unit, Anchor::BeforeFacts)
    }

    pub fn add_fact(&mut self, instance: InstanceId, fact: NewFact) -> FormulaResult<FactId> {
        self.create_fact(instance, fact, Anchor::End)
    }

    fn instance_mut(&mut self, id: InstanceId) -> FormulaResult<&mut Instance> {
        self.instances
            .get_mut(id.0)
            .ok_or_else(|| FormulaError::UnknownInstance(id.to_string()))
    }

    fn select<F>(&self, instance: InstanceId, mut keep: F) -> Vec<FactId>
    where
        F: FnMut(&Fact) -> bool,
    {
        self.instance(instance)
            .map(|inst| {
                inst.facts
                    .iter()
                    .filter(|f| keep(f))
                    .map(|f| f.id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ModelRepository for MemoryRepository {
    fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id.0)
    }

    fn instance_by_name(&self, name: &QName) -> Option<InstanceId> {
        self.instances.iter().find(|i| i.name == *name).map(|i| i.id)
    }

    fn fact(&self, id: FactId) -> Option<&Fact> {
        self.instance(id.instance).and_then(|i| i.facts.get(id.index))
    }

    fn context(&self, id: ContextId) -> Option<&Context> {
        self.instance(id.instance).and_then(|i| i.contexts.get(id.index))
    }

    fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.instance(id.instance).and_then(|i| i.units.get(id.index))
    }

    fn concept(&self, name: &QName) -> Option<&Concept> {
        self.concepts.get(name)
    }

    fn dimension_defaults(&self) -> &BTreeMap<QName, QName> {
        &self.dimension_defaults
    }

    fn typed_dimension_equality(&self, dimension: &QName) -> Option<&Expression> {
        self.typed_equality.get(dimension)
    }

    fn facts_of_instance(&self, instance: InstanceId, include_nils: bool) -> Vec<FactId> {
        self.select(instance, |f| include_nils || !f.nil)
    }

    fn facts_by_concept(&self, instance: InstanceId, concept: &QName) -> Vec<FactId> {
        self.select(instance, |f| f.concept == *concept)
    }

    fn facts_by_dimension_member(
        &self,
        instance: InstanceId,
        dimension: &QName,
        member: &QName,
    ) -> Vec<FactId> {
        self.select(instance, |f| {
            f.context
                .and_then(|c| self.context(c))
                .and_then(|c| {
                    c.dimension_value(dimension, &self.dimension_defaults)
                        .explicit_member()
                        .cloned()
                })
                .is_some_and(|m| m == *member)
        })
    }

    fn facts_by_datatype(&self, instance: InstanceId, data_type: &QName) -> Vec<FactId> {
        self.select(instance, |f| {
            self.concepts
                .get(&f.concept)
                .is_some_and(|c| c.data_type == *data_type)
        })
    }

    fn facts_by_period_type(&self, instance: InstanceId, period_type: PeriodType) -> Vec<FactId> {
        self.select(instance, |f| {
            self.concepts
                .get(&f.concept)
                .is_some_and(|c| !c.is_tuple() && c.period_type == period_type)
        })
    }

    fn match_context(&self, instance: InstanceId, context: &Context) -> Option<ContextId> {
        let inst = self.instance(instance)?;
        inst.contexts
            .iter()
            .position(|c| c.is_equal_to(context))
            .map(|index| ContextId { instance, index })
    }

    fn match_unit(
        &self,
        instance: InstanceId,
        multiply: &[QName],
        divide: &[QName],
    ) -> Option<UnitId> {
        let inst = self.instance(instance)?;
        inst.units
            .iter()
            .position(|u| {
                let (m, d) = u.measures();
                m == multiply && d == divide
            })
            .map(|index| UnitId { instance, index })
    }

    fn create_context(
        &mut self,
        instance: InstanceId,
        context: Context,
        anchor: Anchor,
    ) -> FormulaResult<ContextId> {
        let inst = self.instance_mut(instance)?;
        let id = ContextId {
            instance,
            index: inst.contexts.len(),
        };
        inst.contexts.push(context);
        inst.place(DocumentItem::Context(id), anchor);
        Ok(id)
    }

    fn create_unit(
        &mut self,
        instance: InstanceId,
        unit: Unit,
        anchor: Anchor,
    ) -> FormulaResult<UnitId> {
        let inst = self.instance_mut(instance)?;
        let id = UnitId {
            instance,
            index: inst.units.len(),
        };
        inst.units.push(unit);
        inst.place(DocumentItem::Unit(id), anchor);
        Ok(id)
    }

    fn create_fact(
        &mut self,
        instance: InstanceId,
        fact: NewFact,
        anchor: Anchor,
    ) -> FormulaResult<FactId> {
        let kind = self
            .concepts
            .get(&fact.concept)
            .map(|c| c.kind)
            .unwrap_or(ConceptKind::Item);
        let inst = self.instance_mut(instance)?;
        let id = FactId {
            instance,
            index: inst.facts.len(),
        };
        inst.facts.push(Fact {
            id,
            concept: fact.concept,
            kind,
            context: fact.context,
            unit: fact.unit,
            value: fact.value,
            lexical: fact.lexical,
            nil: fact.nil,
            accuracy: fact.accuracy,
            parent: fact.parent,
        });
        inst.place(DocumentItem::Fact(id), anchor);
        Ok(id)
    }
}
