//! Scope guards
//!
//! Every change a search frame makes to shared state (in-scope variables,
//! the binding table, uncovered-aspect exemplars) goes through a
//! [`ScopeGuard`]. Dropping the guard undoes the changes in reverse order,
//! whether the frame returns normally, with an error, or by cancellation.

use super::context::{BoundVariable, EvaluationContext};
use crate::aspect::Aspect;
use crate::ast::QName;
use crate::model::{FactId, Sequence};
use std::ops::{Deref, DerefMut};

#[derive(Debug)]
enum Undo {
    Variable {
        name: QName,
        prior: Option<Sequence>,
    },
    Binding {
        name: QName,
        prior: Option<(usize, BoundVariable)>,
    },
    Aspect {
        aspect: Aspect,
        prior: Option<Option<FactId>>,
    },
}

/// Mutable view of the context that restores it on drop
pub struct ScopeGuard<'g, 'a> {
    ctx: &'g mut EvaluationContext<'a>,
    undo: Vec<Undo>,
}

impl<'g, 'a> ScopeGuard<'g, 'a> {
    pub fn new(ctx: &'g mut EvaluationContext<'a>) -> Self {
        Self {
            ctx,
            undo: Vec::new(),
        }
    }

    /// Install `value` under `name`, shadowing any previous value
    pub fn bind_variable(&mut self, name: QName, value: Sequence) {
        let prior = self.ctx.scope.insert(name.clone(), value);
        self.undo.push(Undo::Variable { name, prior });
    }

    /// Append a binding, replacing one with the same name
    pub fn push_binding(&mut self, binding: BoundVariable) {
        let name = binding.name.clone();
        let prior = self
            .ctx
            .bindings
            .iter()
            .position(|b| b.name == name)
            .map(|p| (p, self.ctx.bindings.remove(p)));
        self.ctx.bindings.push(binding);
        self.undo.push(Undo::Binding { name, prior });
    }

    /// Record `exemplar` for `aspect` unless a bound variable already
    /// supplies one
    pub fn contribute_aspect(&mut self, aspect: Aspect, exemplar: Option<FactId>) {
        if self.ctx.uncovered.exemplar(&aspect).is_some() {
            return;
        }
        let prior = self.ctx.uncovered.set(aspect.clone(), exemplar);
        self.undo.push(Undo::Aspect { aspect, prior });
    }

    /// Number of changes this guard will undo
    pub fn pending(&self) -> usize {
        self.undo.len()
    }
}

impl<'a> Deref for ScopeGuard<'_, 'a> {
    type Target = EvaluationContext<'a>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<'a> DerefMut for ScopeGuard<'_, 'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for ScopeGuard<'_, '_> {
    fn drop(&mut self) {
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Variable { name, prior } => {
                    self.ctx.scope.remove(&name);
                    if let Some(value) = prior {
                        self.ctx.scope.insert(name, value);
                    }
                }
                Undo::Binding { name, prior } => {
                    if let Some(p) = self.ctx.bindings.iter().rposition(|b| b.name == name) {
                        self.ctx.bindings.remove(p);
                    }
                    if let Some((position, binding)) = prior {
                        let position = position.min(self.ctx.bindings.len());
                        self.ctx.bindings.insert(position, binding);
                    }
                }
                Undo::Aspect { aspect, prior } => self.ctx.uncovered.restore(aspect, prior),
            }
        }
    }
}
