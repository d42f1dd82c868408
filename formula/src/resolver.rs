//! Variable ordering
//!
//! Rules compiled elsewhere arrive with their variables already in
//! dependency order. [`order_variables`] produces that order for rules
//! assembled in code.

use crate::ast::QName;
use crate::semantic::VariableDeclaration;
use crate::{FormulaError, FormulaResult};
use std::collections::{BTreeSet, HashMap};

/// Topological sort of variable declarations.
///
/// Returns declarations in an order such that every variable comes after the
/// variables it depends on. Dependencies on names that are not declared here
/// (parameters, instances) are ignored. Among variables whose dependencies
/// are satisfied, declaration order is kept.
pub fn order_variables(
    declarations: Vec<VariableDeclaration>,
) -> FormulaResult<Vec<VariableDeclaration>> {
    let positions: HashMap<QName, usize> = declarations
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.clone(), i))
        .collect();

    // Count how many declared variables each one depends on
    let mut dependency_count: Vec<usize> = declarations
        .iter()
        .map(|d| {
            d.depends_on
                .iter()
                .filter(|dep| positions.contains_key(*dep))
                .count()
        })
        .collect();

    // Reverse graph: variable -> variables depending on it
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); declarations.len()];
    for (i, declaration) in declarations.iter().enumerate() {
        for dep in &declaration.depends_on {
            if let Some(&j) = positions.get(dep) {
                dependents[j].push(i);
            }
        }
    }

    let mut ready: BTreeSet<usize> = dependency_count
        .iter()
        .enumerate()
        .filter(|(_, &count)| count == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(declarations.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            dependency_count[dependent] -= 1;
            if dependency_count[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != declarations.len() {
        let cycle: Vec<String> = declarations
            .iter()
            .enumerate()
            .filter(|(i, _)| dependency_count[*i] > 0)
            .map(|(_, d)| format!("${}", d.name))
            .collect();
        return Err(FormulaError::CircularDependency(cycle.join(", ")));
    }

    let mut slots: Vec<Option<VariableDeclaration>> = declarations.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}
