use super::support::{fact_var, var};
use crate::resolver::order_variables;
use crate::semantic::VariableDeclaration;
use crate::FormulaError;

fn names(order: &[VariableDeclaration]) -> Vec<String> {
    order.iter().map(|v| v.name.to_string()).collect()
}

#[test]
fn test_order_variables_simple() {
    // a depends on b, b depends on nothing
    let declarations = vec![
        fact_var("a", "Assets").depending_on(var("b")),
        fact_var("b", "Liabilities"),
    ];

    let order = order_variables(declarations).unwrap();
    assert_eq!(names(&order), vec!["b", "a"], "b should come before a");
}

#[test]
fn test_order_variables_chain() {
    let declarations = vec![
        fact_var("c", "Equity").depending_on(var("b")),
        fact_var("b", "Liabilities").depending_on(var("a")),
        fact_var("a", "Assets"),
    ];

    let order = order_variables(declarations).unwrap();
    assert_eq!(names(&order), vec!["a", "b", "c"]);
}

#[test]
fn test_order_variables_keeps_declaration_order() {
    let declarations = vec![
        fact_var("z", "Assets"),
        fact_var("y", "Assets"),
        fact_var("x", "Assets"),
    ];

    let order = order_variables(declarations).unwrap();
    assert_eq!(names(&order), vec!["z", "y", "x"]);
}

#[test]
fn test_order_variables_diamond() {
    let declarations = vec![
        fact_var("total", "Total")
            .depending_on(var("left"))
            .depending_on(var("right")),
        fact_var("right", "Right").depending_on(var("base")),
        fact_var("left", "Left").depending_on(var("base")),
        fact_var("base", "Base"),
    ];

    let order = order_variables(declarations).unwrap();
    assert_eq!(names(&order), vec!["base", "right", "left", "total"]);
}

#[test]
fn test_undeclared_dependencies_are_ignored() {
    // parameters and instances are not declared among the variables
    let declarations = vec![
        fact_var("a", "Assets").depending_on(var("threshold")),
        fact_var("b", "Liabilities"),
    ];

    let order = order_variables(declarations).unwrap();
    assert_eq!(names(&order), vec!["a", "b"]);
}

#[test]
fn test_order_variables_cycle() {
    let declarations = vec![
        fact_var("free", "Assets"),
        fact_var("a", "Assets").depending_on(var("b")),
        fact_var("b", "Assets").depending_on(var("a")),
    ];

    match order_variables(declarations) {
        Err(FormulaError::CircularDependency(cycle)) => {
            assert!(cycle.contains("$a"));
            assert!(cycle.contains("$b"));
            assert!(!cycle.contains("$free"));
        }
        other => panic!("expected circular dependency, got {:?}", other.map(|o| names(&o))),
    }
}

#[test]
fn test_order_variables_empty() {
    assert!(order_variables(Vec::new()).unwrap().is_empty());
}
