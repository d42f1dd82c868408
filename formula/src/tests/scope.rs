use super::support::*;
use crate::aspect::Aspect;
use crate::evaluator::context::{BindingKind, BoundValue, BoundVariable};
use crate::evaluator::scope::ScopeGuard;
use crate::model::{FactId, InstanceId, Value};
use crate::FormulaOptions;

fn fact(index: usize) -> FactId {
    FactId {
        instance: InstanceId(0),
        index,
    }
}

fn binding(name: &str, index: usize) -> BoundVariable {
    let mut binding = BoundVariable::new(var(name), BindingKind::Fact);
    binding.value = BoundValue::Fact(fact(index));
    binding
}

#[test]
fn test_guard_restores_state_on_drop() {
    let mut f = Fixture::new();
    let options = FormulaOptions::default();
    f.with_context(&options, |ctx| {
        {
            let mut guard = ScopeGuard::new(ctx);
            guard.bind_variable(var("a"), vec![Value::Integer(1)]);
            guard.push_binding(binding("a", 0));
            guard.contribute_aspect(Aspect::Period, Some(fact(0)));
            guard.contribute_aspect(Aspect::Concept, None);
            assert_eq!(guard.pending(), 4);
            assert!(guard.scope.contains(&var("a")));
            assert_eq!(guard.bindings.len(), 1);
            assert_eq!(guard.uncovered.len(), 2);
        }
        assert!(ctx.scope.is_empty());
        assert!(ctx.bindings.is_empty());
        assert!(ctx.uncovered.is_empty());
    });
}

#[test]
fn test_nested_guards_restore_shadowed_values() {
    let mut f = Fixture::new();
    let options = FormulaOptions::default();
    f.with_context(&options, |ctx| {
        let mut outer = ScopeGuard::new(ctx);
        outer.bind_variable(var("a"), vec![Value::Integer(1)]);
        outer.push_binding(binding("a", 0));
        outer.push_binding(binding("b", 1));
        {
            let mut inner = ScopeGuard::new(&mut outer);
            inner.bind_variable(var("a"), vec![Value::Integer(2)]);
            inner.push_binding(binding("a", 5));
            assert_eq!(inner.scope.get(&var("a")), Some(&vec![Value::Integer(2)]));
            assert_eq!(inner.binding(&var("a")).unwrap().yielded_fact(), Some(fact(5)));
            // a replaced binding moves to the end
            assert_eq!(inner.bindings[1].name, var("a"));
        }
        assert_eq!(outer.scope.get(&var("a")), Some(&vec![Value::Integer(1)]));
        assert_eq!(outer.binding(&var("a")).unwrap().yielded_fact(), Some(fact(0)));
        assert_eq!(outer.bindings[0].name, var("a"));
        assert_eq!(outer.bindings[1].name, var("b"));
    });
}

#[test]
fn test_existing_exemplar_is_kept() {
    let mut f = Fixture::new();
    let options = FormulaOptions::default();
    f.with_context(&options, |ctx| {
        let mut outer = ScopeGuard::new(ctx);
        outer.contribute_aspect(Aspect::Period, Some(fact(0)));
        {
            let mut inner = ScopeGuard::new(&mut outer);
            inner.contribute_aspect(Aspect::Period, Some(fact(1)));
            assert_eq!(inner.pending(), 0);
            assert_eq!(inner.uncovered.exemplar(&Aspect::Period), Some(fact(0)));
        }
        assert_eq!(outer.uncovered.exemplar(&Aspect::Period), Some(fact(0)));
    });
}

#[test]
fn test_covered_entry_takes_an_exemplar_later() {
    let mut f = Fixture::new();
    let options = FormulaOptions::default();
    f.with_context(&options, |ctx| {
        let mut outer = ScopeGuard::new(ctx);
        outer.contribute_aspect(Aspect::Unit, None);
        {
            let mut inner = ScopeGuard::new(&mut outer);
            inner.contribute_aspect(Aspect::Unit, Some(fact(3)));
            assert_eq!(inner.uncovered.exemplar(&Aspect::Unit), Some(fact(3)));
        }
        assert_eq!(outer.uncovered.get(&Aspect::Unit), Some(None));
    });
}

#[test]
fn test_state_restored_after_rule_run() {
    let mut f = Fixture::new();
    let assets = f.monetary("Assets");
    let first = f.context("0001", instant(2023, 12, 31));
    let second = f.context("0002", instant(2023, 12, 31));
    f.fact(&assets, first, None, dec("1"));
    f.fact(&assets, second, None, dec("2"));

    let (test, _) = f.recorder(&[]);
    let rule = assertion("restore", test).with_variable(fact_var("a", "Assets"));
    let options = FormulaOptions::default();
    f.with_context(&options, |ctx| {
        crate::evaluator::evaluate_rule(ctx, &rule).unwrap();
        assert!(ctx.bindings.is_empty());
        assert!(ctx.uncovered.is_empty());
        assert!(!ctx.scope.contains(&var("a")));
        assert_eq!(ctx.stats["restore"].evaluations, 2);
    });
}
