use super::support::*;
use crate::model::{Context, ContextId, DimensionValue, EntityIdentifier, FactId, NewFact, Value};
use crate::semantic::{Filter, FilterKind, GeneralVariable, VariableDeclaration};
use crate::{Aspect, AspectCover, FactVariable, FilterArc, FormulaError, FormulaOptions, Rule, RuleOutcome};

/// Assets and liabilities reported together in two contexts, assets alone
/// in a third
struct Balance {
    contexts: Vec<ContextId>,
    assets: Vec<FactId>,
    liabilities: Vec<FactId>,
}

fn balance(f: &mut Fixture) -> Balance {
    let assets = f.monetary("Assets");
    let liabilities = f.monetary("Liabilities");
    let contexts = vec![
        f.context("0001", instant(2023, 12, 31)),
        f.context("0001", instant(2022, 12, 31)),
        f.context("0001", instant(2021, 12, 31)),
    ];
    let assets = contexts
        .iter()
        .enumerate()
        .map(|(i, c)| f.fact(&assets, *c, None, Value::Integer(100 + i as i64)))
        .collect();
    let liabilities = contexts[..2]
        .iter()
        .enumerate()
        .map(|(i, c)| f.fact(&liabilities, *c, None, Value::Integer(50 + i as i64)))
        .collect();
    Balance {
        contexts,
        assets,
        liabilities,
    }
}

fn facts_of(values: &[Value]) -> Vec<FactId> {
    values.iter().filter_map(Value::as_fact).collect()
}

#[test]
fn test_implicit_filtering_joins_on_uncovered_aspects() {
    let mut f = Fixture::new();
    let b = balance(&mut f);
    let (test, log) = f.recorder(&["a", "l"]);
    let rule = assertion("join", test)
        .with_variable(fact_var("a", "Assets"))
        .with_variable(fact_var("l", "Liabilities"));

    let report = f.run(vec![rule]);
    let stats = &report.result("join").unwrap().stats;
    assert_eq!(stats.evaluations, 2);
    assert_eq!(stats.satisfied, 2);

    let log = log.borrow();
    assert_eq!(facts_of(&log[0][0]), vec![b.assets[0]]);
    assert_eq!(facts_of(&log[0][1]), vec![b.liabilities[0]]);
    assert_eq!(facts_of(&log[1][0]), vec![b.assets[1]]);
    assert_eq!(facts_of(&log[1][1]), vec![b.liabilities[1]]);
}

#[test]
fn test_without_implicit_filtering_binds_every_combination() {
    let mut f = Fixture::new();
    balance(&mut f);
    let (test, _) = f.recorder(&[]);
    let rule = assertion("cross", test)
        .with_variable(fact_var("a", "Assets"))
        .with_variable(fact_var("l", "Liabilities"))
        .without_implicit_filtering();

    let report = f.run(vec![rule]);
    assert_eq!(report.result("cross").unwrap().stats.evaluations, 3 * 2);
}

#[test]
fn test_covered_period_is_not_joined() {
    let mut f = Fixture::new();
    balance(&mut f);
    let (test, _) = f.recorder(&[]);
    let any_instant = Filter::new(FilterKind::ConceptPeriodType(crate::model::PeriodType::Instant));
    let liabilities = FactVariable::new()
        .with_filter(concept("Liabilities"))
        .with_filter(FilterArc::new(Filter::new(FilterKind::AspectCover(
            crate::AspectCover::aspect(Aspect::Period),
        ))))
        .with_filter(FilterArc::new(any_instant).uncovering());
    let rule = assertion("covered", test)
        .with_variable(fact_var("a", "Assets"))
        .with_variable(VariableDeclaration::fact(var("l"), liabilities));

    let report = f.run(vec![rule]);
    assert_eq!(report.result("covered").unwrap().stats.evaluations, 3 * 2);
}

#[test]
fn test_fallback_binds_when_no_fact_matches() {
    let mut f = Fixture::new();
    let b = balance(&mut f);
    let zero = f.evaluator.constant("0", vec![Value::Integer(0)]);
    let (test, log) = f.recorder(&["a", "l"]);
    let liabilities = FactVariable::new()
        .with_filter(concept("Liabilities"))
        .with_fallback(zero);
    let rule = assertion("fallback", test)
        .with_variable(fact_var("a", "Assets"))
        .with_variable(VariableDeclaration::fact(var("l"), liabilities));

    let report = f.run(vec![rule]);
    let stats = &report.result("fallback").unwrap().stats;
    assert_eq!(stats.evaluations, 3);
    // fallback evaluations duplicating a fact evaluation
    assert_eq!(stats.skipped, 2);

    let log = log.borrow();
    let last = log.last().unwrap();
    assert_eq!(facts_of(&last[0]), vec![b.assets[2]]);
    assert_eq!(last[1], vec![Value::Integer(0)]);
}

#[test]
fn test_all_fallen_back_evaluation_is_skipped() {
    let mut f = Fixture::new();
    let zero = f.evaluator.constant("0", vec![Value::Integer(0)]);
    let (test, _) = f.recorder(&[]);
    let variable = FactVariable::new()
        .with_filter(concept("Missing"))
        .with_fallback(zero);
    let rule = assertion("empty", test).with_variable(VariableDeclaration::fact(var("m"), variable));

    let report = f.run(vec![rule]);
    let stats = &report.result("empty").unwrap().stats;
    assert_eq!(stats.evaluations, 0);
    assert_eq!(stats.skipped, 1);
}

#[test]
fn test_empty_fallback_counts_as_none() {
    let mut f = Fixture::new();
    balance(&mut f);
    let nothing = f.evaluator.constant("()", Vec::new());
    let (test, _) = f.recorder(&[]);
    let liabilities = FactVariable::new()
        .with_filter(concept("Liabilities"))
        .with_fallback(nothing);
    let rule = assertion("nothing", test)
        .with_variable(fact_var("a", "Assets"))
        .with_variable(VariableDeclaration::fact(var("l"), liabilities));

    let report = f.run(vec![rule]);
    let stats = &report.result("nothing").unwrap().stats;
    assert_eq!(stats.evaluations, 2);
    assert_eq!(stats.skipped, 0);
}

#[test]
fn test_nil_facts_excluded_unless_requested() {
    let mut f = Fixture::new();
    let assets = f.monetary("Assets");
    let ctx = f.context("0001", instant(2023, 12, 31));
    let other = f.context("0002", instant(2023, 12, 31));
    f.fact(&assets, ctx, None, dec("1"));
    f.nil_fact(&assets, other);

    let (test, _) = f.recorder(&[]);
    let without = assertion("without-nils", test.clone()).with_variable(fact_var("a", "Assets"));
    let with = assertion("with-nils", test).with_variable(VariableDeclaration::fact(
        var("a"),
        FactVariable::new().with_filter(concept("Assets")).with_nils(),
    ));

    let report = f.run(vec![without, with]);
    assert_eq!(report.result("without-nils").unwrap().stats.evaluations, 1);
    assert_eq!(report.result("with-nils").unwrap().stats.evaluations, 2);
}

#[test]
fn test_sequence_variable_groups_facts_by_uncovered_aspects() {
    let mut f = Fixture::new();
    let b = balance(&mut f);
    let (test, log) = f.recorder(&["s"]);
    let both = Filter::new(FilterKind::ConceptName {
        names: vec![qn("Assets"), qn("Liabilities")],
        expressions: Vec::new(),
    });
    let sequence = FactVariable::new()
        .with_filter(FilterArc::new(both))
        .bind_as_sequence();
    let rule = assertion("sequence", test).with_variable(VariableDeclaration::fact(var("s"), sequence));

    let report = f.run(vec![rule]);
    assert_eq!(report.result("sequence").unwrap().stats.evaluations, 3);

    let log = log.borrow();
    assert_eq!(facts_of(&log[0][0]), vec![b.assets[0], b.liabilities[0]]);
    assert_eq!(facts_of(&log[1][0]), vec![b.assets[1], b.liabilities[1]]);
    assert_eq!(facts_of(&log[2][0]), vec![b.assets[2]]);
}

#[test]
fn test_sequence_splits_aspect_matched_facts_unless_matches() {
    let mut f = Fixture::new();
    let b = balance(&mut f);
    let assets = qn("Assets");
    let duplicate = f.fact(&assets, b.contexts[0], None, Value::Integer(100));

    let (test, log) = f.recorder(&["s"]);
    let both = || {
        FilterArc::new(Filter::new(FilterKind::ConceptName {
            names: vec![qn("Assets"), qn("Liabilities")],
            expressions: Vec::new(),
        }))
    };
    let split = assertion("split", test.clone()).with_variable(VariableDeclaration::fact(
        var("s"),
        FactVariable::new().with_filter(both()).bind_as_sequence(),
    ));
    let report = f.run(vec![split]);
    // the first context yields one sequence per duplicate assets fact
    assert_eq!(report.result("split").unwrap().stats.evaluations, 4);
    {
        let log = log.borrow();
        assert_eq!(facts_of(&log[0][0]), vec![b.assets[0], b.liabilities[0]]);
        assert_eq!(facts_of(&log[1][0]), vec![duplicate, b.liabilities[0]]);
    }

    let together = assertion("together", test).with_variable(VariableDeclaration::fact(
        var("s"),
        FactVariable::new()
            .with_filter(both())
            .bind_as_sequence()
            .with_matches(),
    ));
    let report = f.run(vec![together]);
    assert_eq!(report.result("together").unwrap().stats.evaluations, 3);
}

#[test]
fn test_sequence_fallback_only_without_facts() {
    let mut f = Fixture::new();
    let zero = f.evaluator.constant("0", vec![Value::Integer(0)]);
    let (test, log) = f.recorder(&["s"]);
    let variable = FactVariable::new()
        .with_filter(concept("Missing"))
        .bind_as_sequence()
        .with_fallback(zero);
    let general = f.evaluator.constant("1", vec![Value::Integer(1)]);
    let rule = assertion("seq-fallback", test)
        .with_variable(VariableDeclaration::general(var("g"), GeneralVariable::new(general)))
        .with_variable(VariableDeclaration::fact(var("s"), variable));

    let report = f.run(vec![rule]);
    let stats = &report.result("seq-fallback").unwrap().stats;
    // the only fact variable fell back
    assert_eq!(stats.evaluations, 0);
    assert_eq!(stats.skipped, 1);
    assert!(log.borrow().is_empty());
}

#[test]
fn test_general_variable_binds_each_item() {
    let mut f = Fixture::new();
    let select = f.evaluator.constant(
        "(1, 2, 3)",
        vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)],
    );
    let (test, log) = f.recorder(&["g"]);
    let each = assertion("each", test.clone())
        .with_variable(VariableDeclaration::general(var("g"), GeneralVariable::new(select.clone())));
    let whole = assertion("whole", test).with_variable(VariableDeclaration::general(
        var("g"),
        GeneralVariable::new(select).bind_as_sequence(),
    ));

    let report = f.run(vec![each]);
    let each_stats = report.result("each").unwrap().stats.clone();
    // general-only evaluations are all wildcards: only the first survives
    assert_eq!(each_stats.evaluations, 1);
    assert_eq!(each_stats.skipped, 2);

    let report = f.run(vec![whole]);
    assert_eq!(report.result("whole").unwrap().stats.evaluations, 1);
    let log = log.borrow();
    assert_eq!(log.last().unwrap()[0].len(), 3);
}

#[test]
fn test_parameter_variable_reads_run_parameter() {
    let mut f = Fixture::new();
    balance(&mut f);
    let (test, log) = f.recorder(&["p"]);
    let rule = assertion("param", test)
        .with_variable(fact_var("a", "Assets"))
        .with_variable(VariableDeclaration::parameter(var("p"), qn("threshold")));

    let mut engine = crate::Engine::new();
    engine.add_rule(rule).unwrap();
    engine.set_parameter(qn("threshold"), vec![Value::Integer(10)]);
    let report = engine.run(&mut f.repo, &f.evaluator, f.source).unwrap();
    assert_eq!(report.result("param").unwrap().stats.evaluations, 3);
    assert!(log.borrow().iter().all(|e| e[0] == vec![Value::Integer(10)]));
}

#[test]
fn test_missing_parameter_aborts_rule() {
    let mut f = Fixture::new();
    balance(&mut f);
    let (test, _) = f.recorder(&[]);
    let rule = assertion("no-param", test)
        .with_variable(VariableDeclaration::parameter(var("p"), qn("threshold")));

    let report = f.run(vec![rule]);
    let result = report.result("no-param").unwrap();
    match &result.outcome {
        RuleOutcome::Aborted { code, .. } => assert_eq!(code, "xbrlve:missingParameterValue"),
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(
        FormulaError::MissingParameter(qn("threshold")).code(),
        "xbrlve:missingParameterValue"
    );
}

#[test]
fn test_dependent_variable_filters_on_earlier_binding() {
    let mut f = Fixture::new();
    balance(&mut f);
    let (test, log) = f.recorder(&["a", "p"]);
    let same_period = FactVariable::new()
        .with_filter(concept("Assets"))
        .with_filter(FilterArc::new(Filter::match_aspect(Aspect::Period, var("a"))));
    let rule = assertion("dependent", test)
        .with_variable(fact_var("a", "Assets"))
        .with_variable(VariableDeclaration::fact(var("p"), same_period).depending_on(var("a")))
        .without_implicit_filtering();

    let report = f.run(vec![rule]);
    assert_eq!(report.result("dependent").unwrap().stats.evaluations, 3);
    for evaluation in log.borrow().iter() {
        assert_eq!(facts_of(&evaluation[0]), facts_of(&evaluation[1]));
    }
}

/// Balance plus equity reported in every context
fn with_equity(f: &mut Fixture, b: &Balance) {
    let equity = f.monetary("Equity");
    for (i, ctx) in b.contexts.iter().enumerate() {
        f.fact(&equity, *ctx, None, Value::Integer(10 + i as i64));
    }
}

fn liabilities_or_zero(f: &mut Fixture) -> FactVariable {
    let zero = f.evaluator.constant("0", vec![Value::Integer(0)]);
    FactVariable::new()
        .with_filter(concept("Liabilities"))
        .with_fallback(zero)
}

#[test]
fn test_fallback_not_offered_when_join_finds_facts() {
    let mut f = Fixture::new();
    let b = balance(&mut f);
    with_equity(&mut f, &b);
    let liabilities = liabilities_or_zero(&mut f);
    let (test, log) = f.recorder(&["a", "l"]);
    let rule = assertion("complete", test)
        .with_variable(fact_var("a", "Assets"))
        .with_variable(fact_var("e", "Equity"))
        .with_variable(VariableDeclaration::fact(var("l"), liabilities));

    let report = f.run(vec![rule]);
    let stats = &report.result("complete").unwrap().stats;
    assert_eq!(stats.evaluations, 3);
    // no fallback evaluation needed dropping as a duplicate
    assert_eq!(stats.skipped, 0);

    let log = log.borrow();
    assert_eq!(facts_of(&log[0][1]), vec![b.liabilities[0]]);
    assert_eq!(facts_of(&log[1][1]), vec![b.liabilities[1]]);
    assert_eq!(facts_of(&log[2][0]), vec![b.assets[2]]);
    assert_eq!(log[2][1], vec![Value::Integer(0)]);
}

#[test]
fn test_dependent_variable_keeps_fallback() {
    let mut f = Fixture::new();
    let b = balance(&mut f);
    with_equity(&mut f, &b);
    let liabilities = liabilities_or_zero(&mut f);
    let (test, _) = f.recorder(&[]);
    let rule = assertion("dependent-fallback", test)
        .with_variable(fact_var("a", "Assets"))
        .with_variable(fact_var("e", "Equity"))
        .with_variable(VariableDeclaration::fact(var("l"), liabilities).depending_on(var("a")));

    let report = f.run(vec![rule]);
    let stats = &report.result("dependent-fallback").unwrap().stats;
    assert_eq!(stats.evaluations, 3);
    // the fallback follows each joined liabilities fact and duplicates it
    assert_eq!(stats.skipped, 2);
}

#[test]
fn test_winnowing_trace_binds_the_same_facts() {
    let mut f = Fixture::new();
    let b = balance(&mut f);
    with_equity(&mut f, &b);

    let mut run = |options: FormulaOptions| {
        let liabilities = liabilities_or_zero(&mut f);
        let (test, log) = f.recorder(&["a", "e", "l"]);
        let rule = assertion("traced", test)
            .with_variable(fact_var("a", "Assets"))
            .with_variable(fact_var("e", "Equity"))
            .with_variable(VariableDeclaration::fact(var("l"), liabilities));
        let report = f.run_with(options, vec![rule]);
        let stats = report.result("traced").unwrap().stats.clone();
        let bindings = log.borrow().clone();
        (stats, bindings)
    };

    let (bulk_stats, bulk) = run(FormulaOptions::default());
    let (traced_stats, traced) = run(FormulaOptions {
        trace_variable_filter_winnowing: true,
        trace_variable_filters_result: true,
        ..Default::default()
    });
    assert_eq!(bulk.len(), 3);
    assert_eq!(traced, bulk);
    assert_eq!(traced_stats, bulk_stats);
}

/// Rule binding `$t` to tuples, covering every aspect but the dimensions,
/// then `$a` to amounts
fn tuple_then_items(f: &mut Fixture) -> Rule {
    let row = f.tuple("Row");
    let amount = f.monetary("Amount");
    f.repo.add_fact(f.source, NewFact::tuple(row)).unwrap();
    let ctx = f.context("0001", instant(2023, 12, 31));
    f.fact(&amount, ctx, None, dec("1"));

    let cover = AspectCover {
        aspects: [
            Aspect::Location,
            Aspect::Concept,
            Aspect::EntityIdentifier,
            Aspect::Period,
            Aspect::Unit,
            Aspect::NonXdtSegment,
            Aspect::NonXdtScenario,
        ]
        .into_iter()
        .collect(),
        ..AspectCover::default()
    };
    let tuples = FactVariable::new()
        .with_filter(concept("Row"))
        .with_filter(FilterArc::new(Filter::new(FilterKind::AspectCover(cover))));
    let (test, _) = f.recorder(&[]);
    assertion("rows", test)
        .with_variable(VariableDeclaration::fact(var("t"), tuples))
        .with_variable(fact_var("a", "Amount"))
}

#[test]
fn test_tuple_binding_matches_items_without_dimensions() {
    let mut f = Fixture::new();
    let rule = tuple_then_items(&mut f);

    let report = f.run(vec![rule]);
    assert_eq!(report.result("rows").unwrap().stats.evaluations, 1);
}

#[test]
fn test_tuple_binding_with_uncovered_dimension_matches_no_item() {
    let mut f = Fixture::new();
    let rule = tuple_then_items(&mut f);
    f.add_context(
        Context::new("regional", EntityIdentifier::new(SCHEME, "0001"), instant(2023, 12, 31))
            .with_dimension(qn("Region"), DimensionValue::explicit(qn("Europe"))),
    );

    let report = f.run(vec![rule]);
    assert_eq!(report.result("rows").unwrap().stats.evaluations, 0);
}
