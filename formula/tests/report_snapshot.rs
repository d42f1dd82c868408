use formula::model::{
    Concept, Context, EntityIdentifier, MemoryRepository, NewFact, Period, PeriodType, Unit, Value,
};
use formula::{
    AccuracyRule, AspectSource, Engine, FactVariable, Filter, FilterArc, Formula, NativeEvaluator,
    OutputRules, QName, Rule, RuleKind, ValueAssertion, VariableDeclaration,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;

fn variable(name: &str, concept: &QName) -> VariableDeclaration {
    VariableDeclaration::fact(
        QName::local(name),
        FactVariable::new().with_filter(FilterArc::new(Filter::concept_name(concept.clone()))),
    )
}

#[test]
fn test_gross_profit_report() {
    let mut repo = MemoryRepository::new();
    let source = repo.add_instance(QName::local("source"));
    repo.add_instance(QName::local("output"));

    let [revenue, cost, gross_profit] = ["Revenue", "Cost", "GrossProfit"].map(|local| {
        let name = QName::new("http://example.com/gaap", local);
        repo.add_concept(Concept::item(
            name.clone(),
            QName::xbrli("monetaryItemType"),
            PeriodType::Instant,
        ));
        name
    });
    let usd = repo
        .add_unit(source, Unit::simple("USD", QName::iso4217("USD")))
        .unwrap();
    let mut context = |id: &str, year: i32| {
        let at = NaiveDate::from_ymd_opt(year, 12, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let entity = EntityIdentifier::new("http://www.sec.gov/CIK", "0000320193");
        repo.add_context(source, Context::new(id, entity, Period::Instant { at }))
            .unwrap()
    };
    let current = context("C1", 2023);
    let prior = context("C2", 2022);
    for (concept, ctx, value) in [
        (&revenue, current, 900),
        (&revenue, prior, 800),
        (&cost, current, 600),
    ] {
        let fact = NewFact::item(concept.clone(), ctx)
            .with_unit(usd)
            .with_value(Decimal::from(value));
        repo.add_fact(source, fact).unwrap();
    }

    let mut evaluator = NativeEvaluator::new();
    let covers_cost = evaluator.define("$a ge $b", |env| {
        let a = env.number(&QName::local("a")).unwrap_or_default();
        let b = env.number(&QName::local("b")).unwrap_or_default();
        Ok(vec![Value::Boolean(a >= b)])
    });
    let difference = evaluator.define("$a - $b", |env| {
        let a = env.number(&QName::local("a")).unwrap_or_default();
        let b = env.number(&QName::local("b")).unwrap_or_default();
        Ok(vec![Value::Decimal(a - b)])
    });
    let gross_profit_name = evaluator.constant("QName('GrossProfit')", vec![Value::QName(gross_profit)]);
    let zero = evaluator.constant("0", vec![Value::Integer(0)]);

    let margin = Rule::new(
        "margin",
        RuleKind::ValueAssertion(ValueAssertion {
            test: covers_cost,
            messages: Default::default(),
        }),
    )
    .with_variable(variable("a", &revenue))
    .with_variable(variable("b", &cost));

    let output = OutputRules::new(QName::local("output"))
        .with_source(AspectSource::Variable(QName::local("a")))
        .with_concept(gross_profit_name);
    let gross = Rule::new(
        "gross-profit",
        RuleKind::Formula(Formula {
            value: difference,
            accuracy: Some(AccuracyRule::Decimals(zero)),
            output,
        }),
    )
    .with_variable(variable("a", &revenue))
    .with_variable(variable("b", &cost));

    let mut engine = Engine::new();
    engine.add_rule(margin).unwrap();
    engine.add_rule(gross).unwrap();
    let report = engine.run(&mut repo, &evaluator, source).unwrap();

    insta::assert_json_snapshot!("gross_profit_report", report);
}
