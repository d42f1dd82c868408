use crate::evaluator::context::EvaluationContext;
use crate::evaluator::expression::NativeEvaluator;
use crate::evaluator::timeout::{CancellationToken, RunClock};
use crate::model::{
    Concept, Context, ContextId, EntityIdentifier, FactId, InstanceId, MemoryRepository, ModelRepository, NewFact,
    Period, PeriodType, Sequence, Unit, UnitId, Value,
};
use crate::semantic::{FactVariable, Filter, FilterArc, RuleKind, ValueAssertion, VariableDeclaration};
use crate::{Engine, Expression, FormulaOptions, QName, Rule, RunReport};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::rc::Rc;

pub const NS: &str = "http://example.com/test";
pub const SCHEME: &str = "http://www.sec.gov/CIK";

pub fn qn(local: &str) -> QName {
    QName::new(NS, local)
}

pub fn var(local: &str) -> QName {
    QName::local(local)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn instant(y: i32, m: u32, d: u32) -> Period {
    Period::Instant { at: date(y, m, d) }
}

/// Concept name filter on a concept of the test namespace
pub fn concept(local: &str) -> FilterArc {
    FilterArc::new(Filter::concept_name(qn(local)))
}

/// Fact variable `$name` over facts of one concept
pub fn fact_var(name: &str, concept_local: &str) -> VariableDeclaration {
    VariableDeclaration::fact(var(name), FactVariable::new().with_filter(concept(concept_local)))
}

pub fn assertion(id: &str, test: Expression) -> Rule {
    Rule::new(
        id,
        RuleKind::ValueAssertion(ValueAssertion {
            test,
            messages: Default::default(),
        }),
    )
}

/// Route engine logs to the test output; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Values of the named variables at each evaluation
pub type Log = Rc<RefCell<Vec<Vec<Sequence>>>>;

/// Source and output instances with a native evaluator
pub struct Fixture {
    pub repo: MemoryRepository,
    pub source: InstanceId,
    pub output: InstanceId,
    pub evaluator: NativeEvaluator,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        let mut repo = MemoryRepository::new();
        let source = repo.add_instance(QName::local("source"));
        let output = repo.add_instance(QName::local("output"));
        Self {
            repo,
            source,
            output,
            evaluator: NativeEvaluator::new(),
        }
    }

    pub fn monetary(&mut self, local: &str) -> QName {
        self.item(local, "monetaryItemType")
    }

    pub fn item(&mut self, local: &str, data_type: &str) -> QName {
        let name = qn(local);
        self.repo.add_concept(Concept::item(
            name.clone(),
            QName::xbrli(data_type),
            PeriodType::Instant,
        ));
        name
    }

    pub fn tuple(&mut self, local: &str) -> QName {
        let name = qn(local);
        self.repo.add_concept(Concept::tuple(name.clone()));
        name
    }

    pub fn context(&mut self, entity: &str, period: Period) -> ContextId {
        let id = format!("ctx{}", self.repo.instance(self.source).unwrap().contexts().len());
        self.add_context(Context::new(id, EntityIdentifier::new(SCHEME, entity), period))
    }

    pub fn add_context(&mut self, context: Context) -> ContextId {
        self.repo.add_context(self.source, context).unwrap()
    }

    pub fn unit(&mut self, measure: QName) -> UnitId {
        let id = format!("unit{}", self.repo.instance(self.source).unwrap().units().len());
        self.repo.add_unit(self.source, Unit::simple(id, measure)).unwrap()
    }

    pub fn fact(
        &mut self,
        concept: &QName,
        context: ContextId,
        unit: Option<UnitId>,
        value: impl Into<Value>,
    ) -> FactId {
        let mut fact = NewFact::item(concept.clone(), context).with_value(value);
        if let Some(unit) = unit {
            fact = fact.with_unit(unit);
        }
        self.repo.add_fact(self.source, fact).unwrap()
    }

    pub fn nil_fact(&mut self, concept: &QName, context: ContextId) -> FactId {
        self.repo
            .add_fact(self.source, NewFact::item(concept.clone(), context).nil())
            .unwrap()
    }

    /// Always-true test recording the values of `names` at each evaluation
    pub fn recorder(&mut self, names: &[&str]) -> (Expression, Log) {
        let log: Log = Rc::default();
        let names: Vec<QName> = names.iter().map(|n| var(n)).collect();
        let sink = Rc::clone(&log);
        let test = self.evaluator.define("true()", move |env| {
            let values = names
                .iter()
                .map(|n| env.variable(n).cloned().unwrap_or_default())
                .collect();
            sink.borrow_mut().push(values);
            Ok(vec![true.into()])
        });
        (test, log)
    }

    /// Run an evaluation context over the fixture
    pub fn with_context<R>(
        &mut self,
        options: &FormulaOptions,
        f: impl FnOnce(&mut EvaluationContext<'_>) -> R,
    ) -> R {
        let clock = RunClock::new(options, CancellationToken::new());
        let mut ctx =
            EvaluationContext::new(&mut self.repo, &self.evaluator, options, &clock, self.source);
        f(&mut ctx)
    }

    pub fn run(&mut self, rules: Vec<Rule>) -> RunReport {
        self.run_with(FormulaOptions::default(), rules)
    }

    pub fn run_with(&mut self, options: FormulaOptions, rules: Vec<Rule>) -> RunReport {
        let mut engine = Engine::with_options(options);
        for rule in rules {
            engine.add_rule(rule).unwrap();
        }
        engine
            .run(&mut self.repo, &self.evaluator, self.source)
            .unwrap()
    }

    /// Facts written to the output instance
    pub fn output_facts(&self) -> &[crate::model::Fact] {
        self.repo.instance(self.output).unwrap().facts()
    }
}
