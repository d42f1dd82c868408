use super::support::*;
use crate::aspect::{Aspect, AspectModel};
use crate::evaluator::equality::{aspect_matches, EqualityCache};
use crate::model::{
    Context, DimensionValue, EntityIdentifier, FactId, ModelRepository, NewFact, Value,
    XmlNode,
};
use crate::{ExprEnv, QName};

fn matches(f: &Fixture, a: FactId, b: FactId, aspect: Aspect) -> bool {
    aspect_matches(&f.repo, &f.evaluator, Some(a), b, &aspect).unwrap()
}

#[test]
fn test_every_aspect_is_reflexive() {
    let mut f = Fixture::new();
    let assets = f.monetary("Assets");
    let ctx = f.context("0001", instant(2023, 12, 31));
    let usd = f.unit(QName::iso4217("USD"));
    let fact = f.fact(&assets, ctx, Some(usd), dec("100"));

    for model in [AspectModel::Dimensional, AspectModel::NonDimensional] {
        for aspect in model.aspects() {
            assert!(matches(&f, fact, fact, aspect.clone()), "{} not reflexive", aspect);
        }
    }
}

#[test]
fn test_missing_exemplar_never_matches() {
    let mut f = Fixture::new();
    let assets = f.monetary("Assets");
    let ctx = f.context("0001", instant(2023, 12, 31));
    let fact = f.fact(&assets, ctx, None, dec("1"));
    let result = aspect_matches(&f.repo, &f.evaluator, None, fact, &Aspect::Concept).unwrap();
    assert!(!result);
}

#[test]
fn test_contexts_compared_by_content() {
    let mut f = Fixture::new();
    let assets = f.monetary("Assets");
    let liabilities = f.monetary("Liabilities");
    let c1 = f.context("0001", instant(2023, 12, 31));
    let c2 = f.context("0001", instant(2023, 12, 31));
    let c3 = f.context("0002", instant(2022, 12, 31));
    let a = f.fact(&assets, c1, None, dec("1"));
    let b = f.fact(&liabilities, c2, None, dec("2"));
    let c = f.fact(&liabilities, c3, None, dec("3"));

    assert!(matches(&f, a, b, Aspect::Period));
    assert!(matches(&f, a, b, Aspect::EntityIdentifier));
    assert!(!matches(&f, a, b, Aspect::Concept));
    assert!(!matches(&f, a, c, Aspect::Period));
    assert!(!matches(&f, a, c, Aspect::EntityIdentifier));
}

#[test]
fn test_units_compared_by_measures() {
    let mut f = Fixture::new();
    let assets = f.monetary("Assets");
    let ctx = f.context("0001", instant(2023, 12, 31));
    let usd1 = f.unit(QName::iso4217("USD"));
    let usd2 = f.unit(QName::iso4217("USD"));
    let eur = f.unit(QName::iso4217("EUR"));
    let a = f.fact(&assets, ctx, Some(usd1), dec("1"));
    let b = f.fact(&assets, ctx, Some(usd2), dec("2"));
    let c = f.fact(&assets, ctx, Some(eur), dec("3"));
    let d = f.fact(&assets, ctx, None, dec("4"));

    assert!(matches(&f, a, b, Aspect::Unit));
    assert!(!matches(&f, a, c, Aspect::Unit));
    assert!(!matches(&f, a, d, Aspect::Unit));
}

#[test]
fn test_defaulted_dimension_equals_reported_default() {
    let mut f = Fixture::new();
    let region = qn("RegionAxis");
    let all = qn("AllRegions");
    let europe = qn("Europe");
    f.repo.set_dimension_default(region.clone(), all.clone());
    let sales = f.monetary("Sales");

    let entity = EntityIdentifier::new(SCHEME, "0001");
    let plain = f.add_context(Context::new("plain", entity.clone(), instant(2023, 12, 31)));
    let explicit_default = f.add_context(
        Context::new("all", entity.clone(), instant(2023, 12, 31))
            .with_dimension(region.clone(), DimensionValue::explicit(all)),
    );
    let eu = f.add_context(
        Context::new("eu", entity, instant(2023, 12, 31))
            .with_dimension(region.clone(), DimensionValue::explicit(europe)),
    );
    let a = f.fact(&sales, plain, None, dec("1"));
    let b = f.fact(&sales, explicit_default, None, dec("2"));
    let c = f.fact(&sales, eu, None, dec("3"));

    let dimension = Aspect::Dimension(region);
    assert!(matches(&f, a, b, dimension.clone()));
    assert!(!matches(&f, a, c, dimension.clone()));
    assert!(!matches(&f, b, c, dimension));
}

#[test]
fn test_typed_dimension_uses_declared_equality() {
    let mut f = Fixture::new();
    let customer = qn("CustomerAxis");
    let sales = f.monetary("Sales");
    let entity = EntityIdentifier::new(SCHEME, "0001");
    let member = |text: &str| XmlNode::element(qn("customer")).with_text(text);

    let upper = f.add_context(
        Context::new("upper", entity.clone(), instant(2023, 12, 31))
            .with_dimension(customer.clone(), DimensionValue::typed(member("ACME"))),
    );
    let lower = f.add_context(
        Context::new("lower", entity, instant(2023, 12, 31))
            .with_dimension(customer.clone(), DimensionValue::typed(member("acme"))),
    );
    let a = f.fact(&sales, upper, None, dec("1"));
    let b = f.fact(&sales, lower, None, dec("2"));

    let dimension = Aspect::Dimension(customer.clone());
    assert!(!matches(&f, a, b, dimension.clone()));

    let case_insensitive = f.evaluator.define("lower-case($a) eq lower-case($b)", |env: &ExprEnv<'_>| {
        let text = |name: &str| match env.variable(&QName::local(name)).map(Vec::as_slice) {
            Some([Value::Node(n)]) => n.text().to_lowercase(),
            _ => String::new(),
        };
        Ok(vec![Value::Boolean(text("a") == text("b"))])
    });
    f.repo.set_typed_dimension_equality(customer, case_insensitive);
    assert!(matches(&f, a, b, dimension));
}

#[test]
fn test_location_compares_parents_within_instance() {
    let mut f = Fixture::new();
    let row = f.tuple("Row");
    let amount = f.monetary("Amount");
    let ctx = f.context("0001", instant(2023, 12, 31));
    let t1 = f.repo.add_fact(f.source, NewFact::tuple(row.clone())).unwrap();
    let t2 = f.repo.add_fact(f.source, NewFact::tuple(row)).unwrap();
    let in_t1 = f
        .repo
        .add_fact(f.source, NewFact::item(amount.clone(), ctx).with_value(dec("1")).in_tuple(t1))
        .unwrap();
    let also_t1 = f
        .repo
        .add_fact(f.source, NewFact::item(amount.clone(), ctx).with_value(dec("2")).in_tuple(t1))
        .unwrap();
    let in_t2 = f
        .repo
        .add_fact(f.source, NewFact::item(amount, ctx).with_value(dec("3")).in_tuple(t2))
        .unwrap();

    assert!(matches(&f, in_t1, also_t1, Aspect::Location));
    assert!(!matches(&f, in_t1, in_t2, Aspect::Location));
    assert!(matches(&f, t1, t2, Aspect::Location));
}

#[test]
fn test_location_always_matches_across_instances() {
    let mut f = Fixture::new();
    let row = f.tuple("Row");
    let amount = f.monetary("Amount");
    let ctx = f.context("0001", instant(2023, 12, 31));
    let parent = f.repo.add_fact(f.source, NewFact::tuple(row)).unwrap();
    let nested = f
        .repo
        .add_fact(f.source, NewFact::item(amount.clone(), ctx).with_value(dec("1")).in_tuple(parent))
        .unwrap();

    let other_ctx = f
        .repo
        .add_context(f.output, Context::new("o", EntityIdentifier::new(SCHEME, "0001"), instant(2023, 12, 31)))
        .unwrap();
    let root = f
        .repo
        .add_fact(f.output, NewFact::item(amount, other_ctx).with_value(dec("1")))
        .unwrap();
    assert!(matches(&f, nested, root, Aspect::Location));
}

#[test]
fn test_segment_content_compared_structurally() {
    let mut f = Fixture::new();
    let sales = f.monetary("Sales");
    let entity = EntityIdentifier::new(SCHEME, "0001");
    let node = |text: &str| XmlNode::element(qn("segment")).with_text(text);
    let a_ctx = f.add_context(
        Context::new("a", entity.clone(), instant(2023, 12, 31)).with_segment_node(node("x")),
    );
    let b_ctx = f.add_context(
        Context::new("b", entity.clone(), instant(2023, 12, 31)).with_segment_node(node("x")),
    );
    let c_ctx = f.add_context(
        Context::new("c", entity, instant(2023, 12, 31)).with_segment_node(node("y")),
    );
    let a = f.fact(&sales, a_ctx, None, dec("1"));
    let b = f.fact(&sales, b_ctx, None, dec("1"));
    let c = f.fact(&sales, c_ctx, None, dec("1"));

    assert!(matches(&f, a, b, Aspect::NonXdtSegment));
    assert!(matches(&f, a, b, Aspect::CompleteSegment));
    assert!(!matches(&f, a, c, Aspect::NonXdtSegment));
}

#[test]
fn test_equality_cache_memoizes_results() {
    let mut f = Fixture::new();
    let assets = f.monetary("Assets");
    let c1 = f.context("0001", instant(2023, 12, 31));
    let c2 = f.context("0002", instant(2023, 12, 31));
    let a = f.fact(&assets, c1, None, dec("1"));
    let b = f.fact(&assets, c2, None, dec("2"));

    let mut cache = EqualityCache::new();
    let aspects = [Aspect::Concept, Aspect::Period, Aspect::EntityIdentifier];
    let first = cache
        .aspects_match(&f.repo, &f.evaluator, Some(a), b, aspects.iter())
        .unwrap();
    assert!(!first);
    let cached = cache.len();
    assert!(cached > 0);

    let second = cache
        .aspects_match(&f.repo, &f.evaluator, Some(a), b, aspects.iter())
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.len(), cached);
    assert!(f.repo.fact(a).is_some());
}
