//! Lexical rendering of output values

use crate::model::{Accuracy, Digits, Value};
use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;

/// Render `value` as it is written into an output fact.
///
/// Numbers honour the accuracy: a finite `decimals` fixes the number of
/// fractional digits, a finite non-zero `precision` derives it from the
/// value's magnitude. Non-finite values, `precision` 0 or INF and
/// `decimals` INF use the default conversion. A negative digit count rounds
/// to tens, hundreds and so on.
pub fn render(value: &Value, accuracy: Option<Accuracy>) -> String {
    let Some(digits) = accuracy.and_then(fraction_digits_rule) else {
        return default_lexical(value);
    };
    match value {
        Value::Decimal(d) => render_decimal(*d, digits),
        Value::Integer(i) => render_decimal(Decimal::from(*i), digits),
        Value::Double(f) if f.is_finite() => render_double(*f, digits),
        other => default_lexical(other),
    }
}

/// How the fractional digit count is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FractionDigits {
    Fixed(i32),
    Significant(i32),
}

fn fraction_digits_rule(accuracy: Accuracy) -> Option<FractionDigits> {
    match accuracy {
        Accuracy::Decimals(Digits::Finite(d)) => Some(FractionDigits::Fixed(d)),
        Accuracy::Precision(Digits::Finite(p)) if p != 0 => Some(FractionDigits::Significant(p)),
        _ => None,
    }
}

fn default_lexical(value: &Value) -> String {
    match value {
        Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        other => other.to_string(),
    }
}

/// `log10(|x|)` truncated toward zero, for non-zero `x`
fn magnitude(x: Decimal) -> i32 {
    let mut a = x.abs();
    let mut m = 0;
    while a >= Decimal::TEN {
        a /= Decimal::TEN;
        m += 1;
    }
    while a < Decimal::ONE {
        a *= Decimal::TEN;
        m -= 1;
    }
    // below one, only exact powers of ten truncate to the floor
    if m < 0 && a != Decimal::ONE {
        m + 1
    } else {
        m
    }
}

fn digits_for(x: Decimal, rule: FractionDigits) -> i32 {
    match rule {
        FractionDigits::Fixed(d) => d,
        FractionDigits::Significant(p) if x.is_zero() => p,
        FractionDigits::Significant(p) => {
            let whole = if x.abs() >= Decimal::ONE { 1 } else { 0 };
            p - magnitude(x) - whole
        }
    }
}

fn render_decimal(x: Decimal, rule: FractionDigits) -> String {
    let digits = digits_for(x, rule);
    if digits >= 0 {
        let scale = digits.unsigned_abs().min(28);
        let mut rounded = x.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven);
        rounded.rescale(scale);
        rounded.to_string()
    } else {
        let Some(factor) = 10i64
            .checked_pow(digits.unsigned_abs())
            .map(Decimal::from)
        else {
            return "0".to_string();
        };
        let mut rounded = (x / factor)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
            * factor;
        rounded.rescale(0);
        rounded.to_string()
    }
}

fn render_double(x: f64, rule: FractionDigits) -> String {
    match Decimal::from_f64(x) {
        Some(d) => render_decimal(d, rule),
        None => default_lexical(&Value::Double(x)),
    }
}
