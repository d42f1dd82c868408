use super::{FactId, InstanceId, Period, XmlNode};
use crate::ast::QName;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::fmt;

/// A single item produced by an expression or held by a variable
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Decimal(Decimal),
    Double(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
    QName(QName),
    DateTime(NaiveDateTime),
    /// `xs:date`, a whole day
    Date(NaiveDate),
    Period(Period),
    Fact(FactId),
    Node(XmlNode),
    Instance(InstanceId),
}

/// Ordered sequence of values, the result of every expression
pub type Sequence = Vec<Value>;

/// Type expected by `ExpressionEvaluator::evaluate_atomic`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicType {
    QName,
    String,
    Boolean,
    Decimal,
    Integer,
    DateTime,
    /// Any numeric type
    Numeric,
    AnyAtomic,
}

impl Value {
    pub fn as_fact(&self) -> Option<FactId> {
        match self {
            Value::Fact(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_qname(&self) -> Option<&QName> {
        match self {
            Value::QName(q) => Some(q),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Decimal(_) | Value::Double(_) | Value::Integer(_)
        )
    }

    pub fn is_atomic(&self) -> bool {
        !matches!(
            self,
            Value::Fact(_) | Value::Node(_) | Value::Instance(_) | Value::Period(_)
        )
    }

    /// Whether the value is an instance of `expected`
    pub fn conforms_to(&self, expected: AtomicType) -> bool {
        match expected {
            AtomicType::AnyAtomic => self.is_atomic(),
            AtomicType::Numeric => self.is_numeric(),
            AtomicType::QName => matches!(self, Value::QName(_)),
            AtomicType::String => matches!(self, Value::String(_)),
            AtomicType::Boolean => matches!(self, Value::Boolean(_)),
            AtomicType::Decimal => matches!(self, Value::Decimal(_) | Value::Integer(_)),
            AtomicType::Integer => matches!(self, Value::Integer(_)),
            AtomicType::DateTime => matches!(self, Value::DateTime(_) | Value::Date(_)),
        }
    }

    /// The value as a datetime. A date read as an instant or period end
    /// stands for the end of that day, the following midnight.
    pub fn as_datetime(&self, end_of_day: bool) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(at) => Some(*at),
            Value::Date(day) if end_of_day => day.succ_opt()?.and_hms_opt(0, 0, 0),
            Value::Date(day) => day.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Decimal(d) => write!(f, "{}", d.normalize()),
            Value::Double(d) => {
                if d.is_nan() {
                    write!(f, "NaN")
                } else if d.is_infinite() {
                    write!(f, "{}", if *d > 0.0 { "INF" } else { "-INF" })
                } else {
                    write!(f, "{}", d)
                }
            }
            Value::Integer(i) => write!(f, "{}", i),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::QName(q) => write!(f, "{}", q),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            Value::Date(day) => write!(f, "{}", day.format("%Y-%m-%d")),
            Value::Period(p) => write!(f, "{}", p),
            Value::Fact(id) => write!(f, "{}", id),
            Value::Node(n) => write!(f, "{}", n),
            Value::Instance(id) => write!(f, "{}", id),
        }
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<FactId> for Value {
    fn from(id: FactId) -> Self {
        Value::Fact(id)
    }
}

impl From<QName> for Value {
    fn from(q: QName) -> Self {
        Value::QName(q)
    }
}
