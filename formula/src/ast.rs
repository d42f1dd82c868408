//! Identifier types shared by rules and the data model
//!
//! - `QName` for namespace-qualified names of concepts, variables, dimensions
//! - `Expression` for compiled expression handles owned by an expression evaluator
//! - `ExpressionIdGenerator` for handing out unique expression ids

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const XBRLI_NS: &str = "http://www.xbrl.org/2003/instance";
pub const XBRLDI_NS: &str = "http://xbrl.org/2006/xbrldi";
pub const ISO4217_NS: &str = "http://www.xbrl.org/2003/iso4217";

/// Namespace-qualified name
///
/// Equality, ordering and hashing use the namespace and local name only.
/// Displayed in Clark notation (`{namespace}local`), or as the bare local
/// name when there is no namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    namespace: Arc<str>,
    local_name: Arc<str>,
}

impl QName {
    pub fn new(namespace: &str, local_name: &str) -> Self {
        Self {
            namespace: Arc::from(namespace),
            local_name: Arc::from(local_name),
        }
    }

    /// Name in no namespace
    pub fn local(local_name: &str) -> Self {
        Self::new("", local_name)
    }

    pub fn xbrli(local_name: &str) -> Self {
        Self::new(XBRLI_NS, local_name)
    }

    pub fn iso4217(code: &str) -> Self {
        Self::new(ISO4217_NS, code)
    }

    /// `xbrli:pure`, the unit of dimensionless numbers
    pub fn pure() -> Self {
        Self::xbrli("pure")
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local_name)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local_name)
        }
    }
}

impl FromStr for QName {
    type Err = String;

    /// Parses Clark notation or a bare local name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('{') {
            let (ns, local) = rest
                .split_once('}')
                .ok_or_else(|| format!("unterminated namespace in '{}'", s))?;
            if local.is_empty() {
                return Err(format!("missing local name in '{}'", s));
            }
            Ok(QName::new(ns, local))
        } else if s.is_empty() {
            Err("empty qualified name".to_string())
        } else {
            Ok(QName::local(s))
        }
    }
}

impl Serialize for QName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Unique identifier for each compiled expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpressionId(u64);

impl ExpressionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ExpressionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expr_{}", self.0)
    }
}

/// Counter for generating unique expression IDs
#[derive(Debug, Default)]
pub struct ExpressionIdGenerator {
    next_id: u64,
}

impl ExpressionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> ExpressionId {
        let id = ExpressionId(self.next_id);
        self.next_id += 1;
        id
    }
}

/// Handle to an expression compiled by an expression evaluator
///
/// The engine never looks inside an expression. It passes the handle back to
/// the evaluator together with the variables in scope. Two handles are the
/// same expression when their ids are equal.
#[derive(Debug, Clone)]
pub struct Expression {
    id: ExpressionId,
    source: Arc<str>,
}

impl Expression {
    pub fn new(id: ExpressionId, source: &str) -> Self {
        Self {
            id,
            source: Arc::from(source),
        }
    }

    pub fn id(&self) -> ExpressionId {
        self.id
    }

    /// Source text, used in trace output and messages
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Expression {}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
