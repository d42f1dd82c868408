use crate::ast::QName;
use thiserror::Error;

/// Error raised by an expression evaluator.
///
/// `code` follows the XPath/XBRL convention (`err:XPTY0004`, `xfie:...`),
/// `message` is free text for the report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct ExpressionError {
    pub code: String,
    pub message: String,
}

impl ExpressionError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error for an expression handle that no evaluator registered.
    pub fn unknown_expression(source: &str) -> Self {
        Self::new(
            "formula:unknownExpression",
            format!("no evaluator registered for expression '{}'", source),
        )
    }

    /// Error for a sequence of the wrong cardinality or item type.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("err:XPTY0004", message)
    }
}

/// Failure to resolve one aspect of an output fact.
///
/// Each variant maps onto the `xbrlfe:` code reported for it. An aspect
/// error aborts production of the current output fact only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AspectRuleError {
    #[error("no concept rule or source for the output concept")]
    MissingConceptRule,

    #[error("no entity identifier rule or source")]
    MissingEntityIdentifierRule,

    #[error("no period rule or source")]
    MissingPeriodRule,

    #[error("numeric output concept {0} has no unit rule or source")]
    MissingUnitRule(QName),

    #[error("no explicit dimension rule or source for {0}")]
    MissingExplicitDimensionRule(QName),

    #[error("no typed dimension rule or source for {0}")]
    MissingTypedDimensionRule(QName),

    #[error("source variable {0} is bound to a sequence of facts with conflicting aspect values")]
    SequenceSourceConflict(QName),

    #[error("output value is a sequence of {0} items, expected at most one")]
    NonSingletonOutputValue(usize),

    #[error("output concept {0} is not defined")]
    UndefinedConcept(QName),

    #[error("location {0} is not a tuple in the output instance")]
    BadLocation(String),

    #[error("dimension content {0} is not allowed in an open context component")]
    BadSubsequentOccValue(QName),

    #[error("{0}")]
    Expression(#[from] ExpressionError),
}

impl AspectRuleError {
    /// Message code reported for the error.
    pub fn code(&self) -> &str {
        match self {
            AspectRuleError::MissingConceptRule => "xbrlfe:missingConceptRule",
            AspectRuleError::MissingEntityIdentifierRule => "xbrlfe:missingEntityIdentifierRule",
            AspectRuleError::MissingPeriodRule => "xbrlfe:missingPeriodRule",
            AspectRuleError::MissingUnitRule(_) => "xbrlfe:missingUnitRule",
            AspectRuleError::MissingExplicitDimensionRule(_) => {
                "xbrlfe:missingExplicitDimensionRule"
            }
            AspectRuleError::MissingTypedDimensionRule(_) => "xbrlfe:missingTypedDimensionRule",
            AspectRuleError::SequenceSourceConflict(_) => "xbrlfe:sequenceSAVConflicts",
            AspectRuleError::NonSingletonOutputValue(_) => "xbrlfe:nonSingletonOutputValue",
            AspectRuleError::UndefinedConcept(_) => "xbrlfe:missingConceptRule",
            AspectRuleError::BadLocation(_) => "xbrlfe:badLocation",
            AspectRuleError::BadSubsequentOccValue(_) => "xbrlfe:badSubsequentOCCValue",
            AspectRuleError::Expression(e) => &e.code,
        }
    }
}

/// Error types for running formula rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    /// An expression failed; aborts the current rule.
    #[error("rule {rule}: {source}")]
    Expression {
        rule: String,
        #[source]
        source: ExpressionError,
    },

    /// The run was cancelled or exceeded its time budget.
    #[error("formula run cancelled")]
    Cancelled,

    #[error("unknown instance {0}")]
    UnknownInstance(String),

    #[error("unknown variable {0}")]
    UnknownVariable(QName),

    #[error("parameter {0} has no value")]
    MissingParameter(QName),

    #[error("circular dependency among variables: {0}")]
    CircularDependency(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Engine error without a more specific category
    #[error("{0}")]
    Engine(String),
}

impl FormulaError {
    pub fn expression(rule: impl Into<String>, source: ExpressionError) -> Self {
        FormulaError::Expression {
            rule: rule.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FormulaError::Cancelled)
    }

    /// Message code reported for the error.
    pub fn code(&self) -> &str {
        match self {
            FormulaError::Expression { source, .. } => &source.code,
            FormulaError::Cancelled => "formula:cancelled",
            FormulaError::UnknownInstance(_) => "formula:unknownInstance",
            FormulaError::UnknownVariable(_) => "xbrlve:unresolvedDependency",
            FormulaError::MissingParameter(_) => "xbrlve:missingParameterValue",
            FormulaError::CircularDependency(_) => "xbrlve:cyclicDependencies",
            FormulaError::InvalidOption(_) => "formula:invalidOption",
            FormulaError::Engine(_) => "formula:error",
        }
    }
}
