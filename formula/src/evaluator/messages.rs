//! Assertion message templates

use super::context::EvaluationContext;
use super::expression::{atomize, Item};
use crate::ast::QName;
use crate::error::ExpressionError;
use crate::model::{Sequence, Value};
use crate::semantic::MessageTemplate;
use regex::{Captures, Regex};
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("placeholder regex must compile"))
}

/// Render a template against the current scope.
///
/// `{source}` is replaced by the result of the template expression with
/// that source, and otherwise `{$name}` by the atomized value of a variable
/// in scope.
/// `{{` and `}}` stand for literal braces.
pub fn render(
    ctx: &EvaluationContext<'_>,
    template: &MessageTemplate,
    item: Option<Item<'_>>,
) -> Result<String, ExpressionError> {
    let mut failure = None;
    let text = placeholder_re().replace_all(&template.text, |caps: &Captures<'_>| {
        let whole = &caps[0];
        match caps.get(1) {
            None if whole == "{{" => "{".to_string(),
            None => "}".to_string(),
            Some(inner) => match substitute(ctx, template, inner.as_str().trim(), item) {
                Ok(text) => text,
                Err(e) => {
                    failure.get_or_insert(e);
                    String::new()
                }
            },
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(text.into_owned()),
    }
}

fn substitute(
    ctx: &EvaluationContext<'_>,
    template: &MessageTemplate,
    inner: &str,
    item: Option<Item<'_>>,
) -> Result<String, ExpressionError> {
    if let Some(expression) = template.expressions.iter().find(|e| e.source().trim() == inner) {
        let value = ctx.evaluate_sequence(expression, item)?;
        return Ok(render_sequence(&atomize(&*ctx.repository, &value)));
    }
    let Some(name) = inner.strip_prefix('$') else {
        return Err(ExpressionError::unknown_expression(inner));
    };
    let qname: QName = name
        .parse()
        .map_err(|_| ExpressionError::new("err:XPST0003", format!("bad variable {}", inner)))?;
    let value = ctx.scope.get(&qname).ok_or_else(|| {
        ExpressionError::new("err:XPST0008", format!("variable ${} is not in scope", name))
    })?;
    Ok(render_sequence(&atomize(&*ctx.repository, value)))
}

fn render_sequence(seq: &Sequence) -> String {
    let items: Vec<String> = seq.iter().map(Value::to_string).collect();
    items.join(" ")
}
