#![forbid(unsafe_code)]

//! Expression engine.
//!
//! Template code (`{{ user.name }}`, query parameters such as
//! `each(items, 'item')`) is a small script subset compiled once into an
//! [`Expr`](parser::Expr) tree and cached per runtime by its source text.
//!
//! # Grammar
//!
//! Literals (numbers, strings, `true`, `false`, `null`, `undefined`,
//! arrays, objects), identifiers (including `$this`, `$root`, `$parent`,
//! `$parents`, `$index`, `$context`, `$parentContext`), member access,
//! indexing, calls, unary `! - + typeof`, binary arithmetic, comparison and
//! equality, `&& || ??` and the conditional operator.
//!
//! # Failure Modes
//!
//! A syntax error is a [`BlocksError::Parse`](crate::BlocksError::Parse)
//! carrying the offending offset; an unknown identifier is a
//! [`BlocksError::Reference`](crate::BlocksError::Reference). Template
//! rendering reports either on the debug channel and renders the segment as
//! empty.

pub(crate) mod cache;
pub(crate) mod eval;
pub(crate) mod lexer;
pub(crate) mod parser;
mod template;

pub use template::Expression;
pub(crate) use template::{ExpressionSubscription, escape_value};

use crate::BlocksError;
use crate::context::Context;
use crate::value::Value;

/// Parse and evaluate `source` against `context` without caching.
pub fn evaluate(source: &str, context: &Context) -> Result<Value, BlocksError> {
    let expr = parser::parse(source)?;
    eval::evaluate(&expr, context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_against_a_context() {
        let ctx = Context::root(Value::object([("a", Value::from(2))]));
        assert_eq!(evaluate("a * 3 + 1", &ctx).expect("eval"), Value::from(7));
    }

    #[test]
    fn parse_errors_surface() {
        let ctx = Context::root(Value::Undefined);
        assert!(matches!(evaluate("a +", &ctx), Err(BlocksError::Parse { .. })));
    }
}
