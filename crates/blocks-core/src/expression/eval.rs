#![forbid(unsafe_code)]

//! AST evaluation against a [`Context`].
//!
//! Identifiers resolve in this order:
//!
//! 1. members of `$this`,
//! 2. the context's `$`-names and properties,
//! 3. properties of enclosing contexts (innermost first),
//! 4. the globals `NaN` and `Infinity`.
//!
//! Anything else is a [`BlocksError::Reference`]. Operators read through
//! observables (the read is tracked), while member access, calls and the
//! logical operators hand observables back untouched so the caller decides
//! whether to unwrap.

use std::cmp::Ordering;

use crate::BlocksError;
use crate::context::Context;
use crate::equality::strict_equals;
use crate::observable::Observable;
use crate::value::{Value, format_number};

use super::parser::{BinaryOp, Expr, LogicalOp, UnaryOp};

/// Evaluate `expr` in `ctx`.
pub(crate) fn evaluate(expr: &Expr, ctx: &Context) -> Result<Value, BlocksError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => resolve(ctx, name).map(|(value, _)| value),
        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::array),
        Expr::Object(entries) => {
            let mut evaluated = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                evaluated.push((key.clone(), evaluate(value, ctx)?));
            }
            Ok(Value::object(evaluated))
        }
        Expr::Member(object, name) => Ok(member(&evaluate(object, ctx)?, name)),
        Expr::Index(object, index) => {
            let object = evaluate(object, ctx)?;
            let key = property_key(&evaluate(index, ctx)?.unwrap());
            Ok(member(&object, &key))
        }
        Expr::Call(callee, args) => call(callee, args, ctx),
        Expr::Unary(op, operand) => unary(*op, operand, ctx),
        Expr::Binary(op, lhs, rhs) => {
            let lhs = evaluate(lhs, ctx)?.unwrap();
            let rhs = evaluate(rhs, ctx)?.unwrap();
            Ok(binary(*op, &lhs, &rhs))
        }
        Expr::Logical(op, lhs, rhs) => {
            let left = evaluate(lhs, ctx)?;
            let tested = left.unwrap();
            let take_left = match op {
                LogicalOp::And => !tested.truthy(),
                LogicalOp::Or => tested.truthy(),
                LogicalOp::Nullish => !tested.is_nullish(),
            };
            if take_left { Ok(left) } else { evaluate(rhs, ctx) }
        }
        Expr::Conditional(test, then, otherwise) => {
            if evaluate(test, ctx)?.unwrap().truthy() {
                evaluate(then, ctx)
            } else {
                evaluate(otherwise, ctx)
            }
        }
    }
}

/// Resolve `name`, returning the value and the `this` a bare call of it
/// receives.
fn resolve(ctx: &Context, name: &str) -> Result<(Value, Value), BlocksError> {
    let this = ctx.this();
    if has_member(&this.peek(), name) {
        let value = this.unwrap().get_member(name);
        return Ok((value, this));
    }
    if let Some(value) = ctx.lookup(name) {
        return Ok((value, Value::Context(ctx.clone())));
    }
    let mut outer = ctx.parent_context();
    while let Some(scope) = outer {
        if let Some(value) = scope.property(name) {
            return Ok((value, Value::Context(scope.clone())));
        }
        outer = scope.parent_context();
    }
    match name {
        "NaN" => Ok((Value::Number(f64::NAN), Value::Undefined)),
        "Infinity" => Ok((Value::Number(f64::INFINITY), Value::Undefined)),
        _ => Err(BlocksError::Reference(name.to_owned())),
    }
}

fn has_member(value: &Value, name: &str) -> bool {
    match value {
        Value::Object(map) => map.borrow().contains_key(name),
        Value::Context(ctx) => ctx.lookup(name).is_some(),
        _ => false,
    }
}

fn property_key(value: &Value) -> String {
    match value {
        Value::Number(n) => format_number(*n),
        other => other.to_display_string(),
    }
}

/// `object.name`.
pub(crate) fn member(object: &Value, name: &str) -> Value {
    match object {
        Value::Observable(observable) => {
            if name == "view" {
                return observable
                    .view()
                    .map_or(Value::Undefined, Value::Observable);
            }
            observable.get().get_member(name)
        }
        other => other.get_member(name),
    }
}

fn call(callee: &Expr, args: &[Expr], ctx: &Context) -> Result<Value, BlocksError> {
    let (function, this, label) = match callee {
        Expr::Member(object, name) => {
            let object = evaluate(object, ctx)?;
            let args = evaluate_args(args, ctx)?;
            return call_method(&object, name, &args);
        }
        Expr::Ident(name) => {
            let (value, this) = resolve(ctx, name)?;
            (value, this, name.clone())
        }
        other => (evaluate(other, ctx)?, Value::Undefined, "expression".to_owned()),
    };
    let args = evaluate_args(args, ctx)?;
    call_value(&function, &this, &args, &label)
}

fn evaluate_args(args: &[Expr], ctx: &Context) -> Result<Vec<Value>, BlocksError> {
    args.iter().map(|arg| evaluate(arg, ctx)).collect()
}

fn call_method(object: &Value, name: &str, args: &[Value]) -> Result<Value, BlocksError> {
    let target = object.unwrap();
    let function = member(object, name);
    if matches!(function, Value::Function(_) | Value::Observable(_)) {
        return call_value(&function, &target, args, name);
    }
    builtin_method(&target, name, args)
        .ok_or_else(|| BlocksError::NotCallable(name.to_owned()))
}

/// Call `function` with `this` and `args`.
///
/// An observable called without arguments is read, with one argument it
/// is written and the call yields `undefined`.
pub(crate) fn call_value(
    function: &Value,
    this: &Value,
    args: &[Value],
    label: &str,
) -> Result<Value, BlocksError> {
    match function {
        Value::Function(f) => f.call(this, args),
        Value::Observable(observable) => Ok(call_observable(observable, args)),
        _ => Err(BlocksError::NotCallable(label.to_owned())),
    }
}

fn call_observable(observable: &Observable, args: &[Value]) -> Value {
    match args.first() {
        None => observable.get(),
        Some(value) => {
            observable.set(value.clone());
            Value::Undefined
        }
    }
}

fn builtin_method(target: &Value, name: &str, args: &[Value]) -> Option<Value> {
    let arg = |i: usize| args.get(i).map(Value::unwrap).unwrap_or_default();
    match (target, name) {
        (_, "toString") => Some(Value::from(target.to_display_string())),
        (Value::String(s), "toUpperCase") => Some(Value::from(s.to_uppercase())),
        (Value::String(s), "toLowerCase") => Some(Value::from(s.to_lowercase())),
        (Value::String(s), "trim") => Some(Value::from(s.trim())),
        (Value::String(s), "indexOf") => {
            let needle = arg(0).to_display_string();
            Some(Value::from(s.find(&needle).map_or(-1.0, |byte| {
                s[..byte].chars().count() as f64
            })))
        }
        (Value::Array(items), "indexOf") => {
            let needle = arg(0);
            let position = items
                .borrow()
                .iter()
                .position(|item| strict_equals(item, &needle));
            Some(Value::from(position.map_or(-1.0, |i| i as f64)))
        }
        (Value::Array(items), "join") => {
            let separator = match arg(0) {
                Value::Undefined => ",".to_owned(),
                other => other.to_display_string(),
            };
            let joined = items
                .borrow()
                .iter()
                .map(Value::to_template_string)
                .collect::<Vec<_>>()
                .join(&separator);
            Some(Value::from(joined))
        }
        _ => None,
    }
}

fn unary(op: UnaryOp, operand: &Expr, ctx: &Context) -> Result<Value, BlocksError> {
    if op == UnaryOp::TypeOf {
        return match evaluate(operand, ctx) {
            Ok(value) => Ok(Value::from(value.type_of())),
            Err(BlocksError::Reference(_)) if matches!(operand, Expr::Ident(_)) => {
                Ok(Value::from("undefined"))
            }
            Err(err) => Err(err),
        };
    }
    let value = evaluate(operand, ctx)?.unwrap();
    Ok(match op {
        UnaryOp::Not => Value::Bool(!value.truthy()),
        UnaryOp::Neg => Value::Number(-value.to_number()),
        UnaryOp::Plus | UnaryOp::TypeOf => Value::Number(value.to_number()),
    })
}

fn is_stringish(value: &Value) -> bool {
    !matches!(
        value,
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_)
    )
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            if is_stringish(lhs) || is_stringish(rhs) {
                Value::from(format!(
                    "{}{}",
                    lhs.to_display_string(),
                    rhs.to_display_string()
                ))
            } else {
                Value::Number(lhs.to_number() + rhs.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(lhs.to_number() - rhs.to_number()),
        BinaryOp::Mul => Value::Number(lhs.to_number() * rhs.to_number()),
        BinaryOp::Div => Value::Number(lhs.to_number() / rhs.to_number()),
        BinaryOp::Rem => Value::Number(lhs.to_number() % rhs.to_number()),
        BinaryOp::Lt => Value::Bool(compare(lhs, rhs) == Some(Ordering::Less)),
        BinaryOp::Gt => Value::Bool(compare(lhs, rhs) == Some(Ordering::Greater)),
        BinaryOp::Le => Value::Bool(matches!(
            compare(lhs, rhs),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Ge => Value::Bool(matches!(
            compare(lhs, rhs),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Eq => Value::Bool(loose_equals(lhs, rhs)),
        BinaryOp::NotEq => Value::Bool(!loose_equals(lhs, rhs)),
        BinaryOp::StrictEq => Value::Bool(strict_equals(lhs, rhs)),
        BinaryOp::StrictNotEq => Value::Bool(!strict_equals(lhs, rhs)),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return Some(a.cmp(b));
    }
    lhs.to_number().partial_cmp(&rhs.to_number())
}

/// The `==` operator.
fn loose_equals(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_))
        | (Value::Bool(_), _)
        | (_, Value::Bool(_)) => lhs.to_number() == rhs.to_number(),
        (Value::Array(_) | Value::Object(_), Value::String(_) | Value::Number(_))
        | (Value::String(_) | Value::Number(_), Value::Array(_) | Value::Object(_)) => {
            let (container, primitive) = if is_stringish(lhs) && !matches!(lhs, Value::String(_)) {
                (lhs, rhs)
            } else {
                (rhs, lhs)
            };
            loose_equals(&Value::from(container.to_display_string()), primitive)
        }
        _ => strict_equals(lhs, rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parser::parse;
    use crate::value::Func;

    fn eval_in(ctx: &Context, source: &str) -> Result<Value, BlocksError> {
        evaluate(&parse(source).expect("parse"), ctx)
    }

    fn model() -> Context {
        Context::root(Value::object([
            ("name", Value::from("Ann")),
            ("count", Value::from(3)),
            ("items", Value::array(vec![1.into(), 2.into()])),
            ("user", Value::object([("age", Value::from(40))])),
        ]))
    }

    #[test]
    fn resolves_this_members_first() {
        let ctx = model();
        ctx.set_property("name", Value::from("shadowed"));
        assert_eq!(eval_in(&ctx, "name").expect("eval"), Value::from("Ann"));
        assert_eq!(eval_in(&ctx, "user.age + 1").expect("eval"), Value::from(41));
        assert_eq!(eval_in(&ctx, "items[1]").expect("eval"), Value::from(2));
        assert_eq!(eval_in(&ctx, "items.length").expect("eval"), Value::from(2));
    }

    #[test]
    fn falls_back_to_outer_properties_and_globals() {
        let root = model();
        root.set_property("greeting", Value::from("hi"));
        let item = Context::child(Some(&root), Value::from("x"), None);
        assert_eq!(eval_in(&item, "greeting").expect("eval"), Value::from("hi"));
        assert_eq!(eval_in(&item, "$parent.count").expect("eval"), Value::from(3));
        assert!(eval_in(&item, "NaN").expect("eval").to_number().is_nan());
        assert_eq!(
            eval_in(&item, "missing").expect_err("missing"),
            BlocksError::Reference("missing".into())
        );
    }

    #[test]
    fn string_concatenation_and_arithmetic() {
        let ctx = model();
        assert_eq!(eval_in(&ctx, "'n=' + count").expect("eval"), Value::from("n=3"));
        assert_eq!(eval_in(&ctx, "count * 2 - 1").expect("eval"), Value::from(5));
        assert_eq!(eval_in(&ctx, "7 % 4").expect("eval"), Value::from(3));
        assert_eq!(eval_in(&ctx, "1 + true").expect("eval"), Value::from(2));
    }

    #[test]
    fn logical_operators_return_operands() {
        let ctx = model();
        assert_eq!(eval_in(&ctx, "0 || name").expect("eval"), Value::from("Ann"));
        assert_eq!(eval_in(&ctx, "name && count").expect("eval"), Value::from(3));
        assert_eq!(eval_in(&ctx, "null ?? 'd'").expect("eval"), Value::from("d"));
        assert_eq!(eval_in(&ctx, "'' ?? 'd'").expect("eval"), Value::from(""));
    }

    #[test]
    fn loose_and_strict_equality() {
        let ctx = model();
        assert_eq!(eval_in(&ctx, "'3' == count").expect("eval"), Value::Bool(true));
        assert_eq!(eval_in(&ctx, "'3' === count").expect("eval"), Value::Bool(false));
        assert_eq!(eval_in(&ctx, "null == undefined").expect("eval"), Value::Bool(true));
        assert_eq!(eval_in(&ctx, "null == 0").expect("eval"), Value::Bool(false));
        assert_eq!(eval_in(&ctx, "'b' > 'a'").expect("eval"), Value::Bool(true));
    }

    #[test]
    fn observables_are_read_by_operators_and_calls() {
        let count = Observable::new(2);
        let ctx = Context::root(Value::object([("count", Value::from(count.clone()))]));
        assert!(eval_in(&ctx, "count").expect("eval").is_observable());
        assert_eq!(eval_in(&ctx, "count()").expect("eval"), Value::from(2));
        assert_eq!(eval_in(&ctx, "count + 1").expect("eval"), Value::from(3));
        assert_eq!(eval_in(&ctx, "!count").expect("eval"), Value::Bool(false));

        eval_in(&ctx, "count(5)").expect("eval");
        assert_eq!(count.peek(), Value::from(5));
    }

    #[test]
    fn methods_receive_their_object_as_this() {
        let greet = Func::new(|this, args| {
            Ok(Value::from(format!(
                "{} {}",
                this.get_member("name").to_display_string(),
                args.first().map(Value::to_display_string).unwrap_or_default()
            )))
        });
        let ctx = Context::root(Value::object([
            ("name", Value::from("Ann")),
            ("greet", Value::Function(greet)),
        ]));
        assert_eq!(eval_in(&ctx, "greet('!')").expect("eval"), Value::from("Ann !"));
        assert_eq!(
            eval_in(&ctx, "$this.greet('?')").expect("eval"),
            Value::from("Ann ?")
        );
    }

    #[test]
    fn builtin_string_and_array_methods() {
        let ctx = model();
        assert_eq!(eval_in(&ctx, "name.toUpperCase()").expect("eval"), Value::from("ANN"));
        assert_eq!(eval_in(&ctx, "items.join('-')").expect("eval"), Value::from("1-2"));
        assert_eq!(eval_in(&ctx, "items.indexOf(2)").expect("eval"), Value::from(1));
        assert_eq!(eval_in(&ctx, "count.toString()").expect("eval"), Value::from("3"));
        assert!(matches!(
            eval_in(&ctx, "name.nope()"),
            Err(BlocksError::NotCallable(_))
        ));
    }

    #[test]
    fn typeof_tolerates_unknown_names() {
        let ctx = model();
        assert_eq!(eval_in(&ctx, "typeof nope").expect("eval"), Value::from("undefined"));
        assert_eq!(eval_in(&ctx, "typeof name").expect("eval"), Value::from("string"));
    }
}
