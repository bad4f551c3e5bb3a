//! Tree-walking evaluator for compiled constraint expressions.
//!
//! Evaluation is pure: the only inputs are the expression, the parameter
//! values, and the pre-compiled regex table. `&&` and `||` short-circuit;
//! arithmetic faults (division by zero, overflowing casts) surface as
//! evaluation errors rather than panics.

use std::collections::HashMap;

use regex::Regex;

use crate::ast::{BinOp, CastKind, Expr, ExprError, UnaryOp, Value};

/// Evaluate `expr` against the parameter environment.
pub fn eval(
    expr: &Expr,
    env: &HashMap<String, Value>,
    regexes: &HashMap<String, Regex>,
) -> Result<Value, ExprError> {
    let mut scope = Vec::new();
    eval_in(expr, env, &mut scope, regexes)
}

fn eval_in(
    expr: &Expr,
    env: &HashMap<String, Value>,
    scope: &mut Vec<(String, Value)>,
    regexes: &HashMap<String, Regex>,
) -> Result<Value, ExprError> {
    match expr {
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Float(x) => Ok(Value::Float(*x)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),

        Expr::Ident(name) => {
            if let Some((_, v)) = scope.iter().rev().find(|(n, _)| n == name) {
                return Ok(v.clone());
            }
            env.get(name)
                .cloned()
                .ok_or_else(|| ExprError::UnknownParam(name.clone()))
        }

        Expr::List(elems) => {
            let values = elems
                .iter()
                .map(|e| eval_in(e, env, scope, regexes))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(values))
        }

        Expr::Unary(op, inner) => {
            let v = eval_in(inner, env, scope, regexes)?;
            match (op, v) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, Value::Int(i)) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| eval_err("integer negation overflow")),
                (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
                (op, v) => Err(eval_err(&format!(
                    "cannot apply {op:?} to {}",
                    v.type_name()
                ))),
            }
        }

        Expr::Binary(BinOp::And, lhs, rhs) => {
            match eval_in(lhs, env, scope, regexes)? {
                Value::Bool(false) => Ok(Value::Bool(false)),
                Value::Bool(true) => eval_in(rhs, env, scope, regexes),
                other => Err(eval_err(&format!("'&&' on {}", other.type_name()))),
            }
        }

        Expr::Binary(BinOp::Or, lhs, rhs) => {
            match eval_in(lhs, env, scope, regexes)? {
                Value::Bool(true) => Ok(Value::Bool(true)),
                Value::Bool(false) => eval_in(rhs, env, scope, regexes),
                other => Err(eval_err(&format!("'||' on {}", other.type_name()))),
            }
        }

        Expr::Binary(op, lhs, rhs) => {
            let lv = eval_in(lhs, env, scope, regexes)?;
            let rv = eval_in(rhs, env, scope, regexes)?;
            apply_binary(*op, lv, rv)
        }

        Expr::Method { recv, name, args } => {
            let rv = eval_in(recv, env, scope, regexes)?;
            let avs = args
                .iter()
                .map(|a| eval_in(a, env, scope, regexes))
                .collect::<Result<Vec<_>, _>>()?;
            apply_method(name, rv, avs, regexes)
        }

        Expr::Exists { recv, var, pred } => {
            let list = match eval_in(recv, env, scope, regexes)? {
                Value::List(items) => items,
                other => return Err(eval_err(&format!("exists on {}", other.type_name()))),
            };
            for item in list {
                scope.push((var.clone(), item));
                let result = eval_in(pred, env, scope, regexes);
                scope.pop();
                match result? {
                    Value::Bool(true) => return Ok(Value::Bool(true)),
                    Value::Bool(false) => {}
                    other => {
                        return Err(eval_err(&format!(
                            "exists predicate returned {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::Bool(false))
        }

        Expr::Cast(CastKind::Int, inner) => match eval_in(inner, env, scope, regexes)? {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Float(x) => {
                if x.is_finite() && x >= i64::MIN as f64 && x <= i64::MAX as f64 {
                    Ok(Value::Int(x.trunc() as i64))
                } else {
                    Err(eval_err(&format!("int({x}) out of range")))
                }
            }
            other => Err(eval_err(&format!("int() on {}", other.type_name()))),
        },

        Expr::Cast(CastKind::Double, inner) => match eval_in(inner, env, scope, regexes)? {
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::Float(x) => Ok(Value::Float(x)),
            other => Err(eval_err(&format!("double() on {}", other.type_name()))),
        },
    }
}

fn apply_binary(op: BinOp, lv: Value, rv: Value) -> Result<Value, ExprError> {
    use BinOp::*;

    match op {
        Eq => Ok(Value::Bool(values_equal(&lv, &rv))),
        Ne => Ok(Value::Bool(!values_equal(&lv, &rv))),

        Lt | Le | Gt | Ge => {
            let ordering = match (&lv, &rv) {
                (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                _ => {
                    let (a, b) = promote_pair(&lv, &rv)?;
                    a.partial_cmp(&b)
                }
            };
            let ordering =
                ordering.ok_or_else(|| eval_err("comparison with NaN has no ordering"))?;
            let result = match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }

        Add => match (&lv, &rv) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| eval_err("integer addition overflow")),
            _ => {
                let (a, b) = promote_pair(&lv, &rv)?;
                Ok(Value::Float(a + b))
            }
        },

        Sub => match (&lv, &rv) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .ok_or_else(|| eval_err("integer subtraction overflow")),
            _ => {
                let (a, b) = promote_pair(&lv, &rv)?;
                Ok(Value::Float(a - b))
            }
        },

        Mul => match (&lv, &rv) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .ok_or_else(|| eval_err("integer multiplication overflow")),
            _ => {
                let (a, b) = promote_pair(&lv, &rv)?;
                Ok(Value::Float(a * b))
            }
        },

        Div => match (&lv, &rv) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    Err(eval_err("division by zero"))
                } else {
                    a.checked_div(*b)
                        .map(Value::Int)
                        .ok_or_else(|| eval_err("integer division overflow"))
                }
            }
            _ => {
                let (a, b) = promote_pair(&lv, &rv)?;
                if b == 0.0 {
                    Err(eval_err("division by zero"))
                } else {
                    Ok(Value::Float(a / b))
                }
            }
        },

        Rem => match (&lv, &rv) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    Err(eval_err("modulo by zero"))
                } else {
                    a.checked_rem(*b)
                        .map(Value::Int)
                        .ok_or_else(|| eval_err("integer modulo overflow"))
                }
            }
            _ => {
                let (a, b) = promote_pair(&lv, &rv)?;
                if b == 0.0 {
                    Err(eval_err("modulo by zero"))
                } else {
                    Ok(Value::Float(a % b))
                }
            }
        },

        And | Or => unreachable!("short-circuited by caller"),
    }
}

/// Equality with int/double promotion, element-wise for lists.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        _ => a == b,
    }
}

/// Promote two numeric values to doubles.
fn promote_pair(a: &Value, b: &Value) -> Result<(f64, f64), ExprError> {
    let promote = |v: &Value| -> Result<f64, ExprError> {
        match v {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(x) => Ok(*x),
            other => Err(eval_err(&format!("expected a number, found {}", other.type_name()))),
        }
    };
    Ok((promote(a)?, promote(b)?))
}

fn apply_method(
    name: &str,
    recv: Value,
    args: Vec<Value>,
    regexes: &HashMap<String, Regex>,
) -> Result<Value, ExprError> {
    match (name, recv) {
        ("size", Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
        ("size", Value::List(items)) => Ok(Value::Int(items.len() as i64)),

        ("contains", Value::Str(s)) => match args.first() {
            Some(Value::Str(needle)) => Ok(Value::Bool(s.contains(needle.as_str()))),
            _ => Err(eval_err("contains() on a string requires a string argument")),
        },
        ("contains", Value::List(items)) => match args.first() {
            Some(needle) => Ok(Value::Bool(items.iter().any(|i| values_equal(i, needle)))),
            None => Err(eval_err("contains() requires an argument")),
        },

        ("startsWith", Value::Str(s)) => match args.first() {
            Some(Value::Str(p)) => Ok(Value::Bool(s.starts_with(p.as_str()))),
            _ => Err(eval_err("startsWith() requires a string argument")),
        },
        ("endsWith", Value::Str(s)) => match args.first() {
            Some(Value::Str(p)) => Ok(Value::Bool(s.ends_with(p.as_str()))),
            _ => Err(eval_err("endsWith() requires a string argument")),
        },

        ("matches", Value::Str(s)) => match args.first() {
            Some(Value::Str(pattern)) => {
                // Literal patterns were compiled during type checking; a
                // dynamically assembled pattern compiles here.
                if let Some(re) = regexes.get(pattern) {
                    Ok(Value::Bool(re.is_match(&s)))
                } else {
                    let re = Regex::new(pattern)
                        .map_err(|e| eval_err(&format!("invalid regex {pattern:?}: {e}")))?;
                    Ok(Value::Bool(re.is_match(&s)))
                }
            }
            _ => Err(eval_err("matches() requires a string pattern")),
        },

        ("trim", Value::Str(s)) => Ok(Value::Str(s.trim().to_string())),
        ("lower", Value::Str(s)) => Ok(Value::Str(s.to_lowercase())),
        ("upper", Value::Str(s)) => Ok(Value::Str(s.to_uppercase())),

        (other, recv) => Err(eval_err(&format!(
            "cannot call {other}() on {}",
            recv.type_name()
        ))),
    }
}

fn eval_err(message: &str) -> ExprError {
    ExprError::Eval {
        message: message.to_string(),
    }
}
