//! Static type checking of constraint expressions against a parameter schema.
//!
//! Every constraint must check to `bool` before a tool can register. Unknown
//! identifiers and operand type mismatches are compile errors here, never
//! runtime surprises. Regex literals used with `matches` are compiled during
//! this pass so malformed patterns also fail at registration.

use std::collections::{BTreeMap, HashMap};

use rampart_types::ParamKind;
use regex::Regex;

use crate::ast::{BinOp, CastKind, Expr, ExprError, Ty, UnaryOp};

/// Type-check `expr` against the schema.
///
/// Regexes compiled from literal `matches` patterns are collected into
/// `regexes`, keyed by pattern source, for reuse at evaluation time.
pub fn typecheck(
    expr: &Expr,
    schema: &BTreeMap<String, ParamKind>,
    regexes: &mut HashMap<String, Regex>,
) -> Result<Ty, ExprError> {
    let mut scope = Vec::new();
    infer(expr, schema, &mut scope, regexes)
}

fn param_ty(kind: ParamKind) -> Ty {
    match kind {
        ParamKind::String => Ty::Str,
        // Number parameters surface as doubles to the expression language.
        ParamKind::Number => Ty::Float,
        ParamKind::Integer => Ty::Int,
        ParamKind::Boolean => Ty::Bool,
    }
}

fn infer(
    expr: &Expr,
    schema: &BTreeMap<String, ParamKind>,
    scope: &mut Vec<(String, Ty)>,
    regexes: &mut HashMap<String, Regex>,
) -> Result<Ty, ExprError> {
    match expr {
        Expr::Str(_) => Ok(Ty::Str),
        Expr::Int(_) => Ok(Ty::Int),
        Expr::Float(_) => Ok(Ty::Float),
        Expr::Bool(_) => Ok(Ty::Bool),

        Expr::Ident(name) => {
            // Innermost exists-binding wins over a parameter of the same name.
            if let Some((_, ty)) = scope.iter().rev().find(|(n, _)| n == name) {
                return Ok(ty.clone());
            }
            schema
                .get(name)
                .map(|kind| param_ty(*kind))
                .ok_or_else(|| type_err(format!("unknown identifier '{name}'")))
        }

        Expr::List(elems) => {
            let mut elem_ty = Ty::Unknown;
            for elem in elems {
                let ty = infer(elem, schema, scope, regexes)?;
                elem_ty = unify(&elem_ty, &ty).ok_or_else(|| {
                    type_err(format!(
                        "list elements have mixed types: {elem_ty} and {ty}"
                    ))
                })?;
            }
            Ok(Ty::List(Box::new(elem_ty)))
        }

        Expr::Unary(op, inner) => {
            let ty = infer(inner, schema, scope, regexes)?;
            match op {
                UnaryOp::Not => match ty {
                    Ty::Bool => Ok(Ty::Bool),
                    other => Err(type_err(format!("'!' requires bool, found {other}"))),
                },
                UnaryOp::Neg => match ty {
                    Ty::Int => Ok(Ty::Int),
                    Ty::Float => Ok(Ty::Float),
                    other => Err(type_err(format!("unary '-' requires a number, found {other}"))),
                },
            }
        }

        Expr::Binary(op, lhs, rhs) => {
            let lt = infer(lhs, schema, scope, regexes)?;
            let rt = infer(rhs, schema, scope, regexes)?;
            check_binary(*op, &lt, &rt)
        }

        Expr::Method { recv, name, args } => {
            let recv_ty = infer(recv, schema, scope, regexes)?;
            let arg_tys = args
                .iter()
                .map(|a| infer(a, schema, scope, regexes))
                .collect::<Result<Vec<_>, _>>()?;
            check_method(name, &recv_ty, args, &arg_tys, regexes)
        }

        Expr::Exists { recv, var, pred } => {
            let recv_ty = infer(recv, schema, scope, regexes)?;
            let elem_ty = match recv_ty {
                Ty::List(elem) => *elem,
                other => {
                    return Err(type_err(format!("exists requires a list, found {other}")))
                }
            };
            scope.push((var.clone(), elem_ty));
            let pred_ty = infer(pred, schema, scope, regexes);
            scope.pop();
            match pred_ty? {
                Ty::Bool => Ok(Ty::Bool),
                other => Err(type_err(format!(
                    "exists predicate must be bool, found {other}"
                ))),
            }
        }

        Expr::Cast(kind, inner) => {
            let ty = infer(inner, schema, scope, regexes)?;
            match (kind, &ty) {
                (CastKind::Int, Ty::Int | Ty::Float) => Ok(Ty::Int),
                (CastKind::Double, Ty::Int | Ty::Float) => Ok(Ty::Float),
                (CastKind::Int, other) => {
                    Err(type_err(format!("int() requires a number, found {other}")))
                }
                (CastKind::Double, other) => {
                    Err(type_err(format!("double() requires a number, found {other}")))
                }
            }
        }
    }
}

fn check_binary(op: BinOp, lt: &Ty, rt: &Ty) -> Result<Ty, ExprError> {
    match op {
        BinOp::And | BinOp::Or => {
            if *lt == Ty::Bool && *rt == Ty::Bool {
                Ok(Ty::Bool)
            } else {
                Err(type_err(format!("'{op}' requires bool operands, found {lt} and {rt}")))
            }
        }
        BinOp::Add => {
            if *lt == Ty::Str && *rt == Ty::Str {
                return Ok(Ty::Str);
            }
            numeric(op, lt, rt)
        }
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => numeric(op, lt, rt),
        BinOp::Eq | BinOp::Ne => {
            unify(lt, rt).map(|_| Ty::Bool).ok_or_else(|| {
                type_err(format!("'{op}' cannot compare {lt} with {rt}"))
            })
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            if *lt == Ty::Str && *rt == Ty::Str {
                return Ok(Ty::Bool);
            }
            numeric_pair(lt, rt)
                .map(|_| Ty::Bool)
                .ok_or_else(|| type_err(format!("'{op}' cannot order {lt} with {rt}")))
        }
    }
}

fn numeric(op: BinOp, lt: &Ty, rt: &Ty) -> Result<Ty, ExprError> {
    numeric_pair(lt, rt)
        .ok_or_else(|| type_err(format!("'{op}' requires numeric operands, found {lt} and {rt}")))
}

/// Numeric promotion: int op int -> int, anything involving double -> double.
fn numeric_pair(lt: &Ty, rt: &Ty) -> Option<Ty> {
    match (lt, rt) {
        (Ty::Int, Ty::Int) => Some(Ty::Int),
        (Ty::Int | Ty::Float, Ty::Int | Ty::Float) => Some(Ty::Float),
        _ => None,
    }
}

/// Unify two types for equality and list-element purposes. `Unknown` (the
/// element type of an empty list) unifies with anything; ints and doubles
/// unify to double.
fn unify(a: &Ty, b: &Ty) -> Option<Ty> {
    match (a, b) {
        (Ty::Unknown, other) | (other, Ty::Unknown) => Some(other.clone()),
        _ if a == b => Some(a.clone()),
        (Ty::Int, Ty::Float) | (Ty::Float, Ty::Int) => Some(Ty::Float),
        (Ty::List(x), Ty::List(y)) => unify(x, y).map(|e| Ty::List(Box::new(e))),
        _ => None,
    }
}

fn check_method(
    name: &str,
    recv_ty: &Ty,
    args: &[Expr],
    arg_tys: &[Ty],
    regexes: &mut HashMap<String, Regex>,
) -> Result<Ty, ExprError> {
    let arity = |expected: usize| -> Result<(), ExprError> {
        if arg_tys.len() == expected {
            Ok(())
        } else {
            Err(type_err(format!(
                "{name}() expects {expected} argument(s), found {}",
                arg_tys.len()
            )))
        }
    };

    match name {
        "size" => {
            arity(0)?;
            match recv_ty {
                Ty::Str | Ty::List(_) => Ok(Ty::Int),
                other => Err(type_err(format!("size() requires string or list, found {other}"))),
            }
        }
        "contains" => {
            arity(1)?;
            match recv_ty {
                Ty::Str => match &arg_tys[0] {
                    Ty::Str => Ok(Ty::Bool),
                    other => Err(type_err(format!(
                        "contains() on a string requires a string argument, found {other}"
                    ))),
                },
                Ty::List(elem) => unify(elem, &arg_tys[0]).map(|_| Ty::Bool).ok_or_else(|| {
                    type_err(format!(
                        "contains() argument type {} does not match list element type {elem}",
                        arg_tys[0]
                    ))
                }),
                other => Err(type_err(format!(
                    "contains() requires string or list, found {other}"
                ))),
            }
        }
        "startsWith" | "endsWith" => {
            arity(1)?;
            match (recv_ty, &arg_tys[0]) {
                (Ty::Str, Ty::Str) => Ok(Ty::Bool),
                _ => Err(type_err(format!(
                    "{name}() requires string receiver and argument, found {recv_ty} and {}",
                    arg_tys[0]
                ))),
            }
        }
        "matches" => {
            arity(1)?;
            match (recv_ty, &arg_tys[0]) {
                (Ty::Str, Ty::Str) => {
                    // Literal patterns compile here so malformed regexes are
                    // registration-time failures.
                    if let Expr::Str(pattern) = &args[0] {
                        if !regexes.contains_key(pattern) {
                            let compiled = Regex::new(pattern).map_err(|e| {
                                type_err(format!("invalid regex {pattern:?}: {e}"))
                            })?;
                            regexes.insert(pattern.clone(), compiled);
                        }
                    }
                    Ok(Ty::Bool)
                }
                _ => Err(type_err(format!(
                    "matches() requires string receiver and pattern, found {recv_ty} and {}",
                    arg_tys[0]
                ))),
            }
        }
        "trim" | "lower" | "upper" => {
            arity(0)?;
            match recv_ty {
                Ty::Str => Ok(Ty::Str),
                other => Err(type_err(format!("{name}() requires a string, found {other}"))),
            }
        }
        other => Err(type_err(format!("unknown method '{other}'"))),
    }
}

fn type_err(message: String) -> ExprError {
    ExprError::Type { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn schema(entries: &[(&str, ParamKind)]) -> BTreeMap<String, ParamKind> {
        entries
            .iter()
            .map(|(n, k)| (n.to_string(), *k))
            .collect()
    }

    fn check(src: &str, schema: &BTreeMap<String, ParamKind>) -> Result<Ty, ExprError> {
        let ast = parse(lex(src)?, src.len())?;
        typecheck(&ast, schema, &mut HashMap::new())
    }

    #[test]
    fn string_size_comparison_is_bool() {
        let s = schema(&[("name", ParamKind::String)]);
        assert_eq!(check("name.size() <= 100", &s).unwrap(), Ty::Bool);
    }

    #[test]
    fn number_params_are_doubles() {
        let s = schema(&[("value", ParamKind::Number)]);
        assert_eq!(check("value >= 0.0 && value <= 1000.0", &s).unwrap(), Ty::Bool);
        // Int literals promote against doubles.
        assert_eq!(check("value >= 0", &s).unwrap(), Ty::Bool);
    }

    #[test]
    fn unknown_identifier_is_compile_error() {
        let s = schema(&[("name", ParamKind::String)]);
        let err = check("missing.size() > 0", &s).unwrap_err();
        assert!(err.to_string().contains("unknown identifier"), "got: {err}");
    }

    #[test]
    fn non_boolean_expression_is_detected_by_caller() {
        let s = schema(&[("value", ParamKind::Number)]);
        assert_eq!(check("value + 1", &s).unwrap(), Ty::Float);
    }

    #[test]
    fn string_number_comparison_rejected() {
        let s = schema(&[("name", ParamKind::String)]);
        let err = check("name > 3", &s).unwrap_err();
        assert!(err.to_string().contains("cannot order"), "got: {err}");
    }

    #[test]
    fn logical_ops_require_bool() {
        let s = schema(&[("n", ParamKind::Integer)]);
        assert!(check("n && true", &s).is_err());
        assert_eq!(check("n > 0 && n < 10", &s).unwrap(), Ty::Bool);
    }

    #[test]
    fn matches_compiles_literal_regex_once() {
        let s = schema(&[("expression", ParamKind::String)]);
        let src = "!expression.matches('.*[;&|`].*')";
        let ast = parse(lex(src).unwrap(), src.len()).unwrap();
        let mut regexes = HashMap::new();
        assert_eq!(typecheck(&ast, &s, &mut regexes).unwrap(), Ty::Bool);
        assert!(regexes.contains_key(".*[;&|`].*"));
    }

    #[test]
    fn invalid_regex_literal_is_compile_error() {
        let s = schema(&[("x", ParamKind::String)]);
        let err = check("x.matches('[unclosed')", &s).unwrap_err();
        assert!(err.to_string().contains("invalid regex"), "got: {err}");
    }

    #[test]
    fn int_cast_typing() {
        let s = schema(&[("value", ParamKind::Number)]);
        assert_eq!(check("int(value) % 2 == 0", &s).unwrap(), Ty::Bool);
        assert!(check("int('3')", &s).is_err());
    }

    #[test]
    fn exists_binds_element_type() {
        let s = schema(&[("ext", ParamKind::String)]);
        assert_eq!(
            check("['txt','md'].exists(e, e == ext)", &s).unwrap(),
            Ty::Bool
        );
        let err = check("['a'].exists(e, e + 1)", &s).unwrap_err();
        assert!(err.to_string().contains("numeric"), "got: {err}");
    }

    #[test]
    fn mixed_list_rejected() {
        let s = schema(&[]);
        assert!(check("[1, 'a']", &s).is_err());
        // Int/double mix promotes.
        assert_eq!(
            check("[1, 2.5]", &s).unwrap(),
            Ty::List(Box::new(Ty::Float))
        );
    }

    #[test]
    fn list_contains() {
        let s = schema(&[("mode", ParamKind::String)]);
        assert_eq!(check("['fast','slow'].contains(mode)", &s).unwrap(), Ty::Bool);
        assert!(check("['fast'].contains(3)", &s).is_err());
    }

    #[test]
    fn string_concat() {
        let s = schema(&[("a", ParamKind::String), ("b", ParamKind::String)]);
        assert_eq!(check("(a + b).size() < 10", &s).unwrap(), Ty::Bool);
    }

    #[test]
    fn exists_binding_shadows_parameter() {
        let s = schema(&[("v", ParamKind::Number)]);
        // Inside the predicate, `v` is the string element, not the number param.
        assert_eq!(
            check("['x'].exists(v, v.size() == 1)", &s).unwrap(),
            Ty::Bool
        );
    }
}
