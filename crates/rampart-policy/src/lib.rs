//! Constraint policy engine for Rampart tools.
//!
//! Every tool declares an ordered list of boolean constraint expressions over
//! its parameters. [`compile`] type-checks the whole list against the
//! parameter schema once, at registration time; the resulting
//! [`CompiledPolicy`] is immutable, shareable, and evaluated on every call.
//!
//! The language covers string/list operations (`size`, `contains`,
//! `startsWith`, `endsWith`, regex `matches`, `exists`), arithmetic and
//! comparison operators with int/double promotion, list literals, and the
//! `int()`/`double()` casts. Expressions are pure: no I/O, no side effects,
//! no access to anything but the flat parameter environment.
//!
//! ```
//! use std::collections::{BTreeMap, HashMap};
//! use rampart_policy::{compile, Value};
//! use rampart_types::ParamKind;
//!
//! let schema: BTreeMap<String, ParamKind> =
//!     [("name".to_string(), ParamKind::String)].into();
//! let policy = compile(&["name.size() <= 100".to_string()], &schema).unwrap();
//!
//! let params: HashMap<String, Value> =
//!     [("name".to_string(), Value::Str("World".into()))].into();
//! let outcome = policy.evaluate(&params).unwrap();
//! assert!(outcome.satisfied);
//! ```

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod typecheck;

use std::collections::{BTreeMap, HashMap};

use rampart_types::{ParamKind, ParamValue, RampartError};
use regex::Regex;

pub use ast::{ExprError, Ty, Value};

/// One compiled constraint: source text, checked tree, and the regexes its
/// literal `matches` patterns compiled to.
#[derive(Debug)]
struct CompiledExpr {
    source: String,
    tree: ast::Expr,
    regexes: HashMap<String, Regex>,
}

/// An ordered list of compiled constraints, ready for per-call evaluation.
///
/// Compilation is pure: two tools with the same (expressions, schema) pair
/// compile equivalently. The compiled form is read-only and freely shareable
/// across concurrent calls.
#[derive(Debug, Default)]
pub struct CompiledPolicy {
    exprs: Vec<CompiledExpr>,
}

/// Result of evaluating a policy against one call's parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    /// True iff every constraint evaluated to true.
    pub satisfied: bool,
    /// Source text of each false constraint, in declaration order.
    pub failed: Vec<String>,
}

/// Compile an ordered list of constraint sources against a parameter schema.
///
/// Each expression must type-check to bool; anything else — syntax errors,
/// unknown identifiers, operand mismatches, invalid regex literals, a
/// non-boolean result — is a [`RampartError::Compile`] that must prevent the
/// tool from registering.
pub fn compile(
    sources: &[String],
    schema: &BTreeMap<String, ParamKind>,
) -> Result<CompiledPolicy, RampartError> {
    let mut exprs = Vec::with_capacity(sources.len());

    for source in sources {
        let compiled = compile_one(source, schema)
            .map_err(|e| RampartError::Compile(format!("constraint '{source}': {e}")))?;
        exprs.push(compiled);
    }

    Ok(CompiledPolicy { exprs })
}

fn compile_one(
    source: &str,
    schema: &BTreeMap<String, ParamKind>,
) -> Result<CompiledExpr, ExprError> {
    let tokens = lexer::lex(source)?;
    let tree = parser::parse(tokens, source.len())?;
    let mut regexes = HashMap::new();
    let ty = typecheck::typecheck(&tree, schema, &mut regexes)?;
    if ty != Ty::Bool {
        return Err(ExprError::Type {
            message: format!("constraint must evaluate to bool, found {ty}"),
        });
    }
    Ok(CompiledExpr {
        source: source.to_string(),
        tree,
        regexes,
    })
}

impl CompiledPolicy {
    /// Number of compiled constraints.
    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// Evaluate every constraint against the parameter values.
    ///
    /// All constraints are evaluated regardless of earlier failures so the
    /// caller receives the complete violation list; short-circuiting happens
    /// only inside a single expression. A reference to a parameter missing
    /// from `params` is an evaluation error, reported as
    /// [`RampartError::Parameter`].
    pub fn evaluate(&self, params: &HashMap<String, Value>) -> Result<PolicyOutcome, RampartError> {
        let mut failed = Vec::new();

        for expr in &self.exprs {
            match eval::eval(&expr.tree, params, &expr.regexes) {
                Ok(Value::Bool(true)) => {}
                Ok(Value::Bool(false)) => failed.push(expr.source.clone()),
                Ok(other) => {
                    // Unreachable after type checking; fail loudly if it is.
                    return Err(RampartError::Internal(format!(
                        "constraint '{}' produced non-boolean {}",
                        expr.source,
                        other.type_name()
                    )));
                }
                Err(ExprError::UnknownParam(name)) => {
                    return Err(RampartError::Parameter(format!(
                        "constraint '{}' references parameter '{name}' which has no value",
                        expr.source
                    )));
                }
                Err(e) => {
                    return Err(RampartError::Internal(format!(
                        "constraint '{}' failed to evaluate: {e}",
                        expr.source
                    )));
                }
            }
        }

        Ok(PolicyOutcome {
            satisfied: failed.is_empty(),
            failed,
        })
    }

    /// Convenience wrapper taking coerced tool parameters directly.
    pub fn evaluate_params(
        &self,
        params: &HashMap<String, ParamValue>,
    ) -> Result<PolicyOutcome, RampartError> {
        let values: HashMap<String, Value> = params
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(value)))
            .collect();
        self.evaluate(&values)
    }
}
