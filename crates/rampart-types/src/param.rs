//! Typed tool parameters: declared kinds and runtime values.
//!
//! Every tool parameter declares a [`ParamKind`]. Caller-supplied arguments
//! arrive as JSON (MCP) or as `key=value` strings (direct execution) and are
//! coerced into [`ParamValue`]s before constraints run. Coercion failures are
//! user-facing [`RampartError::Parameter`] errors.

use serde::{Deserialize, Serialize};

use crate::RampartError;

/// Declared kind of a tool parameter. Maps one-to-one onto the JSON Schema
/// type advertised to MCP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
}

impl ParamKind {
    /// The JSON Schema `type` string for this kind.
    pub fn json_schema_type(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
        }
    }
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.json_schema_type())
    }
}

/// A runtime parameter value, already coerced to its declared kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Number(f64),
    Integer(i64),
    Boolean(bool),
}

impl ParamValue {
    /// Coerce a JSON argument into a value of `kind`.
    ///
    /// Native JSON types are accepted directly; string representations are
    /// also accepted for numeric and boolean kinds since models frequently
    /// stringify arguments.
    pub fn from_json(name: &str, kind: ParamKind, raw: &serde_json::Value) -> Result<Self, RampartError> {
        let mismatch = || {
            RampartError::Parameter(format!(
                "parameter '{name}' expects {kind}, got {}",
                json_type_name(raw)
            ))
        };

        match kind {
            ParamKind::String => match raw {
                serde_json::Value::String(s) => Ok(ParamValue::String(s.clone())),
                serde_json::Value::Number(n) => Ok(ParamValue::String(n.to_string())),
                serde_json::Value::Bool(b) => Ok(ParamValue::String(b.to_string())),
                _ => Err(mismatch()),
            },
            ParamKind::Number => match raw {
                serde_json::Value::Number(n) => {
                    n.as_f64().map(ParamValue::Number).ok_or_else(mismatch)
                }
                serde_json::Value::String(s) => {
                    s.trim().parse::<f64>().map(ParamValue::Number).map_err(|_| mismatch())
                }
                _ => Err(mismatch()),
            },
            ParamKind::Integer => match raw {
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Ok(ParamValue::Integer(i))
                    } else {
                        // A float is acceptable only when it carries no
                        // fractional part.
                        match n.as_f64() {
                            Some(f) if f.fract() == 0.0 => Ok(ParamValue::Integer(f as i64)),
                            _ => Err(mismatch()),
                        }
                    }
                }
                serde_json::Value::String(s) => {
                    s.trim().parse::<i64>().map(ParamValue::Integer).map_err(|_| mismatch())
                }
                _ => Err(mismatch()),
            },
            ParamKind::Boolean => match raw {
                serde_json::Value::Bool(b) => Ok(ParamValue::Boolean(*b)),
                serde_json::Value::String(s) => parse_bool(s)
                    .map(ParamValue::Boolean)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
        }
    }

    /// Parse a `key=value` string from the direct-execute entrypoint.
    ///
    /// Booleans accept `true|false|1|0|yes|no` case-insensitively, numerics
    /// are decimal, strings are taken verbatim.
    pub fn from_cli(name: &str, kind: ParamKind, raw: &str) -> Result<Self, RampartError> {
        match kind {
            ParamKind::String => Ok(ParamValue::String(raw.to_string())),
            ParamKind::Number => raw.trim().parse::<f64>().map(ParamValue::Number).map_err(|_| {
                RampartError::Parameter(format!("parameter '{name}' expects number, got '{raw}'"))
            }),
            ParamKind::Integer => raw.trim().parse::<i64>().map(ParamValue::Integer).map_err(|_| {
                RampartError::Parameter(format!("parameter '{name}' expects integer, got '{raw}'"))
            }),
            ParamKind::Boolean => parse_bool(raw).map(ParamValue::Boolean).ok_or_else(|| {
                RampartError::Parameter(format!("parameter '{name}' expects boolean, got '{raw}'"))
            }),
        }
    }

    /// Coerce a YAML default value declared in the catalog.
    pub fn from_yaml(name: &str, kind: ParamKind, raw: &serde_yaml::Value) -> Result<Self, RampartError> {
        let as_json = yaml_scalar_to_json(raw).ok_or_else(|| {
            RampartError::Config(format!("parameter '{name}' has a non-scalar default value"))
        })?;
        Self::from_json(name, kind, &as_json).map_err(|_| {
            RampartError::Config(format!(
                "parameter '{name}' has a default that is not a valid {kind}"
            ))
        })
    }

    /// The declared kind this value carries.
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::String(_) => ParamKind::String,
            ParamValue::Number(_) => ParamKind::Number,
            ParamValue::Integer(_) => ParamKind::Integer,
            ParamValue::Boolean(_) => ParamKind::Boolean,
        }
    }

    /// Render the value for template substitution.
    ///
    /// Whole-valued floats render without a trailing `.0` so that numeric
    /// parameters substitute naturally into shell arithmetic.
    pub fn render(&self) -> String {
        match self {
            ParamValue::String(s) => s.clone(),
            ParamValue::Integer(i) => i.to_string(),
            ParamValue::Number(f) => {
                if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
                    format!("{}", *f as i64)
                } else {
                    f.to_string()
                }
            }
            ParamValue::Boolean(b) => b.to_string(),
        }
    }

    /// The JSON representation, used when advertising defaults in the MCP
    /// input schema.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::String(s) => serde_json::Value::String(s.clone()),
            ParamValue::Number(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ParamValue::Integer(i) => serde_json::Value::from(*i),
            ParamValue::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }

    /// Truthiness for template conditionals: `false`, zero, and the empty
    /// string are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            ParamValue::String(s) => !s.is_empty(),
            ParamValue::Number(f) => *f != 0.0,
            ParamValue::Integer(i) => *i != 0,
            ParamValue::Boolean(b) => *b,
        }
    }
}

/// Parse the boolean spellings accepted on the command line.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn json_type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Convert a scalar YAML value to JSON for uniform coercion. Sequences and
/// mappings are rejected (`None`).
fn yaml_scalar_to_json(v: &serde_yaml::Value) -> Option<serde_json::Value> {
    match v {
        serde_yaml::Value::Null => Some(serde_json::Value::Null),
        serde_yaml::Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(serde_json::Value::from(i))
            } else {
                n.as_f64().map(serde_json::Value::from)
            }
        }
        serde_yaml::Value::String(s) => Some(serde_json::Value::String(s.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_defaults_to_string() {
        assert_eq!(ParamKind::default(), ParamKind::String);
    }

    #[test]
    fn json_coercion_native_types() {
        let v = ParamValue::from_json("n", ParamKind::String, &serde_json::json!("abc")).unwrap();
        assert_eq!(v, ParamValue::String("abc".into()));

        let v = ParamValue::from_json("n", ParamKind::Number, &serde_json::json!(1.5)).unwrap();
        assert_eq!(v, ParamValue::Number(1.5));

        let v = ParamValue::from_json("n", ParamKind::Integer, &serde_json::json!(42)).unwrap();
        assert_eq!(v, ParamValue::Integer(42));

        let v = ParamValue::from_json("n", ParamKind::Boolean, &serde_json::json!(true)).unwrap();
        assert_eq!(v, ParamValue::Boolean(true));
    }

    #[test]
    fn json_coercion_from_strings() {
        let v = ParamValue::from_json("n", ParamKind::Number, &serde_json::json!("2.5")).unwrap();
        assert_eq!(v, ParamValue::Number(2.5));

        let v = ParamValue::from_json("n", ParamKind::Integer, &serde_json::json!("7")).unwrap();
        assert_eq!(v, ParamValue::Integer(7));

        let v = ParamValue::from_json("n", ParamKind::Boolean, &serde_json::json!("yes")).unwrap();
        assert_eq!(v, ParamValue::Boolean(true));
    }

    #[test]
    fn json_coercion_integer_rejects_fractional() {
        let err = ParamValue::from_json("n", ParamKind::Integer, &serde_json::json!(1.5));
        assert!(err.is_err());

        // Whole-valued floats are fine.
        let v = ParamValue::from_json("n", ParamKind::Integer, &serde_json::json!(3.0)).unwrap();
        assert_eq!(v, ParamValue::Integer(3));
    }

    #[test]
    fn json_coercion_rejects_structures() {
        assert!(ParamValue::from_json("n", ParamKind::String, &serde_json::json!([1, 2])).is_err());
        assert!(ParamValue::from_json("n", ParamKind::Number, &serde_json::json!({"a": 1})).is_err());
    }

    #[test]
    fn cli_boolean_spellings() {
        for raw in ["true", "TRUE", "1", "yes", "Yes"] {
            assert_eq!(
                ParamValue::from_cli("b", ParamKind::Boolean, raw).unwrap(),
                ParamValue::Boolean(true),
                "spelling {raw:?}"
            );
        }
        for raw in ["false", "FALSE", "0", "no", "No"] {
            assert_eq!(
                ParamValue::from_cli("b", ParamKind::Boolean, raw).unwrap(),
                ParamValue::Boolean(false),
                "spelling {raw:?}"
            );
        }
        assert!(ParamValue::from_cli("b", ParamKind::Boolean, "maybe").is_err());
    }

    #[test]
    fn cli_string_taken_verbatim() {
        let v = ParamValue::from_cli("s", ParamKind::String, "  spaced  ").unwrap();
        assert_eq!(v, ParamValue::String("  spaced  ".into()));
    }

    #[test]
    fn render_whole_floats_without_decimal_point() {
        assert_eq!(ParamValue::Number(5.0).render(), "5");
        assert_eq!(ParamValue::Number(2.5).render(), "2.5");
        assert_eq!(ParamValue::Integer(-3).render(), "-3");
        assert_eq!(ParamValue::Boolean(false).render(), "false");
    }

    #[test]
    fn truthiness() {
        assert!(ParamValue::String("x".into()).is_truthy());
        assert!(!ParamValue::String(String::new()).is_truthy());
        assert!(!ParamValue::Number(0.0).is_truthy());
        assert!(ParamValue::Integer(1).is_truthy());
        assert!(!ParamValue::Boolean(false).is_truthy());
    }

    #[test]
    fn yaml_default_coercion() {
        let v = ParamValue::from_yaml("d", ParamKind::Number, &serde_yaml::Value::from(3)).unwrap();
        assert_eq!(v, ParamValue::Number(3.0));

        let seq = serde_yaml::Value::Sequence(vec![]);
        assert!(ParamValue::from_yaml("d", ParamKind::String, &seq).is_err());
    }
}
