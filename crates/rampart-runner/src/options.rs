//! Helpers for validating runner option bags into typed fields.
//!
//! Option bags come from the tool definition only; they are parsed once at
//! backend construction and unknown keys are ignored. A value of the wrong
//! type is a configuration error.

use std::collections::BTreeMap;

use rampart_types::RampartError;

/// An untyped runner option bag as it appears in the catalog. Validated
/// into typed option records at backend construction; never consulted
/// afterwards.
pub type OptionBag = BTreeMap<String, serde_yaml::Value>;

pub(crate) fn get_string(bag: &OptionBag, key: &str) -> Result<Option<String>, RampartError> {
    match bag.get(key) {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(wrong_type(key, "string", other)),
    }
}

pub(crate) fn get_bool(bag: &OptionBag, key: &str) -> Result<Option<bool>, RampartError> {
    match bag.get(key) {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(wrong_type(key, "boolean", other)),
    }
}

pub(crate) fn get_i64(bag: &OptionBag, key: &str) -> Result<Option<i64>, RampartError> {
    match bag.get(key) {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| wrong_type(key, "integer", &serde_yaml::Value::Number(n.clone()))),
        Some(other) => Err(wrong_type(key, "integer", other)),
    }
}

pub(crate) fn get_string_list(bag: &OptionBag, key: &str) -> Result<Vec<String>, RampartError> {
    match bag.get(key) {
        None | Some(serde_yaml::Value::Null) => Ok(Vec::new()),
        Some(serde_yaml::Value::Sequence(items)) => items
            .iter()
            .map(|item| match item {
                serde_yaml::Value::String(s) => Ok(s.clone()),
                other => Err(wrong_type(key, "list of strings", other)),
            })
            .collect(),
        Some(other) => Err(wrong_type(key, "list of strings", other)),
    }
}

fn wrong_type(key: &str, expected: &str, found: &serde_yaml::Value) -> RampartError {
    let found = match found {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "boolean",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "list",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged value",
    };
    RampartError::Config(format!("runner option '{key}' must be a {expected}, found {found}"))
}
