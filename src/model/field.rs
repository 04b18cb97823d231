use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shape a mergeable field is normalized to before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Number,
    Text,
    /// Boolean-like; upstream may send 0/1, true/false or nothing
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDef {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Raw state of one field inside a snapshot or override map.
///
/// `Absent` (key missing) and `Null` (key present with JSON null) are kept apart
/// so callers can tell "never set" from "explicitly cleared".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldState<'a> {
    Absent,
    Null,
    Present(&'a Value),
}

impl<'a> FieldState<'a> {
    pub fn of(fields: &'a Map<String, Value>, name: &str) -> Self {
        match fields.get(name) {
            None => FieldState::Absent,
            Some(Value::Null) => FieldState::Null,
            Some(value) => FieldState::Present(value),
        }
    }
}

/// Normalized, non-null field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl ResolvedValue {
    pub fn to_json(&self) -> Value {
        match self {
            ResolvedValue::Flag(flag) => Value::Bool(*flag),
            ResolvedValue::Number(number) => serde_json::Number::from_f64(*number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ResolvedValue::Text(text) => Value::String(text.clone()),
        }
    }
}

/// Where a merged field's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSource {
    Override,
    Upstream,
    None,
}
