use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::model::{EntityKey, FieldSource, ResolvedValue};

/// Entity data as last pulled from upstream. Replaced wholesale by each sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamSnapshot {
    pub key: EntityKey,
    pub fields: Map<String, Value>,
    pub synced_at: DateTime<Utc>,
}

impl UpstreamSnapshot {
    pub fn new(key: EntityKey, fields: Map<String, Value>) -> Self {
        Self {
            key,
            fields,
            synced_at: Utc::now(),
        }
    }

    /// Display name under the kind's natural key, if upstream sent one
    pub fn natural_key(&self) -> Option<&str> {
        self.fields
            .get(self.key.kind.natural_key())
            .and_then(Value::as_str)
    }
}

/// Locally authored corrections for one entity.
///
/// A field missing from `fields` is absent; a field mapped to JSON null is an
/// explicit "no override" and falls through to upstream on merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub key: EntityKey,
    pub fields: Map<String, Value>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl OverrideRecord {
    pub fn new(key: EntityKey, fields: Map<String, Value>, updated_by: impl Into<String>) -> Self {
        Self {
            key,
            fields,
            updated_by: updated_by.into(),
            updated_at: Utc::now(),
        }
    }

    /// Fold `patch` into this record; keys in `patch` win, including nulls
    pub fn apply_patch(&mut self, patch: Map<String, Value>, updated_by: impl Into<String>) {
        for (name, value) in patch {
            self.fields.insert(name, value);
        }
        self.updated_by = updated_by.into();
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedField {
    pub value: Option<ResolvedValue>,
    pub source: FieldSource,
}

/// Read-time projection of snapshot + override. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedView {
    pub key: EntityKey,
    /// Natural-key display name from the snapshot
    pub name: Option<String>,
    pub fields: BTreeMap<String, MergedField>,
    pub has_override: bool,
    pub synced_at: Option<DateTime<Utc>>,
}

impl MergedView {
    pub fn value(&self, field: &str) -> Option<&ResolvedValue> {
        self.fields.get(field).and_then(|f| f.value.as_ref())
    }

    pub fn source(&self, field: &str) -> FieldSource {
        self.fields
            .get(field)
            .map(|f| f.source)
            .unwrap_or(FieldSource::None)
    }

    /// Flat `{field: value}` map as rendered on the dashboard
    pub fn values_json(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(name, field)| {
                let value = field
                    .value
                    .as_ref()
                    .map(ResolvedValue::to_json)
                    .unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect()
    }
}
