use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{
    EntityKey, EntityKind, FieldDef, FieldKind, FieldSource, FieldState, MergedField, MergedView,
    OverrideRecord, ResolvedValue, UpstreamSnapshot,
};

/// Combines upstream snapshots with local overrides into merged views.
///
/// Stateless; every method is a pure function of its inputs.
pub struct MergeEngine;

impl MergeEngine {
    /// Merge one entity. Either side may be missing; a missing override is
    /// treated as a record whose fields are all absent.
    pub fn merge(
        key: &EntityKey,
        upstream: Option<&UpstreamSnapshot>,
        override_record: Option<&OverrideRecord>,
    ) -> MergedView {
        let empty = Map::new();
        let upstream_fields = upstream.map(|s| &s.fields).unwrap_or(&empty);

        let fields = key
            .kind
            .fields()
            .iter()
            .map(|def| {
                let override_state = override_record.map(|o| FieldState::of(&o.fields, def.name));
                let upstream_state = FieldState::of(upstream_fields, def.name);
                (def.name.to_string(), Self::resolve_field(def, upstream_state, override_state))
            })
            .collect();

        MergedView {
            key: key.clone(),
            name: upstream.and_then(|s| s.natural_key()).map(str::to_string),
            fields,
            has_override: override_record.is_some(),
            synced_at: upstream.map(|s| s.synced_at),
        }
    }

    /// Precedence for a single field: a non-null normalized override wins,
    /// then a non-null normalized upstream value, otherwise null.
    ///
    /// `override_state` is `None` when no override record exists at all.
    pub fn resolve_field(
        def: &FieldDef,
        upstream_state: FieldState<'_>,
        override_state: Option<FieldState<'_>>,
    ) -> MergedField {
        if let Some(state) = override_state {
            if let Some(value) = normalize(def.kind, state) {
                return MergedField {
                    value: Some(value),
                    source: FieldSource::Override,
                };
            }
        }

        match normalize(def.kind, upstream_state) {
            Some(value) => MergedField {
                value: Some(value),
                source: FieldSource::Upstream,
            },
            None => MergedField {
                value: None,
                source: FieldSource::None,
            },
        }
    }

    /// Merge every entity that has a snapshot or an override.
    ///
    /// Output is ordered by entity id. Snapshots and overrides must all belong
    /// to the same kind; entries of other kinds are ignored.
    pub fn merge_many(
        kind: EntityKind,
        snapshots: &[UpstreamSnapshot],
        overrides: &[OverrideRecord],
    ) -> Vec<MergedView> {
        let snapshots: BTreeMap<&str, &UpstreamSnapshot> = snapshots
            .iter()
            .filter(|s| s.key.kind == kind)
            .map(|s| (s.key.id.as_str(), s))
            .collect();
        let overrides: BTreeMap<&str, &OverrideRecord> = overrides
            .iter()
            .filter(|o| o.key.kind == kind)
            .map(|o| (o.key.id.as_str(), o))
            .collect();

        let ids: BTreeSet<&str> = snapshots.keys().chain(overrides.keys()).copied().collect();

        ids.into_iter()
            .map(|id| {
                let key = EntityKey::new(kind, id);
                Self::merge(&key, snapshots.get(id).copied(), overrides.get(id).copied())
            })
            .collect()
    }
}

/// Normalize a raw field into its kind's value, or `None` for null, absent
/// and unrecognized shapes.
pub fn normalize(kind: FieldKind, state: FieldState<'_>) -> Option<ResolvedValue> {
    let FieldState::Present(value) = state else {
        return None;
    };

    match kind {
        FieldKind::Flag => normalize_flag(value).map(ResolvedValue::Flag),
        FieldKind::Number => normalize_number(value).map(ResolvedValue::Number),
        FieldKind::Text => value.as_str().map(|s| ResolvedValue::Text(s.to_string())),
    }
}

/// 0 -> false, any other number -> true, booleans pass through.
pub fn normalize_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0),
        _ => None,
    }
}

/// Upstream money fields arrive as numbers or as decimal strings.
pub fn normalize_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project_key() -> EntityKey {
        EntityKey::new(EntityKind::Project, "42")
    }

    fn snapshot(fields: Value) -> UpstreamSnapshot {
        UpstreamSnapshot::new(project_key(), fields.as_object().unwrap().clone())
    }

    fn override_record(fields: Value) -> OverrideRecord {
        OverrideRecord::new(project_key(), fields.as_object().unwrap().clone(), "tester")
    }

    fn triple(view: &MergedView) -> (Option<ResolvedValue>, Option<ResolvedValue>, Option<ResolvedValue>) {
        (
            view.value("amount").cloned(),
            view.value("status").cloned(),
            view.value("prospective").cloned(),
        )
    }

    #[test]
    fn flag_normalization() {
        assert_eq!(normalize_flag(&json!(0)), Some(false));
        assert_eq!(normalize_flag(&json!(1)), Some(true));
        assert_eq!(normalize_flag(&json!(7)), Some(true));
        assert_eq!(normalize_flag(&json!(0.0)), Some(false));
        assert_eq!(normalize_flag(&json!(true)), Some(true));
        assert_eq!(normalize_flag(&json!(false)), Some(false));
        assert_eq!(normalize_flag(&Value::Null), None);
        assert_eq!(normalize(FieldKind::Flag, FieldState::Absent), None);
        assert_eq!(normalize(FieldKind::Flag, FieldState::Null), None);
    }

    #[test]
    fn malformed_shapes_normalize_to_null() {
        assert_eq!(normalize_flag(&json!("yes")), None);
        assert_eq!(normalize_flag(&json!([1])), None);
        assert_eq!(normalize_number(&json!("n/a")), None);
        assert_eq!(normalize_number(&json!({"value": 3})), None);
        assert_eq!(normalize(FieldKind::Text, FieldState::Present(&json!(12))), None);
    }

    #[test]
    fn decimal_strings_are_numbers() {
        assert_eq!(normalize_number(&json!("1250.50")), Some(1250.5));
        assert_eq!(normalize_number(&json!(" 10 ")), Some(10.0));
    }

    #[test]
    fn scenario_a_null_override_falls_through_to_upstream() {
        let up = snapshot(json!({"amount": 100, "status": "active", "prospective": false}));
        let ov = override_record(json!({"amount": null, "status": null, "prospective": null}));

        let view = MergeEngine::merge(&project_key(), Some(&up), Some(&ov));

        assert_eq!(
            triple(&view),
            (
                Some(ResolvedValue::Number(100.0)),
                Some(ResolvedValue::Text("active".into())),
                Some(ResolvedValue::Flag(false)),
            )
        );
        assert_eq!(view.source("amount"), FieldSource::Upstream);
        assert!(view.has_override);
    }

    #[test]
    fn scenario_b_override_values_win() {
        let up = snapshot(json!({"amount": 100, "status": "active", "prospective": false}));
        let ov = override_record(json!({"amount": 200, "status": "tender", "prospective": 1}));

        let view = MergeEngine::merge(&project_key(), Some(&up), Some(&ov));

        assert_eq!(
            triple(&view),
            (
                Some(ResolvedValue::Number(200.0)),
                Some(ResolvedValue::Text("tender".into())),
                Some(ResolvedValue::Flag(true)),
            )
        );
        assert_eq!(view.source("prospective"), FieldSource::Override);
    }

    #[test]
    fn scenario_c_zero_override_is_meaningful() {
        let up = snapshot(json!({"amount": null, "status": null, "prospective": null}));
        let ov = override_record(json!({"amount": 50, "status": "design", "prospective": 0}));

        let view = MergeEngine::merge(&project_key(), Some(&up), Some(&ov));

        assert_eq!(
            triple(&view),
            (
                Some(ResolvedValue::Number(50.0)),
                Some(ResolvedValue::Text("design".into())),
                Some(ResolvedValue::Flag(false)),
            )
        );
    }

    #[test]
    fn zero_override_beats_truthy_upstream() {
        let up = snapshot(json!({"prospective": 1, "amount": 900}));
        let ov = override_record(json!({"prospective": 0, "amount": 0}));

        let view = MergeEngine::merge(&project_key(), Some(&up), Some(&ov));

        assert_eq!(view.value("prospective"), Some(&ResolvedValue::Flag(false)));
        assert_eq!(view.value("amount"), Some(&ResolvedValue::Number(0.0)));
    }

    #[test]
    fn scenario_d_everything_missing_is_null() {
        let up = snapshot(json!({}));
        let ov = override_record(json!({"amount": null}));

        for view in [
            MergeEngine::merge(&project_key(), Some(&up), Some(&ov)),
            MergeEngine::merge(&project_key(), None, None),
        ] {
            assert_eq!(triple(&view), (None, None, None));
            assert!(view.fields.values().all(|f| f.source == FieldSource::None));
        }
    }

    #[test]
    fn empty_override_matches_missing_override() {
        let up = snapshot(json!({"amount": "75.5", "status": "active", "prospective": 1, "color": "#fff"}));
        let empty = override_record(json!({"amount": null, "color": null}));

        let with_empty = MergeEngine::merge(&project_key(), Some(&up), Some(&empty));
        let without = MergeEngine::merge(&project_key(), Some(&up), None);

        assert_eq!(with_empty.fields, without.fields);
    }

    #[test]
    fn malformed_override_falls_back_to_upstream() {
        let up = snapshot(json!({"prospective": true}));
        let ov = override_record(json!({"prospective": "maybe"}));

        let view = MergeEngine::merge(&project_key(), Some(&up), Some(&ov));

        assert_eq!(view.value("prospective"), Some(&ResolvedValue::Flag(true)));
        assert_eq!(view.source("prospective"), FieldSource::Upstream);
    }

    #[test]
    fn merge_is_idempotent() {
        let up = snapshot(json!({"amount": 100, "status": "active", "prospective": 0}));
        let ov = override_record(json!({"status": "won"}));

        let first = MergeEngine::merge(&project_key(), Some(&up), Some(&ov));
        let second = MergeEngine::merge(&project_key(), Some(&up), Some(&ov));

        assert_eq!(first, second);
    }

    #[test]
    fn fields_outside_the_group_are_not_merged() {
        let up = snapshot(json!({"name": "Relaunch", "comment": "internal", "amount": 1}));

        let view = MergeEngine::merge(&project_key(), Some(&up), None);

        assert_eq!(view.name.as_deref(), Some("Relaunch"));
        assert!(!view.fields.contains_key("comment"));
        assert_eq!(view.fields.len(), EntityKind::Project.fields().len());
    }

    #[test]
    fn merge_many_includes_override_only_entities() {
        let snapshots = vec![
            UpstreamSnapshot::new(
                EntityKey::new(EntityKind::Project, "1"),
                json!({"amount": 10}).as_object().unwrap().clone(),
            ),
            UpstreamSnapshot::new(
                EntityKey::new(EntityKind::Customer, "1"),
                json!({"amount": 99}).as_object().unwrap().clone(),
            ),
        ];
        let overrides = vec![OverrideRecord::new(
            EntityKey::new(EntityKind::Project, "2"),
            json!({"status": "design"}).as_object().unwrap().clone(),
            "tester",
        )];

        let views = MergeEngine::merge_many(EntityKind::Project, &snapshots, &overrides);

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].key.id, "1");
        assert_eq!(views[0].value("amount"), Some(&ResolvedValue::Number(10.0)));
        assert!(!views[0].has_override);
        assert_eq!(views[1].key.id, "2");
        assert_eq!(views[1].value("status"), Some(&ResolvedValue::Text("design".into())));
        assert_eq!(views[1].synced_at, None);
    }

    #[test]
    fn concurrent_merges_agree() {
        let up = std::sync::Arc::new(snapshot(json!({"amount": 5, "prospective": 1})));
        let expected = MergeEngine::merge(&project_key(), Some(&up), None);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let up = up.clone();
                std::thread::spawn(move || MergeEngine::merge(&project_key(), Some(&up), None))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }
}
