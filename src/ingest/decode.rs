//! Source record decoding
//!
//! The source files are arrays of loosely shaped JSON objects: ids arrive as
//! strings or numbers, display fields may be plain strings or per-language
//! objects, and structured data hides under a handful of spelling variants.
//! Decoding normalizes all of that into an [`EntityDraft`]:
//!
//! - ids become decimal strings, the one stable key across ingests
//! - scalar fields copy over only when present with the right JSON type
//! - array/object fields are wrapped in a single-key envelope so the column
//!   is self-describing
//! - the whole record lands verbatim in `raw`

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::config::SourceRepoSettings;
use crate::models::entity::{EntityDraft, EntityKind};

/// Builds the typed draft for one source record. `None` means the record has
/// no usable id and must be skipped.
pub fn build_draft(
    kind: EntityKind,
    record: &Map<String, Value>,
    source: &SourceRepoSettings,
) -> Option<EntityDraft> {
    let external_id = external_id_of(record)?;

    let mut draft = EntityDraft {
        external_id,
        name: localized_field(record, &["name"]),
        description: localized_field(record, &["description"]),
        trader: string_field(record, &["trader"]),
        category: string_field(record, &["category"]),
        entity_type: string_field(record, &["type"]),
        icon_name: string_field(record, &["icon_name", "iconName"]),
        impacted_skill: string_field(record, &["impacted_skill", "impactedSkill"]),
        xp: number_field(record, &["xp"]),
        max_level: number_field(record, &["max_level", "maxLevel"]),
        max_points: number_field(record, &["max_points", "maxPoints"]),
        objectives: envelope(record, "objectives", &["objectives"]),
        reward_item_ids: envelope(record, "reward_item_ids", &["reward_item_ids", "rewardItemIds"]),
        levels: envelope(record, "levels", &["levels"]),
        position: envelope(record, "position", &["position"]),
        prerequisite_node_ids: envelope(
            record,
            "prerequisite_node_ids",
            &["prerequisite_node_ids", "prerequisiteNodeIds"],
        ),
        known_value: envelope(record, "known_value", &["known_value", "knownValue"]),
        image_url: None,
        raw: Value::Object(record.clone()),
        synced_at: Some(Utc::now()),
    };

    if kind == EntityKind::Item {
        draft.image_url = item_image_url(record, source);
    }

    Some(draft)
}

/// The stable external id: the record's `id`, with numbers rendered as their
/// decimal form without fraction.
pub fn external_id_of(record: &Map<String, Value>) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| format!("{}", f.trunc() as i64))
            }
        }
        _ => None,
    }
}

/// A display string that may arrive multilingual: plain strings pass
/// through; objects prefer the English value and fall back to any string
/// value present.
pub fn localized_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("en") {
                if !s.is_empty() {
                    return Some(s.clone());
                }
            }
            map.values().find_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
        }
        _ => None,
    }
}

fn localized_field(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| record.get(*key).and_then(localized_string))
}

fn string_field(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    })
}

fn number_field(record: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match record.get(*key) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        _ => None,
    })
}

/// Wraps an array/object field under a single canonical key, e.g.
/// `{"objectives": [...]}`. Scalars are not enveloped.
fn envelope(record: &Map<String, Value>, canonical: &str, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|key| match record.get(*key) {
        Some(value @ (Value::Array(_) | Value::Object(_))) => {
            Some(json!({ canonical: value.clone() }))
        }
        _ => None,
    })
}

/// Item image URL: an absolute source value passes through verbatim; a bare
/// filename resolves against the repository's image tree.
fn item_image_url(record: &Map<String, Value>, source: &SourceRepoSettings) -> Option<String> {
    let value = string_field(record, &["imageFilename", "image_url", "imageUrl"])?;

    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value);
    }

    Some(source.item_image_url(&value))
}
