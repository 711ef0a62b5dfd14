//! Required-items materialization
//!
//! Walks every quest objective and hideout-module level and derives the
//! aggregate item requirements. The source expresses requirements three
//! ways, all of which appear in the wild:
//!
//! - structured objects (`{"itemId": "flare", "quantity": 2}`) under a
//!   handful of key spellings
//! - multilingual objective objects whose text must be matched
//! - free-text objectives ("Collect 5 power cells for Celeste")
//!
//! Free-text item names resolve against an index built from the item table:
//! lowercased names plus their no-space and underscore variants, with
//! substring and external-id fallbacks. Duplicate requirements for the same
//! `(source, level, item)` merge additively. Output ordering is by item id,
//! which makes the derivation deterministic for identical source state.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::models::entity::GameEntity;

/// Language codes that mark a multilingual objective object.
pub const LANG_CODES: &[&str] = &[
    "en", "de", "es", "fr", "it", "ja", "kr", "no", "pl", "pt", "ru", "tr", "uk", "zh-CN",
    "zh-TW", "da", "hr", "sr",
];

const ID_KEYS: &[&str] = &["itemId", "item_id", "itemID", "id"];
const NAME_KEYS: &[&str] = &["item", "itemName", "item_name"];
const QTY_KEYS: &[&str] = &["quantity", "qty", "amount", "count"];
const LEVEL_KEYS: &[&str] = &["level", "lvl"];
const REQUIREMENT_KEYS: &[&str] = &["requirements", "required_items", "requiredItems", "items", "cost"];

/// One place an item is needed.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RequiredItemUsage {
    /// `quest` or `hideout-module`.
    pub source_type: String,
    /// External id of the requiring entity.
    pub source_id: String,
    pub source_name: String,
    pub quantity: i64,
    /// Module level for hideout requirements; absent for quests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
}

/// Aggregate requirement for one item across all sources.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RequiredItem {
    pub item_id: String,
    pub name: String,
    pub total_quantity: i64,
    pub usages: Vec<RequiredItemUsage>,
}

/// Name-to-id index over the item table.
pub struct ItemIndex {
    variants: HashMap<String, String>,
    display_names: HashMap<String, String>,
}

impl ItemIndex {
    pub fn build(items: &[GameEntity]) -> Self {
        let mut variants = HashMap::new();
        let mut display_names = HashMap::new();

        for item in items {
            let Some(name) = &item.name else { continue };
            let lower = name.to_lowercase();

            variants.insert(lower.clone(), item.external_id.clone());
            variants.insert(lower.replace(' ', ""), item.external_id.clone());
            variants.insert(lower.replace(' ', "_"), item.external_id.clone());
            display_names.insert(item.external_id.clone(), name.clone());
        }

        Self {
            variants,
            display_names,
        }
    }

    /// Resolves a free-text reference to an item's external id.
    pub fn resolve(&self, raw: &str) -> Option<String> {
        let needle = raw.trim().trim_end_matches(['.', '!']).to_lowercase();
        if needle.is_empty() {
            return None;
        }

        if let Some(id) = self.variants.get(&needle) {
            return Some(id.clone());
        }
        if let Some(id) = self
            .variants
            .get(&needle.replace(' ', ""))
            .or_else(|| self.variants.get(&needle.replace(' ', "_")))
        {
            return Some(id.clone());
        }

        // Substring fallback: the longest indexed name contained in the
        // reference, so "damaged power cell" finds "power cell".
        let mut best: Option<(&String, &String)> = None;
        for (variant, id) in &self.variants {
            if needle.contains(variant.as_str()) {
                match best {
                    Some((current, _)) if current.len() >= variant.len() => {}
                    _ => best = Some((variant, id)),
                }
            }
        }
        if let Some((_, id)) = best {
            return Some(id.clone());
        }

        // Last resort: the reference is itself an external id.
        if self.display_names.contains_key(raw.trim()) {
            return Some(raw.trim().to_string());
        }

        None
    }

    fn display_name(&self, id: &str) -> String {
        self.display_names
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

#[derive(Debug, PartialEq)]
enum ItemRef {
    Id(String),
    Name(String),
}

#[derive(Debug)]
struct ParsedRequirement {
    item: ItemRef,
    quantity: i64,
}

/// Derives the full aggregate. Deterministic for identical inputs: usages
/// accumulate in walk order and the result sorts by item id.
pub fn required_items(
    quests: &[GameEntity],
    modules: &[GameEntity],
    items: &[GameEntity],
) -> Vec<RequiredItem> {
    let index = ItemIndex::build(items);
    let free_text = free_text_pattern();

    // (source_type, source_id, level, item_id) -> (quantity, source_name)
    let mut merged: HashMap<(String, String, Option<i64>, String), (i64, String)> = HashMap::new();

    for quest in quests {
        let name = quest.name.clone().unwrap_or_else(|| quest.external_id.clone());
        for requirement in quest_requirements(quest, &index, &free_text) {
            let item_id = match resolve_ref(&requirement.item, &index) {
                Some(id) => id,
                None => continue,
            };
            let key = (
                "quest".to_string(),
                quest.external_id.clone(),
                None,
                item_id,
            );
            let entry = merged.entry(key).or_insert((0, name.clone()));
            entry.0 += requirement.quantity;
        }
    }

    for module in modules {
        let name = module
            .name
            .clone()
            .unwrap_or_else(|| module.external_id.clone());
        for (level, requirement) in module_requirements(module, &index, &free_text) {
            let item_id = match resolve_ref(&requirement.item, &index) {
                Some(id) => id,
                None => continue,
            };
            let key = (
                "hideout-module".to_string(),
                module.external_id.clone(),
                level,
                item_id,
            );
            let entry = merged.entry(key).or_insert((0, name.clone()));
            entry.0 += requirement.quantity;
        }
    }

    let mut by_item: HashMap<String, RequiredItem> = HashMap::new();
    let mut keys: Vec<_> = merged.keys().cloned().collect();
    keys.sort();

    for key in keys {
        let Some((quantity, source_name)) = merged.remove(&key) else {
            continue;
        };
        let (source_type, source_id, level, item_id) = key;

        let aggregate = by_item.entry(item_id.clone()).or_insert_with(|| RequiredItem {
            name: index.display_name(&item_id),
            item_id: item_id.clone(),
            total_quantity: 0,
            usages: Vec::new(),
        });
        aggregate.total_quantity += quantity;
        aggregate.usages.push(RequiredItemUsage {
            source_type,
            source_id,
            source_name,
            quantity,
            level,
        });
    }

    let mut result: Vec<RequiredItem> = by_item.into_values().collect();
    result.sort_by(|a, b| a.item_id.cmp(&b.item_id));
    result
}

fn resolve_ref(item: &ItemRef, index: &ItemIndex) -> Option<String> {
    match item {
        ItemRef::Id(id) => Some(id.clone()),
        ItemRef::Name(name) => index.resolve(name),
    }
}

fn quest_requirements(
    quest: &GameEntity,
    index: &ItemIndex,
    free_text: &Regex,
) -> Vec<ParsedRequirement> {
    let Some(objectives) = unwrap_envelope(quest.objectives.as_deref(), "objectives") else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for objective in objectives {
        match objective {
            Value::Object(obj) => {
                if let Some(requirement) = parse_structured(obj) {
                    found.push(requirement);
                } else if let Some(text) = multilingual_text(obj) {
                    found.extend(parse_free_text(&text, free_text, index));
                } else if let Some(Value::String(text)) = obj.get("description") {
                    found.extend(parse_free_text(text, free_text, index));
                }
            }
            Value::String(text) => found.extend(parse_free_text(text, free_text, index)),
            _ => {}
        }
    }
    found
}

fn module_requirements(
    module: &GameEntity,
    index: &ItemIndex,
    free_text: &Regex,
) -> Vec<(Option<i64>, ParsedRequirement)> {
    let Some(levels) = unwrap_envelope(module.levels.as_deref(), "levels") else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for level_value in levels {
        let Value::Object(level_obj) = level_value else {
            continue;
        };

        let level = LEVEL_KEYS
            .iter()
            .find_map(|k| level_obj.get(*k))
            .and_then(Value::as_i64);

        for key in REQUIREMENT_KEYS {
            let Some(Value::Array(entries)) = level_obj.get(*key) else {
                continue;
            };
            for entry in entries {
                match entry {
                    Value::Object(obj) => {
                        if let Some(requirement) = parse_structured(obj) {
                            found.push((level, requirement));
                        }
                    }
                    Value::String(text) => {
                        for requirement in parse_free_text(text, free_text, index) {
                            found.push((level, requirement));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    found
}

/// Unwraps the single-key envelope the decoder writes, tolerating bare
/// arrays from hand-written rows.
fn unwrap_envelope<'a>(value: Option<&'a Value>, key: &str) -> Option<&'a Vec<Value>> {
    match value? {
        Value::Array(items) => Some(items),
        Value::Object(map) => match map.get(key) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Structured form: an id-or-name key plus a quantity key.
fn parse_structured(obj: &Map<String, Value>) -> Option<ParsedRequirement> {
    let quantity = QTY_KEYS.iter().find_map(|k| quantity_of(obj.get(*k)?))?;

    for key in ID_KEYS {
        if let Some(Value::String(id)) = obj.get(*key) {
            if !id.is_empty() {
                return Some(ParsedRequirement {
                    item: ItemRef::Id(id.clone()),
                    quantity,
                });
            }
        }
        if let Some(Value::Number(n)) = obj.get(*key) {
            if let Some(id) = n.as_i64() {
                return Some(ParsedRequirement {
                    item: ItemRef::Id(id.to_string()),
                    quantity,
                });
            }
        }
    }

    for key in NAME_KEYS {
        if let Some(Value::String(name)) = obj.get(*key) {
            if !name.is_empty() {
                return Some(ParsedRequirement {
                    item: ItemRef::Name(name.clone()),
                    quantity,
                });
            }
        }
    }

    None
}

fn quantity_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A multilingual object's best text: English first, then any string under a
/// language-code key.
fn multilingual_text(obj: &Map<String, Value>) -> Option<String> {
    if !obj.keys().any(|k| LANG_CODES.contains(&k.as_str())) {
        return None;
    }

    if let Some(Value::String(text)) = obj.get("en") {
        if !text.is_empty() {
            return Some(text.clone());
        }
    }
    LANG_CODES.iter().find_map(|code| match obj.get(*code) {
        Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
        _ => None,
    })
}

/// "(get|collect|obtain|gather|find) <qty> <name>[ for X]", case-insensitive.
fn free_text_pattern() -> Regex {
    Regex::new(r"(?i)\b(?:get|collect|obtain|gather|find)\s+(\d+)\s+(.+?)(?:\s+for\s+.+)?$")
        .expect("pattern is static")
}

fn parse_free_text(text: &str, pattern: &Regex, index: &ItemIndex) -> Vec<ParsedRequirement> {
    let Some(captures) = pattern.captures(text) else {
        return Vec::new();
    };

    let quantity: i64 = match captures[1].parse() {
        Ok(q) => q,
        Err(_) => return Vec::new(),
    };
    let name = captures[2].trim();

    // Resolution happens here so unmatchable text is dropped early.
    match index.resolve(name) {
        Some(id) => vec![ParsedRequirement {
            item: ItemRef::Id(id),
            quantity,
        }],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::types::Json;

    fn entity(external_id: &str, name: &str) -> GameEntity {
        GameEntity {
            id: 0,
            external_id: external_id.to_string(),
            name: Some(name.to_string()),
            description: None,
            trader: None,
            category: None,
            entity_type: None,
            icon_name: None,
            impacted_skill: None,
            xp: None,
            max_level: None,
            max_points: None,
            objectives: None,
            reward_item_ids: None,
            levels: None,
            position: None,
            prerequisite_node_ids: None,
            known_value: None,
            image_url: None,
            raw: Json(json!({})),
            synced_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn quest_with_objectives(id: &str, name: &str, objectives: Value) -> GameEntity {
        let mut quest = entity(id, name);
        quest.objectives = Some(Json(json!({ "objectives": objectives })));
        quest
    }

    fn module_with_levels(id: &str, name: &str, levels: Value) -> GameEntity {
        let mut module = entity(id, name);
        module.levels = Some(Json(json!({ "levels": levels })));
        module
    }

    fn item_fixtures() -> Vec<GameEntity> {
        vec![
            entity("itm_cell", "Power Cell"),
            entity("itm_flare", "Flare"),
            entity("itm_scrap", "Scrap Metal"),
        ]
    }

    #[test]
    fn test_index_resolves_variants() {
        let items = item_fixtures();
        let index = ItemIndex::build(&items);

        assert_eq!(index.resolve("Power Cell").unwrap(), "itm_cell");
        assert_eq!(index.resolve("power cell").unwrap(), "itm_cell");
        assert_eq!(index.resolve("powercell").unwrap(), "itm_cell");
        assert_eq!(index.resolve("power_cell").unwrap(), "itm_cell");
        assert_eq!(index.resolve("damaged power cell").unwrap(), "itm_cell");
        assert_eq!(index.resolve("itm_flare").unwrap(), "itm_flare");
        assert!(index.resolve("unobtainium").is_none());
    }

    #[test]
    fn test_structured_objective() {
        let quests = [quest_with_objectives(
            "q1",
            "First Light",
            json!([{"itemId": "itm_flare", "quantity": 2}]),
        )];

        let result = required_items(&quests, &[], &item_fixtures());

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].item_id, "itm_flare");
        assert_eq!(result[0].name, "Flare");
        assert_eq!(result[0].total_quantity, 2);
        assert_eq!(result[0].usages[0].source_type, "quest");
        assert_eq!(result[0].usages[0].source_id, "q1");
        assert_eq!(result[0].usages[0].level, None);
    }

    #[test]
    fn test_structured_key_variants() {
        for key_pair in [
            json!({"item_id": "itm_cell", "qty": 3}),
            json!({"itemID": "itm_cell", "amount": 3}),
            json!({"id": "itm_cell", "count": 3}),
            json!({"itemName": "Power Cell", "quantity": 3}),
            json!({"item": "power cell", "quantity": "3"}),
        ] {
            let quests = [quest_with_objectives("q", "Q", json!([key_pair]))];
            let result = required_items(&quests, &[], &item_fixtures());
            assert_eq!(result.len(), 1, "failed on {quests:?}");
            assert_eq!(result[0].item_id, "itm_cell");
            assert_eq!(result[0].total_quantity, 3);
        }
    }

    #[test]
    fn test_free_text_objective() {
        let quests = [quest_with_objectives(
            "q2",
            "Supply Run",
            json!(["Collect 5 power cells for Celeste"]),
        )];

        let result = required_items(&quests, &[], &item_fixtures());

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].item_id, "itm_cell");
        assert_eq!(result[0].total_quantity, 5);
    }

    #[test]
    fn test_multilingual_objective() {
        let quests = [quest_with_objectives(
            "q3",
            "Scavenger",
            json!([{"en": "Gather 4 scrap metal", "de": "Sammle 4 Schrott"}]),
        )];

        let result = required_items(&quests, &[], &item_fixtures());

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].item_id, "itm_scrap");
        assert_eq!(result[0].total_quantity, 4);
    }

    #[test]
    fn test_multilingual_without_english_uses_any_language() {
        // The text itself must still parse, so use a German sentence with an
        // English verb pattern kept intact.
        let quests = [quest_with_objectives(
            "q4",
            "Mixed",
            json!([{"de": "Collect 2 flare"}]),
        )];

        let result = required_items(&quests, &[], &item_fixtures());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].item_id, "itm_flare");
    }

    #[test]
    fn test_hideout_module_levels() {
        let modules = [module_with_levels(
            "hm1",
            "Workbench",
            json!([
                {"level": 1, "requirements": [{"itemId": "itm_scrap", "quantity": 10}]},
                {"level": 2, "requirements": [{"itemId": "itm_scrap", "quantity": 20},
                                              {"itemId": "itm_cell", "quantity": 1}]}
            ]),
        )];

        let result = required_items(&[], &modules, &item_fixtures());

        assert_eq!(result.len(), 2);
        let scrap = result.iter().find(|r| r.item_id == "itm_scrap").unwrap();
        assert_eq!(scrap.total_quantity, 30);
        assert_eq!(scrap.usages.len(), 2);
        assert_eq!(scrap.usages[0].level, Some(1));
        assert_eq!(scrap.usages[1].level, Some(2));
        assert!(scrap.usages.iter().all(|u| u.source_type == "hideout-module"));
    }

    #[test]
    fn test_duplicates_merge_additively() {
        let quests = [quest_with_objectives(
            "q5",
            "Double Dip",
            json!([
                {"itemId": "itm_flare", "quantity": 2},
                {"itemId": "itm_flare", "quantity": 3}
            ]),
        )];

        let result = required_items(&quests, &[], &item_fixtures());

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].total_quantity, 5);
        // One merged usage per (source, level, item).
        assert_eq!(result[0].usages.len(), 1);
        assert_eq!(result[0].usages[0].quantity, 5);
    }

    #[test]
    fn test_unresolvable_references_are_dropped() {
        let quests = [quest_with_objectives(
            "q6",
            "Mystery",
            json!(["Collect 9 unobtainium", {"item": "nothing real", "quantity": 1}]),
        )];

        let result = required_items(&quests, &[], &item_fixtures());
        assert!(result.is_empty());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let quests = [
            quest_with_objectives("qa", "A", json!([{"itemId": "itm_cell", "quantity": 1}])),
            quest_with_objectives("qb", "B", json!([{"itemId": "itm_flare", "quantity": 2},
                                                    {"itemId": "itm_cell", "quantity": 3}])),
        ];
        let modules = [module_with_levels(
            "hm",
            "M",
            json!([{"level": 1, "items": [{"itemId": "itm_cell", "quantity": 4}]}]),
        )];
        let items = item_fixtures();

        let first = required_items(&quests, &modules, &items);
        let second = required_items(&quests, &modules, &items);

        let render = |r: &Vec<RequiredItem>| serde_json::to_string(r).unwrap();
        assert_eq!(render(&first), render(&second));

        // Sorted by item id.
        let ids: Vec<&str> = first.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["itm_cell", "itm_flare"]);
    }

    #[test]
    fn test_free_text_pattern_tail() {
        let index = ItemIndex::build(&item_fixtures());
        let pattern = free_text_pattern();

        let with_tail = parse_free_text("Obtain 3 flare for the trader", &pattern, &index);
        assert_eq!(with_tail.len(), 1);
        assert_eq!(with_tail[0].quantity, 3);

        let no_verb = parse_free_text("Deliver 3 flare", &pattern, &index);
        assert!(no_verb.is_empty());
    }
}
