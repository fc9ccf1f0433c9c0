//! Pure parsing of what a session reads off the page.
//!
//! A session hands back loosely-typed snapshots (every field optional, text
//! untrimmed, label ids still comma-joined). Everything here turns those into
//! model types without touching the session.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::{
    Allergens, DayMenu, ItemDetails, MenuCategory, MenuInfo, MenuItem, NutritionPer100g,
};

/// Source label id to display name.
pub const DIETARY_LABELS: &[(&str, &str)] = &[
    ("52", "Vegan"),
    ("50", "Vegetarian"),
    ("23", "Celery"),
    ("77", "Crustaceans"),
    ("22", "Eggs"),
    ("21", "Fish"),
    ("24", "Gluten"),
    ("25", "Lupin"),
    ("26", "Milk"),
    ("27", "Molluscs"),
    ("28", "Mustard"),
    ("29", "Nuts"),
    ("30", "Peanuts"),
    ("31", "Sesame"),
    ("32", "Soya"),
    ("33", "Sulphites"),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub days: Vec<RawDay>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDay {
    pub name: Option<String>,
    #[serde(default)]
    pub categories: Vec<RawCategory>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCategory {
    pub name: Option<String>,
    #[serde(default)]
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Comma-separated label ids, e.g. `"52,23"`.
    pub labels: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDetail {
    pub ingredients: Option<String>,
    pub suitable_for: Option<String>,
    pub contains: Option<String>,
    pub may_contain: Option<String>,
    #[serde(default)]
    pub nutrients: Vec<RawNutrient>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawNutrient {
    pub name: String,
    pub value: String,
}

#[must_use]
pub fn dietary_label(id: &str) -> Option<&'static str> {
    DIETARY_LABELS
        .iter()
        .find(|(key, _)| *key == id)
        .map(|(_, label)| *label)
}

/// Map comma-separated label ids to names; unknown ids are dropped.
#[must_use]
pub fn map_labels(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|id| dietary_label(id.trim()))
        .map(ToString::to_string)
        .collect()
}

fn trimmed(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|t| !t.is_empty())
}

/// Keep the first variant per identifier; variants without one are dropped.
#[must_use]
pub fn dedupe_variants(variants: Vec<MenuInfo>) -> Vec<MenuInfo> {
    let mut seen = HashSet::new();
    variants
        .into_iter()
        .filter_map(|v| {
            let identifier = v.identifier.trim().to_string();
            if identifier.is_empty() || !seen.insert(identifier.clone()) {
                return None;
            }
            Some(MenuInfo {
                identifier,
                name: v.name.trim().to_string(),
            })
        })
        .collect()
}

/// Build the day → category → item tree for the selected variant.
///
/// Nameless days and categories are skipped, empty ones dropped, and a day
/// name seen twice keeps its first section.
#[must_use]
pub fn parse_days(snapshot: &PageSnapshot) -> Vec<DayMenu> {
    let mut seen = HashSet::new();
    let mut days = Vec::new();

    for raw_day in &snapshot.days {
        let Some(day_name) = trimmed(raw_day.name.as_deref()) else {
            continue;
        };

        let categories: Vec<MenuCategory> = raw_day
            .categories
            .iter()
            .filter_map(|raw_cat| {
                let name = trimmed(raw_cat.name.as_deref())?;
                let items: Vec<MenuItem> = raw_cat.items.iter().map(parse_item).collect();
                (!items.is_empty()).then(|| MenuCategory {
                    name: name.to_string(),
                    items,
                })
            })
            .collect();

        if categories.is_empty() || !seen.insert(day_name.to_string()) {
            continue;
        }
        days.push(DayMenu {
            day: day_name.to_string(),
            categories,
        });
    }

    days
}

fn parse_item(raw: &RawItem) -> MenuItem {
    MenuItem {
        id: trimmed(raw.id.as_deref()).unwrap_or_default().to_string(),
        name: trimmed(raw.name.as_deref()).unwrap_or_default().to_string(),
        dietary_labels: raw.labels.as_deref().map(map_labels).unwrap_or_default(),
        ingredients: None,
        allergens: None,
        nutrition_per_100g: None,
    }
}

fn parse_list(text: Option<&str>) -> Option<Vec<String>> {
    let values: Vec<String> = trimmed(text)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect();
    (!values.is_empty()).then_some(values)
}

/// Parse the leading decimal number of `s`, ignoring trailing units ("12.5g").
fn parse_leading_number(s: &str) -> Option<f64> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().ok()
}

/// Turn a detail overlay reading into enrichment. Groups with nothing in
/// them come back as `None`.
#[must_use]
pub fn parse_detail(raw: &RawDetail) -> ItemDetails {
    let allergens = Allergens {
        suitable_for: parse_list(raw.suitable_for.as_deref()),
        contains: parse_list(raw.contains.as_deref()),
        may_contain: parse_list(raw.may_contain.as_deref()),
    };

    let mut nutrition = NutritionPer100g::default();
    for nutrient in &raw.nutrients {
        let Some(value) = parse_leading_number(&nutrient.value) else {
            continue;
        };
        let slot = match nutrient.name.trim() {
            "Energy (kCal)" => &mut nutrition.energy_kcal,
            "Protein (g)" => &mut nutrition.protein_g,
            "Carb (g)" => &mut nutrition.carb_g,
            "of which Sugars (g)" => &mut nutrition.sugars_g,
            "Fat (g)" => &mut nutrition.fat_g,
            "Sat Fat (g)" => &mut nutrition.sat_fat_g,
            "Salt (g)" => &mut nutrition.salt_g,
            _ => continue,
        };
        *slot = Some(value);
    }

    ItemDetails {
        ingredients: trimmed(raw.ingredients.as_deref()).map(ToString::to_string),
        allergens: (!allergens.is_empty()).then_some(allergens),
        nutrition_per_100g: (!nutrition.is_empty()).then_some(nutrition),
    }
}
