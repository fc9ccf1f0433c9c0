use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Weekday names a menu week is made of, in calendar order.
pub const WEEKDAYS: [&str; 5] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
}

impl MealType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
        }
    }

    /// Classify a menu variant by its raw display name.
    ///
    /// Anything that doesn't mention breakfast or dinner is a lunch menu.
    #[must_use]
    pub fn classify(raw_name: &str) -> Self {
        let lower = raw_name.to_lowercase();
        if lower.contains("breakfast") {
            Self::Breakfast
        } else if lower.contains("dinner") {
            Self::Dinner
        } else {
            Self::Lunch
        }
    }

    /// Parse a value read back from the index (`meal_type` column).
    #[must_use]
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "breakfast" => Some(Self::Breakfast),
            "lunch" => Some(Self::Lunch),
            "dinner" => Some(Self::Dinner),
            _ => None,
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meal types callers may filter on.
pub const QUERY_MEAL_TYPES: &[&str] = &["breakfast", "lunch"];

pub fn validate_meal_type(meal: &str) -> Result<MealType> {
    let lower = meal.to_lowercase();
    if QUERY_MEAL_TYPES.contains(&lower.as_str()) {
        if let Some(meal_type) = MealType::from_db(&lower) {
            return Ok(meal_type);
        }
    }
    anyhow::bail!(
        "Invalid meal type '{meal}'. Must be one of: {}",
        QUERY_MEAL_TYPES.join(", ")
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allergens {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suitable_for: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub may_contain: Option<Vec<String>>,
}

impl Allergens {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suitable_for.is_none() && self.contains.is_none() && self.may_contain.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionPer100g {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_kcal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protein_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carb_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sugars_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fat_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sat_fat_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt_g: Option<f64>,
}

impl NutritionPer100g {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub dietary_labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allergens: Option<Allergens>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nutrition_per_100g: Option<NutritionPer100g>,
}

impl MenuItem {
    pub fn apply_details(&mut self, details: &ItemDetails) {
        self.ingredients.clone_from(&details.ingredients);
        self.allergens.clone_from(&details.allergens);
        self.nutrition_per_100g.clone_from(&details.nutrition_per_100g);
    }
}

/// Enrichment read from an item's detail overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetails {
    pub ingredients: Option<String>,
    pub allergens: Option<Allergens>,
    pub nutrition_per_100g: Option<NutritionPer100g>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuCategory {
    pub name: String,
    pub items: Vec<MenuItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayMenu {
    pub day: String,
    pub categories: Vec<MenuCategory>,
}

impl DayMenu {
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.categories.iter().map(|c| c.items.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    pub identifier: String,
    pub name: String,
    #[serde(rename = "type")]
    pub meal_type: MealType,
    pub days: Vec<DayMenu>,
}

impl Menu {
    pub fn items(&self) -> impl Iterator<Item = &MenuItem> {
        self.days
            .iter()
            .flat_map(|d| d.categories.iter())
            .flat_map(|c| c.items.iter())
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut MenuItem> {
        self.days
            .iter_mut()
            .flat_map(|d| d.categories.iter_mut())
            .flat_map(|c| c.items.iter_mut())
    }
}

/// A selectable menu variant as discovered on the source page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuInfo {
    pub identifier: String,
    pub name: String,
}

/// Weekday name to calendar date (`YYYY-MM-DD`) for one menu week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DayToDateMap {
    pub monday: String,
    pub tuesday: String,
    pub wednesday: String,
    pub thursday: String,
    pub friday: String,
}

impl DayToDateMap {
    #[must_use]
    pub fn entries(&self) -> [(&'static str, &str); 5] {
        [
            (WEEKDAYS[0], self.monday.as_str()),
            (WEEKDAYS[1], self.tuesday.as_str()),
            (WEEKDAYS[2], self.wednesday.as_str()),
            (WEEKDAYS[3], self.thursday.as_str()),
            (WEEKDAYS[4], self.friday.as_str()),
        ]
    }

    #[must_use]
    pub fn get(&self, day: &str) -> Option<&str> {
        self.entries()
            .into_iter()
            .find(|(name, _)| *name == day)
            .map(|(_, date)| date)
    }

    /// Inverse lookup: which weekday a date falls on within this week.
    #[must_use]
    pub fn day_for_date(&self, date: &str) -> Option<&'static str> {
        self.entries()
            .into_iter()
            .find(|(_, d)| *d == date)
            .map(|(name, _)| name)
    }
}

/// The canonical document for one week-key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMenuData {
    pub menus: Vec<Menu>,
    pub week_start_date: String,
    pub date_map: DayToDateMap,
    pub stored_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuQueryResult {
    pub date: String,
    pub day: String,
    pub meal_type: MealType,
    pub menu: Vec<MenuCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemWithContext {
    #[serde(flatten)]
    pub item: MenuItem,
    pub date: String,
    pub day: String,
    pub meal_type: MealType,
    pub category: String,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub meal_type: Option<MealType>,
    pub dietary_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekRange {
    pub start_date: String,
    pub end_date: String,
    pub week_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredWeekRange {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableDate {
    pub date: String,
    pub meals: Vec<String>,
}

// --- Index rows ---

/// One row of `menu_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayIndexRow {
    pub date: String,
    pub day_name: String,
    pub meal_type: String,
    pub categories_count: i64,
    pub items_count: i64,
}

/// One row of `menu_items`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemIndexRow {
    pub id: String,
    pub date: String,
    pub meal_type: String,
    pub category: String,
    pub name: String,
    pub dietary_labels: String,
}
