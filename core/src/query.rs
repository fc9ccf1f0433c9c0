//! Predicates over the `menu_items` relation, and resolution of index rows
//! back into full records from the canonical document.
//!
//! The index only carries enough columns to filter on and to locate a record;
//! payloads (ingredients, allergens, nutrition) always come from the document.

use crate::models::{
    DayIndexRow, ItemIndexRow, MealType, Menu, MenuItem, MenuItemWithContext, MenuQueryResult,
    SearchOptions, StoredMenuData,
};

/// A conjunctive `WHERE` clause with its positional parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPredicate {
    clauses: Vec<&'static str>,
    params: Vec<String>,
}

impl ItemPredicate {
    /// Name containment is case-sensitive, as is the label match against the
    /// comma-joined `dietary_labels` column. Empty strings count as absent.
    #[must_use]
    pub fn from_options(query: &str, options: &SearchOptions) -> Self {
        let mut predicate = Self::default();
        if !query.is_empty() {
            predicate.push("instr(name, ?) > 0", query);
        }
        if let Some(label) = non_empty(options.dietary_label.as_deref()) {
            predicate.push("instr(dietary_labels, ?) > 0", label);
        }
        if let Some(start) = non_empty(options.start_date.as_deref()) {
            predicate.push("date >= ?", start);
        }
        if let Some(end) = non_empty(options.end_date.as_deref()) {
            predicate.push("date <= ?", end);
        }
        if let Some(meal_type) = options.meal_type {
            predicate.push("meal_type = ?", meal_type.as_str());
        }
        predicate
    }

    fn push(&mut self, clause: &'static str, param: &str) {
        self.clauses.push(clause);
        self.params.push(param.to_string());
    }

    #[must_use]
    pub fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            "1=1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.is_empty())
}

fn menus_of(doc: &StoredMenuData, meal_type: MealType) -> impl Iterator<Item = &Menu> {
    doc.menus.iter().filter(move |m| m.meal_type == meal_type)
}

/// Rebuild a `getMenuByDate` result from one `menu_index` row.
#[must_use]
pub fn resolve_day(doc: &StoredMenuData, row: &DayIndexRow) -> Option<MenuQueryResult> {
    let meal_type = MealType::from_db(&row.meal_type)?;
    let day_menu = menus_of(doc, meal_type)
        .flat_map(|m| m.days.iter())
        .find(|d| doc.date_map.get(&d.day) == Some(row.date.as_str()))?;

    Some(MenuQueryResult {
        date: row.date.clone(),
        day: row.day_name.clone(),
        meal_type,
        menu: day_menu.categories.clone(),
    })
}

/// Find the item an index row points at.
///
/// Prefers the occurrence on the row's own day and category; any other
/// occurrence of the id in the same meal type carries the same enrichment.
fn locate_item<'a>(
    doc: &'a StoredMenuData,
    row: &ItemIndexRow,
    meal_type: MealType,
) -> Option<&'a MenuItem> {
    let exact = menus_of(doc, meal_type)
        .flat_map(|m| m.days.iter())
        .filter(|d| doc.date_map.get(&d.day) == Some(row.date.as_str()))
        .flat_map(|d| d.categories.iter())
        .filter(|c| c.name == row.category)
        .flat_map(|c| c.items.iter())
        .find(|i| i.id == row.id);

    exact.or_else(|| {
        menus_of(doc, meal_type)
            .flat_map(Menu::items)
            .find(|i| i.id == row.id)
    })
}

/// Resolve search hits into full items annotated with their context.
/// Rows that no longer point at anything in the document are dropped.
#[must_use]
pub fn resolve_items(doc: &StoredMenuData, rows: &[ItemIndexRow]) -> Vec<MenuItemWithContext> {
    rows.iter()
        .filter_map(|row| {
            let meal_type = MealType::from_db(&row.meal_type)?;
            let item = locate_item(doc, row, meal_type)?;
            Some(MenuItemWithContext {
                item: item.clone(),
                date: row.date.clone(),
                day: doc
                    .date_map
                    .day_for_date(&row.date)
                    .unwrap_or_default()
                    .to_string(),
                meal_type,
                category: row.category.clone(),
            })
        })
        .collect()
}
