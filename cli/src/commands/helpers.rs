use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use canteen_core::models::{MenuItem, MenuItemWithContext, MenuQueryResult};

pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub(crate) fn parse_date(date_str: Option<&str>) -> Result<NaiveDate> {
    match date_str {
        None | Some("today") => Ok(today()),
        Some("yesterday") => Ok(today() - chrono::Duration::days(1)),
        Some("tomorrow") => Ok(today() + chrono::Duration::days(1)),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| {
            format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
        }),
    }
}

fn labels(item: &MenuItem) -> String {
    item.dietary_labels.join(", ")
}

fn kcal(item: &MenuItem) -> String {
    item.nutrition_per_100g
        .as_ref()
        .and_then(|n| n.energy_kcal)
        .map_or("-".into(), |v| format!("{v:.0}"))
}

pub(crate) fn print_day_menus(results: &[MenuQueryResult]) {
    for result in results {
        let meal = result.meal_type.as_str().to_uppercase();
        let day = &result.day;
        let date = &result.date;
        println!("=== {day} {date} {meal} ===\n");
        for category in &result.menu {
            println!("  {}", category.name);
            for item in &category.items {
                let id = &item.id;
                let name = &item.name;
                let kcal = kcal(item);
                if item.dietary_labels.is_empty() {
                    println!("    [{id}] {name} ({kcal} kcal/100g)");
                } else {
                    let labels = labels(item);
                    println!("    [{id}] {name} ({kcal} kcal/100g) [{labels}]");
                }
            }
        }
        println!();
    }
}

pub(crate) fn print_item_table(items: &[MenuItemWithContext]) {
    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Day")]
        day: String,
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Labels")]
        labels: String,
        #[tabled(rename = "kcal/100g")]
        kcal: String,
    }

    let rows: Vec<ItemRow> = items
        .iter()
        .map(|hit| ItemRow {
            date: hit.date.clone(),
            day: hit.day.clone(),
            meal: hit.meal_type.to_string(),
            category: truncate(&hit.category, 20),
            name: truncate(&hit.item.name, 40),
            labels: truncate(&labels(&hit.item), 30),
            kcal: kcal(&hit.item),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(6..7)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
