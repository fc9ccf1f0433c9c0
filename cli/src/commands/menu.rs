use anyhow::Result;
use std::process;

use canteen_core::models::validate_meal_type;
use canteen_core::registry::{StoreRegistry, validate_week_key};
use canteen_core::store::WeekStore;
use canteen_core::week::{current_week_range, day_to_date_map, format_date, parse_date as parse_iso};

use super::helpers::{parse_date, print_day_menus};

pub(crate) fn cmd_menu(
    registry: &StoreRegistry,
    location: &str,
    date: Option<&str>,
    meal: Option<&str>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let meal_type = meal.map(validate_meal_type).transpose()?;
    let date_str = format_date(date);

    let results = registry.with_store_for_date(location, date, |_, store| {
        store.get_menu_by_date(&date_str, meal_type)
    })?;

    if results.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No menu stored for {date_str}");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_day_menus(&results);
    }
    Ok(())
}

/// Every menu stored for the week containing `date` (default: this week).
pub(crate) fn cmd_week(
    registry: &StoreRegistry,
    location: &str,
    date: Option<&str>,
    json: bool,
) -> Result<()> {
    let range = current_week_range(parse_date(date)?, location);
    let menus = registry.with_store(&range.week_key, WeekStore::get_all_menus)?;

    let Some(menus) = menus else {
        if json {
            println!("null");
        } else {
            eprintln!("No menu stored for {}", range.week_key);
        }
        process::exit(2);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&menus)?);
        return Ok(());
    }

    let dates = day_to_date_map(parse_iso(&range.start_date)?);
    for menu in &menus {
        let name = &menu.name;
        let meal = menu.meal_type.as_str().to_uppercase();
        println!("=== {name} ({meal}) ===\n");
        for day in &menu.days {
            let date = dates.get(&day.day).unwrap_or("?");
            println!("  {} {date}", day.day);
            for category in &day.categories {
                let items: Vec<&str> = category.items.iter().map(|i| i.name.as_str()).collect();
                println!("    {}: {}", category.name, items.join(", "));
            }
        }
        println!();
    }
    Ok(())
}

pub(crate) fn cmd_show(registry: &StoreRegistry, key: &str, json: bool) -> Result<()> {
    validate_week_key(key)?;
    let (data, expires_at) =
        registry.with_store(key, |store| Ok((store.get_stored_data()?, store.expires_at()?)))?;

    let Some(data) = data else {
        if json {
            println!("null");
        } else {
            eprintln!("No data stored for {key}");
        }
        process::exit(2);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("Week:       {key}");
    println!("Starts:     {}", data.week_start_date);
    println!("Stored at:  {}", data.stored_at);
    if let Some(at) = expires_at {
        println!("Expires at: {}", at.to_rfc3339());
    }
    for menu in &data.menus {
        let items: usize = menu.days.iter().map(canteen_core::models::DayMenu::item_count).sum();
        println!(
            "  {} [{}] ({}): {} days, {items} items",
            menu.name,
            menu.identifier,
            menu.meal_type,
            menu.days.len()
        );
    }
    Ok(())
}

pub(crate) fn cmd_dates(registry: &StoreRegistry, key: &str, json: bool) -> Result<()> {
    validate_week_key(key)?;
    let dates = registry.with_store(key, WeekStore::get_available_dates)?;

    if dates.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No dates indexed for {key}");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&dates)?);
    } else {
        for d in &dates {
            println!("{}  {}", d.date, d.meals.join(", "));
        }
    }
    Ok(())
}
