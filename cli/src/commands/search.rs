use anyhow::Result;
use std::process;

use canteen_core::models::{SearchOptions, validate_meal_type};
use canteen_core::registry::StoreRegistry;
use canteen_core::week::format_date;

use super::helpers::{parse_date, print_item_table};

pub(crate) struct SearchArgs {
    pub query: Option<String>,
    pub dietary: Option<String>,
    pub meal: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Search the week containing `--start` (default: today). Missing date bounds
/// fall back to the stored week's range.
pub(crate) fn cmd_search(
    registry: &StoreRegistry,
    location: &str,
    args: SearchArgs,
    json: bool,
) -> Result<()> {
    let anchor = parse_date(args.start.as_deref())?;
    let start_date = args
        .start
        .as_deref()
        .map(|s| parse_date(Some(s)).map(format_date))
        .transpose()?;
    let end_date = args
        .end
        .as_deref()
        .map(|s| parse_date(Some(s)).map(format_date))
        .transpose()?;
    let meal_type = args.meal.as_deref().map(validate_meal_type).transpose()?;
    let query = args.query.unwrap_or_default();

    let options = SearchOptions {
        start_date,
        end_date,
        meal_type,
        dietary_label: args.dietary,
    };
    let items = registry.with_store_for_date(location, anchor, |_, store| {
        let options = store.with_stored_bounds(options)?;
        store.search_menu_items(&query, &options)
    })?;

    if items.is_empty() {
        if json {
            println!("[]");
        } else if query.is_empty() {
            eprintln!("No matching menu items");
        } else {
            eprintln!("No menu items matching '{query}'");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        print_item_table(&items);
        let count = items.len();
        println!("{count} item(s)");
    }
    Ok(())
}
