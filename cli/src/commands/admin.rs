use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::process;

use canteen_core::registry::{StoreRegistry, validate_week_key};
use canteen_core::store::WeekStore;

pub(crate) fn cmd_rebuild(registry: &StoreRegistry, key: &str, json: bool) -> Result<()> {
    validate_week_key(key)?;
    let stats = registry.with_store(key, WeekStore::rebuild_index)?;

    let Some(stats) = stats else {
        if json {
            println!("{}", json!({ "rebuilt": false }));
        } else {
            eprintln!("No data stored for {key}");
        }
        process::exit(2);
    };

    if json {
        println!(
            "{}",
            json!({ "rebuilt": true, "days": stats.days, "items": stats.items })
        );
    } else {
        let days = stats.days;
        let items = stats.items;
        println!("Rebuilt index for {key}: {days} day menus, {items} items");
    }
    Ok(())
}

pub(crate) fn cmd_sweep(registry: &StoreRegistry, json: bool) -> Result<()> {
    let expired = registry.sweep_expired(Utc::now())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&expired)?);
    } else if expired.is_empty() {
        println!("Nothing to expire");
    } else {
        for key in &expired {
            println!("Expired {key}");
        }
    }
    Ok(())
}
