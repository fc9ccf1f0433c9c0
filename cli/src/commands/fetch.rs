use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use canteen_core::db::IndexStats;
use canteen_core::extract::{ExtractOptions, ExtractReport, fetch_menus};
use canteen_core::models::WeekRange;
use canteen_core::registry::StoreRegistry;
use canteen_core::store::SetOutcome;
use canteen_core::week::{menu_week_range, week_range};

use crate::webdriver::WebDriverSession;

use super::helpers::{parse_date, today};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchSummary<'a> {
    week: &'a WeekRange,
    outcome: &'static str,
    days_indexed: usize,
    items_indexed: usize,
    report: &'a ExtractReport,
}

/// Extract this week's menus from the source page and store them.
///
/// Without `--date` the target week follows the ingestion schedule: a run
/// over the weekend stores the upcoming week. A fatal extraction error leaves
/// every store untouched.
pub(crate) async fn cmd_fetch(
    registry: &StoreRegistry,
    url: Option<String>,
    webdriver: &str,
    location: &str,
    date: Option<&str>,
    json: bool,
) -> Result<()> {
    let range = match date {
        Some(d) => week_range(parse_date(Some(d))?, location),
        None => menu_week_range(today(), location),
    };
    info!(week = %range.week_key, "fetching menu");

    let url = url.unwrap_or_default();
    let mut session = WebDriverSession::new(webdriver)?;
    let extraction = tokio::task::spawn_blocking(move || {
        fetch_menus(&mut session, &url, &ExtractOptions::default())
    })
    .await
    .context("Extraction task panicked")??;

    let menus = extraction.menus;
    let outcome = registry.with_store(&range.week_key, |store| {
        store.set_menu_with_dates(menus, &range.start_date)
    })?;

    let (label, stats) = match outcome {
        SetOutcome::Stored(stats) => ("stored", stats),
        SetOutcome::Unchanged => ("unchanged", IndexStats::default()),
    };

    if json {
        let summary = FetchSummary {
            week: &range,
            outcome: label,
            days_indexed: stats.days,
            items_indexed: stats.items,
            report: &extraction.report,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for variant in &extraction.report.variants {
        let name = &variant.name;
        let meal = variant.meal_type;
        let days = variant.days;
        let items = variant.unique_items;
        let failed = variant.failed;
        println!("{name} ({meal}): {days} days, {items} unique items, {failed} without details");
    }
    let key = &range.week_key;
    match outcome {
        SetOutcome::Stored(stats) => {
            let days = stats.days;
            let items = stats.items;
            println!("Stored {key}: {days} day menus, {items} items indexed");
        }
        SetOutcome::Unchanged => println!("Unchanged {key}: stored menu already up to date"),
    }
    Ok(())
}
