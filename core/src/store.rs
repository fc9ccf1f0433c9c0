use anyhow::{Result, bail};
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::{IndexStats, WeekDatabase};
use crate::models::{
    AvailableDate, MealType, Menu, MenuItemWithContext, MenuQueryResult, SearchOptions,
    StoredMenuData, StoredWeekRange,
};
use crate::query::{ItemPredicate, resolve_day, resolve_items};
use crate::week::{day_to_date_map, format_date, parse_date};

/// How long a week's data survives after its most recent write.
pub const DEFAULT_RETENTION_DAYS: i64 = 365;

/// Structural summary of one menu used to detect "nothing changed".
///
/// Deliberately cheap: two menu sets with identical counts, first item id and
/// last day name compare equal even if item names or details differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuFingerprint {
    #[serde(rename = "type")]
    pub meal_type: MealType,
    pub day_count: usize,
    pub item_count: usize,
    pub first_item_id: String,
    pub last_day: String,
}

#[must_use]
pub fn fingerprint(menus: &[Menu]) -> Vec<MenuFingerprint> {
    menus
        .iter()
        .map(|menu| MenuFingerprint {
            meal_type: menu.meal_type,
            day_count: menu.days.len(),
            item_count: menu.days.iter().map(crate::models::DayMenu::item_count).sum(),
            first_item_id: menu
                .days
                .first()
                .and_then(|d| d.categories.first())
                .and_then(|c| c.items.first())
                .map(|i| i.id.clone())
                .unwrap_or_default(),
            last_day: menu.days.last().map(|d| d.day.clone()).unwrap_or_default(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Document replaced and index rebuilt.
    Stored(IndexStats),
    /// Fingerprint matched the stored document; nothing was written.
    Unchanged,
}

/// The store for one `(location, week)` key.
///
/// Methods take `&self` and do no locking of their own; callers that share a
/// store across threads go through [`crate::registry::StoreRegistry`], which
/// serializes access per key.
pub struct WeekStore {
    key: String,
    db: WeekDatabase,
    retention: Duration,
}

impl WeekStore {
    #[must_use]
    pub fn new(key: impl Into<String>, db: WeekDatabase, retention: Duration) -> Self {
        Self {
            key: key.into(),
            db,
            retention,
        }
    }

    pub fn open_in_memory(key: impl Into<String>) -> Result<Self> {
        Ok(Self::new(
            key,
            WeekDatabase::open_in_memory()?,
            Duration::days(DEFAULT_RETENTION_DAYS),
        ))
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    // --- Writes ---

    pub fn set_menu_with_dates(
        &self,
        menus: Vec<Menu>,
        week_start_date: &str,
    ) -> Result<SetOutcome> {
        self.set_menu_with_dates_at(menus, week_start_date, Utc::now())
    }

    /// Ingest a week's menus, skipping the write when the fingerprint of the
    /// stored document matches the incoming one.
    ///
    /// On change the document, both index relations and the expiry deadline
    /// (`now` + retention) are replaced.
    pub fn set_menu_with_dates_at(
        &self,
        menus: Vec<Menu>,
        week_start_date: &str,
        now: DateTime<Utc>,
    ) -> Result<SetOutcome> {
        let monday = parse_date(week_start_date)?;
        if monday.weekday() != Weekday::Mon {
            bail!("Week start date {week_start_date} is not a Monday");
        }

        if let Some(existing) = self.db.load_document()? {
            if fingerprint(&existing.menus) == fingerprint(&menus) {
                info!(key = %self.key, "menu data unchanged (fingerprint match), skipping update");
                return Ok(SetOutcome::Unchanged);
            }
        }

        let doc = StoredMenuData {
            menus,
            week_start_date: format_date(monday),
            date_map: day_to_date_map(monday),
            stored_at: now.to_rfc3339(),
        };
        let expires_at = now + self.retention;
        let stats = self.db.replace_document_and_index(&doc, expires_at)?;

        info!(
            key = %self.key,
            days = stats.days,
            items = stats.items,
            expires_at = %expires_at.to_rfc3339(),
            "stored menu document"
        );
        Ok(SetOutcome::Stored(stats))
    }

    /// Rebuild both index relations from the stored document without touching
    /// the document itself. Returns `None` when there is nothing stored.
    pub fn rebuild_index(&self) -> Result<Option<IndexStats>> {
        let Some(doc) = self.db.load_document()? else {
            info!(key = %self.key, "no stored data to rebuild from");
            return Ok(None);
        };
        let stats = self.db.rebuild_index(&doc)?;
        info!(key = %self.key, days = stats.days, items = stats.items, "index rebuilt");
        Ok(Some(stats))
    }

    /// Drop the document and both index relations. Safe to call repeatedly.
    pub fn expire(&self) -> Result<()> {
        self.db.clear_all()?;
        info!(key = %self.key, "expired week data");
        Ok(())
    }

    pub fn expires_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.db.expires_at()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.db.expires_at()?.is_some_and(|at| at <= now))
    }

    // --- Reads ---

    /// Menus served on `date`, one per meal type. Empty when the date isn't
    /// indexed or nothing is stored yet.
    pub fn get_menu_by_date(
        &self,
        date: &str,
        meal_type: Option<MealType>,
    ) -> Result<Vec<MenuQueryResult>> {
        let rows = self.db.index_rows_for_date(date, meal_type)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let Some(doc) = self.db.load_document()? else {
            return Ok(Vec::new());
        };
        Ok(rows.iter().filter_map(|row| resolve_day(&doc, row)).collect())
    }

    pub fn search_menu_items(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MenuItemWithContext>> {
        let predicate = ItemPredicate::from_options(query, options);
        debug!(key = %self.key, clause = %predicate.where_clause(), "searching menu items");
        let rows = self.db.query_item_rows(&predicate)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let Some(doc) = self.db.load_document()? else {
            return Ok(Vec::new());
        };
        Ok(resolve_items(&doc, &rows))
    }

    pub fn get_all_menus(&self) -> Result<Option<Vec<Menu>>> {
        Ok(self.db.load_document()?.map(|doc| doc.menus))
    }

    pub fn get_stored_data(&self) -> Result<Option<StoredMenuData>> {
        self.db.load_document()
    }

    pub fn get_stored_week_range(&self) -> Result<Option<StoredWeekRange>> {
        let Some(doc) = self.db.load_document()? else {
            return Ok(None);
        };
        let dates = doc.date_map.entries().map(|(_, date)| date);
        let start = dates.iter().min().copied();
        let end = dates.iter().max().copied();
        Ok(start.zip(end).map(|(start, end)| StoredWeekRange {
            start_date: start.to_string(),
            end_date: end.to_string(),
        }))
    }

    pub fn get_available_dates(&self) -> Result<Vec<AvailableDate>> {
        self.db.available_dates()
    }

    /// Fill whichever date bound is missing from the stored week's range.
    /// Options are returned untouched when nothing is stored.
    pub fn with_stored_bounds(&self, mut options: SearchOptions) -> Result<SearchOptions> {
        let missing = |b: &Option<String>| b.as_deref().is_none_or(str::is_empty);
        if missing(&options.start_date) || missing(&options.end_date) {
            if let Some(range) = self.get_stored_week_range()? {
                if missing(&options.start_date) {
                    options.start_date = Some(range.start_date);
                }
                if missing(&options.end_date) {
                    options.end_date = Some(range.end_date);
                }
            }
        }
        Ok(options)
    }
}
