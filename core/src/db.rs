use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::models::{AvailableDate, DayIndexRow, ItemIndexRow, MealType, StoredMenuData};
use crate::query::ItemPredicate;

/// SQLite storage for a single week-key: the canonical document, the two
/// derived index relations, and the expiry deadline.
pub struct WeekDatabase {
    conn: Connection,
}

/// Row counts written by an index rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub days: usize,
    pub items: usize,
}

impl WeekDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = WeekDatabase { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = WeekDatabase { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS menu_document (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    data TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS menu_index (
                    date TEXT NOT NULL,
                    day_name TEXT NOT NULL,
                    meal_type TEXT NOT NULL,
                    categories_count INTEGER DEFAULT 0,
                    items_count INTEGER DEFAULT 0,
                    PRIMARY KEY (date, meal_type)
                );

                CREATE TABLE IF NOT EXISTS menu_items (
                    id TEXT NOT NULL,
                    date TEXT NOT NULL,
                    meal_type TEXT NOT NULL,
                    category TEXT,
                    name TEXT,
                    dietary_labels TEXT,
                    PRIMARY KEY (id, date, meal_type)
                );

                CREATE INDEX IF NOT EXISTS idx_menu_items_date ON menu_items(date);
                CREATE INDEX IF NOT EXISTS idx_menu_items_dietary ON menu_items(dietary_labels);

                CREATE TABLE IF NOT EXISTS store_meta (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn day_row(row: &rusqlite::Row) -> rusqlite::Result<DayIndexRow> {
        Ok(DayIndexRow {
            date: row.get(0)?,
            day_name: row.get(1)?,
            meal_type: row.get(2)?,
            categories_count: row.get(3)?,
            items_count: row.get(4)?,
        })
    }

    fn item_row(row: &rusqlite::Row) -> rusqlite::Result<ItemIndexRow> {
        Ok(ItemIndexRow {
            id: row.get(0)?,
            date: row.get(1)?,
            meal_type: row.get(2)?,
            category: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            dietary_labels: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        })
    }

    // --- Canonical document ---

    pub fn load_document(&self) -> Result<Option<StoredMenuData>> {
        let data: Option<String> = self
            .conn
            .query_row("SELECT data FROM menu_document WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        data.map(|json| {
            serde_json::from_str(&json).context("Stored menu document is not valid JSON")
        })
        .transpose()
    }

    /// Replace the document, rebuild both index relations and set the expiry
    /// deadline in one transaction.
    pub fn replace_document_and_index(
        &self,
        doc: &StoredMenuData,
        expires_at: DateTime<Utc>,
    ) -> Result<IndexStats> {
        let json = serde_json::to_string(doc).context("Failed to serialize menu document")?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO menu_document (id, data) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![json],
        )?;
        let stats = write_index(&tx, doc)?;
        tx.execute(
            "INSERT INTO store_meta (key, value) VALUES ('expires_at', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![expires_at.to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(stats)
    }

    /// Delete and repopulate both index relations from `doc`.
    pub fn rebuild_index(&self, doc: &StoredMenuData) -> Result<IndexStats> {
        let tx = self.conn.unchecked_transaction()?;
        let stats = write_index(&tx, doc)?;
        tx.commit()?;
        Ok(stats)
    }

    /// Drop the document, both index relations, and the expiry deadline.
    pub fn clear_all(&self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
             DELETE FROM menu_document;
             DELETE FROM menu_index;
             DELETE FROM menu_items;
             DELETE FROM store_meta WHERE key = 'expires_at';
             COMMIT;",
        )?;
        Ok(())
    }

    // --- Index reads ---

    pub fn index_rows_for_date(
        &self,
        date: &str,
        meal_type: Option<MealType>,
    ) -> Result<Vec<DayIndexRow>> {
        let rows = if let Some(meal_type) = meal_type {
            let mut stmt = self.conn.prepare(
                "SELECT date, day_name, meal_type, categories_count, items_count
                 FROM menu_index WHERE date = ?1 AND meal_type = ?2",
            )?;
            stmt.query_map(params![date, meal_type.as_str()], Self::day_row)?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            let mut stmt = self.conn.prepare(
                "SELECT date, day_name, meal_type, categories_count, items_count
                 FROM menu_index WHERE date = ?1 ORDER BY meal_type",
            )?;
            stmt.query_map(params![date], Self::day_row)?
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }

    pub fn query_item_rows(&self, predicate: &ItemPredicate) -> Result<Vec<ItemIndexRow>> {
        let sql = format!(
            "SELECT DISTINCT id, date, meal_type, category, name, dietary_labels
             FROM menu_items
             WHERE {}
             ORDER BY date, meal_type, rowid",
            predicate.where_clause()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(predicate.params()), Self::item_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn available_dates(&self) -> Result<Vec<AvailableDate>> {
        let mut stmt = self
            .conn
            .prepare("SELECT date, meal_type FROM menu_index ORDER BY date, meal_type")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut dates: Vec<AvailableDate> = Vec::new();
        for (date, meal) in pairs {
            match dates.last_mut() {
                Some(last) if last.date == date => last.meals.push(meal),
                _ => dates.push(AvailableDate {
                    date,
                    meals: vec![meal],
                }),
            }
        }
        Ok(dates)
    }

    pub fn index_stats(&self) -> Result<IndexStats> {
        let days: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM menu_index", [], |row| row.get(0))?;
        let items: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM menu_items", [], |row| row.get(0))?;
        Ok(IndexStats {
            days: usize::try_from(days).unwrap_or_default(),
            items: usize::try_from(items).unwrap_or_default(),
        })
    }

    // --- Expiry ---

    pub fn expires_at(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'expires_at'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|v| {
                DateTime::parse_from_rfc3339(&v)
                    .map(|dt| dt.with_timezone(&Utc))
                    .with_context(|| format!("Invalid expiry timestamp '{v}'"))
            })
            .transpose()
    }
}

/// Wipe both relations and reinsert every row derived from `doc`.
///
/// Days whose name isn't a Monday..Friday key of the date map are not
/// indexed. Items without an id count toward `items_count` but get no
/// `menu_items` row. Repeated `(id, date, meal_type)` keys keep the first row.
fn write_index(conn: &Connection, doc: &StoredMenuData) -> Result<IndexStats> {
    conn.execute_batch(
        "DELETE FROM menu_index;
         DELETE FROM menu_items;",
    )?;

    let mut day_stmt = conn.prepare(
        "INSERT OR IGNORE INTO menu_index (date, day_name, meal_type, categories_count, items_count)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut item_stmt = conn.prepare(
        "INSERT OR IGNORE INTO menu_items (id, date, meal_type, category, name, dietary_labels)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    let mut stats = IndexStats::default();
    for menu in &doc.menus {
        let meal_type = menu.meal_type.as_str();
        for day in &menu.days {
            let Some(date) = doc.date_map.get(&day.day) else {
                continue;
            };

            stats.days += day_stmt.execute(params![
                date,
                day.day,
                meal_type,
                i64::try_from(day.categories.len()).unwrap_or(i64::MAX),
                i64::try_from(day.item_count()).unwrap_or(i64::MAX),
            ])?;

            for category in &day.categories {
                for item in category.items.iter().filter(|i| !i.id.is_empty()) {
                    stats.items += item_stmt.execute(params![
                        item.id,
                        date,
                        meal_type,
                        category.name,
                        item.name,
                        item.dietary_labels.join(","),
                    ])?;
                }
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DayMenu, Menu, MenuCategory, MenuItem};
    use crate::week::{day_to_date_map, parse_date};

    fn item(id: &str, name: &str, labels: &[&str]) -> MenuItem {
        MenuItem {
            id: id.to_string(),
            name: name.to_string(),
            dietary_labels: labels.iter().map(ToString::to_string).collect(),
            ingredients: None,
            allergens: None,
            nutrition_per_100g: None,
        }
    }

    fn deadline() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2027-01-11T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample_doc() -> StoredMenuData {
        let monday = parse_date("2026-01-12").unwrap();
        StoredMenuData {
            menus: vec![Menu {
                identifier: "lunch-1".to_string(),
                name: "Lunch".to_string(),
                meal_type: MealType::Lunch,
                days: vec![
                    DayMenu {
                        day: "Monday".to_string(),
                        categories: vec![MenuCategory {
                            name: "Soups".to_string(),
                            items: vec![
                                item("1", "Leek soup", &["Vegan", "Celery"]),
                                item("2", "Chicken soup", &[]),
                            ],
                        }],
                    },
                    DayMenu {
                        day: "Saturday".to_string(),
                        categories: vec![MenuCategory {
                            name: "Brunch".to_string(),
                            items: vec![item("9", "Pancakes", &[])],
                        }],
                    },
                ],
            }],
            week_start_date: "2026-01-12".to_string(),
            date_map: day_to_date_map(monday),
            stored_at: "2026-01-11T10:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_empty_database_has_no_document() {
        let db = WeekDatabase::open_in_memory().unwrap();
        assert!(db.load_document().unwrap().is_none());
        assert!(db.expires_at().unwrap().is_none());
        assert_eq!(db.index_stats().unwrap(), IndexStats::default());
    }

    #[test]
    fn test_replace_document_and_index() {
        let db = WeekDatabase::open_in_memory().unwrap();
        let doc = sample_doc();
        let stats = db.replace_document_and_index(&doc, deadline()).unwrap();

        // Saturday has no date in the map and is skipped
        assert_eq!(stats, IndexStats { days: 1, items: 2 });
        assert_eq!(db.load_document().unwrap(), Some(doc));

        let rows = db
            .index_rows_for_date("2026-01-12", Some(MealType::Lunch))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].day_name, "Monday");
        assert_eq!(rows[0].categories_count, 1);
        assert_eq!(rows[0].items_count, 2);
    }

    #[test]
    fn test_replace_overwrites_previous_rows() {
        let db = WeekDatabase::open_in_memory().unwrap();
        db.replace_document_and_index(&sample_doc(), deadline()).unwrap();

        let mut doc = sample_doc();
        doc.menus[0].days[0].categories[0].items.truncate(1);
        db.replace_document_and_index(&doc, deadline()).unwrap();

        assert_eq!(db.index_stats().unwrap(), IndexStats { days: 1, items: 1 });
    }

    #[test]
    fn test_duplicate_item_on_same_day_indexed_once() {
        let db = WeekDatabase::open_in_memory().unwrap();
        let mut doc = sample_doc();
        doc.menus[0].days[0].categories.push(MenuCategory {
            name: "Specials".to_string(),
            items: vec![item("1", "Leek soup", &["Vegan"])],
        });
        let stats = db.replace_document_and_index(&doc, deadline()).unwrap();
        assert_eq!(stats.items, 2);

        let rows = db.index_rows_for_date("2026-01-12", None).unwrap();
        assert_eq!(rows[0].items_count, 3);
    }

    #[test]
    fn test_items_without_id_are_not_indexed() {
        let db = WeekDatabase::open_in_memory().unwrap();
        let mut doc = sample_doc();
        doc.menus[0].days[0].categories[0]
            .items
            .push(item("", "Mystery dish", &[]));
        let stats = db.replace_document_and_index(&doc, deadline()).unwrap();
        assert_eq!(stats.items, 2);
    }

    #[test]
    fn test_query_item_rows_all() {
        let db = WeekDatabase::open_in_memory().unwrap();
        db.replace_document_and_index(&sample_doc(), deadline()).unwrap();
        let rows = db.query_item_rows(&ItemPredicate::default()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].dietary_labels, "Vegan,Celery");
        assert_eq!(rows[1].dietary_labels, "");
    }

    #[test]
    fn test_available_dates_groups_meals() {
        let db = WeekDatabase::open_in_memory().unwrap();
        let mut doc = sample_doc();
        let mut breakfast = doc.menus[0].clone();
        breakfast.meal_type = MealType::Breakfast;
        doc.menus.push(breakfast);
        db.replace_document_and_index(&doc, deadline()).unwrap();

        let dates = db.available_dates().unwrap();
        assert_eq!(
            dates,
            vec![AvailableDate {
                date: "2026-01-12".to_string(),
                meals: vec!["breakfast".to_string(), "lunch".to_string()],
            }]
        );
    }

    #[test]
    fn test_rebuild_index_leaves_document() {
        let db = WeekDatabase::open_in_memory().unwrap();
        let doc = sample_doc();
        db.replace_document_and_index(&doc, deadline()).unwrap();
        db.conn.execute_batch("DELETE FROM menu_items;").unwrap();
        assert_eq!(db.index_stats().unwrap().items, 0);

        let stats = db.rebuild_index(&doc).unwrap();
        assert_eq!(stats.items, 2);
        assert_eq!(db.load_document().unwrap(), Some(doc));
    }

    #[test]
    fn test_expiry_roundtrip_and_clear() {
        let db = WeekDatabase::open_in_memory().unwrap();
        db.replace_document_and_index(&sample_doc(), deadline()).unwrap();
        assert_eq!(db.expires_at().unwrap(), Some(deadline()));

        db.clear_all().unwrap();
        assert!(db.load_document().unwrap().is_none());
        assert!(db.expires_at().unwrap().is_none());
        assert_eq!(db.index_stats().unwrap(), IndexStats::default());

        // Clearing twice is harmless
        db.clear_all().unwrap();
    }

    #[test]
    fn test_failed_replace_keeps_previous_document_and_deadline() {
        let db = WeekDatabase::open_in_memory().unwrap();
        let doc = sample_doc();
        db.replace_document_and_index(&doc, deadline()).unwrap();

        db.conn.execute_batch("DROP TABLE menu_items;").unwrap();
        let mut changed = sample_doc();
        changed.stored_at = "2026-01-18T10:00:00+00:00".to_string();
        let later = deadline() + chrono::Duration::days(7);
        assert!(db.replace_document_and_index(&changed, later).is_err());

        assert_eq!(db.load_document().unwrap(), Some(doc));
        assert_eq!(db.expires_at().unwrap(), Some(deadline()));
    }

    #[test]
    fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("week.db");
        {
            let db = WeekDatabase::open(&path).unwrap();
            db.replace_document_and_index(&sample_doc(), deadline()).unwrap();
        }
        let db = WeekDatabase::open(&path).unwrap();
        assert!(db.load_document().unwrap().is_some());
        assert_eq!(db.index_stats().unwrap().items, 2);
    }
}
