use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{info, warn};

use crate::db::WeekDatabase;
use crate::models::WeekRange;
use crate::store::{DEFAULT_RETENTION_DAYS, WeekStore};
use crate::week::week_range;

enum Backend {
    Memory,
    Directory(PathBuf),
}

/// Keyed collection of independent week stores, opened lazily on first use.
///
/// Each store sits behind its own mutex so operations on one week-key are
/// serialized, while different keys never contend beyond the brief lookup.
pub struct StoreRegistry {
    backend: Backend,
    retention: Duration,
    stores: Mutex<HashMap<String, Arc<Mutex<WeekStore>>>>,
}

/// Week-keys double as file names, so only a conservative alphabet is allowed.
pub fn validate_week_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("Week key must not be empty");
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("Invalid week key '{key}'. Use letters, digits, '-' and '_' only");
    }
    Ok(())
}

impl StoreRegistry {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory,
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// One SQLite file per week-key under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create store directory: {}", dir.display()))?;
        Ok(Self {
            backend: Backend::Directory(dir.to_path_buf()),
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
            stores: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn open_store(&self, key: &str) -> Result<WeekStore> {
        let db = match &self.backend {
            Backend::Memory => WeekDatabase::open_in_memory()?,
            Backend::Directory(dir) => WeekDatabase::open(&dir.join(format!("{key}.db")))?,
        };
        Ok(WeekStore::new(key, db, self.retention))
    }

    /// The store for `key`, created on first access.
    pub fn store(&self, key: &str) -> Result<Arc<Mutex<WeekStore>>> {
        validate_week_key(key)?;
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores.get(key) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(Mutex::new(self.open_store(key)?));
        stores.insert(key.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_store<T>(&self, key: &str, f: impl FnOnce(&WeekStore) -> Result<T>) -> Result<T> {
        let store = self.store(key)?;
        let guard = store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    /// Resolve the week containing `date` for `location` and run `f` on its store.
    pub fn with_store_for_date<T>(
        &self,
        location: &str,
        date: NaiveDate,
        f: impl FnOnce(&WeekRange, &WeekStore) -> Result<T>,
    ) -> Result<T> {
        let range = week_range(date, location);
        self.with_store(&range.week_key, |store| f(&range, store))
    }

    /// Every week-key currently open, plus any persisted on disk.
    pub fn known_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        if let Backend::Directory(dir) = &self.backend {
            let entries = std::fs::read_dir(dir)
                .with_context(|| format!("Failed to list store directory: {}", dir.display()))?;
            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("db") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if validate_week_key(stem).is_ok() {
                        keys.push(stem.to_string());
                    }
                }
            }
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Fire expiry on every store whose deadline is at or before `now`.
    /// Returns the keys that were expired. A failing store is logged and
    /// skipped so one bad file can't block the rest.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut expired = Vec::new();
        for key in self.known_keys()? {
            let result = self.with_store(&key, |store| {
                if store.is_expired(now)? {
                    store.expire()?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            });
            match result {
                Ok(true) => expired.push(key),
                Ok(false) => {}
                Err(e) => warn!(key = %key, error = %format!("{e:#}"), "expiry sweep failed"),
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expiry sweep finished");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DayMenu, MealType, Menu, MenuCategory, MenuItem, SearchOptions};
    use crate::week::parse_date;

    fn menu() -> Menu {
        Menu {
            identifier: "l".to_string(),
            name: "Lunch".to_string(),
            meal_type: MealType::Lunch,
            days: vec![DayMenu {
                day: "Monday".to_string(),
                categories: vec![MenuCategory {
                    name: "Mains".to_string(),
                    items: vec![MenuItem {
                        id: "1".to_string(),
                        name: "Lasagne".to_string(),
                        dietary_labels: vec![],
                        ingredients: None,
                        allergens: None,
                        nutrition_per_100g: None,
                    }],
                }],
            }],
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_validate_week_key() {
        assert!(validate_week_key("london-2026-01-12-2026-01-16").is_ok());
        assert!(validate_week_key("").is_err());
        assert!(validate_week_key("../etc/passwd").is_err());
        assert!(validate_week_key("a b").is_err());
    }

    #[test]
    fn test_store_is_created_once_per_key() {
        let registry = StoreRegistry::in_memory();
        let a = registry.store("london-2026-01-12-2026-01-16").unwrap();
        let b = registry.store("london-2026-01-12-2026-01-16").unwrap();
        let c = registry.store("dublin-2026-01-12-2026-01-16").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_keys_are_isolated() {
        let registry = StoreRegistry::in_memory();
        registry
            .with_store("london-2026-01-12-2026-01-16", |s| {
                s.set_menu_with_dates(vec![menu()], "2026-01-12")
            })
            .unwrap();

        let other = registry
            .with_store("dublin-2026-01-12-2026-01-16", |s| {
                s.search_menu_items("", &SearchOptions::default())
            })
            .unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_with_store_for_date_resolves_week() {
        let registry = StoreRegistry::in_memory();
        let key = registry
            .with_store_for_date("london", parse_date("2026-01-11").unwrap(), |range, store| {
                assert_eq!(store.key(), range.week_key);
                Ok(range.week_key.clone())
            })
            .unwrap();
        assert_eq!(key, "london-2026-01-12-2026-01-16");
    }

    #[test]
    fn test_sweep_expires_only_due_stores() {
        let registry = StoreRegistry::in_memory().with_retention(Duration::days(7));
        registry
            .with_store("london-2026-01-12-2026-01-16", |s| {
                s.set_menu_with_dates_at(vec![menu()], "2026-01-12", at("2026-01-11T00:00:00Z"))
            })
            .unwrap();
        registry
            .with_store("london-2026-01-19-2026-01-23", |s| {
                s.set_menu_with_dates_at(vec![menu()], "2026-01-19", at("2026-01-18T00:00:00Z"))
            })
            .unwrap();

        let expired = registry.sweep_expired(at("2026-01-20T00:00:00Z")).unwrap();
        assert_eq!(expired, vec!["london-2026-01-12-2026-01-16".to_string()]);

        let gone = registry
            .with_store("london-2026-01-12-2026-01-16", WeekStore::get_all_menus)
            .unwrap();
        assert!(gone.is_none());
        let kept = registry
            .with_store("london-2026-01-19-2026-01-23", WeekStore::get_all_menus)
            .unwrap();
        assert!(kept.is_some());

        // Already expired stores have no deadline left
        assert!(registry.sweep_expired(at("2026-01-21T00:00:00Z")).unwrap().is_empty());
    }

    #[test]
    fn test_reingest_pushes_expiry_forward() {
        let registry = StoreRegistry::in_memory().with_retention(Duration::days(7));
        let key = "london-2026-01-12-2026-01-16";
        registry
            .with_store(key, |s| {
                s.set_menu_with_dates_at(vec![menu()], "2026-01-12", at("2026-01-11T00:00:00Z"))
            })
            .unwrap();
        let mut changed = menu();
        changed.days[0].categories[0].items[0].id = "2".to_string();
        registry
            .with_store(key, |s| {
                s.set_menu_with_dates_at(vec![changed], "2026-01-12", at("2026-01-15T00:00:00Z"))
            })
            .unwrap();

        assert!(registry.sweep_expired(at("2026-01-19T00:00:00Z")).unwrap().is_empty());
    }

    #[test]
    fn test_directory_backend_persists_and_lists_keys() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = StoreRegistry::open(dir.path()).unwrap();
            registry
                .with_store("london-2026-01-12-2026-01-16", |s| {
                    s.set_menu_with_dates(vec![menu()], "2026-01-12")
                })
                .unwrap();
        }

        let registry = StoreRegistry::open(dir.path()).unwrap();
        assert_eq!(
            registry.known_keys().unwrap(),
            vec!["london-2026-01-12-2026-01-16".to_string()]
        );
        let menus = registry
            .with_store("london-2026-01-12-2026-01-16", WeekStore::get_all_menus)
            .unwrap()
            .unwrap();
        assert_eq!(menus[0].days[0].categories[0].items[0].name, "Lasagne");
    }
}
