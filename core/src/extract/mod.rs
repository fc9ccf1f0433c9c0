//! The extraction pipeline: drive a [`MenuSession`] through every menu variant
//! on the source page and assemble enriched [`Menu`]s.
//!
//! Per variant the session moves `Loaded → MenuSelected → (ModalOpen ⇄
//! ModalClosed)* → MenuComplete`. Loading the page or finding its variants is
//! fatal for the run; a failed detail overlay only costs that item its
//! enrichment.

pub mod session;
pub mod snapshot;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use session::MenuSession;

use crate::models::{ItemDetails, MealType, Menu, MenuInfo};
use snapshot::{dedupe_variants, parse_days, parse_detail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loaded,
    MenuSelected,
    ModalOpen,
    ModalClosed,
    MenuComplete,
}

impl SessionState {
    #[must_use]
    pub fn can_advance(self, next: Self) -> bool {
        use SessionState::{Idle, Loaded, MenuComplete, MenuSelected, ModalClosed, ModalOpen};
        matches!(
            (self, next),
            (Idle, Loaded)
                | (Loaded | MenuComplete, MenuSelected)
                | (MenuSelected | ModalClosed, ModalOpen | MenuComplete)
                | (ModalOpen, ModalClosed)
        )
    }

    pub fn advance(&mut self, next: Self) -> Result<(), ExtractError> {
        if !self.can_advance(next) {
            return Err(ExtractError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("No menu source URL configured")]
    MissingSourceUrl,
    #[error("Failed to load menu page {url}: {reason}")]
    SourceUnreachable { url: String, reason: String },
    #[error("No menu variants found at {url}; the page layout may have changed")]
    NoVariants { url: String },
    #[error("Session step '{step}' failed: {reason}")]
    Session { step: &'static str, reason: String },
    #[error("Invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

fn session_error(step: &'static str) -> impl FnOnce(anyhow::Error) -> ExtractError {
    move |e| ExtractError::Session {
        step,
        reason: format!("{e:#}"),
    }
}

/// Waits applied between session steps. The page loads content
/// asynchronously with no completion signal, hence the fixed delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub variant_settle: Duration,
    pub detail_delay: Duration,
    pub detail_timeout: Duration,
    pub close_settle: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            variant_settle: Duration::from_millis(2000),
            detail_delay: Duration::from_millis(500),
            detail_timeout: Duration::from_millis(3000),
            close_settle: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantReport {
    pub identifier: String,
    pub name: String,
    pub meal_type: MealType,
    pub days: usize,
    pub unique_items: usize,
    pub enriched: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractReport {
    pub variants: Vec<VariantReport>,
}

impl ExtractReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.variants.iter().map(|v| v.failed).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub menus: Vec<Menu>,
    pub report: ExtractReport,
}

/// Run the whole pipeline against `url`. The session is closed whether or
/// not the run succeeds.
pub fn fetch_menus(
    session: &mut dyn MenuSession,
    url: &str,
    options: &ExtractOptions,
) -> Result<Extraction, ExtractError> {
    if url.trim().is_empty() {
        return Err(ExtractError::MissingSourceUrl);
    }

    let result = run(session, url, options);
    if let Err(e) = session.close() {
        warn!(error = %format!("{e:#}"), "failed to close menu session");
    }
    result
}

fn run(
    session: &mut dyn MenuSession,
    url: &str,
    options: &ExtractOptions,
) -> Result<Extraction, ExtractError> {
    let mut state = SessionState::Idle;

    let unreachable = |e: anyhow::Error| ExtractError::SourceUnreachable {
        url: url.to_string(),
        reason: format!("{e:#}"),
    };
    session.open(url).map_err(unreachable)?;
    state.advance(SessionState::Loaded)?;

    let variants = dedupe_variants(session.list_variants().map_err(unreachable)?);
    if variants.is_empty() {
        return Err(ExtractError::NoVariants {
            url: url.to_string(),
        });
    }
    info!(count = variants.len(), "discovered menu variants");

    let mut menus = Vec::with_capacity(variants.len());
    let mut report = ExtractReport::default();
    for variant in &variants {
        let (menu, variant_report) = extract_variant(session, &mut state, variant, options)?;
        info!(
            menu = %menu.name,
            meal_type = %menu.meal_type,
            days = variant_report.days,
            items = variant_report.unique_items,
            failed = variant_report.failed,
            "menu variant extracted"
        );
        menus.push(menu);
        report.variants.push(variant_report);
    }

    Ok(Extraction { menus, report })
}

fn extract_variant(
    session: &mut dyn MenuSession,
    state: &mut SessionState,
    variant: &MenuInfo,
    options: &ExtractOptions,
) -> Result<(Menu, VariantReport), ExtractError> {
    state.advance(SessionState::MenuSelected)?;
    session
        .select_variant(&variant.identifier)
        .map_err(session_error("select variant"))?;
    session.pause(options.variant_settle);

    let snapshot = session.snapshot().map_err(session_error("read menu"))?;
    let mut menu = Menu {
        identifier: variant.identifier.clone(),
        name: variant.name.clone(),
        meal_type: MealType::classify(&variant.name),
        days: parse_days(&snapshot),
    };

    // Recurring dishes share an id; each id's overlay is opened once.
    let mut seen = HashSet::new();
    let unique: Vec<(String, String)> = menu
        .items()
        .filter(|item| !item.id.is_empty() && seen.insert(item.id.clone()))
        .map(|item| (item.id.clone(), item.name.clone()))
        .collect();

    let mut details: HashMap<String, ItemDetails> = HashMap::new();
    let mut failed = 0;
    for (position, (id, name)) in unique.iter().enumerate() {
        debug!(
            item_id = %id,
            progress = position + 1,
            total = unique.len(),
            "fetching item detail"
        );
        state.advance(SessionState::ModalOpen)?;
        match fetch_detail(session, id, options) {
            Ok(Some(detail)) if detail != ItemDetails::default() => {
                details.insert(id.clone(), detail);
            }
            Ok(_) => debug!(item_id = %id, "item detail has no content"),
            Err(e) => {
                failed += 1;
                warn!(item_id = %id, item = %name, error = %format!("{e:#}"), "item detail failed");
                if let Err(close_err) = session.close_detail() {
                    debug!(
                        error = %format!("{close_err:#}"),
                        "overlay close after failure also failed"
                    );
                }
            }
        }
        state.advance(SessionState::ModalClosed)?;
    }

    for item in menu.items_mut() {
        if let Some(detail) = details.get(&item.id) {
            item.apply_details(detail);
        }
    }
    state.advance(SessionState::MenuComplete)?;

    let report = VariantReport {
        identifier: menu.identifier.clone(),
        name: menu.name.clone(),
        meal_type: menu.meal_type,
        days: menu.days.len(),
        unique_items: unique.len(),
        enriched: details.len(),
        failed,
    };
    Ok((menu, report))
}

fn fetch_detail(
    session: &mut dyn MenuSession,
    item_id: &str,
    options: &ExtractOptions,
) -> anyhow::Result<Option<ItemDetails>> {
    session.open_detail(item_id)?;
    session.pause(options.detail_delay);
    session.wait_for_detail(item_id, options.detail_timeout)?;
    let raw = session.read_detail(item_id)?;
    session.close_detail()?;
    session.pause(options.close_settle);
    Ok(raw.as_ref().map(parse_detail))
}

#[cfg(test)]
mod tests {
    use super::snapshot::{PageSnapshot, RawCategory, RawDay, RawDetail, RawItem, RawNutrient};
    use super::*;
    use anyhow::{Result, anyhow, bail};

    #[derive(Default)]
    struct FakeSession {
        fail_open: bool,
        variants: Vec<MenuInfo>,
        snapshots: HashMap<String, PageSnapshot>,
        details: HashMap<String, RawDetail>,
        never_visible: HashSet<String>,
        fail_select: bool,
        selected: Option<String>,
        overlay: Option<String>,
        opened: Vec<String>,
        close_detail_calls: usize,
        pauses: Vec<Duration>,
        closed: bool,
    }

    impl MenuSession for FakeSession {
        fn open(&mut self, _url: &str) -> Result<()> {
            if self.fail_open {
                bail!("connection refused");
            }
            Ok(())
        }

        fn list_variants(&mut self) -> Result<Vec<MenuInfo>> {
            Ok(self.variants.clone())
        }

        fn select_variant(&mut self, identifier: &str) -> Result<()> {
            if self.fail_select {
                bail!("option not clickable");
            }
            self.selected = Some(identifier.to_string());
            Ok(())
        }

        fn snapshot(&mut self) -> Result<PageSnapshot> {
            let selected = self.selected.as_deref().ok_or_else(|| anyhow!("nothing selected"))?;
            Ok(self.snapshots.get(selected).cloned().unwrap_or_default())
        }

        fn open_detail(&mut self, item_id: &str) -> Result<()> {
            if self.overlay.is_some() {
                bail!("an overlay is already open");
            }
            self.overlay = Some(item_id.to_string());
            self.opened.push(item_id.to_string());
            Ok(())
        }

        fn wait_for_detail(&mut self, item_id: &str, _timeout: Duration) -> Result<()> {
            if self.never_visible.contains(item_id) {
                bail!("timed out waiting for overlay {item_id}");
            }
            Ok(())
        }

        fn read_detail(&mut self, item_id: &str) -> Result<Option<RawDetail>> {
            Ok(self.details.get(item_id).cloned())
        }

        fn close_detail(&mut self) -> Result<()> {
            self.close_detail_calls += 1;
            self.overlay = None;
            Ok(())
        }

        fn pause(&mut self, duration: Duration) {
            self.pauses.push(duration);
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn variant(id: &str, name: &str) -> MenuInfo {
        MenuInfo {
            identifier: id.to_string(),
            name: name.to_string(),
        }
    }

    fn raw_item(id: &str, name: &str, labels: &str) -> RawItem {
        RawItem {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            labels: Some(labels.to_string()),
        }
    }

    fn raw_day(day: &str, category: &str, items: Vec<RawItem>) -> RawDay {
        RawDay {
            name: Some(day.to_string()),
            categories: vec![RawCategory {
                name: Some(category.to_string()),
                items,
            }],
        }
    }

    fn detail(ingredients: &str, kcal: &str) -> RawDetail {
        RawDetail {
            ingredients: Some(ingredients.to_string()),
            contains: Some("Celery".to_string()),
            nutrients: vec![RawNutrient {
                name: "Energy (kCal)".to_string(),
                value: kcal.to_string(),
            }],
            ..RawDetail::default()
        }
    }

    fn run(session: &mut FakeSession) -> Result<Extraction, ExtractError> {
        fetch_menus(session, "https://example.test/menu", &ExtractOptions::default())
    }

    fn canteen() -> FakeSession {
        let mut session = FakeSession {
            variants: vec![
                variant("b", "Breakfast"),
                variant("l", "Lunch Menu"),
                variant("b", "Breakfast"),
            ],
            ..FakeSession::default()
        };
        session.snapshots.insert(
            "b".to_string(),
            PageSnapshot {
                days: vec![raw_day("Monday", "Hot", vec![raw_item("p1", "Porridge", "52")])],
            },
        );
        session.snapshots.insert(
            "l".to_string(),
            PageSnapshot {
                days: vec![
                    raw_day(
                        "Monday",
                        "Soups",
                        vec![raw_item("s1", "Leek soup", "52"), raw_item("m1", "Lasagne", "")],
                    ),
                    raw_day("Tuesday", "Soups", vec![raw_item("s1", "Leek soup", "52")]),
                ],
            },
        );
        session.details.insert("p1".to_string(), detail("Oats, water", "70"));
        session.details.insert("s1".to_string(), detail("Leeks, stock", "45"));
        session.details.insert("m1".to_string(), detail("Pasta, beef", "160"));
        session
    }

    #[test]
    fn test_state_transitions() {
        let mut state = SessionState::Idle;
        assert!(state.advance(SessionState::MenuSelected).is_err());
        state.advance(SessionState::Loaded).unwrap();
        state.advance(SessionState::MenuSelected).unwrap();
        state.advance(SessionState::ModalOpen).unwrap();
        assert!(state.advance(SessionState::ModalOpen).is_err());
        state.advance(SessionState::ModalClosed).unwrap();
        state.advance(SessionState::MenuComplete).unwrap();
        state.advance(SessionState::MenuSelected).unwrap();
        state.advance(SessionState::MenuComplete).unwrap();
        assert_eq!(state, SessionState::MenuComplete);
    }

    #[test]
    fn test_fetch_menus_happy_path() {
        let mut session = canteen();
        let extraction = run(&mut session).unwrap();

        assert_eq!(extraction.menus.len(), 2);
        assert_eq!(extraction.menus[0].meal_type, MealType::Breakfast);
        assert_eq!(extraction.menus[1].meal_type, MealType::Lunch);
        assert_eq!(extraction.menus[1].days.len(), 2);
        assert!(session.closed);

        let report = &extraction.report.variants[1];
        assert_eq!(report.unique_items, 2);
        assert_eq!(report.enriched, 2);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_recurring_item_fetched_once_and_backfilled() {
        let mut session = canteen();
        let extraction = run(&mut session).unwrap();

        assert_eq!(session.opened, vec!["p1", "s1", "m1"]);
        let lunch = &extraction.menus[1];
        let soups: Vec<_> = lunch.items().filter(|i| i.id == "s1").collect();
        assert_eq!(soups.len(), 2);
        for soup in soups {
            assert_eq!(soup.ingredients.as_deref(), Some("Leeks, stock"));
            assert_eq!(soup.nutrition_per_100g.as_ref().unwrap().energy_kcal, Some(45.0));
            assert_eq!(soup.dietary_labels, vec!["Vegan"]);
        }
    }

    #[test]
    fn test_failed_detail_degrades_single_item() {
        let mut session = canteen();
        session.never_visible.insert("s1".to_string());
        let extraction = run(&mut session).unwrap();

        let lunch = &extraction.menus[1];
        let soup = lunch.items().find(|i| i.id == "s1").unwrap();
        assert_eq!(soup.name, "Leek soup");
        assert_eq!(soup.dietary_labels, vec!["Vegan"]);
        assert!(soup.ingredients.is_none());
        assert!(soup.allergens.is_none());

        let lasagne = lunch.items().find(|i| i.id == "m1").unwrap();
        assert_eq!(lasagne.ingredients.as_deref(), Some("Pasta, beef"));

        assert_eq!(extraction.report.failed(), 1);
        assert_eq!(extraction.report.variants[1].enriched, 1);
        // The overlay was closed after the failure, so the next item could open.
        assert!(session.overlay.is_none());
        assert_eq!(session.close_detail_calls, 3);
    }

    #[test]
    fn test_item_without_detail_content() {
        let mut session = canteen();
        session.details.remove("m1");
        let extraction = run(&mut session).unwrap();
        let report = &extraction.report.variants[1];
        assert_eq!(report.enriched, 1);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_pauses_follow_options() {
        let options = ExtractOptions {
            variant_settle: Duration::from_millis(7),
            detail_delay: Duration::from_millis(5),
            detail_timeout: Duration::from_millis(1),
            close_settle: Duration::from_millis(3),
        };
        let mut session = canteen();
        fetch_menus(&mut session, "https://example.test/menu", &options).unwrap();
        let settles = session.pauses.iter().filter(|d| **d == options.variant_settle).count();
        assert_eq!(settles, 2);
        let closes = session.pauses.iter().filter(|d| **d == options.close_settle).count();
        assert_eq!(closes, 3);
    }

    #[test]
    fn test_missing_url() {
        let mut session = canteen();
        let err = fetch_menus(&mut session, "  ", &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, ExtractError::MissingSourceUrl));
    }

    #[test]
    fn test_unreachable_source_is_fatal() {
        let mut session = canteen();
        session.fail_open = true;
        let err = run(&mut session).unwrap_err();
        assert!(matches!(err, ExtractError::SourceUnreachable { .. }));
        assert!(err.to_string().contains("connection refused"));
        assert!(session.closed);
    }

    #[test]
    fn test_no_variants_is_fatal() {
        let mut session = FakeSession {
            variants: vec![variant("", "Broken")],
            ..FakeSession::default()
        };
        let err = run(&mut session).unwrap_err();
        assert!(matches!(err, ExtractError::NoVariants { .. }));
        assert!(session.closed);
    }

    #[test]
    fn test_select_failure_returns_no_partial_menus() {
        let mut session = canteen();
        session.fail_select = true;
        let err = run(&mut session).unwrap_err();
        assert!(matches!(err, ExtractError::Session { step: "select variant", .. }));
        assert!(session.closed);
    }
}
