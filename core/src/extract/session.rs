use std::time::Duration;

use anyhow::Result;

use super::snapshot::{PageSnapshot, RawDetail};
use crate::models::MenuInfo;

/// A rendering session against the menu page.
///
/// Implementations drive a real browser (or a scripted fake in tests); all
/// parsing of what they read happens in [`super::snapshot`]. Only one detail
/// overlay may be open at a time.
pub trait MenuSession {
    fn open(&mut self, url: &str) -> Result<()>;

    /// Every selectable variant as rendered, duplicates included.
    fn list_variants(&mut self) -> Result<Vec<MenuInfo>>;

    fn select_variant(&mut self, identifier: &str) -> Result<()>;

    /// Day sections of the currently selected variant.
    fn snapshot(&mut self) -> Result<PageSnapshot>;

    fn open_detail(&mut self, item_id: &str) -> Result<()>;

    /// Block until the overlay for `item_id` is visible, failing after `timeout`.
    fn wait_for_detail(&mut self, item_id: &str, timeout: Duration) -> Result<()>;

    /// `None` when the overlay is open but has no readable content.
    fn read_detail(&mut self, item_id: &str) -> Result<Option<RawDetail>>;

    fn close_detail(&mut self) -> Result<()>;

    fn pause(&mut self, duration: Duration);

    fn close(&mut self) -> Result<()>;
}
