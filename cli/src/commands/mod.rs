mod admin;
mod fetch;
mod helpers;
mod menu;
mod search;

pub(crate) use admin::{cmd_rebuild, cmd_sweep};
pub(crate) use fetch::cmd_fetch;
pub(crate) use menu::{cmd_dates, cmd_menu, cmd_show, cmd_week};
pub(crate) use search::{SearchArgs, cmd_search};
