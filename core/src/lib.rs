pub mod db;
pub mod extract;
pub mod models;
pub mod query;
pub mod registry;
pub mod store;
pub mod week;
