mod connection;
mod helpers;
mod migrations;
pub mod models;
mod repositories;
mod store;

pub use connection::Database;
pub use models::{CapturedItem, ItemKey, ItemQuery, NewCapturedItem, TagMatch, UNKNOWN_PERIOD};
pub use store::MetadataStore;
