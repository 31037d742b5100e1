pub mod db;
pub mod history;
pub mod memory;
pub mod migrations;

pub use db::Db;
pub use history::{HistoryStore, SqliteHistoryStore};
pub use memory::MemoryHistoryStore;
