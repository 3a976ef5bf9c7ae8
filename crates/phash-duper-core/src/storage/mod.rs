pub mod files;
pub mod models;
pub mod sqlite;
pub mod stats;

pub use sqlite::Database;
