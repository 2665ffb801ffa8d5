//! Data layer module
//!
//! Handles user persistence in SQLite.

mod database;
mod models;

pub use database::Database;
pub use models::*;
