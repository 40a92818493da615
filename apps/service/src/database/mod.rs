//! Persistence layer for equipment state, the availability ledger,
//! and alert events.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{LibsqlStore, Store};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
