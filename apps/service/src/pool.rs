use deadpool::managed::{self, Pool, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};

use crate::error::EngineError;

pub struct LibsqlManager {
    database: Database,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.database.connect()
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        // A connection that cannot answer a trivial query is discarded.
        conn.query("SELECT 1", ())
            .await?
            .next()
            .await?
            .ok_or(LibsqlError::QueryReturnedNoRows)?;
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// Build a bounded connection pool over an opened database.
pub fn build_pool(database: Database, max_size: usize) -> Result<LibsqlPool, EngineError> {
    Ok(Pool::builder(LibsqlManager::new(database)).max_size(max_size).build()?)
}
