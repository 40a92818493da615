use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// This is the single source of truth for the engine's schema. The
/// reporting/dashboard side only reads data and must not migrate.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    // Create schema_migrations table first (tracks applied migrations)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Initial schema").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Add maintenance flag and delivery bookkeeping").await?;
    }

    tracing::info!(
        "Database migrations completed successfully (now at version {})",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: Initial schema
/// Creates equipment, availability_history, and alert_events tables
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS equipment (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            tier TEXT NOT NULL DEFAULT 'low',
            active INTEGER NOT NULL DEFAULT 1,
            online INTEGER NOT NULL DEFAULT 0,
            last_seen INTEGER,
            last_change INTEGER
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS availability_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            equipment_id TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            ended_at INTEGER,
            online INTEGER NOT NULL,
            FOREIGN KEY (equipment_id) REFERENCES equipment(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS alert_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            equipment_id TEXT NOT NULL,
            outage_start INTEGER NOT NULL,
            triggered_at INTEGER NOT NULL,
            tier TEXT NOT NULL,
            repeat_index INTEGER NOT NULL DEFAULT 0,
            delivery TEXT NOT NULL DEFAULT 'pending',
            FOREIGN KEY (equipment_id) REFERENCES equipment(id) ON DELETE CASCADE,
            UNIQUE (equipment_id, outage_start, repeat_index)
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_equipment_active ON equipment(active)", ())
        .await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_equipment_online ON equipment(online)", ())
        .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_availability_equipment ON availability_history(equipment_id)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_availability_open ON availability_history(equipment_id, ended_at)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_availability_started ON availability_history(started_at DESC)",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_alert_events_equipment ON alert_events(equipment_id, outage_start)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_alert_events_delivery ON alert_events(delivery)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: maintenance flag on equipment plus delivery retry
/// bookkeeping on alert_events
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute("ALTER TABLE equipment ADD COLUMN maintenance INTEGER NOT NULL DEFAULT 0", ())
        .await?;

    conn.execute("ALTER TABLE alert_events ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0", ())
        .await?;

    conn.execute("ALTER TABLE alert_events ADD COLUMN last_attempt_at INTEGER", ()).await?;

    Ok(())
}
