use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};

use super::models::{AlertEvent, AvailabilityRecord, DeliveryStatus, Equipment, from_unix, to_unix};
use crate::error::EngineError;
use crate::pool::LibsqlPool;

type Result<T> = std::result::Result<T, EngineError>;

/// Store trait abstracting the engine's persistence contract.
///
/// The engine is the sole writer of equipment state and the
/// availability ledger; reporting surfaces only read.
#[async_trait]
pub trait Store: Send + Sync {
    /// Equipment eligible for probing (active, not in maintenance).
    async fn active_equipment(&self) -> Result<Vec<Equipment>>;

    async fn equipment(&self, id: &str) -> Result<Option<Equipment>>;

    /// Insert or replace an equipment row. Inventory management is an
    /// external collaborator; the engine itself only calls this from
    /// seeding and tests.
    async fn upsert_equipment(&self, equipment: &Equipment) -> Result<()>;

    /// Update last_seen without touching the ledger. Used when a probe
    /// succeeds and no transition occurred.
    async fn touch_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Apply a state transition atomically: close the open availability
    /// interval, open a new one with the observed status, and update the
    /// equipment's online flag and last_change. One transaction; a
    /// failure rolls the whole step back.
    async fn apply_transition(&self, id: &str, online: bool, at: DateTime<Utc>) -> Result<()>;

    /// The equipment's open availability interval, if any.
    async fn open_interval(&self, id: &str) -> Result<Option<AvailabilityRecord>>;

    /// All availability intervals overlapping [from, to).
    async fn intervals_overlapping(
        &self,
        id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AvailabilityRecord>>;

    /// Equipment currently offline and eligible for alert evaluation.
    async fn offline_equipment(&self) -> Result<Vec<Equipment>>;

    /// Most recent alert event for one outage-start key.
    async fn latest_alert(
        &self,
        equipment_id: &str,
        outage_start: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>>;

    async fn insert_alert(&self, alert: &AlertEvent) -> Result<i64>;

    /// Alert events still awaiting delivery.
    async fn pending_alerts(&self) -> Result<Vec<AlertEvent>>;

    /// Record the outcome of a delivery attempt.
    async fn record_delivery(
        &self,
        alert_id: i64,
        status: DeliveryStatus,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// LibSQL store implementation backed by a connection pool.
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

const EQUIPMENT_COLUMNS: &str =
    "id, name, address, tier, active, maintenance, online, last_seen, last_change";

fn equipment_from_row(row: &Row) -> Result<Equipment> {
    let tier: String = row.get(3)?;
    Ok(Equipment {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        tier: tier.parse().map_err(EngineError::CorruptRow)?,
        active: row.get::<i64>(4)? != 0,
        maintenance: row.get::<i64>(5)? != 0,
        online: row.get::<i64>(6)? != 0,
        last_seen: row.get::<Option<i64>>(7)?.map(from_unix),
        last_change: row.get::<Option<i64>>(8)?.map(from_unix),
    })
}

const ALERT_COLUMNS: &str = "id, equipment_id, outage_start, triggered_at, tier, repeat_index, \
                             delivery, attempts, last_attempt_at";

fn alert_from_row(row: &Row) -> Result<AlertEvent> {
    let tier: String = row.get(4)?;
    let delivery: String = row.get(6)?;
    Ok(AlertEvent {
        id: Some(row.get(0)?),
        equipment_id: row.get(1)?,
        outage_start: from_unix(row.get(2)?),
        triggered_at: from_unix(row.get(3)?),
        tier: tier.parse().map_err(EngineError::CorruptRow)?,
        repeat_index: row.get::<i64>(5)? as u32,
        delivery: delivery.parse().map_err(EngineError::CorruptRow)?,
        attempts: row.get::<i64>(7)? as u32,
        last_attempt_at: row.get::<Option<i64>>(8)?.map(from_unix),
    })
}

fn interval_from_row(row: &Row) -> Result<AvailabilityRecord> {
    Ok(AvailabilityRecord {
        id: Some(row.get(0)?),
        equipment_id: row.get(1)?,
        started_at: from_unix(row.get(2)?),
        ended_at: row.get::<Option<i64>>(3)?.map(from_unix),
        online: row.get::<i64>(4)? != 0,
    })
}

#[async_trait]
impl Store for LibsqlStore {
    async fn active_equipment(&self) -> Result<Vec<Equipment>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EQUIPMENT_COLUMNS} FROM equipment WHERE active = 1 AND maintenance = 0"
            ))
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut equipment = Vec::new();
        while let Some(row) = rows.next().await? {
            equipment.push(equipment_from_row(&row)?);
        }
        Ok(equipment)
    }

    async fn equipment(&self, id: &str) -> Result<Option<Equipment>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {EQUIPMENT_COLUMNS} FROM equipment WHERE id = ?"))
            .await?;

        let mut rows = stmt.query(params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(equipment_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_equipment(&self, equipment: &Equipment) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO equipment (id, name, address, tier, active, maintenance, online, last_seen, last_change)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                address = excluded.address,
                tier = excluded.tier,
                active = excluded.active,
                maintenance = excluded.maintenance",
            params![
                equipment.id.clone(),
                equipment.name.clone(),
                equipment.address.clone(),
                equipment.tier.to_string(),
                equipment.active as i64,
                equipment.maintenance as i64,
                equipment.online as i64,
                equipment.last_seen.map(to_unix),
                equipment.last_change.map(to_unix),
            ],
        )
        .await?;
        Ok(())
    }

    async fn touch_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE equipment SET last_seen = ? WHERE id = ?",
            params![to_unix(at), id],
        )
        .await?;
        Ok(())
    }

    async fn apply_transition(&self, id: &str, online: bool, at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        let ts = to_unix(at);

        tx.execute(
            "UPDATE availability_history SET ended_at = ? WHERE equipment_id = ? AND ended_at IS NULL",
            params![ts, id],
        )
        .await?;

        tx.execute(
            "INSERT INTO availability_history (equipment_id, started_at, ended_at, online)
             VALUES (?, ?, NULL, ?)",
            params![id, ts, online as i64],
        )
        .await?;

        tx.execute(
            "UPDATE equipment SET online = ?1, last_change = ?2,
                    last_seen = CASE WHEN ?1 = 1 THEN ?2 ELSE last_seen END
             WHERE id = ?3",
            params![online as i64, ts, id],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn open_interval(&self, id: &str) -> Result<Option<AvailabilityRecord>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, equipment_id, started_at, ended_at, online
                 FROM availability_history WHERE equipment_id = ? AND ended_at IS NULL",
            )
            .await?;

        let mut rows = stmt.query(params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(interval_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn intervals_overlapping(
        &self,
        id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AvailabilityRecord>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, equipment_id, started_at, ended_at, online
                 FROM availability_history
                 WHERE equipment_id = ? AND started_at < ?
                   AND (ended_at IS NULL OR ended_at > ?)
                 ORDER BY started_at",
            )
            .await?;

        let mut rows = stmt.query(params![id, to_unix(to), to_unix(from)]).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(interval_from_row(&row)?);
        }
        Ok(records)
    }

    async fn offline_equipment(&self) -> Result<Vec<Equipment>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EQUIPMENT_COLUMNS} FROM equipment
                 WHERE active = 1 AND maintenance = 0 AND online = 0
                   AND last_change IS NOT NULL"
            ))
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut equipment = Vec::new();
        while let Some(row) = rows.next().await? {
            equipment.push(equipment_from_row(&row)?);
        }
        Ok(equipment)
    }

    async fn latest_alert(
        &self,
        equipment_id: &str,
        outage_start: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM alert_events
                 WHERE equipment_id = ? AND outage_start = ?
                 ORDER BY repeat_index DESC LIMIT 1"
            ))
            .await?;

        let mut rows = stmt.query(params![equipment_id, to_unix(outage_start)]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(alert_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_alert(&self, alert: &AlertEvent) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO alert_events (equipment_id, outage_start, triggered_at, tier, repeat_index, delivery, attempts, last_attempt_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                alert.equipment_id.clone(),
                to_unix(alert.outage_start),
                to_unix(alert.triggered_at),
                alert.tier.to_string(),
                alert.repeat_index as i64,
                alert.delivery.to_string(),
                alert.attempts as i64,
                alert.last_attempt_at.map(to_unix),
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn pending_alerts(&self) -> Result<Vec<AlertEvent>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM alert_events
                 WHERE delivery = 'pending' ORDER BY triggered_at"
            ))
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut alerts = Vec::new();
        while let Some(row) = rows.next().await? {
            alerts.push(alert_from_row(&row)?);
        }
        Ok(alerts)
    }

    async fn record_delivery(
        &self,
        alert_id: i64,
        status: DeliveryStatus,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE alert_events SET delivery = ?, attempts = ?, last_attempt_at = ? WHERE id = ?",
            params![status.to_string(), attempts as i64, to_unix(at), alert_id],
        )
        .await?;
        Ok(())
    }
}
