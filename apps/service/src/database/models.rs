use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::CriticalityTier;

/// Convert a timestamp to unix seconds for storage.
pub fn to_unix(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// Convert stored unix seconds back to a timestamp.
pub fn from_unix(timestamp: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_default()
}

/// A monitored network device (router, switch, data collector).
///
/// Rows are created by external inventory management; the engine only
/// mutates the online flag and the two timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Equipment {
    pub id: String,
    pub name: String,
    pub address: String,
    pub tier: CriticalityTier,
    /// Inactive equipment is never probed.
    pub active: bool,
    /// Equipment under maintenance is skipped without counting as an
    /// outage.
    pub maintenance: bool,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_change: Option<DateTime<Utc>>,
}

impl Equipment {
    pub fn new(id: String, name: String, address: String, tier: CriticalityTier) -> Self {
        Self {
            id,
            name,
            address,
            tier,
            active: true,
            maintenance: false,
            online: false,
            last_seen: None,
            last_change: None,
        }
    }
}

/// One entry of the append-only availability ledger.
///
/// `ended_at` is NULL while the interval is open; per equipment at
/// most one row is open at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub id: Option<i64>,
    pub equipment_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub online: bool,
}

/// Delivery state of an alert event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// A persisted alert for one continuous outage.
///
/// `(equipment_id, outage_start, repeat_index)` is the dedup key: one
/// row per outage at repeat 0, further rows only when the re-notify
/// interval elapses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Option<i64>,
    pub equipment_id: String,
    pub outage_start: DateTime<Utc>,
    pub triggered_at: DateTime<Utc>,
    pub tier: CriticalityTier,
    pub repeat_index: u32,
    pub delivery: DeliveryStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl AlertEvent {
    pub fn new(
        equipment_id: String,
        outage_start: DateTime<Utc>,
        triggered_at: DateTime<Utc>,
        tier: CriticalityTier,
        repeat_index: u32,
    ) -> Self {
        Self {
            id: None,
            equipment_id,
            outage_start,
            triggered_at,
            tier,
            repeat_index,
            delivery: DeliveryStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
        }
    }
}
