use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Criticality tier of a piece of equipment. Ordering matters: the
/// alert policy qualifies everything at or above a configured tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriticalityTier {
    Low,
    Medium,
    Critical,
}

impl std::fmt::Display for CriticalityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CriticalityTier::Low => write!(f, "low"),
            CriticalityTier::Medium => write!(f, "medium"),
            CriticalityTier::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for CriticalityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(CriticalityTier::Low),
            "medium" => Ok(CriticalityTier::Medium),
            "critical" => Ok(CriticalityTier::Critical),
            other => Err(format!("unknown criticality tier: {other}")),
        }
    }
}

/// A single equipment endpoint to probe.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub equipment_id: String,
    pub address: String,
}

/// Result of one reachability probe. Ephemeral: consumed by the
/// reconciler within the cycle that produced it, never persisted.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub equipment_id: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn success(equipment_id: String, latency_ms: u64) -> Self {
        Self {
            equipment_id,
            timestamp: Utc::now(),
            success: true,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn failure(equipment_id: String, error: String) -> Self {
        Self {
            equipment_id,
            timestamp: Utc::now(),
            success: false,
            latency_ms: None,
            error: Some(error),
        }
    }
}

/// A detected state-transition edge for one piece of equipment.
#[derive(Debug, Clone)]
pub struct Transition {
    pub equipment_id: String,
    pub went_online: bool,
    pub at: DateTime<Utc>,
    /// The equipment's last_change before this edge. For a recovery
    /// this is the start of the outage that just ended.
    pub previous_change: Option<DateTime<Utc>>,
}
