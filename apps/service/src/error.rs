use thiserror::Error;

/// Engine error taxonomy.
///
/// A failed probe is never an error: device unreachability is data and
/// flows through [`crate::monitoring::types::ProbeResult`] instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The store is unreachable or a statement failed. Fatal to the
    /// affected equipment's update for this cycle; retried on the next
    /// scheduled tick.
    #[error("persistence error: {0}")]
    Persistence(#[from] libsql::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool::managed::PoolError<libsql::Error>),

    #[error("connection pool build error: {0}")]
    PoolBuild(#[from] deadpool::managed::BuildError),

    /// Alert delivery failed. Recorded on the alert event and retried
    /// with backoff; never blocks reconciliation.
    #[error("notification delivery failed: {0}")]
    Notification(#[from] reqwest::Error),

    /// Invalid configuration. Fails fast at startup, never per-cycle.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("corrupt row in store: {0}")]
    CorruptRow(String),
}
