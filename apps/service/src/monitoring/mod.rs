//! Monitoring engine - probes equipment reachability, reconciles the
//! observations into persisted state transitions, and evaluates the
//! alert policy.

pub mod alerting;
pub mod executor;
pub mod prober;
pub mod reconciler;
pub mod scheduler;
pub mod types;

pub use alerting::{AlertEngine, AlertPolicy};
pub use executor::ProbeExecutor;
pub use reconciler::Reconciler;
pub use scheduler::{CycleKind, CycleScheduler};
