use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};
use uuid::Uuid;

use super::alerting::AlertEngine;
use super::executor::ProbeExecutor;
use super::reconciler::Reconciler;
use super::types::{ProbeTarget, Transition};
use crate::config::SchedulerConfig;
use crate::database::Store;
use crate::error::EngineError;

/// What a cycle does: probe ticks run probe+reconcile, alert ticks run
/// alert evaluation, a manual trigger runs the full pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    Probe,
    Alert,
    Full,
}

/// Outcome of one cycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// Another cycle was in flight; this request was dropped rather
    /// than run concurrently.
    Skipped,
}

/// Published after every cycle; the status route serves the latest one
/// so external health checks can observe staleness.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub kind: CycleKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub probed: usize,
    pub transitions: usize,
    pub alerts_created: usize,
    pub alerts_delivered: usize,
}

#[derive(Default)]
struct CycleCounters {
    probed: usize,
    transitions: usize,
    alerts_created: usize,
    alerts_delivered: usize,
}

/// Cycle scheduler - drives probe -> reconcile -> alert cycles at the
/// configured intervals, with at most one cycle in flight at a time.
pub struct CycleScheduler {
    store: Arc<dyn Store>,
    executor: Arc<ProbeExecutor>,
    reconciler: Reconciler,
    alerts: AlertEngine,
    probe_interval: Duration,
    alert_interval: Duration,
    in_flight: Mutex<()>,
    /// Transitions observed by probe cycles, handed to the next alert
    /// evaluation (recovery notices need the edges, not just state).
    carried_transitions: std::sync::Mutex<Vec<Transition>>,
    status_tx: watch::Sender<Option<CycleReport>>,
}

impl CycleScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<ProbeExecutor>,
        reconciler: Reconciler,
        alerts: AlertEngine,
        config: &SchedulerConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(None);
        Self {
            store,
            executor,
            reconciler,
            alerts,
            probe_interval: Duration::from_secs(config.probe_interval_seconds),
            alert_interval: Duration::from_secs(config.alert_interval_seconds),
            in_flight: Mutex::new(()),
            carried_transitions: std::sync::Mutex::new(Vec::new()),
            status_tx,
        }
    }

    /// Subscribe to cycle reports.
    pub fn subscribe(&self) -> watch::Receiver<Option<CycleReport>> {
        self.status_tx.subscribe()
    }

    /// Run one cycle now, unless one is already in flight.
    ///
    /// The try_lock guard is the single-flight discipline: overlapping
    /// triggers are skipped, never run concurrently, so no two cycles
    /// can race on an equipment's open interval.
    pub async fn run_once(&self, kind: CycleKind) -> CycleOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::warn!(?kind, "cycle already in flight, skipping trigger");
            return CycleOutcome::Skipped;
        };

        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::debug!(%cycle_id, ?kind, "cycle started");

        let (success, counters) = match self.run_cycle(cycle_id, kind).await {
            Ok(counters) => (true, counters),
            Err(e) => {
                // A failed cycle is never fatal; state is retried on
                // the next scheduled tick.
                tracing::error!(%cycle_id, ?kind, error = %e, "cycle failed");
                (false, CycleCounters::default())
            }
        };

        let report = CycleReport {
            cycle_id,
            kind,
            started_at,
            finished_at: Utc::now(),
            success,
            probed: counters.probed,
            transitions: counters.transitions,
            alerts_created: counters.alerts_created,
            alerts_delivered: counters.alerts_delivered,
        };
        tracing::info!(
            %cycle_id,
            ?kind,
            success,
            probed = report.probed,
            transitions = report.transitions,
            alerts_created = report.alerts_created,
            "cycle finished"
        );
        self.status_tx.send_replace(Some(report));

        CycleOutcome::Completed
    }

    async fn run_cycle(
        &self,
        cycle_id: Uuid,
        kind: CycleKind,
    ) -> Result<CycleCounters, EngineError> {
        let mut counters = CycleCounters::default();

        let mut transitions = Vec::new();
        if kind != CycleKind::Alert {
            let equipment = self.store.active_equipment().await?;
            let targets: Vec<ProbeTarget> = equipment
                .into_iter()
                .map(|e| ProbeTarget { equipment_id: e.id, address: e.address })
                .collect();
            counters.probed = targets.len();

            // Barrier: reconciliation only starts once the whole batch
            // of probes has completed.
            let batch = self.executor.run_batch(targets).await;
            transitions = self.reconciler.reconcile(cycle_id, &batch).await;
            counters.transitions = transitions.len();
        }

        if kind == CycleKind::Probe {
            self.carried_transitions.lock().expect("poisoned").extend(transitions);
            return Ok(counters);
        }

        let mut for_alerts: Vec<Transition> =
            std::mem::take(&mut *self.carried_transitions.lock().expect("poisoned"));
        for_alerts.extend(transitions);

        let summary = self.alerts.evaluate(Utc::now(), &for_alerts).await;
        counters.alerts_created = summary.created;
        counters.alerts_delivered = summary.delivered;

        Ok(counters)
    }

    /// Long-lived scheduling loop. One cycle at a time; ticks that fire
    /// while a cycle runs are skipped, manual triggers queue in the
    /// channel until the loop is free.
    pub async fn run(
        self: Arc<Self>,
        mut trigger_rx: mpsc::Receiver<()>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut probe_timer = interval(self.probe_interval);
        probe_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut alert_timer = interval(self.alert_interval);
        alert_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = probe_timer.tick() => {
                    self.run_once(CycleKind::Probe).await;
                }
                _ = alert_timer.tick() => {
                    self.run_once(CycleKind::Alert).await;
                }
                Some(()) = trigger_rx.recv() => {
                    tracing::info!("manual cycle trigger received");
                    self.run_once(CycleKind::Full).await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::repository::tests::{equipment, test_store};
    use crate::monitoring::alerting::AlertPolicy;
    use crate::monitoring::executor::tests::FakeProber;
    use crate::monitoring::types::CriticalityTier;
    use crate::notify::LogNotifier;

    async fn scheduler_with(
        probe_delay: Duration,
    ) -> (Arc<CycleScheduler>, Arc<dyn Store>, tempfile::TempDir) {
        let (store, dir) = test_store().await;
        let store: Arc<dyn Store> = Arc::new(store);
        store.upsert_equipment(&equipment("eq-1", CriticalityTier::Critical)).await.unwrap();

        let prober = Arc::new(FakeProber::new(probe_delay));
        let executor = Arc::new(ProbeExecutor::with_probers(prober.clone(), prober, 0, 4));

        let cfg = Config::default();
        let policy = AlertPolicy::from_config(&cfg.alerts, &cfg.notifier);
        let alerts = AlertEngine::new(store.clone(), Arc::new(LogNotifier), policy);
        let reconciler = Reconciler::new(store.clone());

        let scheduler = Arc::new(CycleScheduler::new(
            store.clone(),
            executor,
            reconciler,
            alerts,
            &cfg.scheduler,
        ));
        (scheduler, store, dir)
    }

    #[tokio::test]
    async fn full_cycle_probes_and_reconciles() {
        let (scheduler, store, _dir) = scheduler_with(Duration::ZERO).await;
        let mut status_rx = scheduler.subscribe();

        let outcome = scheduler.run_once(CycleKind::Full).await;
        assert_eq!(outcome, CycleOutcome::Completed);

        let report = status_rx.borrow_and_update().clone().unwrap();
        assert!(report.success);
        assert_eq!(report.kind, CycleKind::Full);
        assert_eq!(report.probed, 1);
        assert_eq!(report.transitions, 1);

        let eq = store.equipment("eq-1").await.unwrap().unwrap();
        assert!(eq.online);
    }

    #[tokio::test]
    async fn overlapping_cycles_are_skipped() {
        let (scheduler, _store, _dir) = scheduler_with(Duration::from_millis(100)).await;

        let (first, second) =
            tokio::join!(scheduler.run_once(CycleKind::Full), scheduler.run_once(CycleKind::Full));

        let outcomes = [first, second];
        assert!(outcomes.contains(&CycleOutcome::Completed));
        assert!(outcomes.contains(&CycleOutcome::Skipped));
    }

    #[tokio::test]
    async fn loop_runs_manual_trigger_and_shuts_down() {
        let (scheduler, _store, _dir) = scheduler_with(Duration::ZERO).await;
        let mut status_rx = scheduler.subscribe();

        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(trigger_rx, shutdown_rx));

        trigger_tx.send(()).await.unwrap();

        let full_seen = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                status_rx.changed().await.unwrap();
                let kind = status_rx.borrow_and_update().as_ref().map(|r| r.kind);
                if kind == Some(CycleKind::Full) {
                    break true;
                }
            }
        })
        .await
        .unwrap();
        assert!(full_seen);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
