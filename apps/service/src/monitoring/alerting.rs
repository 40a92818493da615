use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use super::types::{CriticalityTier, Transition};
use crate::config::{AlertConfig, NotifierConfig};
use crate::database::Store;
use crate::database::models::{AlertEvent, DeliveryStatus, Equipment};
use crate::error::EngineError;
use crate::notify::{Notification, NotificationKind, Notifier};

/// Static alert policy, validated at startup.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    /// Minimum tier that qualifies for alerting.
    pub tier: CriticalityTier,
    /// Minimum continuous offline duration before the first alert.
    pub debounce: Duration,
    /// Re-notify cadence while the outage persists.
    pub renotify: Duration,
    /// Cap on re-notifications per outage; repeat_index never exceeds
    /// this value.
    pub max_repeats: u32,
    pub notify_recovery: bool,
    /// Delivery attempts per alert event before it is marked failed.
    pub max_attempts: u32,
}

impl AlertPolicy {
    pub fn from_config(alerts: &AlertConfig, notifier: &NotifierConfig) -> Self {
        Self {
            tier: alerts.tier,
            debounce: Duration::minutes(alerts.debounce_minutes),
            renotify: Duration::minutes(alerts.renotify_minutes),
            max_repeats: alerts.max_repeats,
            notify_recovery: alerts.notify_recovery,
            max_attempts: notifier.max_attempts,
        }
    }
}

/// Per-tick alert evaluation counters, surfaced in the cycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertSummary {
    pub created: usize,
    pub delivered: usize,
    pub failed: usize,
    pub recoveries: usize,
}

/// Alert engine - decides when an outage becomes an alert and drives
/// delivery of pending alert events.
///
/// Alert creation is keyed by (equipment id, outage start): one event
/// at repeat 0 per continuous outage, further events only when the
/// re-notify interval elapses, never more than `max_repeats` repeats.
pub struct AlertEngine {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    policy: AlertPolicy,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, policy: AlertPolicy) -> Self {
        Self { store, notifier, policy }
    }

    /// Evaluate alert policy against the reconciled state.
    ///
    /// `transitions` come from the reconciliation that just ran (empty
    /// on pure alert ticks); long-standing outages are re-evaluated
    /// from the store every call, so debounce expiry and re-notify do
    /// not depend on fresh edges.
    pub async fn evaluate(&self, now: DateTime<Utc>, transitions: &[Transition]) -> AlertSummary {
        let mut summary = AlertSummary::default();

        if self.policy.notify_recovery {
            self.send_recovery_notices(now, transitions, &mut summary).await;
        }

        match self.store.offline_equipment().await {
            Ok(offline) => {
                for equipment in offline {
                    if let Err(e) = self.evaluate_outage(now, &equipment, &mut summary).await {
                        tracing::error!(
                            equipment_id = %equipment.id,
                            error = %e,
                            "alert evaluation failed for equipment"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load offline equipment, skipping alert sweep");
            }
        }

        self.deliver_pending(now, &mut summary).await;

        summary
    }

    async fn evaluate_outage(
        &self,
        now: DateTime<Utc>,
        equipment: &Equipment,
        summary: &mut AlertSummary,
    ) -> Result<(), EngineError> {
        if equipment.tier < self.policy.tier {
            return Ok(());
        }

        let Some(outage_start) = equipment.last_change else {
            return Ok(());
        };

        // Debounce: transient flaps never reach alert creation.
        if now - outage_start < self.policy.debounce {
            return Ok(());
        }

        let repeat_index = match self.store.latest_alert(&equipment.id, outage_start).await? {
            None => 0,
            Some(previous) => {
                if previous.repeat_index >= self.policy.max_repeats {
                    return Ok(());
                }
                if now - previous.triggered_at < self.policy.renotify {
                    return Ok(());
                }
                previous.repeat_index + 1
            }
        };

        let alert = AlertEvent::new(
            equipment.id.clone(),
            outage_start,
            now,
            equipment.tier,
            repeat_index,
        );
        self.store.insert_alert(&alert).await?;
        summary.created += 1;

        tracing::warn!(
            equipment_id = %equipment.id,
            tier = %equipment.tier,
            outage_start = %outage_start,
            repeat_index,
            "alert event created"
        );

        Ok(())
    }

    async fn send_recovery_notices(
        &self,
        now: DateTime<Utc>,
        transitions: &[Transition],
        summary: &mut AlertSummary,
    ) {
        for transition in transitions.iter().filter(|t| t.went_online) {
            let Some(outage_start) = transition.previous_change else { continue };

            // Only announce recoveries of outages that were alerted on.
            let alerted = self
                .store
                .latest_alert(&transition.equipment_id, outage_start)
                .await
                .ok()
                .flatten();
            let Some(alert) = alerted else { continue };

            let Ok(Some(equipment)) = self.store.equipment(&transition.equipment_id).await else {
                continue;
            };

            let notification = Notification {
                kind: NotificationKind::Recovery,
                equipment_id: equipment.id.clone(),
                equipment_name: equipment.name.clone(),
                tier: alert.tier,
                outage_start,
                duration_minutes: (transition.at - outage_start).num_minutes(),
                repeat_index: alert.repeat_index,
            };

            match self.notifier.notify(&notification).await {
                Ok(()) => summary.recoveries += 1,
                Err(e) => {
                    // Recovery notices are best-effort; no event row to
                    // retry against.
                    tracing::warn!(
                        equipment_id = %equipment.id,
                        error = %e,
                        "recovery notice delivery failed"
                    );
                }
            }
        }
    }

    /// Attempt delivery of pending alert events, with capped
    /// exponential backoff across ticks.
    async fn deliver_pending(&self, now: DateTime<Utc>, summary: &mut AlertSummary) {
        let pending = match self.store.pending_alerts().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "failed to load pending alerts");
                return;
            }
        };

        for alert in pending {
            if let Some(last_attempt) = alert.last_attempt_at {
                if now < last_attempt + delivery_backoff(alert.attempts) {
                    continue;
                }
            }

            if let Err(e) = self.deliver_one(now, &alert).await {
                tracing::error!(
                    equipment_id = %alert.equipment_id,
                    error = %e,
                    "alert delivery bookkeeping failed"
                );
                continue;
            }

            match self.store.latest_alert(&alert.equipment_id, alert.outage_start).await {
                Ok(Some(updated)) if updated.delivery == DeliveryStatus::Sent => {
                    summary.delivered += 1
                }
                Ok(Some(updated)) if updated.delivery == DeliveryStatus::Failed => {
                    summary.failed += 1
                }
                _ => {}
            }
        }
    }

    async fn deliver_one(&self, now: DateTime<Utc>, alert: &AlertEvent) -> Result<(), EngineError> {
        let Some(alert_id) = alert.id else { return Ok(()) };

        let Some(equipment) = self.store.equipment(&alert.equipment_id).await? else {
            // Equipment removed from inventory mid-outage; nothing left
            // to notify about.
            self.store
                .record_delivery(alert_id, DeliveryStatus::Failed, alert.attempts, now)
                .await?;
            return Ok(());
        };

        let notification = Notification {
            kind: NotificationKind::Outage,
            equipment_id: equipment.id.clone(),
            equipment_name: equipment.name.clone(),
            tier: alert.tier,
            outage_start: alert.outage_start,
            duration_minutes: (now - alert.outage_start).num_minutes(),
            repeat_index: alert.repeat_index,
        };

        let attempts = alert.attempts + 1;
        match self.notifier.notify(&notification).await {
            Ok(()) => {
                self.store.record_delivery(alert_id, DeliveryStatus::Sent, attempts, now).await?;
            }
            Err(e) => {
                let status = if attempts >= self.policy.max_attempts {
                    DeliveryStatus::Failed
                } else {
                    DeliveryStatus::Pending
                };
                tracing::warn!(
                    equipment_id = %alert.equipment_id,
                    attempts,
                    gave_up = matches!(status, DeliveryStatus::Failed),
                    error = %e,
                    "alert delivery attempt failed"
                );
                self.store.record_delivery(alert_id, status, attempts, now).await?;
            }
        }

        Ok(())
    }
}

/// Exponential backoff between delivery attempts, with a little jitter
/// so retries from many alerts do not line up.
fn delivery_backoff(attempts: u32) -> Duration {
    let base = 30i64.saturating_mul(1i64 << attempts.min(6));
    let jitter = rand::thread_rng().gen_range(0..10);
    Duration::seconds(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repository::tests::{equipment, test_store};
    use crate::monitoring::types::CriticalityTier;
    use std::sync::Mutex;

    /// Captures notifications; optionally fails every attempt.
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self { sent: Mutex::new(Vec::new()), fail })
        }

        fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), EngineError> {
            if self.fail {
                return Err(EngineError::Config("delivery refused".into()));
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn policy() -> AlertPolicy {
        AlertPolicy {
            tier: CriticalityTier::Critical,
            debounce: Duration::minutes(10),
            renotify: Duration::minutes(60),
            max_repeats: 2,
            notify_recovery: false,
            max_attempts: 2,
        }
    }

    async fn engine_with(
        policy: AlertPolicy,
        fail_delivery: bool,
    ) -> (AlertEngine, Arc<dyn Store>, Arc<RecordingNotifier>, tempfile::TempDir) {
        let (store, dir) = test_store().await;
        let store: Arc<dyn Store> = Arc::new(store);
        let notifier = RecordingNotifier::new(fail_delivery);
        let engine = AlertEngine::new(store.clone(), notifier.clone(), policy);
        (engine, store, notifier, dir)
    }

    /// Mark equipment offline since `outage_start`.
    async fn take_offline(store: &Arc<dyn Store>, id: &str, outage_start: DateTime<Utc>) {
        store.apply_transition(id, true, outage_start - Duration::hours(1)).await.unwrap();
        store.apply_transition(id, false, outage_start).await.unwrap();
    }

    #[tokio::test]
    async fn no_alert_before_debounce_expires() {
        let (engine, store, notifier, _dir) = engine_with(policy(), false).await;
        store.upsert_equipment(&equipment("eq-1", CriticalityTier::Critical)).await.unwrap();

        let t1 = Utc::now() - Duration::minutes(5);
        take_offline(&store, "eq-1", t1).await;

        let summary = engine.evaluate(t1 + Duration::minutes(5), &[]).await;
        assert_eq!(summary.created, 0);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn debounced_outage_creates_exactly_one_alert() {
        let (engine, store, notifier, _dir) = engine_with(policy(), false).await;
        store.upsert_equipment(&equipment("eq-1", CriticalityTier::Critical)).await.unwrap();

        // Probe failures at t1, t2, t3 five minutes apart only anchor
        // the outage at t1; the alert fires once t1+debounce elapses.
        let t1 = Utc::now() - Duration::minutes(20);
        take_offline(&store, "eq-1", t1).await;
        let summary = engine.evaluate(t1 + Duration::minutes(10), &[]).await;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.delivered, 1);

        // Re-evaluation within the re-notify window is deduplicated.
        let summary = engine.evaluate(t1 + Duration::minutes(15), &[]).await;
        assert_eq!(summary.created, 0);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Outage);
        assert_eq!(sent[0].outage_start.timestamp(), t1.timestamp());
        assert_eq!(sent[0].repeat_index, 0);
    }

    #[tokio::test]
    async fn flap_inside_debounce_never_alerts() {
        let (engine, store, notifier, _dir) = engine_with(policy(), false).await;
        store.upsert_equipment(&equipment("eq-1", CriticalityTier::Critical)).await.unwrap();

        let t1 = Utc::now() - Duration::minutes(30);
        take_offline(&store, "eq-1", t1).await;
        // back online before the debounce window closed
        store.apply_transition("eq-1", true, t1 + Duration::minutes(4)).await.unwrap();

        let summary = engine.evaluate(t1 + Duration::minutes(30), &[]).await;
        assert_eq!(summary.created, 0);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn below_threshold_tier_never_alerts() {
        let (engine, store, notifier, _dir) = engine_with(policy(), false).await;
        store.upsert_equipment(&equipment("eq-low", CriticalityTier::Low)).await.unwrap();

        let t1 = Utc::now() - Duration::hours(4);
        take_offline(&store, "eq-low", t1).await;

        let summary = engine.evaluate(Utc::now(), &[]).await;
        assert_eq!(summary.created, 0);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn renotify_repeats_until_cap() {
        let (engine, store, notifier, _dir) = engine_with(policy(), false).await;
        store.upsert_equipment(&equipment("eq-1", CriticalityTier::Critical)).await.unwrap();

        let t1 = Utc::now() - Duration::hours(6);
        take_offline(&store, "eq-1", t1).await;

        let first = engine.evaluate(t1 + Duration::minutes(10), &[]).await;
        assert_eq!(first.created, 1);

        // Each elapsed re-notify window yields one repeat, up to the cap.
        let mut created = 0;
        for hours in 1..6 {
            let summary = engine.evaluate(t1 + Duration::hours(hours), &[]).await;
            created += summary.created;
        }
        assert_eq!(created, 2, "max_repeats=2 caps the repeats");

        let repeat_indexes: Vec<u32> = notifier.sent().iter().map(|n| n.repeat_index).collect();
        assert_eq!(repeat_indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn delivery_failure_backs_off_then_marks_failed() {
        let (engine, store, _notifier, _dir) = engine_with(policy(), true).await;
        store.upsert_equipment(&equipment("eq-1", CriticalityTier::Critical)).await.unwrap();

        let t1 = Utc::now() - Duration::hours(1);
        take_offline(&store, "eq-1", t1).await;

        let now = t1 + Duration::minutes(10);
        let summary = engine.evaluate(now, &[]).await;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.delivered, 0);

        let alert = store.latest_alert("eq-1", t1).await.unwrap().unwrap();
        assert_eq!(alert.delivery, DeliveryStatus::Pending);
        assert_eq!(alert.attempts, 1);

        // Second attempt after the backoff window exhausts max_attempts=2.
        let summary = engine.evaluate(now + Duration::minutes(5), &[]).await;
        assert_eq!(summary.failed, 1);

        let alert = store.latest_alert("eq-1", t1).await.unwrap().unwrap();
        assert_eq!(alert.delivery, DeliveryStatus::Failed);
        assert_eq!(alert.attempts, 2);
    }

    #[tokio::test]
    async fn recovery_notice_for_alerted_outage() {
        let mut policy = policy();
        policy.notify_recovery = true;
        let (engine, store, notifier, _dir) = engine_with(policy, false).await;
        store.upsert_equipment(&equipment("eq-1", CriticalityTier::Critical)).await.unwrap();

        let t1 = Utc::now() - Duration::hours(2);
        take_offline(&store, "eq-1", t1).await;
        engine.evaluate(t1 + Duration::minutes(10), &[]).await;

        let recovered_at = t1 + Duration::hours(1);
        store.apply_transition("eq-1", true, recovered_at).await.unwrap();
        let transitions = vec![Transition {
            equipment_id: "eq-1".to_string(),
            went_online: true,
            at: recovered_at,
            previous_change: Some(t1),
        }];

        let summary = engine.evaluate(recovered_at, &transitions).await;
        assert_eq!(summary.recoveries, 1);
        assert_eq!(summary.created, 0, "recovered equipment leaves the outage sweep");

        let recovery = notifier
            .sent()
            .into_iter()
            .find(|n| n.kind == NotificationKind::Recovery)
            .unwrap();
        assert_eq!(recovery.duration_minutes, 60);
    }
}
