use std::sync::Arc;

use uuid::Uuid;

use super::types::{ProbeResult, Transition};
use crate::database::Store;

/// State reconciler - folds a cycle's probe results into persisted
/// equipment state and the availability ledger.
///
/// Transitions are applied sequentially (single-writer); together with
/// the scheduler's single-flight guard this serializes all writes to
/// an equipment's open interval. Re-running the same batch against
/// already-consistent state is a no-op.
pub struct Reconciler {
    store: Arc<dyn Store>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Reconcile one full probe batch, returning the detected
    /// state-transition edges.
    ///
    /// A persistence failure for one equipment rolls back that
    /// equipment's update only; it is logged with the cycle id and the
    /// rest of the batch proceeds. The failed equipment is retried
    /// naturally on the next cycle.
    pub async fn reconcile(&self, cycle_id: Uuid, batch: &[ProbeResult]) -> Vec<Transition> {
        let mut transitions = Vec::new();

        for result in batch {
            match self.reconcile_one(result).await {
                Ok(Some(transition)) => {
                    tracing::info!(
                        %cycle_id,
                        equipment_id = %transition.equipment_id,
                        online = transition.went_online,
                        "equipment state transition"
                    );
                    transitions.push(transition);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        %cycle_id,
                        equipment_id = %result.equipment_id,
                        error = %e,
                        "reconciliation failed for equipment, will retry next cycle"
                    );
                }
            }
        }

        transitions
    }

    async fn reconcile_one(
        &self,
        result: &ProbeResult,
    ) -> Result<Option<Transition>, crate::error::EngineError> {
        let Some(equipment) = self.store.equipment(&result.equipment_id).await? else {
            // Inventory race: the equipment was removed mid-cycle.
            tracing::warn!(equipment_id = %result.equipment_id, "probe result for unknown equipment, dropping");
            return Ok(None);
        };

        if result.success == equipment.online {
            // First observation of never-transitioned equipment still
            // needs an open ledger interval to anchor reporting.
            if equipment.last_change.is_none() {
                self.store
                    .apply_transition(&equipment.id, result.success, result.timestamp)
                    .await?;
                return Ok(Some(Transition {
                    equipment_id: equipment.id,
                    went_online: result.success,
                    at: result.timestamp,
                    previous_change: None,
                }));
            }
            if result.success {
                self.store.touch_last_seen(&equipment.id, result.timestamp).await?;
            }
            return Ok(None);
        }

        self.store.apply_transition(&equipment.id, result.success, result.timestamp).await?;

        Ok(Some(Transition {
            equipment_id: equipment.id,
            went_online: result.success,
            at: result.timestamp,
            previous_change: equipment.last_change,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repository::tests::{equipment, test_store};
    use crate::monitoring::types::CriticalityTier;
    use chrono::{Duration, Utc};

    fn ok(id: &str) -> ProbeResult {
        ProbeResult::success(id.to_string(), 3)
    }

    fn fail(id: &str) -> ProbeResult {
        ProbeResult::failure(id.to_string(), "timeout".to_string())
    }

    async fn seeded_store() -> (Arc<dyn Store>, tempfile::TempDir) {
        let (store, dir) = test_store().await;
        store.upsert_equipment(&equipment("eq-1", CriticalityTier::Critical)).await.unwrap();
        (Arc::new(store), dir)
    }

    #[tokio::test]
    async fn first_observation_opens_ledger() {
        let (store, _dir) = seeded_store().await;
        let reconciler = Reconciler::new(store.clone());

        let transitions = reconciler.reconcile(Uuid::new_v4(), &[ok("eq-1")]).await;
        assert_eq!(transitions.len(), 1);
        assert!(transitions[0].went_online);

        let open = store.open_interval("eq-1").await.unwrap().unwrap();
        assert!(open.online);
    }

    #[tokio::test]
    async fn offline_edge_closes_and_opens_interval() {
        let (store, _dir) = seeded_store().await;
        let reconciler = Reconciler::new(store.clone());

        reconciler.reconcile(Uuid::new_v4(), &[ok("eq-1")]).await;
        let transitions = reconciler.reconcile(Uuid::new_v4(), &[fail("eq-1")]).await;
        assert_eq!(transitions.len(), 1);
        assert!(!transitions[0].went_online);

        let eq = store.equipment("eq-1").await.unwrap().unwrap();
        assert!(!eq.online);

        let open = store.open_interval("eq-1").await.unwrap().unwrap();
        assert!(!open.online);

        let all = store
            .intervals_overlapping(
                "eq-1",
                Utc::now() - Duration::hours(1),
                Utc::now() + Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|r| r.ended_at.is_none()).count(), 1);
    }

    #[tokio::test]
    async fn identical_batch_twice_is_a_noop() {
        let (store, _dir) = seeded_store().await;
        let reconciler = Reconciler::new(store.clone());

        let batch = vec![fail("eq-1")];
        reconciler.reconcile(Uuid::new_v4(), &batch).await;
        let transitions = reconciler.reconcile(Uuid::new_v4(), &batch).await;
        assert!(transitions.is_empty());

        let all = store
            .intervals_overlapping(
                "eq-1",
                Utc::now() - Duration::hours(1),
                Utc::now() + Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn steady_success_only_touches_last_seen() {
        let (store, _dir) = seeded_store().await;
        let reconciler = Reconciler::new(store.clone());

        reconciler.reconcile(Uuid::new_v4(), &[ok("eq-1")]).await;
        let before = store.equipment("eq-1").await.unwrap().unwrap();

        let mut later = ok("eq-1");
        later.timestamp = before.last_seen.unwrap() + Duration::minutes(5);
        let transitions = reconciler.reconcile(Uuid::new_v4(), &[later.clone()]).await;
        assert!(transitions.is_empty());

        let after = store.equipment("eq-1").await.unwrap().unwrap();
        assert_eq!(after.last_seen, Some(later.timestamp));
        assert_eq!(after.last_change, before.last_change);
    }

    #[tokio::test]
    async fn unknown_equipment_is_dropped() {
        let (store, _dir) = seeded_store().await;
        let reconciler = Reconciler::new(store);

        let transitions = reconciler.reconcile(Uuid::new_v4(), &[ok("ghost")]).await;
        assert!(transitions.is_empty());
    }
}
