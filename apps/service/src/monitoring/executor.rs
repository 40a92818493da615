use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::{self, StreamExt};

use super::prober::{IcmpProber, ProbeKind, Prober, TcpProber, probe_kind};
use super::types::{ProbeResult, ProbeTarget};
use crate::config::ProbeConfig;

/// Probe executor - issues reachability checks against a batch of
/// equipment endpoints with a bounded worker pool.
///
/// Stateless with respect to persistence; a probe that times out or
/// errors is a failed [`ProbeResult`], never an engine error.
pub struct ProbeExecutor {
    icmp_prober: Arc<dyn Prober>,
    tcp_prober: Arc<dyn Prober>,
    retries: u32,
    pool_size: usize,
}

impl ProbeExecutor {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        Ok(Self {
            icmp_prober: Arc::new(IcmpProber::new(timeout)?),
            tcp_prober: Arc::new(TcpProber::new(timeout)),
            retries: config.retries,
            pool_size: config.pool_size,
        })
    }

    /// Build an executor over externally supplied probers.
    pub fn with_probers(
        icmp_prober: Arc<dyn Prober>,
        tcp_prober: Arc<dyn Prober>,
        retries: u32,
        pool_size: usize,
    ) -> Self {
        Self { icmp_prober, tcp_prober, retries, pool_size }
    }

    /// Probe every target, at most `pool_size` in flight at a time.
    /// The cycle's wall-clock time is bounded by the per-probe timeout
    /// times ceil(targets / pool_size), not by the slowest host
    /// sequentially.
    pub async fn run_batch(&self, targets: Vec<ProbeTarget>) -> Vec<ProbeResult> {
        stream::iter(targets)
            .map(|target| self.probe_one(target))
            .buffer_unordered(self.pool_size.max(1))
            .collect()
            .await
    }

    /// Probe one endpoint, retrying failures up to the configured
    /// count before recording the probe as failed.
    async fn probe_one(&self, target: ProbeTarget) -> ProbeResult {
        let prober: &dyn Prober = match probe_kind(&target.address) {
            ProbeKind::Icmp => self.icmp_prober.as_ref(),
            ProbeKind::Tcp => self.tcp_prober.as_ref(),
        };

        let mut last_error = String::new();
        for _attempt in 0..=self.retries {
            match prober.probe(&target.address).await {
                Ok(latency_ms) => {
                    return ProbeResult::success(target.equipment_id, latency_ms);
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        ProbeResult::failure(target.equipment_id, last_error)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Prober scripted by address: "down" addresses always fail, the
    /// rest succeed after an optional delay.
    pub(crate) struct FakeProber {
        pub delay: Duration,
        pub calls: AtomicU32,
    }

    impl FakeProber {
        pub(crate) fn new(delay: Duration) -> Self {
            Self { delay, calls: AtomicU32::new(0) }
        }
    }

    #[async_trait::async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, address: &str) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(self.delay).await;
            if address.starts_with("down") {
                anyhow::bail!("host unreachable")
            }
            Ok(5)
        }
    }

    fn targets(addresses: &[&str]) -> Vec<ProbeTarget> {
        addresses
            .iter()
            .enumerate()
            .map(|(i, a)| ProbeTarget {
                equipment_id: format!("eq-{i}"),
                address: (*a).to_string(),
            })
            .collect()
    }

    fn executor(prober: Arc<FakeProber>, retries: u32, pool_size: usize) -> ProbeExecutor {
        ProbeExecutor::with_probers(prober.clone(), prober, retries, pool_size)
    }

    #[tokio::test]
    async fn failures_are_results_not_errors() {
        let prober = Arc::new(FakeProber::new(Duration::ZERO));
        let exec = executor(prober, 0, 4);

        let results = exec.run_batch(targets(&["10.0.0.1", "down.host"])).await;
        assert_eq!(results.len(), 2);

        let ok = results.iter().find(|r| r.equipment_id == "eq-0").unwrap();
        assert!(ok.success);
        assert_eq!(ok.latency_ms, Some(5));

        let failed = results.iter().find(|r| r.equipment_id == "eq-1").unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("host unreachable"));
    }

    #[tokio::test]
    async fn failed_probes_are_retried() {
        let prober = Arc::new(FakeProber::new(Duration::ZERO));
        let exec = executor(prober.clone(), 2, 4);

        exec.run_batch(targets(&["down.host"])).await;
        // one initial attempt plus two retries
        assert_eq!(prober.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_by_pool_size() {
        let prober = Arc::new(FakeProber::new(Duration::from_millis(100)));
        let exec = executor(prober, 0, 2);

        let start = Instant::now();
        let results = exec.run_batch(targets(&["a", "b", "c", "d"])).await;
        assert_eq!(results.len(), 4);

        // 4 probes of 100ms through 2 workers need at least two rounds.
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
