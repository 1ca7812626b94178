//! Sync status metrics.

use prometheus::{IntCounter, IntGauge, Registry};

/// Metrics the engine reports through its status sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// 1 while the node is synchronizing, 0 once caught up.
    IsSyncing,

    /// Number of times a sync attempt entered fork resolution.
    NumTimesInForkChoice,
}

/// Status sink the engine reports into. Observability only: implementations
/// must never fail or block.
pub trait StatusHandler: Send + Sync {
    /// Record a gauge-style value.
    fn set_uint64_value(&self, metric: Metric, value: u64);

    /// Bump a counter-style value.
    fn increment(&self, metric: Metric);
}

/// Prometheus-backed status sink.
pub struct PrometheusStatus {
    is_syncing: IntGauge,
    fork_choices: IntCounter,
}

impl PrometheusStatus {
    /// Create the sync metrics and register them with the given registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let is_syncing = IntGauge::new(
            "lattice_is_syncing",
            "Whether the node is currently synchronizing (1) or caught up (0)",
        )?;
        let fork_choices = IntCounter::new(
            "lattice_fork_choices_total",
            "Number of times the sync engine entered fork resolution",
        )?;

        registry.register(Box::new(is_syncing.clone()))?;
        registry.register(Box::new(fork_choices.clone()))?;

        Ok(Self {
            is_syncing,
            fork_choices,
        })
    }
}

impl StatusHandler for PrometheusStatus {
    fn set_uint64_value(&self, metric: Metric, value: u64) {
        match metric {
            Metric::IsSyncing => self.is_syncing.set(value as i64),
            Metric::NumTimesInForkChoice => {}
        }
    }

    fn increment(&self, metric: Metric) {
        match metric {
            Metric::NumTimesInForkChoice => self.fork_choices.inc(),
            Metric::IsSyncing => {}
        }
    }
}
