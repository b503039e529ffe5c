//! ---
//! cf_section: "07-resilience-fault-tolerance"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Prometheus instrumentation of the failover engine."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{
    self, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

/// Metrics published by the failover engine.
#[derive(Clone)]
pub struct FailoverMetrics {
    transitions: IntCounterVec,
    transition_duration: Histogram,
    samples: IntCounterVec,
    flagged_requests: IntCounter,
    auto_demotions: IntCounter,
    reconciliation_removals: IntCounter,
    published_routes: IntGauge,
}

impl FailoverMetrics {
    /// Register all engine metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let transitions = IntCounterVec::new(
            Opts::new(
                "cf_failover_transitions_total",
                "Cluster access transitions by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let transition_duration = Histogram::with_opts(
            HistogramOpts::new(
                "cf_failover_transition_duration_seconds",
                "Time from start requests until the old members stopped",
            )
            .buckets(prometheus::exponential_buckets(0.5, 2.0, 12)?),
        )?;
        registry.register(Box::new(transition_duration.clone()))?;

        let samples = IntCounterVec::new(
            Opts::new(
                "cf_failover_response_time_samples_total",
                "Proxied response time samples by handling result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(samples.clone()))?;

        let flagged_requests = IntCounter::new(
            "cf_failover_flagged_requests_total",
            "Requests flagged as anomalously slow or failed",
        )?;
        registry.register(Box::new(flagged_requests.clone()))?;

        let auto_demotions = IntCounter::new(
            "cf_failover_auto_demotions_total",
            "Automatic priority demotions of access instances",
        )?;
        registry.register(Box::new(auto_demotions.clone()))?;

        let reconciliation_removals = IntCounter::new(
            "cf_failover_reconciliation_removals_total",
            "Memberships pruned because the instance no longer exists",
        )?;
        registry.register(Box::new(reconciliation_removals.clone()))?;

        let published_routes = IntGauge::new(
            "cf_failover_published_routes",
            "Routes currently installed in the routing table",
        )?;
        registry.register(Box::new(published_routes.clone()))?;

        Ok(Self {
            transitions,
            transition_duration,
            samples,
            flagged_requests,
            auto_demotions,
            reconciliation_removals,
            published_routes,
        })
    }

    pub fn record_transition(&self, outcome: &str) {
        self.transitions.with_label_values(&[outcome]).inc();
    }

    pub fn observe_transition_duration(&self, seconds: f64) {
        self.transition_duration.observe(seconds);
    }

    pub fn record_sample(&self, result: &str) {
        self.samples.with_label_values(&[result]).inc();
    }

    pub fn record_flag(&self) {
        self.flagged_requests.inc();
    }

    pub fn record_demotion(&self) {
        self.auto_demotions.inc();
    }

    pub fn record_removals(&self, count: usize) {
        self.reconciliation_removals.inc_by(count as u64);
    }

    pub fn set_published_routes(&self, count: usize) {
        self.published_routes.set(count as i64);
    }
}

impl std::fmt::Debug for FailoverMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_counts() {
        let registry = Arc::new(Registry::new());
        let metrics = FailoverMetrics::new(registry.clone()).unwrap();
        metrics.record_transition("started");
        metrics.record_sample("accepted");
        metrics.set_published_routes(3);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"cf_failover_transitions_total".to_owned()));
        assert!(names.contains(&"cf_failover_published_routes".to_owned()));
        assert!(FailoverMetrics::new(registry).is_err());
    }
}
