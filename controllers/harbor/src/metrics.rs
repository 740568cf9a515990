//! Prometheus metrics.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Counters and histograms of the operator.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_duration: HistogramVec,
    webhook_requests: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_total = IntCounterVec::new(
            Opts::new("harbor_operator_reconcile_total", "Reconciliation passes by kind and result"),
            &["kind", "result"],
        )
        .unwrap_or_else(|e| unreachable!("static metric options are valid: {e}"));
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "harbor_operator_reconcile_duration_seconds",
                "Duration of reconciliation passes",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["kind"],
        )
        .unwrap_or_else(|e| unreachable!("static metric options are valid: {e}"));
        let webhook_requests = IntCounterVec::new(
            Opts::new("harbor_operator_webhook_requests_total", "Admission and conversion requests"),
            &["path", "allowed"],
        )
        .unwrap_or_else(|e| unreachable!("static metric options are valid: {e}"));
        Self {
            registry: Registry::new(),
            reconcile_total,
            reconcile_duration,
            webhook_requests,
        }
    }
}

impl Metrics {
    /// Registers every metric with the metrics' own registry.
    pub fn register(self) -> Result<Self, prometheus::Error> {
        self.registry.register(Box::new(self.reconcile_total.clone()))?;
        self.registry.register(Box::new(self.reconcile_duration.clone()))?;
        self.registry.register(Box::new(self.webhook_requests.clone()))?;
        Ok(self)
    }

    pub fn observe_reconcile(&self, kind: &str, result: &str, elapsed: Duration) {
        self.reconcile_total.with_label_values(&[kind, result]).inc();
        self.reconcile_duration
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    pub fn observe_webhook(&self, path: &str, allowed: bool) {
        let allowed = if allowed { "true" } else { "false" };
        self.webhook_requests.with_label_values(&[path, allowed]).inc();
    }

    /// Text exposition of all metrics.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposition() {
        let metrics = Metrics::default().register().unwrap();
        metrics.observe_reconcile("portal", "ready", Duration::from_millis(30));
        metrics.observe_webhook("/convert", true);
        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("harbor_operator_reconcile_total{kind=\"portal\",result=\"ready\"} 1"));
        assert!(text.contains("harbor_operator_reconcile_duration_seconds_count{kind=\"portal\"} 1"));
        assert!(text.contains("harbor_operator_webhook_requests_total{allowed=\"true\",path=\"/convert\"} 1"));
    }
}
