use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;

#[derive(Clone)]
pub struct SettlementMetrics {
    registry: Registry,

    // Counters
    pub allocation_ops_total: IntCounterVec,
    pub notes_applied_total: IntCounterVec,
    pub rejections_total: IntCounterVec,
    pub allocations_reversed_total: IntCounterVec,
    pub journal_degraded_total: IntCounterVec,

    // Histograms
    pub operation_duration_seconds: HistogramVec,
}

impl SettlementMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let allocation_ops_total = IntCounterVec::new(
            Opts::new("settlement_allocation_ops_total", "Allocation operations"),
            &["op", "result"], // op: allocate|deallocate|update, result: ok|rejected|error
        )?;

        let notes_applied_total = IntCounterVec::new(
            Opts::new("settlement_notes_applied_total", "Notes applied"),
            &["kind", "route"], // route: refund|adjustment|unlinked
        )?;

        let rejections_total = IntCounterVec::new(
            Opts::new("settlement_rejections_total", "Rejected settlement requests"),
            &["operation", "reason"],
        )?;

        let allocations_reversed_total = IntCounterVec::new(
            Opts::new(
                "settlement_allocations_reversed_total",
                "Allocations reversed by note settlement",
            ),
            &["mode"], // full|partial
        )?;

        let journal_degraded_total = IntCounterVec::new(
            Opts::new(
                "settlement_journal_degraded_total",
                "Journal entries skipped because an account role is not configured",
            ),
            &["purpose", "role"],
        )?;

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "settlement_operation_duration_seconds",
                "Settlement operation duration seconds",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(allocation_ops_total.clone()))?;
        registry.register(Box::new(notes_applied_total.clone()))?;
        registry.register(Box::new(rejections_total.clone()))?;
        registry.register(Box::new(allocations_reversed_total.clone()))?;
        registry.register(Box::new(journal_degraded_total.clone()))?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            allocation_ops_total,
            notes_applied_total,
            rejections_total,
            allocations_reversed_total,
            journal_degraded_total,
            operation_duration_seconds,
        })
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&mf, &mut buf)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }

    pub fn timer() -> Instant {
        Instant::now()
    }

    pub fn observe(&self, operation: &str, started: Instant) {
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = SettlementMetrics::new().unwrap();
        metrics
            .notes_applied_total
            .with_label_values(&["credit_note", "refund"])
            .inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("settlement_notes_applied_total"));
        assert!(text.contains("route=\"refund\""));
    }
}
