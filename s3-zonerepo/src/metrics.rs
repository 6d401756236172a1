use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec};

use zone_storage::{MetricsCollector, Operation};

lazy_static! {
    static ref ITEMS_SUCCEEDED: IntCounterVec = register_int_counter_vec!(
        "zonerepo_items_succeeded_total",
        "Batch items that completed",
        &["operation"]
    )
    .unwrap();
    static ref ITEMS_FAILED: IntCounterVec = register_int_counter_vec!(
        "zonerepo_items_failed_total",
        "Batch items that failed during execution",
        &["operation"]
    )
    .unwrap();
    static ref BATCHES_REJECTED: IntCounterVec = register_int_counter_vec!(
        "zonerepo_batches_rejected_total",
        "Batches refused during validation, before any mutation",
        &["operation"]
    )
    .unwrap();
    static ref BYTES_UPLOADED: IntCounter = register_int_counter!(
        "zonerepo_bytes_uploaded_total",
        "Bytes uploaded from local files"
    )
    .unwrap();
}

/// Prometheus backed collector for the repository engine. All instances
/// share the process wide default registry.
#[derive(Debug, Clone, Default)]
pub struct SharedMetrics;

impl SharedMetrics {
    pub fn new() -> Self {
        Self
    }

    pub fn to_zone_metrics(&self) -> zone_storage::SharedMetrics {
        zone_storage::SharedMetrics::new(Arc::new(self.clone()))
    }

    /// Current values in the Prometheus text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        let metric_families = prometheus::gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl MetricsCollector for SharedMetrics {
    fn item_succeeded(&self, op: Operation) {
        ITEMS_SUCCEEDED.with_label_values(&[op.as_str()]).inc();
    }

    fn item_failed(&self, op: Operation) {
        ITEMS_FAILED.with_label_values(&[op.as_str()]).inc();
    }

    fn batch_rejected(&self, op: Operation) {
        BATCHES_REJECTED.with_label_values(&[op.as_str()]).inc();
    }

    fn bytes_uploaded(&self, amount: u64) {
        BYTES_UPLOADED.inc_by(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_exposition() {
        let metrics = SharedMetrics::new();
        metrics.item_succeeded(Operation::Publish);
        metrics.bytes_uploaded(42);

        let text = metrics.render().unwrap();
        assert!(text.contains("zonerepo_items_succeeded_total{operation=\"publish\"}"));
        assert!(text.contains("zonerepo_bytes_uploaded_total"));
    }
}
