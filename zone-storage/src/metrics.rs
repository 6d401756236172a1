use std::fmt;
use std::sync::Arc;

/// Batch operations the engine reports metrics for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Store,
    Append,
    Publish,
    Delete,
    FreeTemp,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Store => "store",
            Operation::Append => "append",
            Operation::Publish => "publish",
            Operation::Delete => "delete",
            Operation::FreeTemp => "free_temp",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared metrics collector interface
///
/// This is a trait object that allows applications to plug in their own
/// metrics implementations (Prometheus, StatsD, etc.)
pub trait MetricsCollector: Send + Sync {
    fn item_succeeded(&self, op: Operation);
    fn item_failed(&self, op: Operation);
    /// A whole batch was refused during validation.
    fn batch_rejected(&self, op: Operation);
    fn bytes_uploaded(&self, amount: u64);
}

/// No-op metrics collector (default)
#[derive(Debug, Clone, Default)]
pub struct NoOpMetrics;

impl MetricsCollector for NoOpMetrics {
    fn item_succeeded(&self, _op: Operation) {}
    fn item_failed(&self, _op: Operation) {}
    fn batch_rejected(&self, _op: Operation) {}
    fn bytes_uploaded(&self, _amount: u64) {}
}

/// Shared reference to metrics collector
#[derive(Clone)]
pub struct SharedMetrics(Arc<dyn MetricsCollector>);

impl SharedMetrics {
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self(collector)
    }

    pub fn item_succeeded(&self, op: Operation) {
        self.0.item_succeeded(op);
    }

    pub fn item_failed(&self, op: Operation) {
        self.0.item_failed(op);
    }

    pub fn batch_rejected(&self, op: Operation) {
        self.0.batch_rejected(op);
    }

    pub fn bytes_uploaded(&self, amount: u64) {
        self.0.bytes_uploaded(amount);
    }
}

impl Default for SharedMetrics {
    fn default() -> Self {
        Self(Arc::new(NoOpMetrics))
    }
}

impl fmt::Debug for SharedMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedMetrics").finish()
    }
}
