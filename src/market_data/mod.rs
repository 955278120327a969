pub mod batch;
pub mod metrics;
pub mod stream;

pub use metrics::{IngestMetrics, MetricsSnapshot};
