//! Observability for plugin loading.
//!
//! - **Spans**: every plugin construction runs inside a `plugin.load` span
//!   carrying kind, entry point, digest and latency
//! - **Metrics**: atomic counters and a latency histogram per engine,
//!   snapshotted through [`MetricsSummary`]

mod metrics;
mod spans;

pub use metrics::{Counter, EngineMetrics, Gauge, Histogram, LoadOutcome, MetricsSummary};
pub use spans::LoadSpan;
