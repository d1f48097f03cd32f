//! Metric contract, registry, and extraction engine.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub mod collection;
mod extractor;
mod metric;
mod registry;

pub use extractor::MetricsExtractor;
pub use metric::{DATE_TIME_FORMAT, DeltaMetric, DeltaView, MetricDef, MetricImpl, RevisionView, SnapshotMetric};
pub use registry::MetricRegistry;

/// Metric-defined result payload. The engine never interprets its contents,
/// it only serializes them.
pub type MetricPayload = serde_json::Value;

/// Mapping from result key to payload. Insertion order is revision order and
/// survives persistence round-trips.
pub type ResultSet = IndexMap<String, MetricPayload>;

/// Whether a metric computes over one revision or a revision pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MetricLevel {
    /// One result per revision, keyed by tag.
    Snapshot,

    /// One result per ordered revision pair, keyed by `"{prev}..{cur}"`.
    Delta,
}
