//! The metric contract: snapshot metrics see one checked-out revision, delta
//! metrics see an ordered revision pair.

use crate::Result;
use crate::metrics::{MetricLevel, MetricPayload};
use crate::repo::{CommitInfo, EMPTY_LABEL, FileChange, GitRepository};
use crate::store::StoreFormat;
use std::path::Path;

/// Timestamp format used in metric payloads.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Read-only view of one checked-out revision.
///
/// The working tree at [`RevisionView::path`] stays pinned to this revision
/// for the lifetime of the view; compute implementations must not modify it.
#[derive(Debug, Clone, Copy)]
pub struct RevisionView<'a> {
    /// Tag naming the revision (the version string).
    pub tag: &'a str,

    /// Root of the checked-out working tree.
    pub path: &'a Path,

    /// Commit metadata of the revision.
    pub commit: &'a CommitInfo,
}

/// Read-only view of an ordered revision pair.
#[derive(Debug, Clone, Copy)]
pub struct DeltaView<'a> {
    /// Predecessor tag; `None` is the `EMPTY` sentinel before the first
    /// revision.
    pub prev: Option<&'a str>,

    /// Tag of the newer revision.
    pub cur: &'a str,

    /// Commit metadata of the newer revision.
    pub commit: &'a CommitInfo,

    repo: &'a GitRepository,
}

impl<'a> DeltaView<'a> {
    pub(crate) const fn new(repo: &'a GitRepository, prev: Option<&'a str>, cur: &'a str, commit: &'a CommitInfo) -> Self {
        Self { prev, cur, commit, repo }
    }

    /// Result key for this pair, e.g. `EMPTY..0.0.1` or `0.0.1..0.0.2`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}..{}", self.prev.unwrap_or(EMPTY_LABEL), self.cur)
    }

    /// Per-file changes between the two ends of the pair.
    pub fn file_changes(&self) -> Result<Vec<FileChange>> {
        self.repo.diff_files(self.prev, self.cur)
    }
}

/// A metric computed over a single revision.
pub trait SnapshotMetric: Send + Sync {
    /// Compute this metric's payload for one revision.
    fn compute(&self, revision: &RevisionView<'_>) -> Result<MetricPayload>;
}

/// A metric computed over an ordered revision pair.
pub trait DeltaMetric: Send + Sync {
    /// Compute this metric's payload for one revision pair.
    fn compute(&self, delta: &DeltaView<'_>) -> Result<MetricPayload>;
}

/// A metric implementation supports exactly one of the two levels.
pub enum MetricImpl {
    /// Computes over single revisions.
    Snapshot(Box<dyn SnapshotMetric>),

    /// Computes over revision pairs.
    Delta(Box<dyn DeltaMetric>),
}

impl core::fmt::Debug for MetricImpl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Snapshot(_) => f.write_str("MetricImpl::Snapshot"),
            Self::Delta(_) => f.write_str("MetricImpl::Delta"),
        }
    }
}

/// A named metric as held by the registry.
#[derive(Debug)]
pub struct MetricDef {
    /// Registry name of the metric.
    pub name: &'static str,

    /// Human-readable description.
    pub description: &'static str,

    /// Persistence encoding used when the caller does not pick one.
    pub preferred_format: StoreFormat,

    /// The implementation, tagged by level.
    pub implementation: MetricImpl,
}

impl MetricDef {
    /// The level tag of this metric.
    #[must_use]
    pub const fn level(&self) -> MetricLevel {
        match self.implementation {
            MetricImpl::Snapshot(_) => MetricLevel::Snapshot,
            MetricImpl::Delta(_) => MetricLevel::Delta,
        }
    }
}
