//! Drives metric computation across the revision sequence.

use crate::Result;
use crate::metrics::{DeltaMetric, DeltaView, MetricImpl, MetricPayload, MetricRegistry, ResultSet, RevisionView, SnapshotMetric};
use crate::repo::GitRepository;
use indexmap::IndexMap;
use ohno::{IntoAppError, app_err};
use std::collections::HashSet;
use std::thread;

/// Log target for the extractor
const LOG_TARGET: &str = " extractor";

/// Orchestrates checkout and metric invocation over a version repository.
///
/// Revision order is fixed by the repository; the extractor never reorders or
/// deduplicates tags. Accumulation is purely additive in memory; persistence
/// is the result store's concern.
#[derive(Debug)]
pub struct MetricsExtractor<'a> {
    repo: &'a GitRepository,
    registry: &'a MetricRegistry,
}

impl<'a> MetricsExtractor<'a> {
    /// Create an extractor over a repository and a metric registry.
    #[must_use]
    pub const fn new(repo: &'a GitRepository, registry: &'a MetricRegistry) -> Self {
        Self { repo, registry }
    }

    /// Extract the named metrics (all registered metrics when `names` is
    /// empty) across every revision, returning one [`ResultSet`] per metric.
    pub fn extract<S: AsRef<str>>(&self, names: &[S]) -> Result<IndexMap<String, ResultSet>> {
        self.extract_restricted(names, None)
    }

    /// Like [`MetricsExtractor::extract`], but computing only the keys whose
    /// revision is in `only`. Used by incremental update to limit work to the
    /// trailing new revisions; a delta pair is computed when its newer end is
    /// in `only`, with the predecessor taken from the full sequence.
    pub fn extract_restricted<S: AsRef<str>>(
        &self,
        names: &[S],
        only: Option<&HashSet<String>>,
    ) -> Result<IndexMap<String, ResultSet>> {
        // Resolve every name up front so an unknown metric fails before any
        // checkout happens.
        let defs = self.registry.resolve(names)?;
        let tags = self.repo.tags_in_order()?;

        let mut results: IndexMap<String, ResultSet> = defs.iter().map(|def| (def.name.to_string(), ResultSet::new())).collect();

        let snapshots: Vec<(&str, &dyn SnapshotMetric)> = defs
            .iter()
            .filter_map(|def| match &def.implementation {
                MetricImpl::Snapshot(metric) => Some((def.name, metric.as_ref())),
                MetricImpl::Delta(_) => None,
            })
            .collect();

        let deltas: Vec<(&str, &dyn DeltaMetric)> = defs
            .iter()
            .filter_map(|def| match &def.implementation {
                MetricImpl::Delta(metric) => Some((def.name, metric.as_ref())),
                MetricImpl::Snapshot(_) => None,
            })
            .collect();

        let wanted = |tag: &String| only.is_none_or(|set| set.contains(tag));

        if !snapshots.is_empty() {
            for tag in tags.iter().filter(|t| wanted(t)) {
                log::debug!(target: LOG_TARGET, "Computing snapshot metrics for '{tag}'");

                // One checkout per revision; the guard keeps the tree pinned
                // while the metrics read it.
                let checkout = self.repo.checkout(tag)?;
                let view = RevisionView {
                    tag,
                    path: checkout.path(),
                    commit: checkout.info(),
                };

                // Independent metrics compute concurrently against the same
                // checked-out revision; compute is read-only for the tree.
                let computed: Vec<(&str, Result<MetricPayload>)> = thread::scope(|scope| {
                    snapshots
                        .iter()
                        .map(|(name, metric)| (*name, scope.spawn(move || metric.compute(&view))))
                        .collect::<Vec<_>>()
                        .into_iter()
                        .map(|(name, handle)| {
                            (
                                name,
                                handle.join().unwrap_or_else(|_| Err(app_err!("Metric '{name}' panicked"))),
                            )
                        })
                        .collect()
                });

                for (name, payload) in computed {
                    let payload = payload.into_app_err_with(|| format!("Metric '{name}' failed for revision '{tag}'"))?;
                    if let Some(set) = results.get_mut(name) {
                        let _ = set.insert(tag.clone(), payload);
                    }
                }
            }
        }

        if !deltas.is_empty() {
            let mut prev: Option<&String> = None;
            for tag in &tags {
                if wanted(tag) {
                    let info = self.repo.revision_info(tag)?;
                    let view = DeltaView::new(self.repo, prev.map(String::as_str), tag, &info);
                    let key = view.key();
                    log::debug!(target: LOG_TARGET, "Computing delta metrics for '{key}'");

                    for (name, metric) in &deltas {
                        let payload = metric
                            .compute(&view)
                            .into_app_err_with(|| format!("Metric '{name}' failed for pair '{key}'"))?;
                        if let Some(set) = results.get_mut(*name) {
                            let _ = set.insert(key.clone(), payload);
                        }
                    }
                }

                prev = Some(tag);
            }
        }

        Ok(results)
    }
}
