//! Staleness classification and the append-only incremental merge.

use crate::managers::VersionDescriptor;
use crate::metrics::{MetricLevel, ResultSet};

/// Log target for update checking
const LOG_TARGET: &str = "    update";

/// How a stored result set relates to the current descriptor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Every implied key is present.
    UpToDate,

    /// This many keys are missing and need extraction.
    NeedsUpdate(usize),

    /// No stored result set exists for this (package, metric) pair.
    NotFound,
}

impl core::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UpToDate => f.write_str("up to date"),
            Self::NeedsUpdate(n) => write!(f, "needs update ({n} missing)"),
            Self::NotFound => f.write_str("not found"),
        }
    }
}

/// Classify a stored result set against the current descriptor list.
///
/// Snapshot level: stale iff any descriptor's version is absent from the
/// stored keys. Delta level: stale iff the current list implies more keys
/// than are stored (one key per descriptor, counting the `EMPTY`
/// predecessor); exact key strings are not compared, only counts, since key
/// construction stays stable as long as tag naming does.
#[must_use]
pub fn check(stored: Option<&ResultSet>, descriptors: &[VersionDescriptor], level: MetricLevel) -> UpdateStatus {
    let Some(stored) = stored else {
        return UpdateStatus::NotFound;
    };

    let missing = match level {
        MetricLevel::Snapshot => descriptors.iter().filter(|d| !stored.contains_key(&d.version)).count(),
        MetricLevel::Delta => descriptors.len().saturating_sub(stored.len()),
    };

    if missing == 0 {
        UpdateStatus::UpToDate
    } else {
        log::debug!(target: LOG_TARGET, "{missing} of {} keys missing at {level} level", descriptors.len());
        UpdateStatus::NeedsUpdate(missing)
    }
}

/// The versions whose keys are missing from `stored`, used to restrict
/// re-extraction to new revisions only.
///
/// For the delta level the missing keys are the trailing ones, so the last
/// `n` descriptor versions are returned.
#[must_use]
pub fn missing_versions(stored: &ResultSet, descriptors: &[VersionDescriptor], level: MetricLevel) -> Vec<String> {
    match level {
        MetricLevel::Snapshot => descriptors
            .iter()
            .filter(|d| !stored.contains_key(&d.version))
            .map(|d| d.version.clone())
            .collect(),
        MetricLevel::Delta => {
            let missing = descriptors.len().saturating_sub(stored.len());
            descriptors
                .iter()
                .skip(descriptors.len() - missing)
                .map(|d| d.version.clone())
                .collect()
        }
    }
}

/// Merge freshly extracted keys into a stored mapping, append-only.
///
/// Previously stored keys are never overwritten; returns the number of keys
/// actually added.
pub fn merge_append_only(existing: &mut ResultSet, new: ResultSet) -> usize {
    let mut added = 0;
    for (key, payload) in new {
        if existing.contains_key(&key) {
            log::debug!(target: LOG_TARGET, "Key '{key}' already stored, keeping the existing entry");
            continue;
        }
        let _ = existing.insert(key, payload);
        added += 1;
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::{SourceKind, SourceLocator};
    use serde_json::json;

    fn descriptors(versions: &[&str]) -> Vec<VersionDescriptor> {
        versions
            .iter()
            .map(|v| VersionDescriptor {
                name: "pkg".to_string(),
                version: (*v).to_string(),
                source: SourceLocator {
                    url: format!("mem://pkg-{v}.tar.gz"),
                    kind: SourceKind::GzipTar,
                },
                digest: None,
            })
            .collect()
    }

    fn set(keys: &[&str]) -> ResultSet {
        keys.iter().map(|k| ((*k).to_string(), json!({}))).collect()
    }

    #[test]
    fn missing_store_is_not_found() {
        assert_eq!(
            check(None, &descriptors(&["0.0.1"]), MetricLevel::Snapshot),
            UpdateStatus::NotFound
        );
    }

    #[test]
    fn snapshot_up_to_date_and_stale() {
        let stored = set(&["0.0.1", "0.0.2"]);
        let current = descriptors(&["0.0.1", "0.0.2"]);
        assert_eq!(check(Some(&stored), &current, MetricLevel::Snapshot), UpdateStatus::UpToDate);

        let grown = descriptors(&["0.0.1", "0.0.2", "0.0.3"]);
        assert_eq!(
            check(Some(&stored), &grown, MetricLevel::Snapshot),
            UpdateStatus::NeedsUpdate(1)
        );
        assert_eq!(missing_versions(&stored, &grown, MetricLevel::Snapshot), ["0.0.3"]);
    }

    #[test]
    fn delta_staleness_is_count_based() {
        let stored = set(&["EMPTY..0.0.1", "0.0.1..0.0.2"]);
        let current = descriptors(&["0.0.1", "0.0.2"]);
        assert_eq!(check(Some(&stored), &current, MetricLevel::Delta), UpdateStatus::UpToDate);

        let grown = descriptors(&["0.0.1", "0.0.2", "0.0.3"]);
        assert_eq!(check(Some(&stored), &grown, MetricLevel::Delta), UpdateStatus::NeedsUpdate(1));
        assert_eq!(missing_versions(&stored, &grown, MetricLevel::Delta), ["0.0.3"]);
    }

    #[test]
    fn merge_never_overwrites_existing_keys() {
        let mut existing = ResultSet::from_iter([("EMPTY..0.0.1".to_string(), json!({ "insertions": 2 }))]);
        let fresh = ResultSet::from_iter([
            ("EMPTY..0.0.1".to_string(), json!({ "insertions": 999 })),
            ("0.0.1..0.0.2".to_string(), json!({ "insertions": 4 })),
        ]);

        let added = merge_append_only(&mut existing, fresh);

        assert_eq!(added, 1);
        assert_eq!(existing["EMPTY..0.0.1"], json!({ "insertions": 2 }));
        assert_eq!(existing["0.0.1..0.0.2"], json!({ "insertions": 4 }));
    }
}
