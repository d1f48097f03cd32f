//! `changedlines`: line churn between consecutive versions.

use crate::Result;
use crate::metrics::{DeltaMetric, DeltaView, MetricPayload};
use serde_json::json;

/// Sums line insertions and deletions across each revision pair's diff.
///
/// The payload is the aggregated view: `insertions`, `deletions`, and `size`,
/// where `size` is the net change in file count (files added minus files
/// removed).
#[derive(Debug)]
pub struct ChangedLines;

impl DeltaMetric for ChangedLines {
    fn compute(&self, delta: &DeltaView<'_>) -> Result<MetricPayload> {
        let mut insertions: u64 = 0;
        let mut deletions: u64 = 0;
        let mut size: i64 = 0;

        for change in delta.file_changes()? {
            insertions += change.insertions as u64;
            deletions += change.deletions as u64;
            match change.status {
                git2::Delta::Added => size += 1,
                git2::Delta::Deleted => size -= 1,
                _ => {}
            }
        }

        Ok(json!({
            "insertions": insertions,
            "deletions": deletions,
            "size": size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::GitRepository;
    use std::fs;

    #[test]
    fn counts_churn_between_versions() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();

        fs::write(repo.workdir().join("a.txt"), "one\ntwo\nthree\nfour\n").unwrap();
        repo.commit_snapshot("0.0.1").unwrap();
        fs::write(repo.workdir().join("a.txt"), "uno\ndos\ntres\ncuatro\n").unwrap();
        repo.commit_snapshot("0.0.2").unwrap();

        let info = repo.revision_info("0.0.2").unwrap();
        let view = DeltaView::new(&repo, Some("0.0.1"), "0.0.2", &info);
        let payload = ChangedLines.compute(&view).unwrap();

        assert_eq!(payload, json!({ "insertions": 4, "deletions": 4, "size": 0 }));
    }

    #[test]
    fn first_pair_diffs_against_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();

        fs::write(repo.workdir().join("a.txt"), "one\ntwo\n").unwrap();
        repo.commit_snapshot("0.0.1").unwrap();

        let info = repo.revision_info("0.0.1").unwrap();
        let view = DeltaView::new(&repo, None, "0.0.1", &info);
        let payload = ChangedLines.compute(&view).unwrap();

        assert_eq!(payload, json!({ "insertions": 2, "deletions": 0, "size": 1 }));
    }
}
