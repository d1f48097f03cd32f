//! `totalcounts`: total file and line counts per version.

use crate::Result;
use crate::metrics::{DATE_TIME_FORMAT, MetricPayload, RevisionView, SnapshotMetric};
use ohno::IntoAppError;
use serde_json::json;
use std::fs;
use walkdir::WalkDir;

/// Counts the files and lines present in each revision's working tree.
#[derive(Debug)]
pub struct TotalCounts;

impl SnapshotMetric for TotalCounts {
    fn compute(&self, revision: &RevisionView<'_>) -> Result<MetricPayload> {
        let mut files: u64 = 0;
        let mut lines: u64 = 0;
        let mut errors = serde_json::Map::new();

        let walker = WalkDir::new(revision.path)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker {
            let entry = entry.into_app_err("Failed to walk working tree")?;
            if !entry.file_type().is_file() {
                continue;
            }

            files += 1;
            match fs::read(entry.path()) {
                Ok(bytes) => lines += bytes.iter().filter(|b| **b == b'\n').count() as u64,
                Err(e) => {
                    // Unreadable file: inline error entry, keep counting.
                    let relative = entry.path().strip_prefix(revision.path).unwrap_or(entry.path());
                    let _ = errors.insert(relative.display().to_string(), json!(e.to_string()));
                }
            }
        }

        let mut payload = json!({
            "commit": revision.commit.id,
            "timestamp": revision.commit.timestamp.format(DATE_TIME_FORMAT).to_string(),
            "files": files,
            "lines": lines,
        });
        if !errors.is_empty()
            && let Some(map) = payload.as_object_mut()
        {
            let _ = map.insert("errors".to_string(), serde_json::Value::Object(errors));
        }

        Ok(payload)
    }
}
