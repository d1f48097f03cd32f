//! Builds a tagged version repository from an ordered descriptor list.

use crate::Result;
use crate::managers::{Fetch, VersionDescriptor};
use crate::repo::GitRepository;
use crate::repo::archive::unpack_archive;
use ohno::{IntoAppError, bail};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

/// Log target for the builder
const LOG_TARGET: &str = "   builder";

/// File under `.git` recording the tagged versions in descriptor order.
///
/// Commit topology cannot serve as the descriptor order: a version recovered
/// after an earlier skipped fetch is committed out of order, yet its
/// descriptor position never changed.
const ORDER_FILE: &str = "version-order.json";

/// What a build run produced.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    /// Versions committed and tagged by this run, in order.
    pub built: Vec<String>,

    /// Versions that failed to fetch or unpack, with the reason. These are
    /// skipped, never fatal.
    pub skipped: Vec<(String, String)>,

    /// Number of versions that were already tagged before this run.
    pub existing: usize,
}

impl BuildOutcome {
    /// Whether the repository holds at least one usable revision.
    #[must_use]
    pub const fn produced_any(&self) -> bool {
        self.existing > 0 || !self.built.is_empty()
    }

    /// Fail when the build left the repository with no usable revision at
    /// all: nothing was tagged before and every version was skipped.
    pub fn ensure_usable(&self) -> Result<()> {
        if self.produced_any() {
            Ok(())
        } else {
            bail!("No usable versions: every version failed to fetch or unpack");
        }
    }

    /// One-line human summary, e.g. `3 built, 1 skipped, 2 already present`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} built, {} skipped, {} already present",
            self.built.len(),
            self.skipped.len(),
            self.existing
        )
    }
}

/// Converts an ordered descriptor list into local revision history: one
/// full-snapshot commit plus one lightweight tag per version.
///
/// Builds are append-only and idempotent: already-tagged versions are left
/// untouched, and a descriptor list that drops or reorders them is rejected
/// outright rather than silently rewriting history.
#[derive(Debug)]
pub struct RepositoryBuilder<'a> {
    repo: &'a GitRepository,
}

impl<'a> RepositoryBuilder<'a> {
    /// Create a builder over an open repository.
    #[must_use]
    pub const fn new(repo: &'a GitRepository) -> Self {
        Self { repo }
    }

    /// Build (or extend) the repository from `descriptors`, fetching archive
    /// bytes through `fetch`.
    ///
    /// A fetch or unpack failure affects only that version; the build
    /// continues with the rest and the failure is recorded in the outcome.
    pub async fn build<F: Fetch>(&self, descriptors: &[VersionDescriptor], fetch: &F) -> Result<BuildOutcome> {
        let existing = self.repo.tags_in_order()?;
        check_history_consistency(&self.recorded_order(&existing)?, descriptors)?;

        let mut outcome = BuildOutcome {
            existing: existing.len(),
            ..BuildOutcome::default()
        };

        let total = descriptors.len();
        for (i, descriptor) in descriptors.iter().enumerate() {
            let version = &descriptor.version;
            if self.repo.has_tag(version) {
                continue;
            }

            log::info!(target: LOG_TARGET, "Fetching and tagging '{version}', {} of {total}", i + 1);

            let bytes = match fetch.fetch(descriptor).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!(target: LOG_TARGET, "Failed to fetch '{version}': {e}");
                    outcome.skipped.push((version.clone(), e.to_string()));
                    continue;
                }
            };

            if let Err(e) = self.ingest_snapshot(descriptor, &bytes) {
                log::error!(target: LOG_TARGET, "Failed to ingest '{version}': {e}");
                outcome.skipped.push((version.clone(), e.to_string()));
                continue;
            }

            outcome.built.push(version.clone());
        }

        self.record_order(descriptors)?;

        log::info!(target: LOG_TARGET, "Repository build finished: {}", outcome.summary());
        Ok(outcome)
    }

    fn order_path(&self) -> PathBuf {
        self.repo.workdir().join(".git").join(ORDER_FILE)
    }

    /// The already-tagged versions in descriptor order.
    ///
    /// Read from the order manifest written by the previous build; tags
    /// absent from the manifest (a repository predating it, or a lost file)
    /// are appended in commit order so a removed version is still caught.
    fn recorded_order(&self, existing: &[String]) -> Result<Vec<String>> {
        let path = self.order_path();
        let mut order: Vec<String> = if path.exists() {
            let file = File::open(&path).into_app_err_with(|| format!("Failed to open '{}'", path.display()))?;
            let recorded: Vec<String> = serde_json::from_reader(BufReader::new(file))
                .into_app_err_with(|| format!("Failed to parse '{}'", path.display()))?;
            recorded.into_iter().filter(|v| existing.contains(v)).collect()
        } else {
            Vec::new()
        };

        for tag in existing {
            if !order.contains(tag) {
                order.push(tag.clone());
            }
        }

        Ok(order)
    }

    /// Rewrite the order manifest with the now-tagged versions in descriptor
    /// order.
    fn record_order(&self, descriptors: &[VersionDescriptor]) -> Result<()> {
        let order: Vec<&str> = descriptors
            .iter()
            .map(|d| d.version.as_str())
            .filter(|v| self.repo.has_tag(v))
            .collect();

        let path = self.order_path();
        let file = File::create(&path).into_app_err_with(|| format!("Failed to write '{}'", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), &order).into_app_err_with(|| format!("Failed to write '{}'", path.display()))
    }

    /// Unpack one version's archive and commit it as a full snapshot.
    ///
    /// The archive is unpacked into a scratch area under `.git` first, so a
    /// broken archive never touches the working tree.
    fn ingest_snapshot(&self, descriptor: &VersionDescriptor, bytes: &[u8]) -> Result<()> {
        let scratch = self.repo.workdir().join(".git").join("unpack");
        if scratch.exists() {
            fs::remove_dir_all(&scratch).into_app_err("Failed to clear unpack scratch area")?;
        }
        fs::create_dir_all(&scratch).into_app_err("Failed to create unpack scratch area")?;

        let result = unpack_archive(bytes, descriptor.source.kind, &scratch)
            .and_then(|()| self.repo.replace_worktree(&scratch))
            .and_then(|()| self.repo.commit_snapshot(&descriptor.version));

        // Scratch cleanup is best-effort; the next ingest clears it anyway.
        if let Err(e) = fs::remove_dir_all(&scratch) {
            log::debug!(target: LOG_TARGET, "Failed to remove unpack scratch area: {e}");
        }

        result
    }
}

/// Refuse descriptor lists that would rewrite existing history.
///
/// Every already-tagged version must still be present, and the relative order
/// of the already-tagged versions within the incoming list must match the
/// descriptor order they were originally built under (`tagged_order`).
/// Duplicate versions in the incoming list are rejected too.
fn check_history_consistency(tagged_order: &[String], descriptors: &[VersionDescriptor]) -> Result<()> {
    let mut positions = HashMap::with_capacity(descriptors.len());
    for (i, descriptor) in descriptors.iter().enumerate() {
        if positions.insert(descriptor.version.as_str(), i).is_some() {
            bail!("Version '{}' appears more than once in the descriptor list", descriptor.version);
        }
    }

    let mut last: Option<usize> = None;
    for tag in tagged_order {
        let Some(&position) = positions.get(tag.as_str()) else {
            bail!("Version '{tag}' is already tagged but missing from the descriptor list; refusing to rewrite history");
        };

        if let Some(previous) = last
            && position < previous
        {
            bail!("Version '{tag}' is already tagged but reordered in the descriptor list; refusing to rewrite history");
        }

        last = Some(position);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::{SourceKind, SourceLocator};
    use bytes::Bytes;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use ohno::app_err;
    use std::collections::HashMap;

    /// Fetch implementation over in-memory archives keyed by version.
    struct MemFetch(HashMap<String, Bytes>);

    impl Fetch for MemFetch {
        async fn fetch(&self, descriptor: &VersionDescriptor) -> Result<Bytes> {
            self.0
                .get(&descriptor.version)
                .cloned()
                .ok_or_else(|| app_err!("no archive for '{}'", descriptor.version))
        }
    }

    fn targz(files: &[(&str, &str)]) -> Bytes {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, contents.as_bytes()).unwrap();
        }
        Bytes::from(builder.into_inner().unwrap().finish().unwrap())
    }

    fn descriptor(version: &str) -> VersionDescriptor {
        VersionDescriptor {
            name: "pkg".to_string(),
            version: version.to_string(),
            source: SourceLocator {
                url: format!("mem://pkg-{version}.tar.gz"),
                kind: SourceKind::GzipTar,
            },
            digest: None,
        }
    }

    fn fetcher(archives: &[(&str, Bytes)]) -> MemFetch {
        MemFetch(archives.iter().map(|(v, b)| ((*v).to_string(), b.clone())).collect())
    }

    #[tokio::test]
    async fn builds_one_revision_per_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();
        let descriptors = [descriptor("0.0.1"), descriptor("0.0.2")];
        let fetch = fetcher(&[
            ("0.0.1", targz(&[("pkg-0.0.1/a.txt", "one\n")])),
            ("0.0.2", targz(&[("pkg-0.0.2/a.txt", "one\ntwo\n")])),
        ]);

        let outcome = RepositoryBuilder::new(&repo).build(&descriptors, &fetch).await.unwrap();

        assert_eq!(outcome.built, ["0.0.1", "0.0.2"]);
        assert!(outcome.skipped.is_empty());
        assert_eq!(repo.tags_in_order().unwrap(), ["0.0.1", "0.0.2"]);
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();
        let descriptors = [descriptor("0.0.1")];
        let fetch = fetcher(&[("0.0.1", targz(&[("pkg/a.txt", "one\n")]))]);
        let builder = RepositoryBuilder::new(&repo);

        let first = builder.build(&descriptors, &fetch).await.unwrap();
        assert_eq!(first.built, ["0.0.1"]);

        let second = builder.build(&descriptors, &fetch).await.unwrap();
        assert!(second.built.is_empty());
        assert_eq!(second.existing, 1);
        assert_eq!(repo.tags_in_order().unwrap(), ["0.0.1"]);
    }

    #[tokio::test]
    async fn fetch_failure_skips_only_that_version() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();
        let descriptors = [descriptor("0.0.1"), descriptor("0.0.2"), descriptor("0.0.3")];
        // 0.0.2 has no archive at all.
        let fetch = fetcher(&[
            ("0.0.1", targz(&[("pkg/a.txt", "one\n")])),
            ("0.0.3", targz(&[("pkg/a.txt", "three\n")])),
        ]);

        let outcome = RepositoryBuilder::new(&repo).build(&descriptors, &fetch).await.unwrap();

        assert_eq!(outcome.built, ["0.0.1", "0.0.3"]);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].0, "0.0.2");
        assert!(outcome.produced_any());
    }

    #[tokio::test]
    async fn broken_archive_skips_only_that_version() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();
        let descriptors = [descriptor("0.0.1"), descriptor("0.0.2")];
        let fetch = fetcher(&[
            ("0.0.1", Bytes::from_static(b"not a tarball")),
            ("0.0.2", targz(&[("pkg/a.txt", "two\n")])),
        ]);

        let outcome = RepositoryBuilder::new(&repo).build(&descriptors, &fetch).await.unwrap();

        assert_eq!(outcome.built, ["0.0.2"]);
        assert_eq!(outcome.skipped[0].0, "0.0.1");
        assert_eq!(repo.tags_in_order().unwrap(), ["0.0.2"]);
    }

    #[tokio::test]
    async fn removed_tagged_version_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();
        let fetch = fetcher(&[
            ("0.0.1", targz(&[("pkg/a.txt", "one\n")])),
            ("0.0.2", targz(&[("pkg/a.txt", "two\n")])),
        ]);
        let builder = RepositoryBuilder::new(&repo);

        builder
            .build(&[descriptor("0.0.1"), descriptor("0.0.2")], &fetch)
            .await
            .unwrap();

        // 0.0.1 disappeared upstream.
        assert!(builder.build(&[descriptor("0.0.2")], &fetch).await.is_err());
    }

    #[tokio::test]
    async fn reordered_tagged_versions_are_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();
        let fetch = fetcher(&[
            ("0.0.1", targz(&[("pkg/a.txt", "one\n")])),
            ("0.0.2", targz(&[("pkg/a.txt", "two\n")])),
        ]);
        let builder = RepositoryBuilder::new(&repo);

        builder
            .build(&[descriptor("0.0.1"), descriptor("0.0.2")], &fetch)
            .await
            .unwrap();

        assert!(
            builder
                .build(&[descriptor("0.0.2"), descriptor("0.0.1")], &fetch)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn recovered_skip_does_not_wedge_later_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();
        let descriptors = [descriptor("0.0.1"), descriptor("0.0.2"), descriptor("0.0.3")];
        let builder = RepositoryBuilder::new(&repo);

        // 0.0.2 is unavailable on the first run.
        let partial = fetcher(&[
            ("0.0.1", targz(&[("pkg/a.txt", "one\n")])),
            ("0.0.3", targz(&[("pkg/a.txt", "three\n")])),
        ]);
        let first = builder.build(&descriptors, &partial).await.unwrap();
        assert_eq!(first.built, ["0.0.1", "0.0.3"]);

        // It becomes fetchable later and lands at the end of the commit
        // history, out of descriptor order.
        let full = fetcher(&[
            ("0.0.1", targz(&[("pkg/a.txt", "one\n")])),
            ("0.0.2", targz(&[("pkg/a.txt", "two\n")])),
            ("0.0.3", targz(&[("pkg/a.txt", "three\n")])),
        ]);
        let second = builder.build(&descriptors, &full).await.unwrap();
        assert_eq!(second.built, ["0.0.2"]);
        assert_eq!(repo.tags_in_order().unwrap(), ["0.0.1", "0.0.3", "0.0.2"]);

        // The unchanged descriptor list keeps working and performs no writes.
        let third = builder.build(&descriptors, &full).await.unwrap();
        assert!(third.built.is_empty());
        assert!(third.skipped.is_empty());
        assert_eq!(third.existing, 3);
    }

    #[tokio::test]
    async fn all_versions_failing_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();
        let fetch = fetcher(&[]);

        let outcome = RepositoryBuilder::new(&repo)
            .build(&[descriptor("0.0.1"), descriptor("0.0.2")], &fetch)
            .await
            .unwrap();

        assert!(!outcome.produced_any());
        assert!(outcome.ensure_usable().is_err());
        assert_eq!(outcome.skipped.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();
        let fetch = fetcher(&[]);

        let result = RepositoryBuilder::new(&repo)
            .build(&[descriptor("0.0.1"), descriptor("0.0.1")], &fetch)
            .await;
        assert!(result.is_err());
    }
}
