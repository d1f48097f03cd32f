//! Thin wrapper around `git2` for snapshot-per-version histories.
//!
//! The working tree is the one shared mutable resource in the system, so
//! checkouts go through [`GitRepository::checkout`], which hands back a guard
//! holding an exclusive lock for as long as the checked-out files are in use.

use crate::Result;
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use ohno::{IntoAppError, app_err, bail};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Log target for the version repository
const LOG_TARGET: &str = "      repo";

/// Committer identity used for generated history.
const GIT_USER: &str = "verdiff";
const GIT_EMAIL: &str = "verdiff@users.noreply.github.com";

/// Metadata of one revision's commit.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    /// Full commit id (hex).
    pub id: String,

    /// Author timestamp of the commit, in UTC.
    pub timestamp: DateTime<Utc>,
}

/// One file's change between two revisions.
#[derive(Debug, Clone)]
pub struct FileChange {
    /// Path of the file in the newer revision (old path for deletions).
    pub path: String,

    /// `git2::Delta` status, e.g. added / deleted / modified.
    pub status: git2::Delta,

    /// Lines added.
    pub insertions: usize,

    /// Lines removed.
    pub deletions: usize,
}

/// A tagged, append-only local git history of package versions.
pub struct GitRepository {
    repo: git2::Repository,
    workdir: PathBuf,
    checkout_lock: Mutex<()>,
}

impl core::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GitRepository").field("workdir", &self.workdir).finish()
    }
}

/// Exclusive handle to a checked-out revision.
///
/// The working tree stays pinned to this revision until the guard is dropped;
/// concurrent `compute` calls may read the tree through [`Checkout::path`].
#[derive(Debug)]
pub struct Checkout<'a> {
    path: &'a Path,
    tag: String,
    info: CommitInfo,
    _guard: MutexGuard<'a, ()>,
}

impl Checkout<'_> {
    /// The working tree root for the checked-out revision.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path
    }

    /// The tag this checkout corresponds to.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Commit metadata of the checked-out revision.
    #[must_use]
    pub const fn info(&self) -> &CommitInfo {
        &self.info
    }
}

/// Guard holding a repository's exclusive advisory file lock.
///
/// The history and working tree are shared on-disk state; the lock keeps two
/// processes from building or extracting against the same repository at once.
/// Released on drop.
#[derive(Debug)]
pub struct RepoLock(File);

impl Drop for RepoLock {
    fn drop(&mut self) {
        // Closing the file would release the lock anyway.
        if let Err(e) = self.0.unlock() {
            log::warn!(target: LOG_TARGET, "Failed to unlock repository: {e}");
        }
    }
}

impl GitRepository {
    /// Open the repository at `path`, initializing an empty one if needed,
    /// and take its exclusive cross-process lock.
    ///
    /// Blocks until the lock is free, so the wait runs off the async runtime.
    pub async fn open_locked(path: impl Into<PathBuf>) -> Result<(Self, RepoLock)> {
        let path = path.into();
        tokio::task::spawn_blocking(move || {
            let repo = Self::init_or_open(&path)?;
            let lock = repo.lock_exclusive()?;
            Ok((repo, lock))
        })
        .await
        .into_app_err("Repository open task panicked")?
    }

    /// Open the repository at `path`, initializing an empty one if needed.
    pub fn init_or_open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path).into_app_err_with(|| format!("Failed to create '{}'", path.display()))?;

        let repo = if path.join(".git").exists() {
            git2::Repository::open(path).into_app_err_with(|| format!("Failed to open repository at '{}'", path.display()))?
        } else {
            log::debug!(target: LOG_TARGET, "Initializing repository at '{}'", path.display());
            git2::Repository::init(path).into_app_err_with(|| format!("Failed to init repository at '{}'", path.display()))?
        };

        let workdir = repo
            .workdir()
            .ok_or_else(|| app_err!("Repository at '{}' has no working tree", path.display()))?
            .to_path_buf();

        Ok(Self {
            repo,
            workdir,
            checkout_lock: Mutex::new(()),
        })
    }

    /// The working tree root.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Take the exclusive advisory lock on this repository, blocking until
    /// it is free. The lock file lives under `.git` so worktree operations
    /// never touch it.
    pub fn lock_exclusive(&self) -> Result<RepoLock> {
        let lock_path = self.workdir.join(".git").join("repo.lock");

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .into_app_err_with(|| format!("Failed to open repository lock file at '{}'", lock_path.display()))?;

        file.lock_exclusive()
            .into_app_err_with(|| format!("Failed to acquire exclusive lock on repository at '{}'", lock_path.display()))?;
        log::debug!(target: LOG_TARGET, "Acquired repository lock at '{}'", lock_path.display());

        Ok(RepoLock(file))
    }

    /// Whether a tag with this name exists.
    #[must_use]
    pub fn has_tag(&self, name: &str) -> bool {
        self.repo.find_reference(&format!("refs/tags/{name}")).is_ok()
    }

    /// Tag names in revision order (commit topology from the first commit).
    ///
    /// This is the order versions were committed, which the builder keeps
    /// aligned with the descriptor order.
    pub fn tags_in_order(&self) -> Result<Vec<String>> {
        if self.repo.head().is_err() {
            // Unborn HEAD, no commits yet.
            return Ok(Vec::new());
        }

        let mut by_commit = HashMap::new();
        let refs = self.repo.references_glob("refs/tags/*").into_app_err("Failed to list tags")?;
        for reference in refs {
            let reference = reference.into_app_err("Failed to read tag reference")?;
            if let (Some(name), Some(target)) = (reference.shorthand(), reference.target()) {
                let _ = by_commit.insert(target, name.to_string());
            }
        }

        let mut walk = self.repo.revwalk().into_app_err("Failed to walk history")?;
        walk.push_head().into_app_err("Failed to walk history")?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)
            .into_app_err("Failed to walk history")?;

        let mut tags = Vec::new();
        for oid in walk {
            let oid = oid.into_app_err("Failed to walk history")?;
            if let Some(name) = by_commit.get(&oid) {
                tags.push(name.clone());
            }
        }

        Ok(tags)
    }

    /// Replace the entire working tree (everything but `.git`) with the
    /// contents of `source`, consuming `source` in the process.
    ///
    /// Full-snapshot semantics: files absent from `source` disappear from the
    /// tree, so the following commit records removals as well as additions.
    pub fn replace_worktree(&self, source: &Path) -> Result<()> {
        self.clear_worktree()?;

        for entry in fs::read_dir(source).into_app_err_with(|| format!("Failed to read '{}'", source.display()))? {
            let entry = entry.into_app_err("Failed to read unpacked entry")?;
            let target = self.workdir.join(entry.file_name());
            fs::rename(entry.path(), &target)
                .into_app_err_with(|| format!("Failed to move '{}' into the working tree", entry.path().display()))?;
        }

        Ok(())
    }

    /// Remove every working tree entry except `.git`.
    pub fn clear_worktree(&self) -> Result<()> {
        for entry in fs::read_dir(&self.workdir).into_app_err_with(|| format!("Failed to read '{}'", self.workdir.display()))? {
            let entry = entry.into_app_err("Failed to read working tree entry")?;
            if entry.file_name() == ".git" {
                continue;
            }

            let path = entry.path();
            let ft = entry.file_type().into_app_err_with(|| format!("Failed to stat '{}'", path.display()))?;
            if ft.is_dir() {
                fs::remove_dir_all(&path).into_app_err_with(|| format!("Failed to remove '{}'", path.display()))?;
            } else {
                fs::remove_file(&path).into_app_err_with(|| format!("Failed to remove '{}'", path.display()))?;
            }
        }

        Ok(())
    }

    /// Commit the current working tree as the snapshot for `version` and tag
    /// it with the version string.
    pub fn commit_snapshot(&self, version: &str) -> Result<()> {
        let mut index = self.repo.index().into_app_err("Failed to open index")?;
        index.clear().into_app_err("Failed to reset index")?;
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .into_app_err("Failed to stage working tree")?;
        index.write().into_app_err("Failed to write index")?;
        let tree_id = index.write_tree().into_app_err("Failed to write tree")?;
        let tree = self.repo.find_tree(tree_id).into_app_err("Failed to find written tree")?;

        let signature = git2::Signature::now(GIT_USER, GIT_EMAIL).into_app_err("Failed to create signature")?;
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let commit_id = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, version, &tree, &parents)
            .into_app_err_with(|| format!("Failed to commit snapshot for '{version}'"))?;

        let commit = self.repo.find_commit(commit_id).into_app_err("Failed to find new commit")?;
        let _ = self
            .repo
            .tag_lightweight(version, commit.as_object(), false)
            .into_app_err_with(|| format!("Failed to tag '{version}'"))?;

        log::debug!(target: LOG_TARGET, "Committed and tagged '{version}' as {commit_id}");
        Ok(())
    }

    /// Check out the revision named by `tag`, holding the working tree
    /// exclusively until the returned guard is dropped.
    pub fn checkout(&self, tag: &str) -> Result<Checkout<'_>> {
        let guard = self.checkout_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let commit = self.tag_commit(tag)?;
        let info = Self::commit_info(&commit);

        let mut opts = git2::build::CheckoutBuilder::new();
        let _ = opts.force().remove_untracked(true);
        self.repo
            .checkout_tree(commit.as_object(), Some(&mut opts))
            .into_app_err_with(|| format!("Failed to check out '{tag}'"))?;
        self.repo
            .set_head_detached(commit.id())
            .into_app_err_with(|| format!("Failed to detach HEAD at '{tag}'"))?;

        Ok(Checkout {
            path: &self.workdir,
            tag: tag.to_string(),
            info,
            _guard: guard,
        })
    }

    /// Commit metadata for the revision named by `tag`.
    pub fn revision_info(&self, tag: &str) -> Result<CommitInfo> {
        Ok(Self::commit_info(&self.tag_commit(tag)?))
    }

    /// Per-file changes between revision `prev` and revision `cur`.
    ///
    /// `prev = None` diffs against the empty tree, covering the first
    /// revision's `EMPTY` predecessor.
    pub fn diff_files(&self, prev: Option<&str>, cur: &str) -> Result<Vec<FileChange>> {
        let new_tree = self
            .tag_commit(cur)?
            .tree()
            .into_app_err_with(|| format!("Failed to read tree for '{cur}'"))?;
        let old_tree = match prev {
            Some(tag) => Some(
                self.tag_commit(tag)?
                    .tree()
                    .into_app_err_with(|| format!("Failed to read tree for '{tag}'"))?,
            ),
            None => None,
        };

        let diff = self
            .repo
            .diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)
            .into_app_err_with(|| format!("Failed to diff '{}..{cur}'", prev.unwrap_or(super::EMPTY_LABEL)))?;

        let mut changes = Vec::with_capacity(diff.deltas().len());
        for (idx, delta) in diff.deltas().enumerate() {
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map_or_else(String::new, |p| p.display().to_string());

            let (insertions, deletions) = match git2::Patch::from_diff(&diff, idx).into_app_err("Failed to read diff patch")? {
                Some(mut patch) => {
                    let (_context, additions, removals) = patch.line_stats().into_app_err("Failed to read line stats")?;
                    (additions, removals)
                }
                // Binary or unchanged entry, no line counts.
                None => (0, 0),
            };

            changes.push(FileChange {
                path,
                status: delta.status(),
                insertions,
                deletions,
            });
        }

        Ok(changes)
    }

    fn tag_commit(&self, tag: &str) -> Result<git2::Commit<'_>> {
        if !self.has_tag(tag) {
            bail!("Revision '{tag}' does not exist in the repository");
        }

        self.repo
            .revparse_single(&format!("refs/tags/{tag}"))
            .and_then(|obj| obj.peel_to_commit())
            .into_app_err_with(|| format!("Failed to resolve revision '{tag}'"))
    }

    fn commit_info(commit: &git2::Commit<'_>) -> CommitInfo {
        let when = commit.author().when();

        CommitInfo {
            id: commit.id().to_string(),
            // Out-of-range seconds only happen in hand-crafted commits; epoch fallback.
            timestamp: DateTime::from_timestamp(when.seconds(), 0).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut f = File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn open_locked_initializes_and_holds_the_lock() {
        let dir = tempfile::tempdir().unwrap();

        let (repo, lock) = GitRepository::open_locked(dir.path()).await.unwrap();
        assert!(repo.workdir().join(".git").join("repo.lock").exists());

        // The repository is fully usable while the lock is held.
        write_file(repo.workdir(), "a.txt", "one\n");
        repo.commit_snapshot("0.0.1").unwrap();
        assert!(repo.has_tag("0.0.1"));

        drop(lock);

        // Reopening after release succeeds.
        let (_repo, _lock) = GitRepository::open_locked(dir.path()).await.unwrap();
    }

    #[test]
    fn commit_tag_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();
        assert!(repo.tags_in_order().unwrap().is_empty());

        write_file(repo.workdir(), "a.txt", "one\n");
        repo.commit_snapshot("0.0.1").unwrap();

        write_file(repo.workdir(), "a.txt", "one\ntwo\n");
        repo.commit_snapshot("0.0.2").unwrap();

        assert_eq!(repo.tags_in_order().unwrap(), ["0.0.1", "0.0.2"]);
        assert!(repo.has_tag("0.0.1"));
        assert!(!repo.has_tag("0.0.3"));
    }

    #[test]
    fn snapshot_commit_records_removals() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();

        write_file(repo.workdir(), "keep.txt", "keep\n");
        write_file(repo.workdir(), "gone.txt", "gone\n");
        repo.commit_snapshot("0.0.1").unwrap();

        let staging = tempfile::tempdir().unwrap();
        write_file(staging.path(), "keep.txt", "keep\n");
        repo.replace_worktree(staging.path()).unwrap();
        repo.commit_snapshot("0.0.2").unwrap();

        let changes = repo.diff_files(Some("0.0.1"), "0.0.2").unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "gone.txt");
        assert_eq!(changes[0].status, git2::Delta::Deleted);
    }

    #[test]
    fn checkout_restores_old_revision() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();

        write_file(repo.workdir(), "a.txt", "v1\n");
        repo.commit_snapshot("0.0.1").unwrap();
        write_file(repo.workdir(), "a.txt", "v2\n");
        repo.commit_snapshot("0.0.2").unwrap();

        {
            let checkout = repo.checkout("0.0.1").unwrap();
            assert_eq!(checkout.tag(), "0.0.1");
            assert_eq!(fs::read_to_string(checkout.path().join("a.txt")).unwrap(), "v1\n");
        }

        let checkout = repo.checkout("0.0.2").unwrap();
        assert_eq!(fs::read_to_string(checkout.path().join("a.txt")).unwrap(), "v2\n");
    }

    #[test]
    fn diff_against_empty_predecessor() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();

        write_file(repo.workdir(), "a.txt", "one\ntwo\n");
        repo.commit_snapshot("0.0.1").unwrap();

        let changes = repo.diff_files(None, "0.0.1").unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].status, git2::Delta::Added);
        assert_eq!(changes[0].insertions, 2);
        assert_eq!(changes[0].deletions, 0);
    }

    #[test]
    fn missing_tag_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::init_or_open(dir.path()).unwrap();
        assert!(repo.revision_info("0.0.9").is_err());
    }
}
