//! Local version repository: one commit and one lightweight tag per release.

mod archive;
mod builder;
mod git_repo;

pub use archive::unpack_archive;
pub use builder::{BuildOutcome, RepositoryBuilder};
pub use git_repo::{Checkout, CommitInfo, FileChange, GitRepository, RepoLock};

/// Sentinel predecessor for the first revision in a delta pair.
pub const EMPTY_LABEL: &str = "EMPTY";
