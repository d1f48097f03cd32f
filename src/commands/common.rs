//! Shared plumbing for the extract, check, and update commands.

use clap::{Args, ValueEnum};
use directories::BaseDirs;
use ohno::IntoAppError;
use std::fs;
use std::path::PathBuf;
use verdiff::Result;
use verdiff::managers::{Manager, PackageUri, VersionDescriptor};
use verdiff::metrics::MetricRegistry;
use verdiff::misc::sanitize_path_component;
use verdiff::repo::{GitRepository, RepoLock};
use verdiff::store::ResultStore;

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Info, warning, and error messages
    Info,
    /// Debug and above messages
    Debug,
    /// All messages including trace
    Trace,
}

/// Arguments shared by every subcommand
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Directory where extracted results are stored
    #[arg(long, short = 'o', value_name = "PATH", default_value = "results")]
    pub outdir: PathBuf,

    /// Directory where version repositories are kept [default: the platform cache directory]
    #[arg(long, value_name = "PATH")]
    pub repo_dir: Option<PathBuf>,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none", global = true)]
    pub log_level: LogLevel,
}

/// A package URI resolved into its manager, descriptor list, and locked
/// version repository.
pub struct Prepared {
    pub uri: PackageUri,
    pub manager: Manager,
    pub descriptors: Vec<VersionDescriptor>,
    pub repo: GitRepository,
    _lock: RepoLock,
}

pub struct Common {
    pub store: ResultStore,
    pub registry: MetricRegistry,
    repo_root: PathBuf,
}

impl Common {
    /// Create the shared command state with logger, store, and registry
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cache directory cannot be determined
    pub fn new(args: &CommonArgs) -> Result<Self> {
        Self::init_logging(args.log_level);

        let repo_root = if let Some(dir) = &args.repo_dir {
            dir.clone()
        } else {
            BaseDirs::new()
                .into_app_err("Failed to determine the repository cache directory")?
                .cache_dir()
                .join("verdiff")
        };

        Ok(Self {
            store: ResultStore::new(&args.outdir),
            registry: MetricRegistry::builtin(),
            repo_root,
        })
    }

    /// Initialize logger based on log level
    fn init_logging(log_level: LogLevel) {
        if log_level == LogLevel::None {
            return;
        }

        let level = match log_level {
            LogLevel::None => return, // Already checked above, but being explicit
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };

        let env = env_logger::Env::default().filter_or("RUST_LOG", level);

        env_logger::Builder::from_env(env)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(matches!(log_level, LogLevel::Debug) || matches!(log_level, LogLevel::Trace))
            .init();
    }

    /// Resolve a package URI string to its manager and descriptor list.
    pub async fn resolve(&self, package: &str) -> Result<(PackageUri, Manager, Vec<VersionDescriptor>)> {
        let uri: PackageUri = package.parse()?;
        let manager = Manager::for_uri(&uri)?;
        let descriptors = manager.descriptors().await?;
        Ok((uri, manager, descriptors))
    }

    /// Resolve a package URI and open its locked version repository. The
    /// advisory lock is held for the lifetime of the returned value, so two
    /// processes never mutate the same repository concurrently.
    pub async fn prepare(&self, package: &str) -> Result<Prepared> {
        let (uri, manager, descriptors) = self.resolve(package).await?;

        let repo_dir = self
            .repo_root
            .join(sanitize_path_component(manager.name()))
            .join(sanitize_path_component(manager.package()));
        fs::create_dir_all(&repo_dir).into_app_err_with(|| format!("Failed to create '{}'", repo_dir.display()))?;

        let (repo, lock) = GitRepository::open_locked(repo_dir.join("repo")).await?;

        Ok(Prepared {
            uri,
            manager,
            descriptors,
            repo,
            _lock: lock,
        })
    }
}
