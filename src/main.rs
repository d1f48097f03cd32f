//! A tool to mine version-over-version metrics from published package releases.
//!
//! # Overview
//!
//! `verdiff` downloads every released version of a package, replays the
//! releases as commits in a local git repository (one tagged commit per
//! version), and runs pluggable metrics over that history. Snapshot metrics
//! look at one version at a time; delta metrics look at consecutive version
//! pairs. Results are persisted as JSON and can be brought up to date
//! incrementally as new versions are released, without recomputing what is
//! already stored.
//!
//! # Installation
//!
//! ```bash
//! cargo install verdiff
//! ```
//!
//! # Quick Start
//!
//! Extract every registered metric for a package from PyPI:
//!
//! ```bash
//! verdiff extract pypi:requests
//! ```
//!
//! This builds (or reuses) the version repository in the platform cache
//! directory and writes one result set per metric under `./results`.
//!
//! # Basic Usage
//!
//! **Extract specific metrics:**
//! ```bash
//! verdiff extract pypi:requests --metric totalcounts --metric changedlines
//! ```
//!
//! **Pick the persistence encoding:**
//! ```bash
//! verdiff extract pypi:requests --format json-single  # one JSON document
//! verdiff extract pypi:requests --format json         # one file per key
//! verdiff extract pypi:requests --format archive      # gzipped tarball
//! ```
//!
//! **See whether stored results are stale:**
//! ```bash
//! verdiff check pypi:requests
//! # pypi:requests totalcounts: needs update (2 missing)
//! # pypi:requests changedlines: up to date
//! # pypi:requests functiondb: not found
//! ```
//!
//! **Bring stored results up to date:**
//! ```bash
//! verdiff update pypi:requests
//! ```
//!
//! Updating appends the new versions to the version repository and computes
//! results only for the missing keys. Previously stored results are kept
//! exactly as they are.
//!
//! **List the available metrics:**
//! ```bash
//! verdiff metrics
//! ```
//!
//! # Where Things Live
//!
//! - Version repositories are kept under the platform cache directory
//!   (override with `--repo-dir`). Each repository is guarded by an advisory
//!   file lock, so concurrent runs against the same package are safe.
//! - Results are written under `./results` (override with `--outdir`), laid
//!   out as `<outdir>/<manager>/<package>/<metric>/`, with an `index.json`
//!   manifest naming which encodings are present.

use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};
use verdiff::Result;

mod commands;

use crate::commands::{CheckArgs, ExtractArgs, MetricsArgs, UpdateArgs, check, extract, list_metrics, update};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "verdiff", version, about)]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: VerdiffSubcommand,
}

#[derive(Subcommand, Debug)]
enum VerdiffSubcommand {
    /// Build the version repository and extract metrics
    Extract(Box<ExtractArgs>),
    /// Report whether stored results are up to date
    Check(Box<CheckArgs>),
    /// Incrementally extend stored results with newly released versions
    Update(Box<UpdateArgs>),
    /// List the registered metrics
    Metrics(MetricsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        VerdiffSubcommand::Extract(extract_args) => extract(extract_args).await,
        VerdiffSubcommand::Check(check_args) => check(check_args).await,
        VerdiffSubcommand::Update(update_args) => update(update_args).await,
        VerdiffSubcommand::Metrics(metrics_args) => list_metrics(metrics_args),
    }
}
