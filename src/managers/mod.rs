//! Package manager clients.
//!
//! A manager resolves a package URI (e.g. `pypi:requests`) to an ordered list
//! of [`VersionDescriptor`] records and can fetch the raw source archive for
//! any of them. The rest of the crate only ever consumes the descriptor list
//! and the [`Fetch`] capability, so managers stay thin.

use crate::Result;
use bytes::Bytes;
use ohno::{app_err, bail};
use serde::{Deserialize, Serialize};

mod pypi;

pub use pypi::PypiManager;

/// How a source archive is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SourceKind {
    /// A gzip-compressed tarball (`.tar.gz` / `.tgz`).
    GzipTar,

    /// An uncompressed tarball.
    Tar,

    /// A zip-style archive, including wheels.
    Zip,

    /// Anything else; treated as an unsupported archive.
    Other,
}

impl SourceKind {
    /// Infer the archive layout from a source filename or URL.
    #[must_use]
    pub fn from_filename(name: &str) -> Self {
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::GzipTar
        } else if name.ends_with(".tar") {
            Self::Tar
        } else if name.ends_with(".zip") || name.ends_with(".whl") {
            Self::Zip
        } else {
            Self::Other
        }
    }
}

/// Where the source archive for one release lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocator {
    /// Download URL for the archive.
    pub url: String,

    /// Archive layout.
    pub kind: SourceKind,
}

/// Immutable record identifying one published release of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    /// Package name as reported by the manager.
    pub name: String,

    /// Version string; unique within one package's descriptor list.
    pub version: String,

    /// Source archive locator.
    pub source: SourceLocator,

    /// Content hash (sha256 hex) of the archive, when the manager reports one.
    pub digest: Option<String>,
}

/// Capability to fetch the raw archive bytes for a descriptor.
///
/// Implemented by managers; tests implement it over in-memory archives.
pub trait Fetch {
    /// Fetch the raw archive bytes for `descriptor`.
    async fn fetch(&self, descriptor: &VersionDescriptor) -> Result<Bytes>;
}

/// A parsed `<manager>:<package>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUri {
    /// Manager scheme, e.g. `pypi`.
    pub manager: String,

    /// Package name within that manager.
    pub package: String,
}

impl core::str::FromStr for PackageUri {
    type Err = ohno::AppError;

    fn from_str(s: &str) -> Result<Self> {
        let (manager, package) = s
            .split_once(':')
            .ok_or_else(|| app_err!("'{s}' is not a valid package URI, expected '<manager>:<package>'"))?;

        if manager.is_empty() || package.is_empty() {
            bail!("'{s}' is not a valid package URI, expected '<manager>:<package>'");
        }

        Ok(Self {
            manager: manager.to_string(),
            package: package.to_string(),
        })
    }
}

impl core::fmt::Display for PackageUri {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.manager, self.package)
    }
}

/// The set of supported package managers.
#[derive(Debug)]
pub enum Manager {
    /// The Python package index.
    Pypi(PypiManager),
}

impl Manager {
    /// Resolve a package URI to a manager instance.
    pub fn for_uri(uri: &PackageUri) -> Result<Self> {
        match uri.manager.as_str() {
            "pypi" => Ok(Self::Pypi(PypiManager::new(&uri.package))),
            other => Err(app_err!("'{other}' is not a known package manager")),
        }
    }

    /// Manager scheme name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pypi(_) => "pypi",
        }
    }

    /// Package name this manager instance is bound to.
    #[must_use]
    pub fn package(&self) -> &str {
        match self {
            Self::Pypi(m) => m.package(),
        }
    }

    /// Query the manager for the ordered descriptor list.
    pub async fn descriptors(&self) -> Result<Vec<VersionDescriptor>> {
        match self {
            Self::Pypi(m) => m.descriptors().await,
        }
    }
}

impl Fetch for Manager {
    async fn fetch(&self, descriptor: &VersionDescriptor) -> Result<Bytes> {
        match self {
            Self::Pypi(m) => m.fetch(descriptor).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_package_uri() {
        let uri: PackageUri = "pypi:requests".parse().unwrap();
        assert_eq!(uri.manager, "pypi");
        assert_eq!(uri.package, "requests");
        assert_eq!(uri.to_string(), "pypi:requests");
    }

    #[test]
    fn reject_malformed_uri() {
        assert!("requests".parse::<PackageUri>().is_err());
        assert!(":requests".parse::<PackageUri>().is_err());
        assert!("pypi:".parse::<PackageUri>().is_err());
    }

    #[test]
    fn source_kind_from_filename() {
        assert_eq!(SourceKind::from_filename("pkg-1.0.tar.gz"), SourceKind::GzipTar);
        assert_eq!(SourceKind::from_filename("pkg-1.0.tgz"), SourceKind::GzipTar);
        assert_eq!(SourceKind::from_filename("pkg-1.0.tar"), SourceKind::Tar);
        assert_eq!(SourceKind::from_filename("pkg-1.0-py3-none-any.whl"), SourceKind::Zip);
        assert_eq!(SourceKind::from_filename("pkg-1.0.exe"), SourceKind::Other);
    }

    #[test]
    fn unknown_manager_is_an_error() {
        let uri: PackageUri = "npm:left-pad".parse().unwrap();
        assert!(Manager::for_uri(&uri).is_err());
    }
}
