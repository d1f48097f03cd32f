//! PyPI package manager client.

use crate::Result;
use crate::managers::{Fetch, SourceKind, SourceLocator, VersionDescriptor};
use bytes::Bytes;
use futures_util::StreamExt;
use ohno::{IntoAppError, bail};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

/// Log target for managers
const LOG_TARGET: &str = "  managers";

/// Base URL of the PyPI JSON API.
const PYPI_BASE_URL: &str = "https://pypi.org/pypi";

/// Response shape of `https://pypi.org/pypi/<name>/json`.
///
/// `releases` is a JSON object keyed by version string; with `preserve_order`
/// enabled its iteration order is the manager-reported release order, which is
/// the order the repository builder relies on.
#[derive(Debug, Deserialize)]
struct ProjectDoc {
    releases: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ReleaseFile {
    url: String,
    filename: String,
    #[serde(default)]
    digests: Digests,
}

#[derive(Debug, Default, Deserialize)]
struct Digests {
    sha256: Option<String>,
}

/// Retrieves release metadata and source archives from PyPI.
#[derive(Debug)]
pub struct PypiManager {
    package: String,
    client: reqwest::Client,
}

impl PypiManager {
    /// Create a manager bound to one package name.
    #[must_use]
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            client: reqwest::Client::new(),
        }
    }

    /// The package name this manager is bound to.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Query PyPI for the ordered list of release descriptors.
    ///
    /// Empty releases (no files) are skipped. Each remaining release
    /// contributes one descriptor built from its first file, mirroring how
    /// the index orders files within a release.
    pub async fn descriptors(&self) -> Result<Vec<VersionDescriptor>> {
        let url = format!("{PYPI_BASE_URL}/{}/json", self.package);
        log::debug!(target: LOG_TARGET, "Querying {url}");

        let doc: ProjectDoc = self
            .client
            .get(&url)
            .send()
            .await
            .into_app_err_with(|| format!("Failed to query PyPI for '{}'", self.package))?
            .error_for_status()
            .into_app_err_with(|| format!("PyPI rejected the metadata request for '{}'", self.package))?
            .json()
            .await
            .into_app_err_with(|| format!("Failed to parse PyPI metadata for '{}'", self.package))?;

        let mut descriptors = Vec::with_capacity(doc.releases.len());
        for (version, files) in &doc.releases {
            let Some(first) = files.as_array().and_then(|a| a.first()) else {
                continue;
            };

            let file: ReleaseFile = serde_json::from_value(first.clone())
                .into_app_err_with(|| format!("Malformed release entry for '{}/{version}'", self.package))?;

            descriptors.push(VersionDescriptor {
                name: self.package.clone(),
                version: version.clone(),
                source: SourceLocator {
                    kind: SourceKind::from_filename(&file.filename),
                    url: file.url,
                },
                digest: file.digests.sha256,
            });
        }

        log::info!(target: LOG_TARGET, "Found {} versions for '{}'", descriptors.len(), self.package);
        Ok(descriptors)
    }
}

impl Fetch for PypiManager {
    async fn fetch(&self, descriptor: &VersionDescriptor) -> Result<Bytes> {
        let url = Url::parse(&descriptor.source.url)
            .into_app_err_with(|| format!("Invalid source URL for '{}'", descriptor.version))?;

        log::debug!(target: LOG_TARGET, "Downloading {url}");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .into_app_err_with(|| format!("Failed to download archive for '{}'", descriptor.version))?
            .error_for_status()
            .into_app_err_with(|| format!("Download rejected for '{}'", descriptor.version))?;

        let mut bytes = Vec::with_capacity(usize::try_from(response.content_length().unwrap_or(0)).unwrap_or(0));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.into_app_err_with(|| format!("Download interrupted for '{}'", descriptor.version))?;
            bytes.extend_from_slice(&chunk);
        }

        if let Some(expected) = &descriptor.digest {
            let actual = hex::encode(Sha256::digest(&bytes));
            if &actual != expected {
                bail!(
                    "Archive digest mismatch for '{}': expected {expected}, got {actual}",
                    descriptor.version
                );
            }
        }

        Ok(Bytes::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_order_is_preserved() {
        let doc: ProjectDoc = serde_json::from_str(
            r#"{"releases": {"0.0.2": [], "0.0.1": [{"url": "https://x/p-0.0.1.tar.gz", "filename": "p-0.0.1.tar.gz"}]}}"#,
        )
        .unwrap();

        let versions: Vec<_> = doc.releases.keys().collect();
        assert_eq!(versions, ["0.0.2", "0.0.1"]);
    }

    #[test]
    fn release_file_without_digests() {
        let file: ReleaseFile =
            serde_json::from_str(r#"{"url": "https://x/p.tar.gz", "filename": "p.tar.gz"}"#).unwrap();
        assert!(file.digests.sha256.is_none());
    }
}
