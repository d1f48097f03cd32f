//! Persists result sets in interchangeable physical encodings.
//!
//! For each (manager, package, metric) triple the store owns one directory
//! holding any of the three encodings plus an `index.json` manifest naming
//! which encodings exist, so consumers discover formats without probing.

use crate::Result;
use crate::metrics::ResultSet;
use crate::misc::sanitize_path_component;
use flate2::Compression;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use ohno::{IntoAppError, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

/// Log target for the result store
const LOG_TARGET: &str = "     store";

/// Physical encoding of a persisted result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StoreFormat {
    /// One JSON document for the whole mapping. Best for small sets.
    JsonSingle,

    /// One JSON file per result key. Best for very large sets.
    Json,

    /// The single-file document bundled into a gzipped tarball. Best for
    /// medium sets.
    Archive,
}

/// One encoding's location(s) within the index manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexEntry {
    /// A single file, relative to the metric directory.
    Single {
        /// Relative file name.
        url: String,
    },

    /// One file per key, relative to the metric directory, in key order.
    Many {
        /// Relative file names in result-key order.
        urls: Vec<String>,
    },
}

/// The `index.json` manifest for one (manager, package, metric) triple.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreIndex {
    /// Available encodings keyed by [`StoreFormat`] name.
    #[serde(default)]
    pub data: BTreeMap<String, IndexEntry>,
}

/// Identifies where one metric's results live within the store.
#[derive(Debug, Clone, Copy)]
pub struct StoreKey<'a> {
    /// Manager scheme, e.g. `pypi`.
    pub manager: &'a str,

    /// Package name.
    pub package: &'a str,

    /// Metric name.
    pub metric: &'a str,
}

/// Directory-backed persistence for result sets.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory holding one metric's encodings.
    #[must_use]
    pub fn metric_dir(&self, key: &StoreKey<'_>) -> PathBuf {
        self.root
            .join(sanitize_path_component(key.manager))
            .join(sanitize_path_component(key.package))
            .join(sanitize_path_component(key.metric))
    }

    /// Load the index manifest, or `None` when nothing was ever persisted
    /// for this key.
    pub fn index(&self, key: &StoreKey<'_>) -> Result<Option<StoreIndex>> {
        let path = self.metric_dir(key).join("index.json");
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path).into_app_err_with(|| format!("Failed to open '{}'", path.display()))?;
        let index = serde_json::from_reader(BufReader::new(file))
            .into_app_err_with(|| format!("Failed to parse '{}'", path.display()))?;
        Ok(Some(index))
    }

    /// Persist `results` in the given encoding, updating the index manifest.
    ///
    /// Refuses to overwrite an existing encoding unless `force` is set.
    /// Returns the location written: the file for single-file encodings, the
    /// metric directory for the per-key encoding.
    pub fn persist(&self, key: &StoreKey<'_>, results: &ResultSet, format: StoreFormat, force: bool) -> Result<PathBuf> {
        let dir = self.metric_dir(key);
        fs::create_dir_all(&dir).into_app_err_with(|| format!("Failed to create '{}'", dir.display()))?;

        let (location, entry) = match format {
            StoreFormat::JsonSingle => self.persist_json_single(key, &dir, results, force)?,
            StoreFormat::Json => self.persist_json_per_key(key, &dir, results, force)?,
            StoreFormat::Archive => self.persist_archive(key, &dir, results, force)?,
        };

        // The index is always (re)written so consumers can discover formats.
        let mut index = self.index(key)?.unwrap_or_default();
        let _ = index.data.insert(format.to_string(), entry);
        let index_path = dir.join("index.json");
        let file = File::create(&index_path).into_app_err_with(|| format!("Failed to write '{}'", index_path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &index)
            .into_app_err_with(|| format!("Failed to write '{}'", index_path.display()))?;

        log::info!(target: LOG_TARGET, "Persisted '{}' results as {format} at '{}'", key.metric, location.display());
        Ok(location)
    }

    /// Load a result set through the index manifest, preferring the
    /// single-file encoding, then the archive, then the per-key files.
    ///
    /// Returns `None` when no stored result set exists for this key.
    pub fn load(&self, key: &StoreKey<'_>) -> Result<Option<ResultSet>> {
        let Some(index) = self.index(key)? else {
            return Ok(None);
        };

        for format in [StoreFormat::JsonSingle, StoreFormat::Archive, StoreFormat::Json] {
            if index.data.contains_key(&format.to_string()) {
                return self.load_format(key, format).map(Some);
            }
        }

        Ok(None)
    }

    /// The encodings present for this key, in load preference order. Empty
    /// when nothing was ever persisted.
    pub fn stored_formats(&self, key: &StoreKey<'_>) -> Result<Vec<StoreFormat>> {
        let Some(index) = self.index(key)? else {
            return Ok(Vec::new());
        };

        Ok([StoreFormat::JsonSingle, StoreFormat::Archive, StoreFormat::Json]
            .into_iter()
            .filter(|format| index.data.contains_key(&format.to_string()))
            .collect())
    }

    /// Load a result set from one specific encoding.
    pub fn load_format(&self, key: &StoreKey<'_>, format: StoreFormat) -> Result<ResultSet> {
        let dir = self.metric_dir(key);
        let index = self
            .index(key)?
            .ok_or_else(|| ohno::app_err!("No results stored for metric '{}'", key.metric))?;
        let Some(entry) = index.data.get(&format.to_string()) else {
            bail!("Encoding '{format}' is not present for metric '{}'", key.metric);
        };

        match (format, entry) {
            (StoreFormat::JsonSingle, IndexEntry::Single { url }) => read_json_file(&dir.join(url)),
            (StoreFormat::Archive, IndexEntry::Single { url }) => {
                read_results_from_archive(&dir.join(url), &results_file_name(key.metric))
            }
            (StoreFormat::Json, IndexEntry::Many { urls }) => {
                let mut results = ResultSet::new();
                for url in urls {
                    let fragment = read_json_file(&dir.join(url))?;
                    results.extend(fragment);
                }
                Ok(results)
            }
            _ => bail!("Index entry for '{format}' has the wrong shape"),
        }
    }

    fn persist_json_single(
        &self,
        key: &StoreKey<'_>,
        dir: &Path,
        results: &ResultSet,
        force: bool,
    ) -> Result<(PathBuf, IndexEntry)> {
        let name = results_file_name(key.metric);
        let path = dir.join(&name);
        refuse_overwrite(&path, force)?;

        let file = File::create(&path).into_app_err_with(|| format!("Failed to write '{}'", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), results)
            .into_app_err_with(|| format!("Failed to write '{}'", path.display()))?;

        Ok((path, IndexEntry::Single { url: name }))
    }

    fn persist_json_per_key(
        &self,
        key: &StoreKey<'_>,
        dir: &Path,
        results: &ResultSet,
        force: bool,
    ) -> Result<(PathBuf, IndexEntry)> {
        let mut urls = Vec::with_capacity(results.len());
        for result_key in results.keys() {
            let name = format!("{}-{}.json", key.metric, sanitize_path_component(result_key));
            refuse_overwrite(&dir.join(&name), force)?;
            urls.push(name);
        }

        for (url, (result_key, payload)) in urls.iter().zip(results.iter()) {
            let path = dir.join(url);
            let file = File::create(&path).into_app_err_with(|| format!("Failed to write '{}'", path.display()))?;
            // Each fragment is a one-entry mapping so the original key
            // (which may differ from the sanitized file name) survives.
            let fragment = ResultSet::from_iter([(result_key.clone(), payload.clone())]);
            serde_json::to_writer_pretty(BufWriter::new(file), &fragment)
                .into_app_err_with(|| format!("Failed to write '{}'", path.display()))?;
        }

        Ok((dir.to_path_buf(), IndexEntry::Many { urls }))
    }

    fn persist_archive(&self, key: &StoreKey<'_>, dir: &Path, results: &ResultSet, force: bool) -> Result<(PathBuf, IndexEntry)> {
        let name = format!("{}-results.tar.gz", key.metric);
        let path = dir.join(&name);
        refuse_overwrite(&path, force)?;

        let document = serde_json::to_vec_pretty(results).into_app_err("Failed to serialize results")?;

        let file = File::create(&path).into_app_err_with(|| format!("Failed to write '{}'", path.display()))?;
        let mut builder = tar::Builder::new(GzEncoder::new(BufWriter::new(file), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(document.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, results_file_name(key.metric), document.as_slice())
            .into_app_err_with(|| format!("Failed to write '{}'", path.display()))?;
        let encoder = builder.into_inner().into_app_err("Failed to finish archive")?;
        let _ = encoder.finish().into_app_err("Failed to finish archive")?;

        Ok((path, IndexEntry::Single { url: name }))
    }
}

fn results_file_name(metric: &str) -> String {
    format!("{metric}-results.json")
}

fn refuse_overwrite(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("'{}' already exists; pass force to overwrite", path.display());
    }
    Ok(())
}

fn read_json_file(path: &Path) -> Result<ResultSet> {
    let file = File::open(path).into_app_err_with(|| format!("Failed to open '{}'", path.display()))?;
    serde_json::from_reader(BufReader::new(file)).into_app_err_with(|| format!("Failed to parse '{}'", path.display()))
}

fn read_results_from_archive(path: &Path, member: &str) -> Result<ResultSet> {
    let file = File::open(path).into_app_err_with(|| format!("Failed to open '{}'", path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    for entry in archive.entries().into_app_err_with(|| format!("Failed to read '{}'", path.display()))? {
        let mut entry = entry.into_app_err_with(|| format!("Failed to read '{}'", path.display()))?;
        let entry_path = entry.path().into_app_err("Failed to read archive member path")?;
        if entry_path.to_string_lossy() == member {
            let mut document = String::new();
            let _ = entry
                .read_to_string(&mut document)
                .into_app_err_with(|| format!("Failed to read '{member}'"))?;
            return serde_json::from_str(&document).into_app_err_with(|| format!("Failed to parse '{member}'"));
        }
    }

    bail!("'{member}' not found inside '{}'", path.display());
}
