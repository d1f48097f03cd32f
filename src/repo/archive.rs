//! Source archive unpacking.

use crate::Result;
use crate::managers::SourceKind;
use flate2::bufread::GzDecoder;
use ohno::{IntoAppError, bail};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tar::Archive;
use zip::ZipArchive;

/// Log target for archive handling
const LOG_TARGET: &str = "      repo";

/// Unpack `bytes` into `dest` according to the archive layout.
///
/// Release archives conventionally wrap everything in a single
/// `<name>-<version>/` folder; when that is the case the folder is flattened
/// away so `dest` holds the package contents directly.
pub fn unpack_archive(bytes: &[u8], kind: SourceKind, dest: &Path) -> Result<()> {
    match kind {
        SourceKind::GzipTar => {
            let mut archive = Archive::new(GzDecoder::new(bytes));
            archive
                .unpack(dest)
                .into_app_err_with(|| format!("Failed to unpack gzipped tarball into '{}'", dest.display()))?;
        }
        SourceKind::Tar => {
            let mut archive = Archive::new(bytes);
            archive
                .unpack(dest)
                .into_app_err_with(|| format!("Failed to unpack tarball into '{}'", dest.display()))?;
        }
        SourceKind::Zip => {
            let mut archive = ZipArchive::new(Cursor::new(bytes))
                .into_app_err_with(|| format!("Failed to read zip archive for '{}'", dest.display()))?;
            archive
                .extract(dest)
                .into_app_err_with(|| format!("Failed to unpack zip archive into '{}'", dest.display()))?;
        }
        SourceKind::Other => {
            bail!("Unsupported archive layout '{kind}'");
        }
    }

    flatten_single_root(dest)
}

/// If `dest` contains exactly one directory (ignoring `.git`) and nothing
/// else, move that directory's contents up into `dest`.
fn flatten_single_root(dest: &Path) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dest).into_app_err_with(|| format!("Failed to read '{}'", dest.display()))? {
        let entry = entry.into_app_err("Failed to read unpacked entry")?;
        if entry.file_name() != ".git" {
            entries.push(entry);
        }
    }

    let [root] = entries.as_slice() else {
        return Ok(());
    };
    if !root.file_type().into_app_err("Failed to stat unpacked entry")?.is_dir() {
        return Ok(());
    }

    let root_path = root.path();
    log::debug!(target: LOG_TARGET, "Flattening archive root '{}'", root_path.display());

    for entry in fs::read_dir(&root_path).into_app_err_with(|| format!("Failed to read '{}'", root_path.display()))? {
        let entry = entry.into_app_err("Failed to read unpacked entry")?;
        fs::rename(entry.path(), dest.join(entry.file_name()))
            .into_app_err_with(|| format!("Failed to move '{}' up one level", entry.path().display()))?;
    }

    fs::remove_dir(&root_path).into_app_err_with(|| format!("Failed to remove '{}'", root_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    /// Build an in-memory gzipped tarball from (path, contents) pairs.
    pub(crate) fn targz(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, contents.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn unpack_flattens_single_top_level_folder() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = targz(&[("pkg-0.0.1/a.txt", "hello\n"), ("pkg-0.0.1/src/b.txt", "world\n")]);

        unpack_archive(&bytes, SourceKind::GzipTar, dir.path()).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "hello\n");
        assert_eq!(fs::read_to_string(dir.path().join("src/b.txt")).unwrap(), "world\n");
        assert!(!dir.path().join("pkg-0.0.1").exists());
    }

    #[test]
    fn unpack_keeps_multi_root_layout() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = targz(&[("a.txt", "a\n"), ("b.txt", "b\n")]);

        unpack_archive(&bytes, SourceKind::GzipTar, dir.path()).unwrap();

        assert!(dir.path().join("a.txt").exists());
        assert!(dir.path().join("b.txt").exists());
    }

    /// Build an in-memory zip archive from (path, contents) pairs.
    fn zipped(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (path, contents) in files {
            writer.start_file(*path, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn unpack_handles_wheel_style_zip() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = zipped(&[("pkg/__init__.py", "VERSION = 1\n"), ("pkg-0.0.1.dist-info/METADATA", "Name: pkg\n")]);

        unpack_archive(&bytes, SourceKind::Zip, dir.path()).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("pkg/__init__.py")).unwrap(), "VERSION = 1\n");
        assert!(dir.path().join("pkg-0.0.1.dist-info/METADATA").exists());
    }

    #[test]
    fn broken_zip_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        assert!(unpack_archive(b"PK", SourceKind::Zip, dir.path()).is_err());
    }

    #[test]
    fn unknown_layout_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(unpack_archive(b"data", SourceKind::Other, dir.path()).is_err());
    }

    #[test]
    fn garbage_bytes_fail_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        assert!(unpack_archive(b"not a tarball", SourceKind::GzipTar, dir.path()).is_err());
    }
}
