//! Deterministic release packaging.
//!
//! Identical staged content yields a byte-identical archive regardless of
//! machine, clock or filesystem enumeration order. The archive is written
//! to a temporary sibling and renamed into place; an existing artifact that
//! cannot be removed is renamed aside first.
//!
//! ```rust,ignore
//! let packager = DeterministicPackager::new(&dist).prefix("AuraSDK");
//! let artifact = packager.package(
//!     &staging,
//!     &dist.join("aura-sdk-v1.0.0-linux-x86_64.zip"),
//!     true,
//!     &BuildMetadata::new("sdk-zip", "1.0.0").platform("linux-x86_64"),
//! )?;
//! println!("{} {}", artifact.content_hash, artifact.path.display());
//! ```

pub mod archive;
pub mod attest;
pub mod stage;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{ReleaseError, Result};

pub use attest::{AttestationRecord, BuildMetadata, ATTESTATION_SCHEMA};
pub use stage::{copy_tree, safe_replace_existing, sha256_file};

/// Archive container written by [`DeterministicPackager::package`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    #[default]
    Zip,
    TarZst,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarZst => "tar.zst",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArchiveFormat {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar.zst" | "tzst" => Ok(ArchiveFormat::TarZst),
            other => Err(ReleaseError::config(format!(
                "unknown archive format '{other}' (expected zip or tar.zst)"
            ))),
        }
    }
}

/// A finished release file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: String,
    /// Hex SHA-256 of the whole file.
    pub content_hash: String,
    pub size: u64,
    pub metadata: BuildMetadata,
    /// Sidecar path when attestation was requested.
    pub attestation: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DeterministicPackager {
    base_dir: PathBuf,
    format: ArchiveFormat,
    prefix: Option<String>,
    excludes: Vec<String>,
}

impl DeterministicPackager {
    /// `base_dir` is the directory attestation paths are recorded relative to.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            format: ArchiveFormat::Zip,
            prefix: None,
            excludes: Vec::new(),
        }
    }

    pub fn format(mut self, format: ArchiveFormat) -> Self {
        self.format = format;
        self
    }

    /// Root directory name prepended to every entry.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Leave `relative_path` (relative to the staging directory, `/`
    /// separated) out of the archive.
    pub fn exclude(mut self, relative_path: impl Into<String>) -> Self {
        self.excludes.push(relative_path.into());
        self
    }

    /// Archive every regular file under `staging_dir` into `output_path`.
    pub fn package(
        &self,
        staging_dir: &Path,
        output_path: &Path,
        want_attestation: bool,
        metadata: &BuildMetadata,
    ) -> Result<Artifact> {
        if !staging_dir.is_dir() {
            return Err(ReleaseError::packaging(
                staging_dir,
                "staging directory does not exist",
            ));
        }
        let mut entries = archive::collect_entries(staging_dir, self.prefix.as_deref())
            .map_err(|e| ReleaseError::packaging(staging_dir, format!("{e:#}")))?;
        if !self.excludes.is_empty() {
            entries.retain(|entry| {
                let rel = entry
                    .source
                    .strip_prefix(staging_dir)
                    .unwrap_or(&entry.source)
                    .to_string_lossy()
                    .replace('\\', "/");
                !self.excludes.contains(&rel)
            });
        }
        log::debug!(
            "packaging {} entries from {} as {}",
            entries.len(),
            staging_dir.display(),
            self.format
        );

        let format = self.format;
        write_via_temp(output_path, |tmp| match format {
            ArchiveFormat::Zip => archive::write_zip(&entries, tmp),
            ArchiveFormat::TarZst => archive::write_tar_zst(&entries, tmp),
        })?;

        self.finish(output_path, want_attestation, metadata)
    }

    /// Rewrite an existing zip-like archive (e.g. a `.vsix` from a bundler)
    /// in place with sorted entries and pinned timestamps. Returns the new
    /// content hash.
    pub fn repack(&self, archive_path: &Path) -> Result<String> {
        if !archive_path.is_file() {
            return Err(ReleaseError::packaging(archive_path, "archive does not exist"));
        }
        write_via_temp(archive_path, |tmp| archive::repack_zip(archive_path, tmp))?;
        let (sha, _) = sha256_file(archive_path)
            .map_err(|e| ReleaseError::packaging(archive_path, format!("{e:#}")))?;
        Ok(sha)
    }

    /// Hash and optionally attest an artifact produced by another tool.
    pub fn attest_existing(&self, path: &Path, metadata: &BuildMetadata) -> Result<Artifact> {
        if !path.is_file() {
            return Err(ReleaseError::packaging(path, "artifact does not exist"));
        }
        self.finish(path, true, metadata)
    }

    fn finish(&self, path: &Path, want_attestation: bool, metadata: &BuildMetadata) -> Result<Artifact> {
        let (content_hash, size) =
            sha256_file(path).map_err(|e| ReleaseError::packaging(path, format!("{e:#}")))?;

        let attestation = if want_attestation {
            let record = AttestationRecord::new(
                self.relative_name(path),
                content_hash.clone(),
                metadata.clone(),
            );
            let sidecar = attest::write_attestation(path, &record)
                .map_err(|e| ReleaseError::packaging(path, format!("{e:#}")))?;
            Some(sidecar)
        } else {
            None
        };

        Ok(Artifact {
            path: path.to_path_buf(),
            kind: metadata.kind.clone(),
            content_hash,
            size,
            metadata: metadata.clone(),
            attestation,
        })
    }

    fn relative_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.base_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Run `write` against `<output>.tmp`, then move the result over `output`.
fn write_via_temp<F>(output: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> anyhow::Result<()>,
{
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| ReleaseError::packaging(parent, e))?;
    }
    let tmp = stage::with_suffix(output, ".tmp");
    safe_replace_existing(&tmp).map_err(|e| ReleaseError::packaging(&tmp, format!("{e:#}")))?;

    if let Err(e) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(ReleaseError::packaging(output, format!("{e:#}")));
    }

    safe_replace_existing(output)
        .map_err(|e| ReleaseError::packaging(output, format!("{e:#}")))?;
    fs::rename(&tmp, output).map_err(|e| {
        ReleaseError::packaging(output, format!("moving '{}' into place: {}", tmp.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn stage(root: &Path, files: &[(&str, &str)]) {
        for (rel, content) in files {
            let p = root.join(rel);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, content).unwrap();
        }
    }

    fn meta() -> BuildMetadata {
        BuildMetadata::new("sdk-zip", "1.0.0").platform("linux-x86_64")
    }

    #[test]
    fn excluded_paths_stay_out_of_the_archive() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("staging");
        stage(
            &staging,
            &[("MANIFEST.json", "{}"), ("bin/aura", "binary"), ("docs/MANIFEST.json", "kept")],
        );

        let out = tmp.path().join("out.zip");
        DeterministicPackager::new(tmp.path())
            .prefix("AuraSDK")
            .exclude("MANIFEST.json")
            .package(&staging, &out, false, &meta())
            .unwrap();
        assert_eq!(
            archive::zip_entry_names(&out).unwrap(),
            vec!["AuraSDK/bin/aura", "AuraSDK/docs/MANIFEST.json"]
        );
    }

    #[test]
    fn identical_content_gives_identical_archives() {
        let tmp = TempDir::new().unwrap();
        // Same content, created in different orders at different times.
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        stage(&a, &[("bin/aura", "binary"), ("docs/intro.md", "# Intro"), ("README", "r")]);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        stage(&b, &[("README", "r"), ("docs/intro.md", "# Intro"), ("bin/aura", "binary")]);

        for format in [ArchiveFormat::Zip, ArchiveFormat::TarZst] {
            let packager = DeterministicPackager::new(tmp.path()).format(format).prefix("AuraSDK");
            let out_a = tmp.path().join(format!("a.{}", format.extension()));
            let out_b = tmp.path().join(format!("b.{}", format.extension()));
            let art_a = packager.package(&a, &out_a, false, &meta()).unwrap();
            let art_b = packager.package(&b, &out_b, false, &meta()).unwrap();
            assert_eq!(art_a.content_hash, art_b.content_hash, "{format}");
            assert_eq!(fs::read(&out_a).unwrap(), fs::read(&out_b).unwrap());
        }
    }

    #[test]
    fn entries_sorted_case_insensitively() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("staging");
        stage(&staging, &[("sub/c.bin", "c"), ("B.txt", "b"), ("a.txt", "a")]);
        let out = tmp.path().join("out.zip");
        DeterministicPackager::new(tmp.path())
            .package(&staging, &out, false, &meta())
            .unwrap();
        assert_eq!(
            archive::zip_entry_names(&out).unwrap(),
            vec!["a.txt", "B.txt", "sub/c.bin"]
        );
    }

    #[test]
    fn attestation_records_relative_path_and_hash() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("staging");
        stage(&staging, &[("x.txt", "x")]);
        let out = tmp.path().join("dist/aura-sdk.zip");

        let artifact = DeterministicPackager::new(tmp.path())
            .package(&staging, &out, true, &meta())
            .unwrap();
        let sidecar = artifact.attestation.clone().unwrap();
        assert_eq!(sidecar, tmp.path().join("dist/aura-sdk.zip.attestation.json"));

        let record = AttestationRecord::read(&sidecar).unwrap();
        assert_eq!(record.schema, ATTESTATION_SCHEMA);
        assert_eq!(record.artifact, "dist/aura-sdk.zip");
        assert_eq!(record.sha256, artifact.content_hash);
        assert_eq!(record.meta, meta());

        // The sidecar never feeds back into the archive hash.
        let again = DeterministicPackager::new(tmp.path())
            .package(&staging, &out, false, &meta())
            .unwrap();
        assert_eq!(again.content_hash, artifact.content_hash);
    }

    #[test]
    fn locked_output_is_moved_aside() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("staging");
        stage(&staging, &[("x.txt", "x")]);
        let out = tmp.path().join("sdk.zip");
        // Stand-in for a file another process holds open.
        fs::create_dir_all(out.join("held")).unwrap();

        let artifact = DeterministicPackager::new(tmp.path())
            .package(&staging, &out, false, &meta())
            .unwrap();
        assert!(artifact.path.is_file());
        assert!(tmp.path().join("sdk.zip.old1").is_dir());
        assert!(!tmp.path().join("sdk.zip.tmp").exists());
    }

    #[test]
    fn missing_staging_dir_is_packaging_error() {
        let tmp = TempDir::new().unwrap();
        let err = DeterministicPackager::new(tmp.path())
            .package(&tmp.path().join("nope"), &tmp.path().join("o.zip"), false, &meta())
            .unwrap_err();
        assert!(matches!(err, ReleaseError::PackagingIo { .. }));
    }

    #[test]
    fn repack_sorts_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let vsix = tmp.path().join("ext.vsix");
        {
            let mut zip = zip::ZipWriter::new(fs::File::create(&vsix).unwrap());
            let opts = zip::write::FileOptions::default()
                .last_modified_time(zip::DateTime::from_date_and_time(2024, 5, 17, 13, 45, 10).unwrap());
            zip.add_directory("extension/", opts).unwrap();
            zip.start_file("extension/package.json", opts).unwrap();
            zip.write_all(b"{}").unwrap();
            zip.start_file("[Content_Types].xml", opts).unwrap();
            zip.write_all(b"<Types/>").unwrap();
            zip.start_file("extension.vsixmanifest", opts).unwrap();
            zip.write_all(b"<m/>").unwrap();
            zip.finish().unwrap();
        }

        let packager = DeterministicPackager::new(tmp.path());
        let first = packager.repack(&vsix).unwrap();
        assert_eq!(
            archive::zip_entry_names(&vsix).unwrap(),
            vec!["[Content_Types].xml", "extension.vsixmanifest", "extension/package.json"]
        );
        let second = packager.repack(&vsix).unwrap();
        assert_eq!(first, second);

        let mut archive = zip::ZipArchive::new(fs::File::open(&vsix).unwrap()).unwrap();
        let entry = archive.by_index(0).unwrap();
        let ts = entry.last_modified();
        assert_eq!((ts.year(), ts.month(), ts.day()), (1980, 1, 1));
    }

    #[test]
    fn attest_existing_hashes_without_repacking() {
        let tmp = TempDir::new().unwrap();
        let exe = tmp.path().join("aura-sentinel-setup.exe");
        fs::write(&exe, "installer").unwrap();
        let before = fs::read(&exe).unwrap();

        let artifact = DeterministicPackager::new(tmp.path())
            .attest_existing(&exe, &BuildMetadata::new("installer", "1.0.0"))
            .unwrap();
        assert_eq!(fs::read(&exe).unwrap(), before);
        assert_eq!(artifact.size, 9);
        assert!(artifact.attestation.unwrap().is_file());
    }

    #[test]
    fn format_parsing() {
        assert_eq!("ZIP".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Zip);
        assert_eq!("tar.zst".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::TarZst);
        assert!("rar".parse::<ArchiveFormat>().unwrap_err().is_configuration());
    }
}
