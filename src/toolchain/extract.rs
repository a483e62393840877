//! Archive extraction into versioned install directories.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Archive formats recognised by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    TarZst,
}

impl ArchiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".tar.zst") || lower.ends_with(".tzst") {
            Some(ArchiveKind::TarZst)
        } else {
            None
        }
    }
}

/// Unpack `archive` into `dest` (created if missing).
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let kind = ArchiveKind::from_name(name)
        .with_context(|| format!("unsupported archive type: {}", archive.display()))?;

    fs::create_dir_all(dest).with_context(|| format!("creating '{}'", dest.display()))?;
    let file = File::open(archive).with_context(|| format!("opening '{}'", archive.display()))?;

    match kind {
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(file)
                .with_context(|| format!("reading zip '{}'", archive.display()))?;
            zip.extract(dest)
                .with_context(|| format!("extracting zip '{}'", archive.display()))?;
        }
        ArchiveKind::TarGz => {
            let mut tar = tar::Archive::new(GzDecoder::new(file));
            tar.unpack(dest)
                .with_context(|| format!("extracting '{}'", archive.display()))?;
        }
        ArchiveKind::TarZst => {
            let decoder = zstd::stream::Decoder::new(file)?;
            let mut tar = tar::Archive::new(decoder);
            tar.unpack(dest)
                .with_context(|| format!("extracting '{}'", archive.display()))?;
        }
    }
    Ok(())
}

/// Extract `archive` through `scratch` and move the result to `install_dir`.
///
/// A lone top-level directory in the archive (`jdk-17.0.10+7/`,
/// `gradle-8.6/`) is hoisted so its contents land directly in `install_dir`.
pub fn install_from_archive(archive: &Path, scratch: &Path, install_dir: &Path) -> Result<()> {
    if scratch.exists() {
        fs::remove_dir_all(scratch)
            .with_context(|| format!("removing stale scratch dir '{}'", scratch.display()))?;
    }

    let result = extract_archive(archive, scratch).and_then(|()| {
        let content_root = single_top_level_dir(scratch)?.unwrap_or_else(|| scratch.to_path_buf());
        if install_dir.exists() {
            fs::remove_dir_all(install_dir).with_context(|| {
                format!("removing incomplete install '{}'", install_dir.display())
            })?;
        }
        if let Some(parent) = install_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&content_root, install_dir).with_context(|| {
            format!(
                "moving '{}' to '{}'",
                content_root.display(),
                install_dir.display()
            )
        })
    });

    let _ = fs::remove_dir_all(scratch);
    result
}

fn single_top_level_dir(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading '{}'", dir.display()))? {
        entries.push(entry?.path());
    }
    match entries.as_slice() {
        [] => bail!("archive was empty"),
        [only] if only.is_dir() => Ok(Some(only.clone())),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn kind_from_name() {
        assert_eq!(ArchiveKind::from_name("a.ZIP"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_name("a.tgz"), Some(ArchiveKind::TarGz));
        assert_eq!(
            ArchiveKind::from_name("a.tar.zst"),
            Some(ArchiveKind::TarZst)
        );
        assert_eq!(ArchiveKind::from_name("a.rar"), None);
    }

    #[test]
    fn single_top_dir_is_hoisted() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("gradle.zip");
        write_zip(
            &archive,
            &[
                ("gradle-8.6/bin/gradle", b"#!/bin/sh\n"),
                ("gradle-8.6/lib/core.jar", b"jar"),
            ],
        );

        let install = tmp.path().join("tools/gradle-8.6");
        install_from_archive(&archive, &tmp.path().join("scratch"), &install).unwrap();

        assert!(install.join("bin/gradle").is_file());
        assert!(install.join("lib/core.jar").is_file());
        assert!(!tmp.path().join("scratch").exists());
    }

    #[test]
    fn flat_archive_is_installed_as_is() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("flat.zip");
        write_zip(&archive, &[("bin/tool", b"x"), ("README", b"r")]);

        let install = tmp.path().join("tools/flat");
        install_from_archive(&archive, &tmp.path().join("scratch"), &install).unwrap();
        assert!(install.join("bin/tool").is_file());
        assert!(install.join("README").is_file());
    }

    #[test]
    fn corrupt_archive_fails_and_cleans_scratch() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("broken.zip");
        fs::write(&archive, b"this is not a zip").unwrap();

        let install = tmp.path().join("tools/broken");
        let scratch = tmp.path().join("scratch");
        assert!(install_from_archive(&archive, &scratch, &install).is_err());
        assert!(!install.exists());
        assert!(!scratch.exists());
    }

    #[test]
    fn tar_gz_is_extracted() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("jdk.tar.gz");
        {
            let file = File::create(&archive).unwrap();
            let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(enc);
            let data = b"java";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, "jdk-17/bin/java", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let install = tmp.path().join("tools/jdk-17");
        install_from_archive(&archive, &tmp.path().join("scratch"), &install).unwrap();
        assert!(install.join("bin/java").is_file());
    }
}
