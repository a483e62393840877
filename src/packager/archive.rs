//! Reproducible zip and tar.zst writers.
//!
//! Entry metadata never comes from the build machine: timestamps are pinned
//! (DOS floor for zip, epoch for tar), ownership is zeroed and modes are
//! either 0755 or 0644 depending only on the source's executable bit.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::CompressionMethod;

const MODE_EXEC: u32 = 0o755;
const MODE_FILE: u32 = 0o644;
const ZSTD_LEVEL: i32 = 3;

/// A regular file to place in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedEntry {
    pub source: PathBuf,
    /// Archive name, forward slashes, prefix applied.
    pub name: String,
    pub mode: u32,
}

/// Sort key for archive entries: case-insensitive first, exact name second
/// so names differing only in case still order deterministically.
pub fn entry_order(a: &str, b: &str) -> std::cmp::Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Every regular file under `staging_dir`, in archive order.
pub fn collect_entries(staging_dir: &Path, prefix: Option<&str>) -> Result<Vec<StagedEntry>> {
    let prefix = prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .unwrap_or_default();

    let mut entries = Vec::new();
    for ent in WalkDir::new(staging_dir).follow_links(false) {
        let ent = ent.with_context(|| format!("walking '{}'", staging_dir.display()))?;
        if !ent.file_type().is_file() {
            continue;
        }
        let rel = ent
            .path()
            .strip_prefix(staging_dir)
            .unwrap_or(ent.path())
            .to_string_lossy()
            .replace('\\', "/");
        let md = ent
            .metadata()
            .with_context(|| format!("reading metadata of '{}'", ent.path().display()))?;
        entries.push(StagedEntry {
            source: ent.path().to_path_buf(),
            name: format!("{prefix}{rel}"),
            mode: if is_executable(&md) { MODE_EXEC } else { MODE_FILE },
        });
    }
    entries.sort_by(|a, b| entry_order(&a.name, &b.name));
    Ok(entries)
}

#[cfg(unix)]
fn is_executable(md: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_md: &fs::Metadata) -> bool {
    false
}

fn zip_options(mode: u32) -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(mode)
}

pub fn write_zip(entries: &[StagedEntry], out_path: &Path) -> Result<()> {
    let out = File::create(out_path)
        .with_context(|| format!("creating '{}'", out_path.display()))?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(out));
    for entry in entries {
        zip.start_file(entry.name.as_str(), zip_options(entry.mode))
            .with_context(|| format!("adding '{}'", entry.name))?;
        let mut src = File::open(&entry.source)
            .with_context(|| format!("opening '{}'", entry.source.display()))?;
        io::copy(&mut src, &mut zip)
            .with_context(|| format!("compressing '{}'", entry.source.display()))?;
    }
    let mut inner = zip.finish().context("finishing zip")?;
    inner.flush()?;
    Ok(())
}

pub fn write_tar_zst(entries: &[StagedEntry], out_path: &Path) -> Result<()> {
    let out = File::create(out_path)
        .with_context(|| format!("creating '{}'", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, ZSTD_LEVEL)?;
    let mut builder = tar::Builder::new(encoder);

    for entry in entries {
        let file = File::open(&entry.source)
            .with_context(|| format!("opening '{}'", entry.source.display()))?;
        let size = file.metadata()?.len();
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(size);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(entry.mode);
        header.set_cksum();
        builder
            .append_data(&mut header, &entry.name, file)
            .with_context(|| format!("adding '{}'", entry.name))?;
    }

    let encoder = builder.into_inner().context("finishing tar")?;
    encoder.finish().context("finishing zstd stream")?;
    Ok(())
}

/// Rewrite the zip at `src` into `dst` with sorted entries and pinned
/// timestamps. Directory entries are dropped; file modes are kept.
pub fn repack_zip(src: &Path, dst: &Path) -> Result<()> {
    let input = File::open(src).with_context(|| format!("opening '{}'", src.display()))?;
    let mut archive =
        zip::ZipArchive::new(input).with_context(|| format!("reading zip '{}'", src.display()))?;

    let mut files: Vec<(String, usize)> = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        files.push((entry.name().to_string(), i));
    }
    files.sort_by(|a, b| entry_order(&a.0, &b.0));

    let out = File::create(dst).with_context(|| format!("creating '{}'", dst.display()))?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(out));
    for (name, index) in files {
        let mut entry = archive.by_index(index)?;
        let mode = entry.unix_mode().map(|m| m & 0o777).unwrap_or(MODE_FILE);
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("reading '{name}' from '{}'", src.display()))?;
        zip.start_file(name.as_str(), zip_options(mode))?;
        zip.write_all(&data)?;
    }
    let mut inner = zip.finish().context("finishing zip")?;
    inner.flush()?;
    Ok(())
}

/// Entry names of a zip, in stored order.
pub fn zip_entry_names(path: &Path) -> Result<Vec<String>> {
    let mut archive = zip::ZipArchive::new(
        File::open(path).with_context(|| format!("opening '{}'", path.display()))?,
    )?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        names.push(archive.by_index(i)?.name().to_string());
    }
    Ok(names)
}
