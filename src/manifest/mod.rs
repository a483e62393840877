//! Release tree inventory (`MANIFEST.json`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use walkdir::WalkDir;

use crate::error::{ReleaseError, Result};

pub const MANIFEST_FILE: &str = "MANIFEST.json";

/// Category for files directly under the root.
pub const ROOT_CATEGORY: &str = "root";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the release root, `/`-separated.
    pub file: String,
    pub size_bytes: u64,
    pub size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub build_date: String,
    pub components: BTreeMap<String, Vec<ManifestEntry>>,
}

impl Manifest {
    pub fn file_count(&self) -> usize {
        self.components.values().map(Vec::len).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.components
            .values()
            .flatten()
            .map(|e| e.size_bytes)
            .sum()
    }
}

/// Builds manifests from a staged release tree.
#[derive(Debug, Clone)]
pub struct ManifestWriter {
    version: String,
}

impl ManifestWriter {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    /// Walk `root_dir` and build the inventory. The only input besides the
    /// filesystem snapshot is the build date.
    pub fn collect(&self, root_dir: &Path, build_date: String) -> Result<Manifest> {
        if !root_dir.is_dir() {
            return Err(ReleaseError::packaging(root_dir, "release directory does not exist"));
        }

        let mut components: BTreeMap<String, Vec<ManifestEntry>> = BTreeMap::new();
        for ent in WalkDir::new(root_dir).follow_links(false) {
            let ent = ent.map_err(|e| ReleaseError::packaging(root_dir, e))?;
            if !ent.file_type().is_file() {
                continue;
            }
            let rel = ent.path().strip_prefix(root_dir).unwrap_or(ent.path());
            let file = rel.to_string_lossy().replace('\\', "/");
            if file == MANIFEST_FILE {
                continue;
            }
            let size_bytes = ent
                .metadata()
                .map_err(|e| ReleaseError::packaging(ent.path(), e))?
                .len();

            let category = match file.split_once('/') {
                Some((top, _)) => top.to_string(),
                None => ROOT_CATEGORY.to_string(),
            };
            components.entry(category).or_default().push(ManifestEntry {
                file,
                size_bytes,
                size_mb: size_mb(size_bytes),
            });
        }
        for entries in components.values_mut() {
            entries.sort_by(|a, b| a.file.cmp(&b.file));
        }

        Ok(Manifest {
            version: self.version.clone(),
            build_date,
            components,
        })
    }

    /// Collect and write `MANIFEST.json` into `root_dir`.
    pub fn write(&self, root_dir: &Path) -> Result<(Manifest, PathBuf)> {
        let manifest = self.collect(root_dir, iso_timestamp(crate::pipeline::log::local_now()))?;
        let path = root_dir.join(MANIFEST_FILE);
        let mut payload = serde_json::to_string_pretty(&manifest)
            .map_err(|e| ReleaseError::packaging(&path, e))?;
        payload.push('\n');
        fs::write(&path, payload).map_err(|e| ReleaseError::packaging(&path, e))?;
        Ok((manifest, path))
    }
}

fn size_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// `2025-01-31T14:05:09` in the host's local time.
pub fn iso_timestamp(t: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
        t.year(),
        t.month() as u8,
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    )
}
