//! Attestation sidecars.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::stage::with_suffix;

pub const ATTESTATION_SCHEMA: &str = "aura.attestation.v1";
pub const ATTESTATION_SUFFIX: &str = ".attestation.json";

/// Caller-supplied provenance for an artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMetadata {
    /// `sdk-zip`, `vsix`, `installer`, ...
    pub kind: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl BuildMetadata {
    pub fn new(kind: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            version: version.into(),
            platform: None,
            channel: None,
        }
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

/// The sidecar document. Written once, never rewritten in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRecord {
    pub schema: String,
    /// Artifact path relative to the packager's base directory.
    pub artifact: String,
    pub sha256: String,
    pub meta: BuildMetadata,
}

impl AttestationRecord {
    pub fn new(artifact: impl Into<String>, sha256: impl Into<String>, meta: BuildMetadata) -> Self {
        Self {
            schema: ATTESTATION_SCHEMA.to_string(),
            artifact: artifact.into(),
            sha256: sha256.into(),
            meta,
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading '{}'", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing '{}'", path.display()))
    }
}

/// Sidecar location for `artifact`.
pub fn sidecar_path(artifact: &Path) -> PathBuf {
    with_suffix(artifact, ATTESTATION_SUFFIX)
}

/// Write `record` next to `artifact`. Keys are emitted in sorted order.
pub fn write_attestation(artifact: &Path, record: &AttestationRecord) -> Result<PathBuf> {
    let path = sidecar_path(artifact);
    // serde_json's Map is ordered by key, so going through Value sorts
    // every level.
    let value = serde_json::to_value(record).context("serializing attestation")?;
    let mut payload = serde_json::to_string_pretty(&value).context("serializing attestation")?;
    payload.push('\n');

    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path without parent '{}'", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating parent directory '{}'", parent.display()))?;
    let tmp = with_suffix(&path, &format!(".tmp-{}", std::process::id()));
    fs::write(&tmp, payload).with_context(|| format!("writing temp file '{}'", tmp.display()))?;
    super::stage::safe_replace_existing(&path)?;
    fs::rename(&tmp, &path).with_context(|| {
        format!(
            "renaming temp file '{}' to '{}'",
            tmp.display(),
            path.display()
        )
    })?;
    Ok(path)
}
