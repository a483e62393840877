//! Host platform identification and per-platform download URLs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operating system and CPU architecture of the build host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// `windows`, `macos` or `linux`.
    pub os: String,
    /// Rust architecture name (`x86_64`, `aarch64`, ...).
    pub arch: String,
}

impl Platform {
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn new(os: &str, arch: &str) -> Self {
        let os = match os {
            "windows" => "windows",
            "macos" | "darwin" => "macos",
            _ => "linux",
        };
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// Tag used in artifact names, e.g. `linux-x86_64`.
    pub fn tag(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }

    pub fn exe_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".exe"
        } else {
            ""
        }
    }

    /// Preferred archive extension for tool downloads on this platform.
    pub fn archive_ext(&self) -> &'static str {
        if self.is_windows() {
            "zip"
        } else {
            "tar.gz"
        }
    }

    /// Substitute `{os}`, `{arch}`, `{tag}` and `{ext}` placeholders.
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{os}", &self.os)
            .replace("{arch}", &self.arch)
            .replace("{tag}", &self.tag())
            .replace("{ext}", self.archive_ext())
    }
}

/// A download location that may differ per platform.
///
/// In `release.toml` this is either a string or a table keyed by platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlatformUrl {
    /// One URL with optional placeholders (see [`Platform::expand`]).
    Template(String),
    /// Explicit URL per platform tag (`linux-x86_64`) or bare os (`linux`).
    PerPlatform(BTreeMap<String, String>),
}

impl PlatformUrl {
    pub fn fixed(url: impl Into<String>) -> Self {
        PlatformUrl::Template(url.into())
    }

    pub fn per_platform<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        PlatformUrl::PerPlatform(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// The concrete URL for `platform`, or `None` when the platform has no entry.
    pub fn resolve(&self, platform: &Platform) -> Option<String> {
        match self {
            PlatformUrl::Template(t) => Some(platform.expand(t)),
            PlatformUrl::PerPlatform(map) => map
                .get(&platform.tag())
                .or_else(|| map.get(&platform.os))
                .map(|u| platform.expand(u)),
        }
    }
}
