//! Release configuration.
//!
//! `release.toml` at the repository root is optional; every field has a
//! default. Environment variables layered on top are read once into an
//! [`Env`] snapshot.

pub mod env;

pub use env::Env;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ReleaseError, Result};
use crate::toolchain::{catalog, Platform, ToolSpec, ToolchainCandidate};

pub const CONFIG_FILE: &str = "release.toml";

const FALLBACK_VERSION: &str = "0.1.0";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReleaseToml {
    version: Option<String>,
    dist_dir: Option<PathBuf>,
    release_dir: Option<PathBuf>,
    tools_dir: Option<PathBuf>,
    download_cache: Option<DownloadCache>,
    log_file: Option<PathBuf>,
    command_timeout_secs: Option<u64>,
    long_timeout_secs: Option<u64>,
    android_variants: Option<Vec<String>>,
    android_project: Option<PathBuf>,
    ide_dir: Option<PathBuf>,
    vscode_dir: Option<PathBuf>,
    binaries: Option<Vec<String>>,
    #[serde(default)]
    tools: BTreeMap<String, ToolOverride>,
}

/// Where downloaded toolchain archives are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadCache {
    /// `<tools_dir>/cache`, private to the repository.
    #[default]
    Local,
    /// The user cache directory, shared between checkouts.
    User,
}

/// Per-tool override from a `[tools.<id>]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolOverride {
    pub marker: Option<String>,
    pub candidates: Option<Vec<ToolchainCandidate>>,
}

/// Parsed `release.toml` with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseConfig {
    /// Explicit version, else detected from the workspace manifests.
    pub version: Option<String>,
    pub dist_dir: PathBuf,
    pub release_dir: PathBuf,
    pub tools_dir: PathBuf,
    pub download_cache: DownloadCache,
    pub log_file: PathBuf,
    /// cargo and npm invocations.
    pub command_timeout_secs: u64,
    /// APK builds and package-manager installs.
    pub long_timeout_secs: u64,
    pub android_variants: Vec<String>,
    pub android_project: PathBuf,
    pub ide_dir: PathBuf,
    pub vscode_dir: PathBuf,
    /// Native build outputs under `target/release`, without `.exe`.
    pub binaries: Vec<String>,
    pub tools: BTreeMap<String, ToolOverride>,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self::from_toml(ReleaseToml::default())
    }
}

impl ReleaseConfig {
    /// Load `release.toml` from `repo_root`, or defaults when it is absent.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = repo_root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path).map_err(|e| {
            ReleaseError::config(format!("reading '{}': {}", path.display(), e))
        })?;
        Self::parse(&text)
            .map_err(|e| ReleaseError::config(format!("parsing '{}': {}", path.display(), e)))
    }

    pub fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        let raw: ReleaseToml = toml::from_str(text)?;
        Ok(Self::from_toml(raw))
    }

    fn from_toml(raw: ReleaseToml) -> Self {
        Self {
            version: raw.version.filter(|v| !v.trim().is_empty()),
            dist_dir: raw.dist_dir.unwrap_or_else(|| PathBuf::from("dist")),
            release_dir: raw.release_dir.unwrap_or_else(|| PathBuf::from("dist-release")),
            tools_dir: raw.tools_dir.unwrap_or_else(|| PathBuf::from(".tools")),
            download_cache: raw.download_cache.unwrap_or_default(),
            log_file: raw.log_file.unwrap_or_else(|| PathBuf::from("build-release.log")),
            command_timeout_secs: raw.command_timeout_secs.unwrap_or(300),
            long_timeout_secs: raw.long_timeout_secs.unwrap_or(3600),
            android_variants: raw
                .android_variants
                .unwrap_or_else(|| vec!["debug".to_string()]),
            android_project: raw
                .android_project
                .unwrap_or_else(|| PathBuf::from("samples/android/AuraSentinelSample")),
            ide_dir: raw
                .ide_dir
                .unwrap_or_else(|| PathBuf::from("editors/sentinel-app")),
            vscode_dir: raw.vscode_dir.unwrap_or_else(|| PathBuf::from("editors/vscode")),
            binaries: raw.binaries.unwrap_or_else(|| {
                ["aura", "aura-lsp", "aura-pkg"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            }),
            tools: raw.tools,
        }
    }
}

/// Read the release version from the workspace manifests: the root
/// `[workspace.package]` or `[package]` version, then `aura/Cargo.toml`.
pub fn detect_version(repo_root: &Path) -> Option<String> {
    let read = |path: PathBuf| -> Option<toml::Value> {
        let text = fs::read_to_string(path).ok()?;
        toml::from_str::<toml::Value>(&text).ok()
    };
    let version_at = |doc: &toml::Value, keys: &[&str]| -> Option<String> {
        let mut cur = doc;
        for key in keys {
            cur = cur.get(*key)?;
        }
        cur.as_str().map(str::to_string)
    };

    if let Some(root) = read(repo_root.join("Cargo.toml")) {
        if let Some(v) = version_at(&root, &["workspace", "package", "version"])
            .or_else(|| version_at(&root, &["package", "version"]))
        {
            return Some(v);
        }
    }
    read(repo_root.join("aura/Cargo.toml"))
        .and_then(|doc| version_at(&doc, &["package", "version"]))
}

/// Options for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub skip_android: bool,
    pub attest: bool,
    pub sign: bool,
}

/// Everything a run reads: repository root, file config, environment and
/// command-line options.
#[derive(Debug, Clone)]
pub struct Settings {
    pub repo_root: PathBuf,
    pub config: ReleaseConfig,
    pub env: Env,
    pub platform: Platform,
    pub options: RunOptions,
    version: String,
}

impl Settings {
    pub fn new(repo_root: impl Into<PathBuf>, config: ReleaseConfig, env: Env) -> Self {
        let repo_root = repo_root.into();
        let version = config
            .version
            .clone()
            .or_else(|| detect_version(&repo_root))
            .unwrap_or_else(|| FALLBACK_VERSION.to_string());
        Self {
            repo_root,
            config,
            env,
            platform: Platform::current(),
            options: RunOptions::default(),
            version,
        }
    }

    /// Load `release.toml` and snapshot the process environment.
    pub fn load(repo_root: impl Into<PathBuf>) -> Result<Self> {
        let repo_root = repo_root.into();
        let config = ReleaseConfig::load(&repo_root)?;
        Ok(Self::new(repo_root, config, Env::from_process()))
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.repo_root.join(path)
        }
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.resolve(&self.config.dist_dir)
    }

    pub fn release_dir(&self) -> PathBuf {
        self.resolve(&self.config.release_dir)
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.resolve(&self.config.tools_dir)
    }

    pub fn android_project(&self) -> PathBuf {
        self.resolve(&self.config.android_project)
    }

    pub fn ide_dir(&self) -> PathBuf {
        self.resolve(&self.config.ide_dir)
    }

    pub fn vscode_dir(&self) -> PathBuf {
        self.resolve(&self.config.vscode_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.config.log_file)
    }

    /// Download cache for toolchain archives.
    pub fn cache_dir(&self) -> PathBuf {
        match self.config.download_cache {
            DownloadCache::Local => self.tools_dir().join("cache"),
            DownloadCache::User => dirs::cache_dir()
                .map(|d| d.join("release-builder"))
                .unwrap_or_else(|| self.tools_dir().join("cache")),
        }
    }

    /// `cargo` output directory: `CARGO_TARGET_DIR` or `<repo>/target`.
    pub fn target_dir(&self) -> PathBuf {
        self.env
            .get("CARGO_TARGET_DIR")
            .map(|d| self.resolve(Path::new(d)))
            .unwrap_or_else(|| self.repo_root.join("target"))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    pub fn long_timeout(&self) -> Duration {
        Duration::from_secs(self.config.long_timeout_secs)
    }

    /// Mobile steps are no-ops under `--skip-android` or `AURA_SKIP_ANDROID`.
    pub fn skip_android(&self) -> bool {
        self.options.skip_android || self.env.flag("AURA_SKIP_ANDROID")
    }

    /// Variants requested via `AURA_ANDROID_VARIANTS`, else the config,
    /// lowercased.
    pub fn android_variants(&self) -> Vec<String> {
        let variants = self
            .env
            .list("AURA_ANDROID_VARIANTS")
            .unwrap_or_else(|| self.config.android_variants.clone());
        let variants: Vec<String> = variants
            .into_iter()
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .collect();
        if variants.is_empty() {
            vec!["debug".to_string()]
        } else {
            variants
        }
    }

    /// Program name for npm on this host.
    pub fn npm(&self) -> &'static str {
        if self.platform.is_windows() {
            "npm.cmd"
        } else {
            "npm"
        }
    }

    /// Built-in spec for `id` with any `[tools.<id>]` override applied.
    pub fn tool_spec(&self, id: &str) -> Result<ToolSpec> {
        let mut spec = match id {
            catalog::JDK => catalog::jdk(&self.env, &self.platform),
            catalog::ANDROID_SDK => catalog::android_sdk(&self.platform, &self.repo_root),
            catalog::GRADLE => catalog::gradle(&self.env),
            other => {
                return Err(ReleaseError::config(format!("unknown tool '{other}'")));
            }
        };
        if let Some(ov) = self.config.tools.get(id) {
            if let Some(marker) = &ov.marker {
                spec.marker = marker.clone();
            }
            if let Some(candidates) = &ov.candidates {
                spec.candidates = candidates.clone();
            }
        }
        Ok(spec)
    }
}
