//! Toolchain resolution.
//!
//! A tool (JDK, Android SDK, Gradle) is described by a [`ToolSpec`]: a marker
//! binary that proves an install is usable, plus an ordered list of
//! [`ToolchainCandidate`]s. The resolver tries each candidate in order and
//! accepts the first one whose root contains the marker. A tool is resolved
//! at most once per run; later requests hit the in-memory cache.
//!
//! Resolution order for a typical spec:
//! 1. Home variable (`JAVA_HOME`, `ANDROID_SDK_ROOT`)
//! 2. Executable on `PATH`
//! 3. Download into `.tools/` (override URL first, then built-in mirrors)
//! 4. Platform package manager

pub mod catalog;
pub mod extract;
pub mod fetch;
pub mod platform;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Env;
use crate::error::{ReleaseError, Result};
use crate::process::{Cmd, CommandRunner};

pub use fetch::{Fetcher, HttpFetcher};
pub use platform::{Platform, PlatformUrl};

/// Package-manager installs unless the caller sets another limit.
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(3600);

/// Which acquisition strategy produced a toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateKind {
    EnvironmentVariable,
    SystemPath,
    Download,
    PackageManager,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateKind::EnvironmentVariable => "environment-variable",
            CandidateKind::SystemPath => "system-path",
            CandidateKind::Download => "download",
            CandidateKind::PackageManager => "package-manager",
        };
        f.write_str(s)
    }
}

/// One strategy for locating or obtaining a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ToolchainCandidate {
    /// A variable naming an existing install root.
    EnvironmentVariable { var: String },
    /// A program name looked up on `PATH`.
    SystemPath { program: String },
    /// An archive fetched into the download cache and extracted under the
    /// tools directory.
    Download {
        url: PlatformUrl,
        /// Cache file name; placeholders as in [`Platform::expand`].
        archive_name: String,
        /// Install root, relative to the tools directory.
        install_dir: String,
        /// Where the archive contents go inside `install_dir`, when the
        /// archive is not itself the whole install.
        #[serde(default)]
        extract_subdir: Option<String>,
    },
    /// A package-manager (or setup script) invocation. Accepted only if the
    /// tool is discoverable afterwards.
    PackageManager {
        command: Vec<String>,
        program: String,
        /// Install root the command populates, relative to the tools
        /// directory. When absent the tool must appear on `PATH`.
        #[serde(default)]
        installs_to: Option<String>,
    },
}

impl ToolchainCandidate {
    pub fn env_var(var: impl Into<String>) -> Self {
        ToolchainCandidate::EnvironmentVariable { var: var.into() }
    }

    pub fn system_path(program: impl Into<String>) -> Self {
        ToolchainCandidate::SystemPath {
            program: program.into(),
        }
    }

    pub fn download(
        url: PlatformUrl,
        archive_name: impl Into<String>,
        install_dir: impl Into<String>,
    ) -> Self {
        ToolchainCandidate::Download {
            url,
            archive_name: archive_name.into(),
            install_dir: install_dir.into(),
            extract_subdir: None,
        }
    }

    pub fn kind(&self) -> CandidateKind {
        match self {
            ToolchainCandidate::EnvironmentVariable { .. } => CandidateKind::EnvironmentVariable,
            ToolchainCandidate::SystemPath { .. } => CandidateKind::SystemPath,
            ToolchainCandidate::Download { .. } => CandidateKind::Download,
            ToolchainCandidate::PackageManager { .. } => CandidateKind::PackageManager,
        }
    }

    /// Short human description used in attempt lists.
    pub fn describe(&self) -> String {
        match self {
            ToolchainCandidate::EnvironmentVariable { var } => format!("${var}"),
            ToolchainCandidate::SystemPath { program } => format!("PATH lookup of '{program}'"),
            ToolchainCandidate::Download { archive_name, .. } => {
                format!("download of {archive_name}")
            }
            ToolchainCandidate::PackageManager { command, .. } => {
                format!("`{}`", command.join(" "))
            }
        }
    }
}

/// Everything the resolver needs to know about one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub id: String,
    /// Marker binary relative to the install root, without extension
    /// (`bin/java`). `.exe`, `.bat` and `.cmd` variants also match.
    pub marker: String,
    pub candidates: Vec<ToolchainCandidate>,
    /// Variables pointed at the root for child processes.
    pub home_vars: Vec<String>,
    /// Directory under the root prepended to child `PATH`.
    pub path_subdir: Option<String>,
}

impl ToolSpec {
    pub fn new(id: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            marker: marker.into(),
            candidates: Vec::new(),
            home_vars: Vec::new(),
            path_subdir: None,
        }
    }

    pub fn candidate(mut self, candidate: ToolchainCandidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn home_var(mut self, var: impl Into<String>) -> Self {
        self.home_vars.push(var.into());
        self
    }

    pub fn path_subdir(mut self, dir: impl Into<String>) -> Self {
        self.path_subdir = Some(dir.into());
        self
    }
}

/// A located tool. Identical for every step of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedToolchain {
    pub tool_id: String,
    pub root_path: PathBuf,
    pub source_kind: CandidateKind,
    pub executable: PathBuf,
    home_vars: Vec<String>,
    path_subdir: Option<String>,
}

impl ResolvedToolchain {
    /// Child-process environment for this tool. Tools found on `PATH` need
    /// no `PATH` change; everything else gets its bin directory prepended.
    pub fn env_overrides(&self, env: &Env) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        let root = self.root_path.display().to_string();
        for var in &self.home_vars {
            vars.insert(var.clone(), root.clone());
        }

        if self.source_kind != CandidateKind::SystemPath {
            if let Some(sub) = &self.path_subdir {
                let bin = self.root_path.join(sub);
                let mut dirs = vec![bin];
                if let Some(existing) = env.path_var() {
                    dirs.extend(std::env::split_paths(existing));
                }
                if let Ok(joined) = std::env::join_paths(dirs) {
                    vars.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
                }
            }
        }
        vars
    }
}

/// Resolves tools through their candidate lists, memoizing per `tool_id`.
pub struct ToolchainResolver {
    tools_dir: PathBuf,
    cache_dir: PathBuf,
    platform: Platform,
    env: Env,
    fetcher: Box<dyn Fetcher>,
    install_timeout: Duration,
    resolved: HashMap<String, ResolvedToolchain>,
    attempts: usize,
    cache_writes: usize,
}

impl ToolchainResolver {
    pub fn new(tools_dir: impl Into<PathBuf>, env: Env) -> Self {
        let tools_dir = tools_dir.into();
        Self {
            cache_dir: tools_dir.join("cache"),
            tools_dir,
            platform: Platform::current(),
            env,
            fetcher: Box::new(HttpFetcher::default()),
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
            resolved: HashMap::new(),
            attempts: 0,
            cache_writes: 0,
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Time limit for package-manager install commands.
    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn tools_dir(&self) -> &Path {
        &self.tools_dir
    }

    /// Candidates tried so far in this run.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Successful resolutions stored in the cache so far.
    pub fn cache_writes(&self) -> usize {
        self.cache_writes
    }

    /// Already-resolved tool, without probing.
    pub fn cached(&self, tool_id: &str) -> Option<&ResolvedToolchain> {
        self.resolved.get(tool_id)
    }

    /// Resolve `spec`, trying candidates in declared order.
    ///
    /// Fails with [`ReleaseError::ToolUnavailable`] listing every rejected
    /// candidate and its reason.
    pub fn resolve(
        &mut self,
        spec: &ToolSpec,
        runner: &dyn CommandRunner,
    ) -> Result<ResolvedToolchain> {
        if let Some(hit) = self.resolved.get(&spec.id) {
            log::debug!("{}: cached at {}", spec.id, hit.root_path.display());
            return Ok(hit.clone());
        }

        let mut failures = Vec::new();
        for candidate in &spec.candidates {
            self.attempts += 1;
            match self.try_candidate(spec, candidate, runner) {
                Ok((root, executable)) => {
                    log::info!(
                        "{}: using {} via {}",
                        spec.id,
                        root.display(),
                        candidate.kind()
                    );
                    let resolved = ResolvedToolchain {
                        tool_id: spec.id.clone(),
                        root_path: root,
                        source_kind: candidate.kind(),
                        executable,
                        home_vars: spec.home_vars.clone(),
                        path_subdir: spec.path_subdir.clone(),
                    };
                    self.resolved.insert(spec.id.clone(), resolved.clone());
                    self.cache_writes += 1;
                    return Ok(resolved);
                }
                Err(e) => {
                    let reason = format!("{}: {:#}", candidate.describe(), e);
                    log::debug!("{}: rejected {}", spec.id, reason);
                    failures.push(reason);
                }
            }
        }

        Err(ReleaseError::ToolUnavailable {
            tool: spec.id.clone(),
            attempts: failures,
        })
    }

    fn try_candidate(
        &self,
        spec: &ToolSpec,
        candidate: &ToolchainCandidate,
        runner: &dyn CommandRunner,
    ) -> anyhow::Result<(PathBuf, PathBuf)> {
        match candidate {
            ToolchainCandidate::EnvironmentVariable { var } => {
                let value = self
                    .env
                    .get(var)
                    .ok_or_else(|| anyhow!("not set"))?;
                let root = PathBuf::from(value);
                if !root.is_dir() {
                    bail!("'{}' does not exist", root.display());
                }
                let exe = find_marker(&root, &spec.marker).ok_or_else(|| {
                    anyhow!("'{}' has no {}", root.display(), spec.marker)
                })?;
                Ok((root, exe))
            }
            ToolchainCandidate::SystemPath { program } => self.probe_path(program),
            ToolchainCandidate::Download {
                url,
                archive_name,
                install_dir,
                extract_subdir,
            } => self.download(spec, url, archive_name, install_dir, extract_subdir.as_deref()),
            ToolchainCandidate::PackageManager {
                command,
                program,
                installs_to,
            } => {
                let (head, rest) = command
                    .split_first()
                    .ok_or_else(|| anyhow!("empty command"))?;
                let cmd = Cmd::new(head.as_str())
                    .args(rest.iter().map(|a| self.expand(a)))
                    .timeout(self.install_timeout)
                    .error_msg(format!("installing {}", spec.id));
                runner.run(&cmd)?;

                if let Some(dir) = installs_to {
                    let root = self.tools_dir.join(self.platform.expand(dir));
                    let exe = find_marker(&root, &spec.marker).ok_or_else(|| {
                        anyhow!("command succeeded but '{}' has no {}", root.display(), spec.marker)
                    })?;
                    return Ok((root, exe));
                }
                self.probe_path(program)
                    .context("command succeeded but the tool is still not discoverable")
            }
        }
    }

    fn probe_path(&self, program: &str) -> anyhow::Result<(PathBuf, PathBuf)> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let found = which::which_in(program, self.env.path_var(), cwd)
            .map_err(|_| anyhow!("'{program}' not found on PATH"))?;
        let exe = fs::canonicalize(&found).unwrap_or(found);
        Ok((install_root_of(&exe), exe))
    }

    fn download(
        &self,
        spec: &ToolSpec,
        url: &PlatformUrl,
        archive_name: &str,
        install_dir: &str,
        extract_subdir: Option<&str>,
    ) -> anyhow::Result<(PathBuf, PathBuf)> {
        let url = url
            .resolve(&self.platform)
            .ok_or_else(|| anyhow!("no download for platform {}", self.platform.tag()))?;
        let root = self.tools_dir.join(self.platform.expand(install_dir));

        if let Some(exe) = find_marker(&root, &spec.marker) {
            return Ok((root, exe));
        }

        let archive = self.cache_dir.join(self.platform.expand(archive_name));
        if !archive.is_file() {
            self.fetcher.fetch(&url, &archive)?;
        }

        let target = match extract_subdir {
            Some(sub) => root.join(sub),
            None => root.clone(),
        };
        let scratch = self.tools_dir.join(format!(".extract-{}", spec.id));
        if let Err(e) = extract::install_from_archive(&archive, &scratch, &target) {
            log::warn!(
                "{}: cached archive {} is unusable ({:#}), downloading again",
                spec.id,
                archive.display(),
                e
            );
            let _ = fs::remove_file(&archive);
            self.fetcher.fetch(&url, &archive)?;
            extract::install_from_archive(&archive, &scratch, &target)
                .context("extracting re-downloaded archive")?;
        }

        let exe = find_marker(&root, &spec.marker).ok_or_else(|| {
            anyhow!("'{}' has no {} after extraction", root.display(), spec.marker)
        })?;
        Ok((root, exe))
    }

    fn expand(&self, arg: &str) -> String {
        self.platform
            .expand(arg)
            .replace("{tools}", &self.tools_dir.display().to_string())
    }
}

/// The marker binary under `root`, trying Windows launcher extensions too.
pub fn find_marker(root: &Path, marker: &str) -> Option<PathBuf> {
    let base = root.join(marker);
    if base.is_file() {
        return Some(base);
    }
    ["exe", "bat", "cmd"]
        .iter()
        .map(|ext| {
            let mut p = base.clone().into_os_string();
            p.push(".");
            p.push(ext);
            PathBuf::from(p)
        })
        .find(|p| p.is_file())
}

/// `/opt/jdk/bin/java` installs at `/opt/jdk`; anything else at its parent.
fn install_root_of(exe: &Path) -> PathBuf {
    let parent = exe.parent().unwrap_or(exe);
    if parent.file_name().is_some_and(|n| n == "bin") {
        parent.parent().unwrap_or(parent).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}
