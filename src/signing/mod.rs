//! Authenticode signing of release binaries.
//!
//! Credentials come from the environment: either a certificate thumbprint
//! in the user's store (`AURA_SIGN_THUMBPRINT`) or a `.pfx` file with its
//! password (`AURA_SIGN_PFX`, `AURA_SIGN_PFX_PASSWORD`). Exactly one mode
//! must be configured; anything else is a configuration error raised before
//! the signing tool is launched.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Env;
use crate::error::{ReleaseError, Result};
use crate::process::{Cmd, CommandRunner};
use crate::toolchain::Platform;

pub const DEFAULT_SIGNTOOL: &str = "signtool";
pub const DEFAULT_TIMESTAMP_URL: &str = "http://timestamp.digicert.com";

#[derive(Clone, PartialEq, Eq)]
pub enum SigningMode {
    CertificateStore { thumbprint: String },
    CertificateFile { path: PathBuf, password: String },
}

impl std::fmt::Debug for SigningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningMode::CertificateStore { thumbprint } => f
                .debug_struct("CertificateStore")
                .field("thumbprint", thumbprint)
                .finish(),
            SigningMode::CertificateFile { path, .. } => f
                .debug_struct("CertificateFile")
                .field("path", path)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningConfig {
    pub mode: SigningMode,
    pub signtool: String,
    pub timestamp_url: String,
}

impl SigningConfig {
    /// Read signing credentials from `env`.
    pub fn from_env(env: &Env) -> Result<Self> {
        let thumbprint = env.get("AURA_SIGN_THUMBPRINT");
        let pfx = env.get("AURA_SIGN_PFX");
        let password = env.get("AURA_SIGN_PFX_PASSWORD");

        let mode = match (thumbprint, pfx) {
            (Some(_), Some(_)) => {
                return Err(ReleaseError::config(
                    "both AURA_SIGN_THUMBPRINT and AURA_SIGN_PFX are set; choose one signing mode",
                ))
            }
            (Some(thumb), None) => SigningMode::CertificateStore {
                thumbprint: thumb.to_string(),
            },
            (None, Some(path)) => {
                let password = password.ok_or_else(|| {
                    ReleaseError::config(
                        "AURA_SIGN_PFX_PASSWORD is required when using AURA_SIGN_PFX",
                    )
                })?;
                SigningMode::CertificateFile {
                    path: PathBuf::from(path),
                    password: password.to_string(),
                }
            }
            (None, None) => {
                return Err(ReleaseError::config(
                    "signing requires either AURA_SIGN_THUMBPRINT (certificate store) \
                     or AURA_SIGN_PFX + AURA_SIGN_PFX_PASSWORD",
                ))
            }
        };

        Ok(Self {
            mode,
            signtool: env
                .get("AURA_SIGNTOOL")
                .unwrap_or(DEFAULT_SIGNTOOL)
                .to_string(),
            timestamp_url: env
                .get("AURA_SIGN_TIMESTAMP_URL")
                .unwrap_or(DEFAULT_TIMESTAMP_URL)
                .to_string(),
        })
    }

    /// The signtool invocation for `path`.
    pub fn command(&self, path: &Path) -> Cmd {
        let cmd = Cmd::new(self.signtool.as_str()).arg("sign");
        let cmd = match &self.mode {
            SigningMode::CertificateStore { thumbprint } => {
                cmd.args(["/sha1", thumbprint.as_str()])
            }
            SigningMode::CertificateFile { path, password } => cmd
                .arg("/f")
                .arg_path(path)
                .args(["/p", password.as_str()]),
        };
        cmd.args(["/fd", "sha256", "/tr", self.timestamp_url.as_str(), "/td", "sha256"])
            .arg_path(path)
            .timeout(Duration::from_secs(600))
            .error_msg(format!("signing {}", path.display()))
    }
}

/// Signs files on Windows hosts; elsewhere signing is logged and skipped.
#[derive(Debug, Clone)]
pub struct Signer {
    config: SigningConfig,
    platform: Platform,
}

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignResult {
    Signed,
    SkippedHost,
    SkippedMissing,
}

impl Signer {
    /// Validate credentials up front. Fails with a configuration error
    /// before any process is launched.
    pub fn from_env(env: &Env, platform: Platform) -> Result<Self> {
        Ok(Self {
            config: SigningConfig::from_env(env)?,
            platform,
        })
    }

    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    pub fn sign(&self, path: &Path, runner: &dyn CommandRunner) -> Result<SignResult> {
        if !self.platform.is_windows() {
            log::info!("skip signing (not Windows): {}", path.display());
            return Ok(SignResult::SkippedHost);
        }
        if !path.is_file() {
            log::warn!("skip signing (missing): {}", path.display());
            return Ok(SignResult::SkippedMissing);
        }
        runner.run(&self.config.command(path))?;
        Ok(SignResult::Signed)
    }
}
