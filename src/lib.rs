//! Release pipeline for the Aura toolchain.
//!
//! Sequences the release build as an ordered list of named steps, resolves
//! external toolchains through ordered fallback candidates, runs external
//! processes with timeouts, and writes byte-for-byte reproducible archives
//! with optional attestation sidecars.
//!
//! - **Processes** - [`process::Cmd`] plus the [`process::CommandRunner`] seam
//! - **Toolchains** - [`toolchain::ToolchainResolver`] with per-run memoization
//! - **Packaging** - [`packager::DeterministicPackager`], repack, attestations
//! - **Pipeline** - [`pipeline::StepPipeline`], run log, summary, exit status
//! - **Manifest** - [`manifest::ManifestWriter`] over the staged release tree
//!
//! # Architecture
//!
//! ```text
//! release-builder (bin)
//!     │
//!     ├── steps ──────────┬── toolchain ── process
//!     │                   ├── packager
//!     │                   ├── signing ──── process
//!     │                   └── manifest
//!     └── pipeline ─────── config
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use release_builder::config::Settings;
//! use release_builder::pipeline::{RunContext, RunLog};
//!
//! let settings = Settings::load(".")?;
//! let mut ctx = RunContext::new(settings, RunLog::new());
//! let selection = vec!["core".to_string(), "verify".to_string()];
//! let report = release_builder::steps::registry().execute(&mut ctx, &selection);
//! std::process::exit(report.exit_code());
//! ```
//!
//! Runs are single-threaded and sequential. Concurrent runs against the same
//! tools, staging or output directories are not supported.

pub mod config;
pub mod error;
pub mod manifest;
pub mod packager;
pub mod pipeline;
pub mod process;
pub mod signing;
pub mod steps;
pub mod toolchain;

pub use config::{Env, ReleaseConfig, RunOptions, Settings};
pub use error::{ReleaseError, Result};
pub use manifest::{Manifest, ManifestWriter};
pub use packager::{Artifact, ArchiveFormat, BuildMetadata, DeterministicPackager};
pub use pipeline::{RunContext, RunLog, RunReport, Step, StepOutcome, StepPipeline, StepStatus};
pub use process::{Cmd, CommandOutput, CommandRunner, SystemRunner};
pub use toolchain::{ResolvedToolchain, ToolSpec, ToolchainCandidate, ToolchainResolver};
