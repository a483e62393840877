//! Native compiler, LSP and package-manager binaries.

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::pipeline::RunContext;
use crate::process::Cmd;

pub fn build_core(ctx: &mut RunContext) -> Result<()> {
    let cmd = Cmd::new("cargo")
        .args(["build", "--release"])
        .dir(&ctx.settings.repo_root)
        .timeout(ctx.settings.command_timeout())
        .error_msg("cargo release build failed");
    ctx.run_command(cmd, "Compile compiler, LSP and package manager")?;
    ctx.log.success("✓ Native core built");
    Ok(())
}

/// `<target>/release/<name><exe suffix>` for every configured binary.
pub fn expected_binaries(ctx: &RunContext) -> Vec<(String, PathBuf)> {
    let dir = ctx.settings.target_dir().join("release");
    let suffix = ctx.settings.platform.exe_suffix();
    ctx.settings
        .config
        .binaries
        .iter()
        .map(|name| (name.clone(), dir.join(format!("{name}{suffix}"))))
        .collect()
}

pub fn verify_binaries(ctx: &mut RunContext) -> Result<()> {
    let mut missing = Vec::new();
    for (name, path) in expected_binaries(ctx) {
        match path.metadata() {
            Ok(meta) if meta.is_file() => {
                let mb = meta.len() as f64 / (1024.0 * 1024.0);
                ctx.log.success(format!("✓ {name}: {mb:.1} MB"));
            }
            _ => {
                ctx.log.error(format!("✗ {name}: not found at {}", path.display()));
                missing.push(name);
            }
        }
    }
    if !missing.is_empty() {
        bail!("missing binaries: {}", missing.join(", "));
    }
    Ok(())
}
