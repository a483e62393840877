//! Desktop IDE bundle and the editor extension.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::packager::stage::copy_file;
use crate::packager::{safe_replace_existing, BuildMetadata, DeterministicPackager};
use crate::pipeline::RunContext;
use crate::process::Cmd;

/// File the extension's `package:vsix` script writes into `dist/`.
pub const VSIX_OUTPUT: &str = "aura-sentinel.vsix";

fn npm(ctx: &RunContext, dir: &Path, args: &[&str]) -> Cmd {
    Cmd::new(ctx.settings.npm())
        .args(args.iter().copied())
        .dir(dir)
        .timeout(ctx.settings.command_timeout())
        .error_msg(format!("npm {} failed", args.join(" ")))
}

fn project_dir(path: PathBuf, what: &str) -> Result<PathBuf> {
    if !path.is_dir() {
        bail!("{what} not found at {}", path.display());
    }
    Ok(path)
}

pub fn build_ide(ctx: &mut RunContext) -> Result<()> {
    let dir = project_dir(ctx.settings.ide_dir(), "IDE project")?;

    ctx.log.info("Installing Node dependencies...");
    let install = npm(ctx, &dir, &["install"]);
    ctx.run_command(install, "Install npm packages")?;

    let build = npm(ctx, &dir, &["run", "build"]);
    ctx.run_command(build, "Build IDE bundle")?;

    ctx.log.success("✓ IDE bundle built");
    Ok(())
}

/// Versioned copy of the extension, repacked so identical sources give an
/// identical `.vsix`.
pub fn package_vsix(ctx: &mut RunContext) -> Result<()> {
    let dir = project_dir(ctx.settings.vscode_dir(), "editor extension")?;

    let ci = npm(ctx, &dir, &["ci"]);
    ctx.run_command(ci, "Install extension dependencies")?;
    let package = npm(ctx, &dir, &["run", "package:vsix"]);
    ctx.run_command(package, "Package extension")?;

    let dist = ctx.settings.dist_dir();
    let produced = dist.join(VSIX_OUTPUT);
    if !produced.is_file() {
        bail!("package script did not produce {}", produced.display());
    }

    let version = ctx.settings.version().to_string();
    let out = dist.join(format!("aura-sentinel-v{version}.vsix"));
    safe_replace_existing(&out)?;
    copy_file(&produced, &out)?;

    let packager = DeterministicPackager::new(&dist);
    let sha = packager
        .repack(&out)
        .with_context(|| format!("repacking {}", out.display()))?;
    ctx.log.success(format!("✓ {} ({})", out.display(), &sha[..12]));

    if ctx.settings.options.attest {
        let artifact = packager.attest_existing(&out, &BuildMetadata::new("vsix", version))?;
        if let Some(sidecar) = artifact.attestation {
            ctx.log.info(format!("Attestation: {}", sidecar.display()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Env, RunOptions};
    use crate::packager::archive::zip_entry_names;
    use crate::packager::attest::{sidecar_path, AttestationRecord};
    use crate::process::testing::RecordingRunner;
    use crate::steps::testing::context;
    use std::fs::{self, File};
    use std::io::Write;
    use std::rc::Rc;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn vsix(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for name in ["extension/package.json", "[Content_Types].xml"] {
            zip.start_file(name, FileOptions::default()).unwrap();
            zip.write_all(name.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn ide_runs_install_then_build() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("editors/sentinel-app")).unwrap();
        let runner = Rc::new(RecordingRunner::default());
        let mut ctx = context(tmp.path(), Env::default(), &runner);

        build_ide(&mut ctx).unwrap();
        assert_eq!(runner.calls(), vec!["npm install", "npm run build"]);
        let ordinary = ctx.settings.command_timeout();
        assert_eq!(runner.timeouts(), vec![ordinary, ordinary]);
    }

    #[test]
    fn ide_stops_after_failed_install() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("editors/sentinel-app")).unwrap();
        let runner = Rc::new(RecordingRunner::failing(&["npm"]));
        let mut ctx = context(tmp.path(), Env::default(), &runner);

        assert!(build_ide(&mut ctx).is_err());
        assert_eq!(runner.calls(), vec!["npm install"]);
    }

    #[test]
    fn missing_ide_project_fails_without_commands() {
        let tmp = TempDir::new().unwrap();
        let runner = Rc::new(RecordingRunner::default());
        let mut ctx = context(tmp.path(), Env::default(), &runner);
        let err = build_ide(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("IDE project not found"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn vsix_is_versioned_repacked_and_attested() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("editors/vscode")).unwrap();
        vsix(&tmp.path().join("dist").join(VSIX_OUTPUT));

        let runner = Rc::new(RecordingRunner::default());
        let env = Env::default();
        let mut ctx = context(tmp.path(), env, &runner);
        ctx.settings.options = RunOptions {
            attest: true,
            ..RunOptions::default()
        };
        package_vsix(&mut ctx).unwrap();

        assert_eq!(runner.calls(), vec!["npm ci", "npm run package:vsix"]);
        let version = ctx.settings.version().to_string();
        let out = tmp.path().join(format!("dist/aura-sentinel-v{version}.vsix"));
        assert_eq!(
            zip_entry_names(&out).unwrap(),
            vec!["[Content_Types].xml", "extension/package.json"]
        );

        let record = AttestationRecord::read(&sidecar_path(&out)).unwrap();
        assert_eq!(record.meta.kind, "vsix");
        assert_eq!(record.artifact, format!("aura-sentinel-v{version}.vsix"));
    }

    #[test]
    fn vsix_missing_output_is_a_failure() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("editors/vscode")).unwrap();
        let runner = Rc::new(RecordingRunner::default());
        let mut ctx = context(tmp.path(), Env::default(), &runner);
        let err = package_vsix(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("did not produce"));
    }
}
