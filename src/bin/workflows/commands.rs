use anyhow::{Context, Result};
use std::path::Path;

use release_builder::config::{RunOptions, Settings};
use release_builder::error::ReleaseError;
use release_builder::manifest::ManifestWriter;
use release_builder::packager::{ArchiveFormat, BuildMetadata, DeterministicPackager};
use release_builder::pipeline::{parse_selection, RunContext, RunLog};
use release_builder::steps;

/// Run one command line; the value is the process exit status.
pub(crate) fn dispatch(args: &[String]) -> Result<u8> {
    match args {
        [cmd, rest @ ..] if cmd == "run" => run_pipeline(rest),
        [cmd] if cmd == "steps" => {
            list_steps();
            Ok(0)
        }
        [cmd, staging, output, rest @ ..] if cmd == "package" => {
            package(Path::new(staging), Path::new(output), rest).map(|()| 0)
        }
        [cmd, archive] if cmd == "repack" => repack(Path::new(archive)).map(|()| 0),
        [cmd, root] if cmd == "manifest" => manifest(Path::new(root)).map(|()| 0),
        _ => Err(ReleaseError::config(crate::usage()).into()),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct RunArgs {
    steps: Option<String>,
    options: RunOptions,
}

fn option_value<'a>(
    flag: &str,
    iter: &mut impl Iterator<Item = &'a String>,
) -> Result<&'a String, ReleaseError> {
    iter.next()
        .ok_or_else(|| ReleaseError::config(format!("{flag} requires a value")))
}

pub(crate) fn parse_run_args(args: &[String]) -> Result<RunArgs, ReleaseError> {
    let mut parsed = RunArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--steps" => parsed.steps = Some(option_value("--steps", &mut iter)?.clone()),
            s if s.starts_with("--steps=") => {
                parsed.steps = Some(s["--steps=".len()..].to_string());
            }
            "--skip-android" => parsed.options.skip_android = true,
            "--attest" => parsed.options.attest = true,
            "--sign" => parsed.options.sign = true,
            other => {
                return Err(ReleaseError::config(format!(
                    "unknown option for `run`: '{other}'"
                )))
            }
        }
    }
    Ok(parsed)
}

fn run_pipeline(args: &[String]) -> Result<u8> {
    let parsed = parse_run_args(args)?;
    let repo_root = crate::workflows::locate_repo_root()?;
    let settings = Settings::load(&repo_root)
        .with_context(|| format!("loading release settings for '{}'", repo_root.display()))?
        .with_options(parsed.options);

    let pipeline = steps::registry();
    let selection = match parsed.steps {
        Some(raw) => parse_selection(&raw),
        None => crate::workflows::select_steps(&pipeline)?,
    };

    let mut ctx = RunContext::new(settings, RunLog::new());
    let report = pipeline.execute(&mut ctx, &selection);
    Ok(u8::try_from(report.exit_code()).unwrap_or(1))
}

fn list_steps() {
    for step in steps::registry().steps() {
        let fatal = if step.fatal { " (fatal)" } else { "" };
        println!("{:<12} {}{}", step.key, step.name, fatal);
    }
    println!();
    for b in steps::BUNDLES {
        println!("{:<12} {}", b.key, b.steps.join(","));
    }
}

fn package(staging: &Path, output: &Path, rest: &[String]) -> Result<()> {
    let mut attest = false;
    let mut format = ArchiveFormat::default();
    let mut prefix = None;
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--attest" => attest = true,
            "--format" => format = option_value("--format", &mut iter)?.parse()?,
            "--prefix" => prefix = Some(option_value("--prefix", &mut iter)?.clone()),
            other => {
                return Err(ReleaseError::config(format!(
                    "unknown option for `package`: '{other}'"
                ))
                .into())
            }
        }
    }

    let base = output.parent().unwrap_or(Path::new("."));
    let mut packager = DeterministicPackager::new(base).format(format);
    if let Some(prefix) = prefix {
        packager = packager.prefix(prefix);
    }
    let version = crate::workflows::locate_repo_root()
        .ok()
        .and_then(|root| Settings::load(root).ok())
        .map(|s| s.version().to_string())
        .unwrap_or_else(|| "0.0.0".to_string());
    let meta = BuildMetadata::new("archive", version);

    let artifact = packager
        .package(staging, output, attest, &meta)
        .with_context(|| format!("packaging '{}'", staging.display()))?;
    println!("{}  {}", artifact.content_hash, artifact.path.display());
    if let Some(sidecar) = artifact.attestation {
        println!("attestation: {}", sidecar.display());
    }
    Ok(())
}

fn repack(archive: &Path) -> Result<()> {
    let base = archive.parent().unwrap_or(Path::new("."));
    let sha = DeterministicPackager::new(base)
        .repack(archive)
        .with_context(|| format!("repacking '{}'", archive.display()))?;
    println!("{sha}  {}", archive.display());
    Ok(())
}

fn manifest(root: &Path) -> Result<()> {
    let version = crate::workflows::locate_repo_root()
        .ok()
        .and_then(|repo| Settings::load(repo).ok())
        .map(|s| s.version().to_string())
        .unwrap_or_else(|| "0.0.0".to_string());
    let (manifest, path) = ManifestWriter::new(version)
        .write(root)
        .with_context(|| format!("writing manifest for '{}'", root.display()))?;
    println!(
        "{} ({} files, {} bytes)",
        path.display(),
        manifest.file_count(),
        manifest.total_bytes()
    );
    Ok(())
}
