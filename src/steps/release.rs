//! Release tree staging, the SDK archive and the manifest.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::native::expected_binaries;
use crate::manifest::{ManifestWriter, MANIFEST_FILE};
use crate::packager::stage::copy_file;
use crate::packager::{copy_tree, BuildMetadata, DeterministicPackager};
use crate::pipeline::RunContext;
use crate::signing::{SignResult, Signer};

/// Top-level directories of the release tree.
pub const RELEASE_DIRS: &[&str] = &["bin", "apps", "sdk", "docs", "examples", "android"];

/// Root directory inside the SDK archive.
pub const SDK_PREFIX: &str = "AuraSDK";

/// Files directly under `dir` with the given extension, sorted by name.
fn files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading '{}'", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Rebuild the release tree from scratch so nothing from an earlier run
/// survives into it.
pub fn create_distribution(ctx: &mut RunContext) -> Result<()> {
    let root = ctx.settings.release_dir();
    if ctx.settings.repo_root.starts_with(&root) {
        bail!("release_dir {} contains the repository; refusing to clear it", root.display());
    }
    if root.exists() {
        fs::remove_dir_all(&root).with_context(|| format!("clearing '{}'", root.display()))?;
        ctx.log.info(format!("Cleared previous release tree {}", root.display()));
    }
    for dir in RELEASE_DIRS {
        let path = root.join(dir);
        fs::create_dir_all(&path).with_context(|| format!("creating '{}'", path.display()))?;
    }

    for (_, src) in expected_binaries(ctx) {
        if src.is_file() {
            let name = file_name(&src);
            copy_file(&src, &root.join("bin").join(&name))?;
            ctx.log.info(format!("Copied {name}"));
        }
    }

    let ide_dist = ctx.settings.ide_dir().join("dist");
    if ide_dist.is_dir() {
        copy_tree(&ide_dist, &root.join("apps/sentinel"))?;
        ctx.log.info("Copied IDE bundle");
    }

    let sdk = ctx.settings.repo_root.join("sdk");
    if sdk.is_dir() {
        copy_tree(&sdk, &root.join("sdk"))?;
        ctx.log.info("Copied SDK");
    }

    for doc in files_with_extension(&ctx.settings.repo_root.join("docs"), "md")? {
        let name = file_name(&doc);
        copy_file(&doc, &root.join("docs").join(&name))?;
        ctx.log.info(format!("Copied {name}"));
    }

    for apk in files_with_extension(&ctx.settings.dist_dir().join("android"), "apk")? {
        let name = file_name(&apk);
        copy_file(&apk, &root.join("android").join(&name))?;
        ctx.log.info(format!("Copied {name}"));
    }

    ctx.log.success(format!("✓ Distribution created in {}", root.display()));
    Ok(())
}

/// Sign everything in the release `bin/` directory.
fn sign_binaries(ctx: &mut RunContext, bin: &Path) -> Result<()> {
    let signer = Signer::from_env(&ctx.settings.env, ctx.settings.platform.clone())?;
    let mut files: Vec<PathBuf> = fs::read_dir(bin)
        .with_context(|| format!("reading '{}'", bin.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    for file in files {
        let result = signer.sign(&file, ctx.runner())?;
        match result {
            SignResult::Signed => ctx.log.success(format!("✓ Signed {}", file_name(&file))),
            SignResult::SkippedHost => {
                ctx.log.warn(format!("Signing skipped on this host: {}", file_name(&file)))
            }
            SignResult::SkippedMissing => {}
        }
    }
    Ok(())
}

/// Deterministic `aura-sdk-v<version>-<platform>.zip` of the release tree.
/// The timestamped manifest is left out so the archive depends only on the
/// staged files.
pub fn package_sdk(ctx: &mut RunContext) -> Result<()> {
    let root = ctx.settings.release_dir();
    if !root.is_dir() {
        bail!(
            "release tree not found at {} (run the dist step first)",
            root.display()
        );
    }

    if ctx.settings.options.sign {
        sign_binaries(ctx, &root.join("bin"))?;
    }

    let dist = ctx.settings.dist_dir();
    let version = ctx.settings.version().to_string();
    let tag = ctx.settings.platform.tag();
    let out = dist.join(format!("aura-sdk-v{version}-{tag}.zip"));
    let meta = BuildMetadata::new("sdk-zip", version).platform(tag);

    let artifact = DeterministicPackager::new(&dist)
        .prefix(SDK_PREFIX)
        .exclude(MANIFEST_FILE)
        .package(&root, &out, ctx.settings.options.attest, &meta)?;
    ctx.log.success(format!(
        "✓ {} ({:.1} MB, sha256 {})",
        artifact.path.display(),
        artifact.size as f64 / (1024.0 * 1024.0),
        artifact.content_hash
    ));
    if let Some(sidecar) = &artifact.attestation {
        ctx.log.info(format!("Attestation: {}", sidecar.display()));
    }
    Ok(())
}

pub fn write_manifest(ctx: &mut RunContext) -> Result<()> {
    let root = ctx.settings.release_dir();
    let (manifest, path) = ManifestWriter::new(ctx.settings.version()).write(&root)?;
    ctx.log.success(format!(
        "✓ Manifest generated: {} ({} files in {} categories)",
        path.display(),
        manifest.file_count(),
        manifest.components.len()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Env, RunOptions};
    use crate::error::configuration_error;
    use crate::packager::archive::zip_entry_names;
    use crate::packager::attest::{sidecar_path, AttestationRecord};
    use crate::process::testing::RecordingRunner;
    use crate::steps::testing::context;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn repo(root: &Path) {
        write(&root.join("target/release/aura"), "aura");
        write(&root.join("target/release/aura-lsp"), "lsp");
        write(&root.join("editors/sentinel-app/dist/index.html"), "<html>");
        write(&root.join("sdk/std/core.aura"), "fn main");
        write(&root.join("docs/GUIDE.md"), "# guide");
        write(&root.join("docs/notes.txt"), "skip");
        write(&root.join("dist/android/AuraSentinelSample-debug.apk"), "apk");
    }

    #[test]
    fn distribution_tree_layout() {
        let tmp = TempDir::new().unwrap();
        repo(tmp.path());
        let runner = Rc::new(RecordingRunner::default());
        let mut ctx = context(tmp.path(), Env::default(), &runner);

        create_distribution(&mut ctx).unwrap();
        let rel = tmp.path().join("dist-release");
        for dir in RELEASE_DIRS {
            assert!(rel.join(dir).is_dir(), "{dir}");
        }
        assert!(rel.join("bin/aura").is_file());
        assert!(rel.join("bin/aura-lsp").is_file());
        assert!(!rel.join("bin/aura-pkg").exists());
        assert!(rel.join("apps/sentinel/index.html").is_file());
        assert!(rel.join("sdk/std/core.aura").is_file());
        assert!(rel.join("docs/GUIDE.md").is_file());
        assert!(!rel.join("docs/notes.txt").exists());
        assert!(rel.join("android/AuraSentinelSample-debug.apk").is_file());
    }

    #[test]
    fn sdk_zip_is_prefixed_and_attested() {
        let tmp = TempDir::new().unwrap();
        repo(tmp.path());
        let runner = Rc::new(RecordingRunner::default());
        let mut ctx = context(tmp.path(), Env::default(), &runner);
        ctx.settings.options = RunOptions {
            attest: true,
            ..RunOptions::default()
        };

        create_distribution(&mut ctx).unwrap();
        package_sdk(&mut ctx).unwrap();

        let version = ctx.settings.version().to_string();
        let out = tmp
            .path()
            .join(format!("dist/aura-sdk-v{version}-linux-x86_64.zip"));
        let names = zip_entry_names(&out).unwrap();
        assert!(names.iter().all(|n| n.starts_with("AuraSDK/")));
        assert!(names.contains(&"AuraSDK/bin/aura".to_string()));

        let record = AttestationRecord::read(&sidecar_path(&out)).unwrap();
        assert_eq!(record.meta.kind, "sdk-zip");
        assert_eq!(record.meta.platform.as_deref(), Some("linux-x86_64"));
    }

    #[test]
    fn sdk_zip_is_reproducible() {
        let tmp = TempDir::new().unwrap();
        repo(tmp.path());
        let runner = Rc::new(RecordingRunner::default());
        let mut ctx = context(tmp.path(), Env::default(), &runner);
        create_distribution(&mut ctx).unwrap();

        let version = ctx.settings.version().to_string();
        let out = tmp
            .path()
            .join(format!("dist/aura-sdk-v{version}-linux-x86_64.zip"));
        package_sdk(&mut ctx).unwrap();
        let first = fs::read(&out).unwrap();
        package_sdk(&mut ctx).unwrap();
        assert_eq!(first, fs::read(&out).unwrap());
    }

    #[test]
    fn repeated_runs_package_only_current_sources() {
        let tmp = TempDir::new().unwrap();
        repo(tmp.path());
        write(&tmp.path().join("docs/OLD.md"), "# old");
        let runner = Rc::new(RecordingRunner::default());
        let mut ctx = context(tmp.path(), Env::default(), &runner);

        let version = ctx.settings.version().to_string();
        let out = tmp
            .path()
            .join(format!("dist/aura-sdk-v{version}-linux-x86_64.zip"));
        let release_cycle = |ctx: &mut RunContext| {
            create_distribution(ctx).unwrap();
            package_sdk(ctx).unwrap();
            write_manifest(ctx).unwrap();
            fs::read(&out).unwrap()
        };

        let first = release_cycle(&mut ctx);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = release_cycle(&mut ctx);
        assert_eq!(first, second);
        let names = zip_entry_names(&out).unwrap();
        assert!(!names.contains(&format!("{SDK_PREFIX}/{MANIFEST_FILE}")), "{names:?}");
        assert!(names.contains(&"AuraSDK/docs/OLD.md".to_string()));

        fs::remove_file(tmp.path().join("docs/OLD.md")).unwrap();
        release_cycle(&mut ctx);
        let names = zip_entry_names(&out).unwrap();
        assert!(!names.contains(&"AuraSDK/docs/OLD.md".to_string()), "{names:?}");
        assert!(!tmp.path().join("dist-release/docs/OLD.md").exists());
        assert!(tmp.path().join("dist-release").join(MANIFEST_FILE).is_file());
    }

    #[test]
    fn release_dir_over_the_repository_is_not_cleared() {
        let tmp = TempDir::new().unwrap();
        repo(tmp.path());
        let runner = Rc::new(RecordingRunner::default());
        let mut ctx = context(tmp.path(), Env::default(), &runner);
        ctx.settings.config.release_dir = PathBuf::from(".");

        let err = create_distribution(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("refusing to clear"), "{err}");
        assert!(tmp.path().join("docs/GUIDE.md").is_file());
    }

    #[test]
    fn signing_without_credentials_is_a_configuration_error() {
        let tmp = TempDir::new().unwrap();
        repo(tmp.path());
        let runner = Rc::new(RecordingRunner::default());
        let mut ctx = context(tmp.path(), Env::default(), &runner);
        create_distribution(&mut ctx).unwrap();
        ctx.settings.options.sign = true;

        let err = package_sdk(&mut ctx).unwrap_err();
        assert!(configuration_error(&err).is_some());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn sdk_requires_release_tree() {
        let tmp = TempDir::new().unwrap();
        let runner = Rc::new(RecordingRunner::default());
        let mut ctx = context(tmp.path(), Env::default(), &runner);
        let err = package_sdk(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("run the dist step first"));
    }

    #[test]
    fn manifest_lands_in_release_tree() {
        let tmp = TempDir::new().unwrap();
        repo(tmp.path());
        let runner = Rc::new(RecordingRunner::default());
        let mut ctx = context(tmp.path(), Env::default(), &runner);
        create_distribution(&mut ctx).unwrap();
        write_manifest(&mut ctx).unwrap();

        let path = tmp.path().join("dist-release").join(MANIFEST_FILE);
        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(doc["components"]["bin"][0]["file"], "bin/aura");
        assert_eq!(doc["components"]["docs"][0]["file"], "docs/GUIDE.md");
    }
}
