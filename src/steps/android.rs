//! Android toolchain bootstrap and the sample APK.
//!
//! Every step here is a no-op under `--skip-android` / `AURA_SKIP_ANDROID=1`.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::toolchain_env;
use crate::packager::stage::copy_file;
use crate::packager::{BuildMetadata, DeterministicPackager};
use crate::pipeline::RunContext;
use crate::process::Cmd;
use crate::toolchain::catalog;

/// Build variants the APK script accepts.
pub const VARIANTS: &[&str] = &["debug", "release"];

const WRAPPER_TIMEOUT: Duration = Duration::from_secs(600);

fn skipped(ctx: &mut RunContext, what: &str) -> bool {
    if ctx.settings.skip_android() {
        ctx.log.warn(format!("{what} skipped (AURA_SKIP_ANDROID)"));
        true
    } else {
        false
    }
}

fn shell(ctx: &RunContext) -> &'static str {
    if ctx.settings.platform.is_windows() {
        "powershell"
    } else {
        "pwsh"
    }
}

/// Wrapper files that are absent from `project`.
pub fn missing_wrapper_files(project: &Path, windows: bool) -> Vec<PathBuf> {
    let launcher = if windows { "gradlew.bat" } else { "gradlew" };
    [
        project.join(launcher),
        project.join("gradle/wrapper/gradle-wrapper.jar"),
        project.join("gradle/wrapper/gradle-wrapper.properties"),
    ]
    .into_iter()
    .filter(|p| !p.is_file())
    .collect()
}

pub fn setup_toolchain(ctx: &mut RunContext) -> Result<()> {
    if skipped(ctx, "Android toolchain") {
        return Ok(());
    }
    ctx.resolve_tool(catalog::JDK)?;
    ctx.resolve_tool(catalog::ANDROID_SDK)?;
    ensure_gradle_wrapper(ctx)
}

fn ensure_gradle_wrapper(ctx: &mut RunContext) -> Result<()> {
    let project = ctx.settings.android_project();
    if !project.is_dir() {
        bail!("Android project not found at {}", project.display());
    }
    let windows = ctx.settings.platform.is_windows();
    let missing = missing_wrapper_files(&project, windows);
    if missing.is_empty() {
        ctx.log.success("✓ Gradle wrapper already present");
        return Ok(());
    }
    ctx.log.info(format!("Gradle wrapper incomplete ({} files missing)", missing.len()));

    let jdk = ctx.resolve_tool(catalog::JDK)?;
    let sdk = ctx.resolve_tool(catalog::ANDROID_SDK)?;
    let gradle = ctx.resolve_tool(catalog::GRADLE)?;
    let vars = toolchain_env(&ctx.settings.env, &[&jdk, &sdk, &gradle]);

    let cmd = Cmd::new(gradle.executable.to_string_lossy())
        .arg("wrapper")
        .dir(&project)
        .envs(vars)
        .timeout(WRAPPER_TIMEOUT)
        .error_msg("gradle wrapper task failed");
    ctx.run_command(cmd, "Generate Gradle wrapper")?;

    let still_missing = missing_wrapper_files(&project, windows);
    if !still_missing.is_empty() {
        bail!(
            "wrapper task succeeded but {} is still missing",
            still_missing[0].display()
        );
    }
    ctx.log.success("✓ Gradle wrapper generated");
    Ok(())
}

/// Run the APK build script once per requested variant. Unknown variants
/// are reported and skipped; the step fails if any variant failed.
pub fn build_apks(ctx: &mut RunContext) -> Result<()> {
    if skipped(ctx, "Android APK build") {
        return Ok(());
    }
    let script = ctx.settings.repo_root.join("sdk/android/build-apk.ps1");
    if !script.is_file() {
        bail!("APK build script not found at {}", script.display());
    }
    ensure_gradle_wrapper(ctx)?;

    let jdk = ctx.resolve_tool(catalog::JDK)?;
    let sdk = ctx.resolve_tool(catalog::ANDROID_SDK)?;
    let vars = toolchain_env(&ctx.settings.env, &[&jdk, &sdk]);

    let mut failed = Vec::new();
    for variant in ctx.settings.android_variants() {
        if !VARIANTS.contains(&variant.as_str()) {
            ctx.log.error(format!(
                "Unknown Android variant '{variant}' (expected one of: {})",
                VARIANTS.join(", ")
            ));
            failed.push(variant);
            continue;
        }

        let cmd = Cmd::new(shell(ctx))
            .args(["-ExecutionPolicy", "Bypass", "-File"])
            .arg_path(&script)
            .arg("-SdkRoot")
            .arg_path(&sdk.root_path)
            .args(["-BuildType", variant.as_str()])
            .dir(&ctx.settings.repo_root)
            .envs(vars.clone())
            .timeout(ctx.settings.long_timeout())
            .error_msg(format!("{variant} APK build failed"));
        match ctx.run_command(cmd, &format!("Build {variant} APK")) {
            Ok(_) => ctx.log.success(format!("✓ {variant} APK built")),
            Err(_) => failed.push(variant),
        }
    }

    if !failed.is_empty() {
        bail!("APK build failed for: {}", failed.join(", "));
    }
    Ok(())
}

/// Gradle output for `variant`; release builds without a signing config
/// come out as `app-release-unsigned.apk`.
pub fn built_apk(project: &Path, variant: &str) -> Option<PathBuf> {
    let dir = project.join("app/build/outputs/apk").join(variant);
    [
        dir.join(format!("app-{variant}.apk")),
        dir.join(format!("app-{variant}-unsigned.apk")),
    ]
    .into_iter()
    .find(|p| p.is_file())
}

/// Copy built APKs to `dist/android/<project>-<variant>.apk`.
///
/// A missing APK only fails the step when Android was not skipped. A copy
/// error is reported but does not fail the step.
pub fn package_apks(ctx: &mut RunContext) -> Result<()> {
    let project = ctx.settings.android_project();
    let project_name = project
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string());
    let out_dir = ctx.settings.dist_dir().join("android");
    let skip = ctx.settings.skip_android();

    let mut missing = Vec::new();
    for variant in ctx.settings.android_variants() {
        if !VARIANTS.contains(&variant.as_str()) {
            continue;
        }
        let Some(apk) = built_apk(&project, &variant) else {
            if skip {
                ctx.log.warn(format!("{variant} APK not found (Android skipped)"));
            } else {
                ctx.log.error(format!("{variant} APK not found under {}", project.display()));
                missing.push(variant);
            }
            continue;
        };

        let dest = out_dir.join(format!("{project_name}-{variant}.apk"));
        match copy_file(&apk, &dest) {
            Ok(size) => {
                ctx.log.success(format!(
                    "✓ APK packaged: {} ({:.1} MB)",
                    dest.display(),
                    size as f64 / (1024.0 * 1024.0)
                ));
                if ctx.settings.options.attest {
                    let meta = BuildMetadata::new("apk", ctx.settings.version())
                        .platform(format!("android-{variant}"));
                    DeterministicPackager::new(ctx.settings.dist_dir())
                        .attest_existing(&dest, &meta)
                        .with_context(|| format!("attesting {}", dest.display()))?;
                }
            }
            Err(e) => ctx.log.warn(format!("Could not copy APK: {e:#}")),
        }
    }

    if !missing.is_empty() {
        bail!("APK not found for: {}", missing.join(", "));
    }
    Ok(())
}
