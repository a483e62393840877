//! Built-in tool specs for the Android build.

use std::path::Path;

use super::{Platform, PlatformUrl, ToolSpec, ToolchainCandidate};
use crate::config::Env;

pub const JDK: &str = "jdk";
pub const ANDROID_SDK: &str = "android-sdk";
pub const GRADLE: &str = "gradle";

pub const GRADLE_VERSION: &str = "8.6";

const ADOPTIUM: &str = "https://api.adoptium.net/v3/binary/latest/17/ga";
const CMDLINE_TOOLS: &str = "https://dl.google.com/android/repository/commandlinetools";
const CMDLINE_TOOLS_BUILD: &str = "11076708";

/// JDK 17: `JAVA_HOME`, `java` on PATH, `AURA_JDK_URL`, Temurin, Microsoft
/// OpenJDK, then winget or Homebrew.
pub fn jdk(env: &Env, platform: &Platform) -> ToolSpec {
    let mut spec = ToolSpec::new(JDK, "bin/java")
        .home_var("JAVA_HOME")
        .path_subdir("bin")
        .candidate(ToolchainCandidate::env_var("JAVA_HOME"))
        .candidate(ToolchainCandidate::system_path("java"));

    if let Some(url) = env.get("AURA_JDK_URL") {
        spec = spec.candidate(override_download(url, "jdk-override", "jdk-17"));
    }

    spec = spec
        .candidate(ToolchainCandidate::download(
            PlatformUrl::per_platform([
                ("windows-x86_64", format!("{ADOPTIUM}/windows/x64/jdk/hotspot/normal/eclipse")),
                ("windows-aarch64", format!("{ADOPTIUM}/windows/aarch64/jdk/hotspot/normal/eclipse")),
                ("linux-x86_64", format!("{ADOPTIUM}/linux/x64/jdk/hotspot/normal/eclipse")),
                ("linux-aarch64", format!("{ADOPTIUM}/linux/aarch64/jdk/hotspot/normal/eclipse")),
                ("macos-x86_64", format!("{ADOPTIUM}/mac/x64/jdk/hotspot/normal/eclipse")),
                ("macos-aarch64", format!("{ADOPTIUM}/mac/aarch64/jdk/hotspot/normal/eclipse")),
            ]),
            "temurin-jdk17.{ext}",
            "jdk-17",
        ))
        .candidate(ToolchainCandidate::download(
            PlatformUrl::per_platform([(
                "windows-x86_64",
                "https://aka.ms/download-jdk/microsoft-jdk-17.0.10-windows-x64.zip",
            )]),
            "microsoft-jdk17.zip",
            "jdk-17",
        ));

    if platform.is_windows() {
        spec = spec.candidate(ToolchainCandidate::PackageManager {
            command: [
                "winget",
                "install",
                "-e",
                "--id",
                "Microsoft.OpenJDK.17",
                "--accept-source-agreements",
                "--accept-package-agreements",
            ]
            .map(String::from)
            .to_vec(),
            program: "java".into(),
            installs_to: None,
        });
    } else if platform.os == "macos" {
        spec = spec.candidate(ToolchainCandidate::PackageManager {
            command: ["brew", "install", "openjdk@17"].map(String::from).to_vec(),
            program: "java".into(),
            installs_to: None,
        });
    }
    spec
}

/// Android SDK with `cmdline-tools/latest`. Downloads the command-line tools
/// directly; the repository setup script is the last resort.
pub fn android_sdk(platform: &Platform, repo_root: &Path) -> ToolSpec {
    let mut spec = ToolSpec::new(ANDROID_SDK, "cmdline-tools/latest/bin/sdkmanager")
        .home_var("ANDROID_SDK_ROOT")
        .home_var("ANDROID_HOME")
        .candidate(ToolchainCandidate::env_var("AURA_ANDROID_SDK_ROOT"))
        .candidate(ToolchainCandidate::env_var("ANDROID_SDK_ROOT"))
        .candidate(ToolchainCandidate::env_var("ANDROID_HOME"))
        .candidate(ToolchainCandidate::Download {
            url: PlatformUrl::per_platform([
                ("windows", format!("{CMDLINE_TOOLS}-win-{CMDLINE_TOOLS_BUILD}_latest.zip")),
                ("linux", format!("{CMDLINE_TOOLS}-linux-{CMDLINE_TOOLS_BUILD}_latest.zip")),
                ("macos", format!("{CMDLINE_TOOLS}-mac-{CMDLINE_TOOLS_BUILD}_latest.zip")),
            ]),
            archive_name: format!("commandlinetools-{{os}}-{CMDLINE_TOOLS_BUILD}.zip"),
            install_dir: "android-sdk".into(),
            extract_subdir: Some("cmdline-tools/latest".into()),
        });

    let setup = repo_root.join("sdk/android/setup-android.ps1");
    if setup.is_file() {
        let shell = if platform.is_windows() { "powershell" } else { "pwsh" };
        spec = spec.candidate(ToolchainCandidate::PackageManager {
            command: vec![
                shell.into(),
                "-ExecutionPolicy".into(),
                "Bypass".into(),
                "-File".into(),
                setup.display().to_string(),
                "-InstallRoot".into(),
                "{tools}/android-sdk".into(),
                "-AcceptLicenses".into(),
            ],
            program: "sdkmanager".into(),
            installs_to: Some("android-sdk".into()),
        });
    }
    spec
}

/// Gradle distribution used to generate the project wrapper.
pub fn gradle(env: &Env) -> ToolSpec {
    let install = format!("gradle-{GRADLE_VERSION}");
    let mut spec = ToolSpec::new(GRADLE, "bin/gradle")
        .home_var("GRADLE_HOME")
        .path_subdir("bin")
        .candidate(ToolchainCandidate::env_var("GRADLE_HOME"))
        .candidate(ToolchainCandidate::system_path("gradle"));

    if let Some(url) = env.get("AURA_GRADLE_ZIP_URL") {
        spec = spec.candidate(override_download(url, "gradle-override", &install));
    }

    spec.candidate(ToolchainCandidate::download(
        PlatformUrl::fixed(format!(
            "https://services.gradle.org/distributions/gradle-{GRADLE_VERSION}-bin.zip"
        )),
        format!("gradle-{GRADLE_VERSION}-bin.zip"),
        install,
    ))
}

/// A download candidate for a user-supplied URL. The cache name keeps the
/// URL's archive extension so extraction picks the right format.
fn override_download(url: &str, stem: &str, install_dir: &str) -> ToolchainCandidate {
    let file = url.rsplit('/').next().unwrap_or_default();
    let ext = [".tar.gz", ".tgz", ".tar.zst", ".zip"]
        .into_iter()
        .find(|ext| file.to_ascii_lowercase().ends_with(ext))
        .unwrap_or(".zip");
    ToolchainCandidate::download(
        PlatformUrl::fixed(url),
        format!("{stem}{ext}"),
        install_dir,
    )
}
