//! The release steps and the curated selections offered by the menu.
//!
//! | key | fatal | work |
//! |---|---|---|
//! | `core` | yes | `cargo build --release` |
//! | `ide` (or `sentinel`) | no | desktop IDE bundle via npm |
//! | `android` | no | JDK, Android SDK, Gradle wrapper |
//! | `apk` | no | per-variant APK build script |
//! | `apk-package` | no | copy APKs into `dist/android` |
//! | `verify` | no | native binaries exist |
//! | `dist` | no | stage the release tree |
//! | `sdk` | no | deterministic SDK zip |
//! | `vsix` | no | editor extension, repacked |
//! | `manifest` | no | `MANIFEST.json` |

pub mod android;
pub mod ide;
pub mod native;
pub mod release;

use std::collections::BTreeMap;

use crate::pipeline::{Step, StepPipeline};
use crate::toolchain::ResolvedToolchain;

pub const CORE: &str = "core";
pub const IDE: &str = "ide";
pub const ANDROID: &str = "android";
pub const APK: &str = "apk";
pub const APK_PACKAGE: &str = "apk-package";
pub const VERIFY: &str = "verify";
pub const DIST: &str = "dist";
pub const SDK: &str = "sdk";
pub const VSIX: &str = "vsix";
pub const MANIFEST: &str = "manifest";

/// Every step in registration order.
pub fn registry() -> StepPipeline {
    StepPipeline::new()
        .register(Step::new(CORE, "Native Core", native::build_core).fatal())
        .register(Step::new(IDE, "IDE Bundle", ide::build_ide))
        .register(Step::new(ANDROID, "Android Toolchain", android::setup_toolchain))
        .register(Step::new(APK, "Android APK", android::build_apks))
        .register(Step::new(APK_PACKAGE, "APK Packaging", android::package_apks))
        .register(Step::new(VERIFY, "Binary Verification", native::verify_binaries))
        .register(Step::new(DIST, "Distribution Tree", release::create_distribution))
        .register(Step::new(SDK, "SDK Archive", release::package_sdk))
        .register(Step::new(VSIX, "Editor Extension", ide::package_vsix))
        .register(Step::new(MANIFEST, "Manifest Generation", release::write_manifest))
        .alias("sentinel", IDE)
}

/// A named selection offered by the interactive menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bundle {
    pub key: &'static str,
    pub label: &'static str,
    pub steps: &'static [&'static str],
}

pub const BUNDLES: &[Bundle] = &[
    Bundle {
        key: "everything",
        label: "Build everything",
        steps: &[
            CORE, IDE, ANDROID, APK, APK_PACKAGE, VERIFY, DIST, SDK, VSIX, MANIFEST,
        ],
    },
    Bundle {
        key: "core",
        label: "Native core only",
        steps: &[CORE, VERIFY],
    },
    Bundle {
        key: "android",
        label: "Android APK only",
        steps: &[ANDROID, APK, APK_PACKAGE],
    },
    Bundle {
        key: "package",
        label: "Package release tree only",
        steps: &[VERIFY, DIST, SDK, MANIFEST],
    },
];

pub fn bundle(key: &str) -> Option<&'static Bundle> {
    BUNDLES.iter().find(|b| b.key == key)
}

/// Child-process environment for several tools at once. `PATH` prefixes
/// accumulate in the order given.
pub fn toolchain_env(
    base: &crate::config::Env,
    tools: &[&ResolvedToolchain],
) -> BTreeMap<String, String> {
    let mut env = base.clone();
    let mut vars = BTreeMap::new();
    for tool in tools {
        for (key, value) in tool.env_overrides(&env) {
            env.set(key.clone(), value.clone());
            vars.insert(key, value);
        }
    }
    vars
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_an_alias_for_ide() {
        let pipeline = registry();
        assert_eq!(pipeline.get("sentinel").map(|s| s.key.as_str()), Some(IDE));
        assert!(!pipeline.keys().contains(&"sentinel"));
    }

        #[test]
    fn every_bundle_names_registered_steps() {
        let pipeline = registry();
        for b in BUNDLES {
            for key in b.steps {
                assert!(pipeline.get(key).is_some(), "{} -> {key}", b.key);
            }
        }
    }

    #[test]
    fn everything_follows_registration_order() {
        let pipeline = registry();
        let everything = bundle("everything").unwrap();
        assert_eq!(pipeline.keys(), everything.steps.to_vec());
    }

    #[test]
    fn only_core_is_fatal() {
        let fatal: Vec<_> = registry()
            .steps()
            .iter()
            .filter(|s| s.fatal)
            .map(|s| s.key.clone())
            .collect();
        assert_eq!(fatal, vec![CORE]);
    }
}
