mod workflows;

use std::process::ExitCode;

use release_builder::error::configuration_error;

pub(crate) fn usage() -> &'static str {
    "Usage:\n  release-builder run [--steps k1,k2,...] [--skip-android] [--attest] [--sign]\n  release-builder steps\n  release-builder package <staging_dir> <output> [--attest] [--format zip|tar.zst] [--prefix P]\n  release-builder repack <archive>\n  release-builder manifest <root_dir>"
}

fn main() -> ExitCode {
    workflows::install_logger();
    let args: Vec<String> = std::env::args().skip(1).collect();

    match workflows::dispatch(&args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            if configuration_error(&err).is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
