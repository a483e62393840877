//! Archive downloads for toolchain bootstrap.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;

const USER_AGENT: &str = concat!("release-builder/", env!("CARGO_PKG_VERSION"));

/// Fetches a URL into a local file.
pub trait Fetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Downloads over HTTP(S) with the blocking `reqwest` client. `file://` URLs
/// are copied directly, which serves local mirrors.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1800),
        }
    }
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating download directory '{}'", parent.display()))?;
        }

        // Write to a sibling and rename, so an interrupted download never
        // sits at the cache path looking complete.
        let part = dest.with_extension("part");
        let result = download_to(url, &part, self.timeout);
        if let Err(e) = result {
            let _ = fs::remove_file(&part);
            return Err(e);
        }
        fs::rename(&part, dest).with_context(|| {
            format!(
                "moving download '{}' into '{}'",
                part.display(),
                dest.display()
            )
        })?;
        Ok(())
    }
}

fn download_to(url: &str, dest: &Path, timeout: Duration) -> Result<()> {
    log::info!("downloading {} -> {}", url, dest.display());

    if let Some(local) = url.strip_prefix("file://") {
        fs::copy(local, dest)
            .with_context(|| format!("copying '{}' to '{}'", local, dest.display()))?;
        return Ok(());
    }

    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .context("building HTTP client")?;

    let mut response = client
        .get(url)
        .header("Accept", "*/*")
        .send()
        .with_context(|| format!("requesting {url}"))?;

    if !response.status().is_success() {
        bail!("GET {} returned HTTP {}", url, response.status());
    }

    let mut file =
        File::create(dest).with_context(|| format!("creating '{}'", dest.display()))?;
    response
        .copy_to(&mut file)
        .with_context(|| format!("writing download to '{}'", dest.display()))?;
    Ok(())
}
