//! Staging trees and output-path housekeeping.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Replace `dst` with a copy of `src`.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        fs::remove_dir_all(dst).with_context(|| format!("removing '{}'", dst.display()))?;
    }
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("walking '{}'", src.display()))?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating '{}'", target.display()))?;
        } else if entry.file_type().is_file() {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Copy one file, creating parent directories. Permissions are preserved.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating '{}'", parent.display()))?;
    }
    fs::copy(src, dst)
        .with_context(|| format!("copying '{}' to '{}'", src.display(), dst.display()))
}

/// Clear an existing file at `path` so a new artifact can be written there.
///
/// When the file cannot be removed (held open by a scanner or explorer
/// window), it is renamed aside to `<name>.old<N>` instead. Returns the
/// aside path in that case.
pub fn safe_replace_existing(path: &Path) -> Result<Option<PathBuf>> {
    if fs::symlink_metadata(path).is_err() {
        return Ok(None);
    }
    let remove_err = match fs::remove_file(path) {
        Ok(()) => return Ok(None),
        Err(e) => e,
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for i in 1..1000 {
        let alt = path.with_file_name(format!("{name}.old{i}"));
        if fs::symlink_metadata(&alt).is_ok() {
            continue;
        }
        if fs::rename(path, &alt).is_ok() {
            log::warn!(
                "'{}' is locked ({}); moved aside to '{}'",
                path.display(),
                remove_err,
                alt.display()
            );
            return Ok(Some(alt));
        }
    }
    bail!(
        "could not remove or rename locked artifact '{}': {}",
        path.display(),
        remove_err
    )
}

/// Hex SHA-256 and size of a file.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// `path` with `suffix` appended to its file name.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_tree_replaces_destination() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/a.txt"), "a").unwrap();
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("stale.txt"), "old").unwrap();

        copy_tree(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("nested/a.txt")).unwrap(), "a");
        assert!(!dst.join("stale.txt").exists());
    }

    #[test]
    fn removable_file_is_deleted() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("sdk.zip");
        fs::write(&out, "old").unwrap();
        assert_eq!(safe_replace_existing(&out).unwrap(), None);
        assert!(!out.exists());
        assert_eq!(safe_replace_existing(&out).unwrap(), None);
    }

    #[test]
    fn unremovable_entry_is_renamed_aside() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("sdk.zip");
        // A directory cannot be removed with remove_file, which stands in
        // for a file held open by another process.
        fs::create_dir_all(out.join("held")).unwrap();
        fs::write(tmp.path().join("sdk.zip.old1"), "taken").unwrap();

        let aside = safe_replace_existing(&out).unwrap();
        assert_eq!(aside, Some(tmp.path().join("sdk.zip.old2")));
        assert!(!out.exists());
        assert!(tmp.path().join("sdk.zip.old2/held").is_dir());
    }

    #[test]
    fn sha256_of_known_content() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("f");
        fs::write(&p, "abc").unwrap();
        let (sha, size) = sha256_file(&p).unwrap();
        assert_eq!(
            sha,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(size, 3);
    }
}
