//! Atomic file copier (spec.md §4.2).
//!
//! Given `src` and `dst`, produces at `dst` a byte-identical copy of `src`
//! preserving mtime and mode, such that no reader of `dst` ever observes a
//! partially-written state: write to a hidden sibling of `dst` in the same
//! directory, then rename over `dst`. Generalizes the teacher's
//! `fs_op::helpers::atomic_copy_file` (temp-sibling + rename, pid/time/
//! thread/seq suffix) with optional SHA-256 verification and a bounded
//! retry loop.

use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

static NEXT_COPY_ID: AtomicU64 = AtomicU64::new(0);

/// Why a copy attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("I/O error copying {src:?} -> {dst:?}: {source}")]
    Io {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("hash mismatch after copying {src:?} -> {dst:?}")]
    VerifyMismatch { src: PathBuf, dst: PathBuf },
}

fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let pid = process::id() as u128;
    let thread_id = format!("{:?}", std::thread::current().id());
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    thread_id.hash(&mut hasher);
    let thread_hash = hasher.finish();
    let seq = NEXT_COPY_ID.fetch_add(1, Ordering::Relaxed) as u128;
    format!("{:x}{:x}{:x}{:x}", pid, nanos, thread_hash, seq)
}

fn temp_sibling(dst: &Path) -> PathBuf {
    let dir = dst.parent().unwrap_or_else(|| Path::new("."));
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dir.join(format!(".reconcile.{name}.{}", unique_suffix()))
}

fn sha256_of(path: &Path) -> io::Result<[u8; 32]> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Copy metadata (mtime + Unix mode bits) from `src` onto `dst`.
fn preserve_metadata(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::metadata(src)?;
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(dst, mtime)?;

    #[cfg(unix)]
    {
        fs::set_permissions(dst, meta.permissions())?;
    }
    #[cfg(not(unix))]
    {
        let mut perms = fs::metadata(dst)?.permissions();
        perms.set_readonly(meta.permissions().readonly());
        fs::set_permissions(dst, perms)?;
    }

    Ok(())
}

/// Single copy attempt: temp-write + rename + optional verify. No retrying
/// here; [`copy_with_retries`] owns the retry policy.
fn copy_once(src: &Path, dst: &Path, verify: bool) -> Result<(), CopyError> {
    let map_io = |source: io::Error| CopyError::Io {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source,
    };

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(map_io)?;
    }

    let tmp = temp_sibling(dst);

    let copy_result = fs::copy(src, &tmp).and_then(|_| preserve_metadata(src, &tmp));
    if let Err(e) = copy_result {
        let _ = fs::remove_file(&tmp);
        return Err(map_io(e));
    }

    if let Err(e) = fs::rename(&tmp, dst) {
        let _ = fs::remove_file(&tmp);
        return Err(map_io(e));
    }

    if verify {
        let src_hash = sha256_of(src).map_err(map_io)?;
        let dst_hash = sha256_of(dst).map_err(map_io)?;
        if src_hash != dst_hash {
            return Err(CopyError::VerifyMismatch {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
            });
        }
    }

    Ok(())
}

/// Copy `src` to `dst` atomically, retrying up to `max_attempts` times
/// (spec.md §4.2: up to three attempts). Any leftover temp sibling from a
/// failed attempt is removed before the next attempt or before reporting
/// the final error.
pub fn copy_with_retries(
    src: &Path,
    dst: &Path,
    verify: bool,
    max_attempts: u32,
) -> Result<(), CopyError> {
    let mut last_err = None;
    for _ in 0..max_attempts.max(1) {
        match copy_once(src, dst, verify) {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.expect("max_attempts >= 1 guarantees at least one result"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_content_and_no_temp_left_behind() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("out").join("a.txt");
        fs::write(&src, b"hello world").unwrap();

        copy_with_retries(&src, &dst, false, 3).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"hello world");

        for entry in fs::read_dir(dst.parent().unwrap()).unwrap() {
            let name = entry.unwrap().file_name();
            assert!(!name.to_string_lossy().starts_with(".reconcile."));
        }
    }

    #[test]
    fn verify_succeeds_on_identical_content() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("a_copy.txt");
        fs::write(&src, b"verify me").unwrap();
        copy_with_retries(&src, &dst, true, 3).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"verify me");
    }

    #[test]
    fn preserves_mtime() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("a_copy.txt");
        fs::write(&src, b"x").unwrap();
        let old_time = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src, old_time).unwrap();

        copy_with_retries(&src, &dst, false, 3).unwrap();

        let dst_meta = fs::metadata(&dst).unwrap();
        let dst_time = filetime::FileTime::from_last_modification_time(&dst_meta);
        assert_eq!(dst_time, old_time);
    }

    #[test]
    fn fails_cleanly_when_source_missing() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("missing.txt");
        let dst = dir.path().join("out.txt");
        let result = copy_with_retries(&src, &dst, false, 3);
        assert!(result.is_err());
        assert!(!dst.exists());
    }
}
