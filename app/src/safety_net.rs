//! SafetyNet / Rollback vault (spec.md §4.5): two quarantine locations
//! inside the destination that mirror the relative path of a displaced
//! file. Grounded in the teacher's `fs_op::mv::move_path` cross-device
//! fallback and `fs_op::remove.rs`'s remove-if-present idiom.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

pub const ROLLBACK_DIR_NAME: &str = ".Rollback";
pub const SAFETYNET_DIR_NAME: &str = ".SafetyNet";

/// Directory components the planner and cleanup pass must never descend
/// into — the rollback vault, the SafetyNet, and the destination-side meta
/// directory (spec.md §4.5 "Planner traversal unconditionally skips...").
pub fn is_reserved_component(component: &str, meta_dir_name: &str) -> bool {
    component == ROLLBACK_DIR_NAME || component == SAFETYNET_DIR_NAME || component == meta_dir_name
}

/// `<dst_root>/.Rollback/<job>_<timestamp>/`
pub fn rollback_vault_root(dst_root: &Path, job_name: &str, timestamp: &str) -> PathBuf {
    dst_root
        .join(ROLLBACK_DIR_NAME)
        .join(format!("{job_name}_{timestamp}"))
}

/// `<dst_root>/.SafetyNet/<YYYY-MM-DD>/`
pub fn safetynet_date_root(dst_root: &Path, date: chrono::NaiveDate) -> PathBuf {
    dst_root
        .join(SAFETYNET_DIR_NAME)
        .join(date.format("%Y-%m-%d").to_string())
}

/// A short, stable key derived from an out-of-destination path, used to
/// avoid path escape when mirroring files that originate outside the
/// destination root (spec.md §4.5).
fn hash_derived_key(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Compute where `displaced` (a path currently under `dst_root`, or in rare
/// cases outside it) should land under `vault_root`, mirroring its relative
/// path under the destination.
fn mirrored_target(vault_root: &Path, dst_root: &Path, displaced: &Path) -> PathBuf {
    match displaced.strip_prefix(dst_root) {
        Ok(rel) => vault_root.join(rel),
        Err(_) => {
            let key = hash_derived_key(displaced);
            let name = displaced
                .file_name()
                .map(|n| n.to_owned())
                .unwrap_or_else(|| std::ffi::OsString::from("unnamed"));
            vault_root.join("external").join(key).join(name)
        }
    }
}

fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    // Cross-device fallback: copy then remove, as in the teacher's
    // `fs_op::mv::move_path`.
    fs::copy(src, dst)?;
    fs::remove_file(src)
}

/// Move `displaced` into the rollback vault, preserving its path shape
/// relative to the destination. Returns the vault-side path to record as a
/// `JournalOp::backup`.
pub fn move_into_vault(displaced: &Path, vault_root: &Path, dst_root: &Path) -> io::Result<PathBuf> {
    let target = mirrored_target(vault_root, dst_root, displaced);
    move_file(displaced, &target)?;
    Ok(target)
}

/// Move `displaced` into the date-partitioned SafetyNet. Same-named
/// collisions are resolved by appending a microsecond-precision suffix to
/// the destination stem (spec.md §4.5).
pub fn move_into_safetynet(
    displaced: &Path,
    safetynet_root: &Path,
    dst_root: &Path,
) -> io::Result<PathBuf> {
    let mut target = mirrored_target(safetynet_root, dst_root, displaced);

    if target.exists() {
        target = disambiguate(&target);
    }

    move_file(displaced, &target)?;
    Ok(target)
}

fn disambiguate(target: &Path) -> PathBuf {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();

    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = target.extension().map(|e| e.to_string_lossy().to_string());

    let new_name = match ext {
        Some(ext) => format!("{stem}.{micros}.{ext}"),
        None => format!("{stem}.{micros}"),
    };
    parent.join(new_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mirrors_relative_path_under_vault() {
        let dst_root = PathBuf::from("/dst");
        let vault_root = PathBuf::from("/dst/.Rollback/job_ts");
        let displaced = PathBuf::from("/dst/sub/file.txt");
        let target = mirrored_target(&vault_root, &dst_root, &displaced);
        assert_eq!(target, PathBuf::from("/dst/.Rollback/job_ts/sub/file.txt"));
    }

    #[test]
    fn out_of_root_path_goes_under_external() {
        let dst_root = PathBuf::from("/dst");
        let vault_root = PathBuf::from("/dst/.Rollback/job_ts");
        let displaced = PathBuf::from("/elsewhere/file.txt");
        let target = mirrored_target(&vault_root, &dst_root, &displaced);
        assert!(target.starts_with(&vault_root.join("external")));
        assert_eq!(target.file_name().unwrap(), "file.txt");
    }

    #[test]
    fn move_into_vault_actually_relocates_file() {
        let dir = tempdir().unwrap();
        let dst_root = dir.path().join("dst");
        let vault_root = dst_root.join(".Rollback").join("job_ts");
        fs::create_dir_all(&dst_root).unwrap();
        let file = dst_root.join("a.txt");
        fs::write(&file, b"content").unwrap();

        let target = move_into_vault(&file, &vault_root, &dst_root).unwrap();
        assert!(!file.exists());
        assert_eq!(fs::read(&target).unwrap(), b"content");
    }

    #[test]
    fn safetynet_collision_is_disambiguated() {
        let dir = tempdir().unwrap();
        let dst_root = dir.path().join("dst");
        let sn_root = dst_root.join(".SafetyNet").join("2025-01-15");
        fs::create_dir_all(&dst_root).unwrap();
        fs::create_dir_all(&sn_root).unwrap();

        fs::write(sn_root.join("stale.txt"), b"first").unwrap();

        let displaced = dst_root.join("stale.txt");
        fs::write(&displaced, b"second").unwrap();

        let target = move_into_safetynet(&displaced, &sn_root, &dst_root).unwrap();
        assert_ne!(target, sn_root.join("stale.txt"));
        assert_eq!(fs::read(&target).unwrap(), b"second");
        assert_eq!(fs::read(sn_root.join("stale.txt")).unwrap(), b"first");
    }

    #[test]
    fn reserved_components_are_recognized() {
        assert!(is_reserved_component(".Rollback", ".reconcile-meta"));
        assert!(is_reserved_component(".SafetyNet", ".reconcile-meta"));
        assert!(is_reserved_component(".reconcile-meta", ".reconcile-meta"));
        assert!(!is_reserved_component("normal_dir", ".reconcile-meta"));
    }
}
