//! Shared atomic state-file persistence (spec.md §4.3 "Writes are atomic").
//!
//! Generalizes the teacher's `fs_op::helpers::atomic_write` (temp-write +
//! rename) with an explicit `fsync` before the rename, since these files
//! back a crash-safety protocol rather than a best-effort TUI write.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize `value` as pretty JSON and atomically persist it to `path`:
/// write to a temporary neighbor, flush, fsync, then rename over the
/// canonical path. A crash between temp-write and rename leaves the
/// canonical file untouched; a crash after rename leaves the new state.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp = dir.join(format!(".reconcile.tmp.{}.{}", process::id(), nanos));

    let body = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;

    let result = (|| -> io::Result<()> {
        let mut f = File::create(&tmp)?;
        f.write_all(&body)?;
        f.sync_all()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    Ok(())
}

/// Persist `value` to `primary`, then best-effort mirror it to `mirror`
/// (spec.md §4.3/§4.6/§6: "two copies are maintained"). The mirror is a
/// destination-side convenience copy, not authoritative state — a failure to
/// write it is logged, not propagated; only `primary`'s result is returned.
pub fn save_json_mirrored<T: Serialize>(primary: &Path, mirror: &Path, value: &T) -> io::Result<()> {
    let result = save_json(primary, value);
    if let Err(e) = &result {
        tracing::warn!(path = ?primary, error = %e, "failed to persist state file");
    }
    if let Err(e) = save_json(mirror, value) {
        tracing::warn!(path = ?mirror, error = %e, "failed to persist mirrored state file");
    }
    result
}

/// Load and deserialize a JSON state file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let raw = fs::read(path)?;
    serde_json::from_slice(&raw).map_err(io::Error::other)
}

/// Move a corrupt/unreadable state file aside with a `.corrupt.<timestamp>`
/// suffix (spec.md §4.4) so the caller can proceed as if it were absent.
pub fn quarantine_corrupt(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let mut quarantined = path.as_os_str().to_owned();
    quarantined.push(format!(".corrupt.{nanos}"));
    fs::rename(path, quarantined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let sample = Sample { value: 42 };
        save_json(&path, &sample).unwrap();
        let loaded: Sample = load_json(&path).unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_json(&path, &Sample { value: 1 }).unwrap();
        for entry in fs::read_dir(dir.path()).unwrap() {
            let name = entry.unwrap().file_name();
            assert!(!name.to_string_lossy().starts_with(".reconcile.tmp."));
        }
    }

    #[test]
    fn quarantine_renames_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, b"not json{{{").unwrap();
        quarantine_corrupt(&path).unwrap();
        assert!(!path.exists());
        let mut found = false;
        for entry in fs::read_dir(dir.path()).unwrap() {
            let name = entry.unwrap().file_name();
            if name.to_string_lossy().contains(".corrupt.") {
                found = true;
            }
        }
        assert!(found);
    }
}
