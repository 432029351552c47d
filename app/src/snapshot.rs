//! Snapshot & summary emitter (spec.md §4.6). Runs after a successful
//! (not cancelled, not rolled back) run: walks the destination tree and
//! emits a manifest, then a companion summary of run statistics.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::matcher::ExcludeMatcher;
use crate::safety_net::is_reserved_component;
use crate::stats::StatsSnapshot;

/// One regular file recorded in a snapshot manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub relative_path: String,
    pub size: u64,
    pub mtime_unix: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Post-run manifest (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub job_name: String,
    pub timestamp: String,
    pub entries: Vec<SnapshotEntry>,
}

/// Accumulated index of all historical snapshots of a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotIndex {
    pub job_name: String,
    pub snapshots: Vec<String>,
}

impl SnapshotIndex {
    pub fn record(&mut self, snapshot_path: &Path) {
        let entry = snapshot_path.to_string_lossy().to_string();
        if !self.snapshots.contains(&entry) {
            self.snapshots.push(entry);
        }
    }
}

/// Run metadata + statistics counters recorded per run (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub job_name: String,
    pub timestamp: String,
    pub mode: String,
    pub status: String,
    pub stats: StatsSnapshot,
}

fn sha256_of(path: &Path) -> std::io::Result<String> {
    use std::io::Read;
    let mut f = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// A file found during the walk, before hashing.
struct Candidate {
    relative_path: String,
    size: u64,
    mtime_unix: i64,
    path: PathBuf,
}

/// Walk `destination_root` and build a manifest of every regular file,
/// skipping the reserved vault/meta subtrees and anything the exclude
/// matcher rejects. Computes SHA-256 per entry only when `verify` is set,
/// fanning the hashing out across `rayon`'s thread pool (mirroring
/// `parallel.rs`'s `parallel_map`) since the walk itself is already done by
/// the time hashing starts and each file's digest is independent.
pub fn build_snapshot(
    job_name: &str,
    timestamp: &str,
    destination_root: &Path,
    meta_dir_name: &str,
    matcher: &ExcludeMatcher,
    verify: bool,
) -> Snapshot {
    let mut candidates = Vec::new();

    let walker = WalkDir::new(destination_root).into_iter().filter_entry(|e| {
        if e.depth() == 0 {
            return true;
        }
        let name = e.file_name().to_string_lossy();
        !is_reserved_component(&name, meta_dir_name)
    });

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = match path.strip_prefix(destination_root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if matcher.is_excluded(rel) {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let mtime = filetime::FileTime::from_last_modification_time(&meta);

        candidates.push(Candidate {
            relative_path: rel.to_string_lossy().to_string(),
            size: meta.len(),
            mtime_unix: mtime.unix_seconds(),
            path: path.to_path_buf(),
        });
    }

    let mut entries: Vec<SnapshotEntry> = if verify {
        candidates
            .par_iter()
            .map(|c| SnapshotEntry {
                relative_path: c.relative_path.clone(),
                size: c.size,
                mtime_unix: c.mtime_unix,
                sha256: sha256_of(&c.path).ok(),
            })
            .collect()
    } else {
        candidates
            .into_iter()
            .map(|c| SnapshotEntry {
                relative_path: c.relative_path,
                size: c.size,
                mtime_unix: c.mtime_unix,
                sha256: None,
            })
            .collect()
    };

    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    Snapshot {
        job_name: job_name.to_string(),
        timestamp: timestamp.to_string(),
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn snapshot_walks_regular_files_and_skips_reserved_dirs() {
        let dir = tempdir().unwrap();
        let dst = dir.path().join("dst");
        std::fs::create_dir_all(dst.join(".Rollback")).unwrap();
        std::fs::create_dir_all(dst.join(".reconcile-meta")).unwrap();
        std::fs::write(dst.join(".Rollback/hidden.txt"), b"x").unwrap();
        std::fs::write(dst.join("a.txt"), b"hello").unwrap();
        std::fs::create_dir_all(dst.join("sub")).unwrap();
        std::fs::write(dst.join("sub/b.txt"), b"world!").unwrap();

        let matcher = ExcludeMatcher::new(&[]);
        let snap = build_snapshot("job1", "ts", &dst, ".reconcile-meta", &matcher, false);

        let paths: Vec<_> = snap.entries.iter().map(|e| e.relative_path.clone()).collect();
        assert_eq!(paths, vec!["a.txt".to_string(), "sub/b.txt".to_string()]);
    }

    #[test]
    fn snapshot_with_verify_includes_hash() {
        let dir = tempdir().unwrap();
        let dst = dir.path().join("dst");
        std::fs::create_dir_all(&dst).unwrap();
        std::fs::write(dst.join("a.txt"), b"hello").unwrap();

        let matcher = ExcludeMatcher::new(&[]);
        let snap = build_snapshot("job1", "ts", &dst, ".reconcile-meta", &matcher, true);
        assert!(snap.entries[0].sha256.is_some());
    }

    #[test]
    fn snapshot_index_dedupes_entries() {
        let mut idx = SnapshotIndex::default();
        idx.record(Path::new("/state/snap_1.json"));
        idx.record(Path::new("/state/snap_1.json"));
        idx.record(Path::new("/state/snap_2.json"));
        assert_eq!(idx.snapshots.len(), 2);
    }
}
