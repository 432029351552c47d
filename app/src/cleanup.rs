//! Cleanup pass (spec.md §4.9): runs only for `clone` and `safety_net`
//! modes, and only if the copy stage wasn't cancelled. Walks the
//! destination tree and deletes/quarantines files whose source-side
//! counterpart no longer exists.

use std::path::Path;
use std::sync::Mutex;

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::config::Mode;
use crate::journal::{Journal, JournalAction, JournalOp};
use crate::matcher::ExcludeMatcher;
use crate::safety_net::{self, is_reserved_component};
use crate::stats::Stats;
use crate::state_paths::META_DIR_NAME;

/// Run the destination-side cleanup pass for `mode`. No-op for `Mode::Sync`
/// (spec.md §4.9, §8 "File in destination missing from source under
/// mode=sync: retained, not journaled").
pub fn run(
    mode: Mode,
    source_root: &Path,
    destination_root: &Path,
    vault_root: &Path,
    safetynet_root: &Path,
    matcher: &ExcludeMatcher,
    journal: &Mutex<Journal>,
    stats: &Stats,
    dry_run: bool,
) {
    if mode == Mode::Sync {
        return;
    }

    let walker = WalkDir::new(destination_root)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !is_reserved_component(&name, META_DIR_NAME)
        });

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let dst_path = entry.path();
        let Ok(rel) = dst_path.strip_prefix(destination_root) else {
            continue;
        };
        if matcher.is_excluded(rel) {
            continue;
        }

        let src_path = source_root.join(rel);
        if src_path.exists() {
            continue;
        }

        match mode {
            Mode::Clone => {
                quarantine_to_vault(dst_path, vault_root, destination_root, journal, stats, dry_run)
            }
            Mode::SafetyNet => quarantine_to_safetynet(
                dst_path,
                safetynet_root,
                destination_root,
                journal,
                stats,
                dry_run,
            ),
            Mode::Sync => unreachable!("handled by early return above"),
        }
    }

    if mode == Mode::Clone {
        remove_empty_directories(destination_root, vault_root, journal, dry_run);
    }
}

fn quarantine_to_vault(
    dst_path: &Path,
    vault_root: &Path,
    destination_root: &Path,
    journal: &Mutex<Journal>,
    stats: &Stats,
    dry_run: bool,
) {
    if dry_run {
        stats.inc_deleted_files();
        return;
    }
    match safety_net::move_into_vault(dst_path, vault_root, destination_root) {
        Ok(backup) => {
            journal.lock().unwrap().push(JournalOp {
                action: JournalAction::DeleteFile,
                target: dst_path.to_path_buf(),
                backup: Some(backup),
            });
            stats.inc_deleted_files();
        }
        Err(e) => {
            tracing::warn!(path = ?dst_path, error = %e, "failed to quarantine destination-only file into rollback vault");
        }
    }
}

fn quarantine_to_safetynet(
    dst_path: &Path,
    safetynet_root: &Path,
    destination_root: &Path,
    journal: &Mutex<Journal>,
    stats: &Stats,
    dry_run: bool,
) {
    if dry_run {
        stats.inc_safetynet_files();
        return;
    }
    match safety_net::move_into_safetynet(dst_path, safetynet_root, destination_root) {
        Ok(backup) => {
            journal.lock().unwrap().push(JournalOp {
                action: JournalAction::DeleteFile,
                target: dst_path.to_path_buf(),
                backup: Some(backup),
            });
            stats.inc_safetynet_files();
        }
        Err(e) => {
            tracing::warn!(path = ?dst_path, error = %e, "failed to quarantine destination-only file into SafetyNet");
        }
    }
}

/// Bottom-up removal of now-empty directories (clone mode only). Each
/// removal produces a `delete_file` op with no backup — empty directories
/// are non-restorable by design (spec.md §4.9, §9 open question). Directories
/// at the same depth are independent of each other, so each depth level is
/// checked and removed in parallel via `rayon`, mirroring `parallel.rs`'s
/// `parallel_map`.
fn remove_empty_directories(
    destination_root: &Path,
    vault_root: &Path,
    journal: &Mutex<Journal>,
    dry_run: bool,
) {
    let mut dirs: Vec<_> = WalkDir::new(destination_root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !is_reserved_component(&name, META_DIR_NAME)
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.path().to_path_buf())
        .collect();

    // Deepest first so parents become empty only after children are removed;
    // ties within the same depth have no ordering dependency on each other.
    dirs.sort_by_key(|p| std::cmp::Reverse(p.components().count()));

    let mut start = 0;
    while start < dirs.len() {
        let depth = dirs[start].components().count();
        let mut end = start;
        while end < dirs.len() && dirs[end].components().count() == depth {
            end += 1;
        }

        let removed: Vec<std::path::PathBuf> = dirs[start..end]
            .par_iter()
            .filter(|dir| !dir.starts_with(vault_root))
            .filter(|dir| {
                std::fs::read_dir(dir).map(|mut it| it.next().is_none()).unwrap_or(false)
            })
            .filter(|dir| {
                if dry_run {
                    return false;
                }
                std::fs::remove_dir(dir).is_ok()
            })
            .cloned()
            .collect();

        for dir in removed {
            journal.lock().unwrap().push(JournalOp {
                action: JournalAction::DeleteFile,
                target: dir,
                backup: None,
            });
        }

        start = end;
    }
}
