//! Reconciliation planner (spec.md §4.8): walks the source tree, consults
//! the checkpoint to skip completed work, and enqueues copy tasks.
//! Grounded in the teacher's `fs_op::mv::copy_path`
//! `WalkDir::new(..).follow_links(false)` traversal idiom, generalized into
//! a recursive walk that also drives checkpoint promotion.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};

use crate::cancel::CancelToken;
use crate::checkpoint::CheckpointStore;
use crate::journal::{Journal, JournalAction, JournalOp};
use crate::matcher::ExcludeMatcher;
use crate::safety_net::is_reserved_component;
use crate::stats::Stats;
use crate::state_paths::META_DIR_NAME;
use crate::worker_pool::CopyTask;

pub struct Planner<'a> {
    pub matcher: &'a ExcludeMatcher,
    pub checkpoint: &'a CheckpointStore,
    pub journal: &'a Mutex<Journal>,
    pub stats: &'a Stats,
    pub cancel: &'a CancelToken,
    /// Simulate only: never create the mirrored directory, just tally it.
    pub dry_run: bool,
}

/// Result of a full source-tree walk.
#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub files_enqueued: u64,
}

impl<'a> Planner<'a> {
    /// Walk `source_root`, mirroring directories into `destination_root`
    /// and enqueuing file copy tasks onto `producer`. Directories already
    /// present in the checkpoint's completed-directories set are pruned
    /// from traversal entirely (spec.md §4.4 "sub-linear resume cost").
    pub fn plan(
        &self,
        source_root: &Path,
        destination_root: &Path,
        producer: &SyncSender<CopyTask>,
    ) -> PlanOutcome {
        let mut outcome = PlanOutcome::default();
        self.walk_dir(
            source_root,
            destination_root,
            Path::new(""),
            producer,
            &mut outcome,
        );
        outcome
    }

    /// Returns `true` if `rel_dir` (and everything under it) has no
    /// remaining work after this call — i.e. it is eligible for promotion
    /// to the checkpoint's completed-directories set.
    fn walk_dir(
        &self,
        src_dir: &Path,
        dst_dir: &Path,
        rel_dir: &Path,
        producer: &SyncSender<CopyTask>,
        outcome: &mut PlanOutcome,
    ) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let rel_str = rel_dir.to_string_lossy().to_string();
        if !rel_str.is_empty() && self.checkpoint.is_directory_completed(&rel_str) {
            return true;
        }

        if !dst_dir.exists() {
            if self.dry_run {
                self.stats.inc_created_dirs();
            } else if let Err(e) = fs::create_dir_all(dst_dir) {
                tracing::warn!(dir = ?dst_dir, error = %e, "failed to create mirrored directory; subtree skipped");
                return false;
            } else {
                self.journal.lock().unwrap().push(JournalOp {
                    action: JournalAction::CreateDir,
                    target: dst_dir.to_path_buf(),
                    backup: None,
                });
                self.stats.inc_created_dirs();
            }
        }

        let entries = match fs::read_dir(src_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = ?src_dir, error = %e, "directory traversal failed; subtree left incomplete");
                return false;
            }
        };

        let mut fully_complete = true;

        for entry in entries {
            if self.cancel.is_cancelled() {
                return false;
            }

            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(dir = ?src_dir, error = %e, "failed to read directory entry");
                    fully_complete = false;
                    continue;
                }
            };

            let file_name = entry.file_name();
            let rel_child = rel_dir.join(&file_name);

            if rel_dir.as_os_str().is_empty()
                && is_reserved_component(&file_name.to_string_lossy(), META_DIR_NAME)
            {
                continue;
            }

            if self.matcher.is_excluded(&rel_child) {
                self.stats.inc_skipped_excluded();
                continue;
            }

            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => {
                    fully_complete = false;
                    continue;
                }
            };

            let child_src = entry.path();
            let child_dst = dst_dir.join(&file_name);

            if file_type.is_symlink() {
                // Never followed, never copied (spec.md §4.2).
                self.stats.inc_skipped_excluded();
                continue;
            }

            if file_type.is_dir() {
                let child_complete =
                    self.walk_dir(&child_src, &child_dst, &rel_child, producer, outcome);
                if !child_complete {
                    fully_complete = false;
                }
                continue;
            }

            if !file_type.is_file() {
                // Non-regular entries (devices, fifos, sockets) are never
                // copied and are counted as excluded.
                self.stats.inc_skipped_excluded();
                continue;
            }

            let rel_child_str = rel_child.to_string_lossy().to_string();
            if self.checkpoint.is_processed(&rel_child_str) {
                continue;
            }

            fully_complete = false;
            outcome.files_enqueued += 1;
            let _ = producer.send(CopyTask {
                src: child_src,
                dst: child_dst,
                relative_path: rel_child_str,
            });
        }

        if fully_complete {
            self.checkpoint.mark_directory_completed(rel_str);
        }

        fully_complete
    }
}

/// Count the regular, non-excluded, non-symlink files under `source_root`
/// to size the worker pool (spec.md §4.7 thread-count heuristic). Cheap
/// relative to the run itself; a single `fs::metadata`-free directory walk.
pub fn estimate_file_count(source_root: &Path, matcher: &ExcludeMatcher) -> usize {
    fn walk(dir: &Path, rel: &Path, matcher: &ExcludeMatcher, count: &mut usize) {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let rel_child = rel.join(&file_name);
            if matcher.is_excluded(&rel_child) {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                walk(&entry.path(), &rel_child, matcher, count);
            } else if file_type.is_file() {
                *count += 1;
            }
        }
    }

    let mut count = 0;
    walk(source_root, Path::new(""), matcher, &mut count);
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker_pool::TaskQueue;
    use tempfile::tempdir;

    fn setup(dir: &Path) -> (PathBuf, PathBuf) {
        let src = dir.join("src");
        let dst = dir.join("dst");
        fs::create_dir_all(&src).unwrap();
        (src, dst)
    }

    #[test]
    fn enqueues_all_regular_files_and_mirrors_dirs() {
        let dir = tempdir().unwrap();
        let (src, dst) = setup(dir.path());
        fs::write(src.join("a.txt"), b"A").unwrap();
        fs::create_dir_all(src.join("b")).unwrap();
        fs::write(src.join("b/c.txt"), b"C").unwrap();

        let matcher = ExcludeMatcher::new(&[]);
        let checkpoint = CheckpointStore::load_or_new(dir.path().join("cp.json"), "job1");
        let journal = Mutex::new(Journal::new("job1", dst.clone(), dir.path().join("vault")));
        let stats = Stats::default();
        let cancel = CancelToken::new();

        let planner = Planner {
            matcher: &matcher,
            checkpoint: &checkpoint,
            journal: &journal,
            stats: &stats,
            cancel: &cancel,
            dry_run: false,
        };

        let queue = TaskQueue::new();
        let producer = queue.producer();
        let outcome = planner.plan(&src, &dst, &producer);
        drop(producer);

        assert_eq!(outcome.files_enqueued, 2);
        assert!(dst.join("b").is_dir());
        assert_eq!(stats.snapshot().created_dirs, 1);
    }

    #[test]
    fn excluded_files_are_not_enqueued() {
        let dir = tempdir().unwrap();
        let (src, dst) = setup(dir.path());
        fs::write(src.join("a.txt"), b"A").unwrap();
        fs::write(src.join("secret.log"), b"shh").unwrap();

        let matcher = ExcludeMatcher::new(&["*.log".to_string()]);
        let checkpoint = CheckpointStore::load_or_new(dir.path().join("cp.json"), "job1");
        let journal = Mutex::new(Journal::new("job1", dst.clone(), dir.path().join("vault")));
        let stats = Stats::default();
        let cancel = CancelToken::new();

        let planner = Planner {
            matcher: &matcher,
            checkpoint: &checkpoint,
            journal: &journal,
            stats: &stats,
            cancel: &cancel,
            dry_run: false,
        };

        let queue = TaskQueue::new();
        let producer = queue.producer();
        let outcome = planner.plan(&src, &dst, &producer);

        assert_eq!(outcome.files_enqueued, 1);
        assert_eq!(stats.snapshot().skipped_excluded, 1);
    }

    #[test]
    fn completed_directory_is_pruned_on_resume() {
        let dir = tempdir().unwrap();
        let (src, dst) = setup(dir.path());
        fs::create_dir_all(src.join("done")).unwrap();
        fs::write(src.join("done/a.txt"), b"A").unwrap();
        fs::create_dir_all(dst.join("done")).unwrap();

        let matcher = ExcludeMatcher::new(&[]);
        let checkpoint = CheckpointStore::load_or_new(dir.path().join("cp.json"), "job1");
        checkpoint.mark_directory_completed("done".to_string());
        let journal = Mutex::new(Journal::new("job1", dst.clone(), dir.path().join("vault")));
        let stats = Stats::default();
        let cancel = CancelToken::new();

        let planner = Planner {
            matcher: &matcher,
            checkpoint: &checkpoint,
            journal: &journal,
            stats: &stats,
            cancel: &cancel,
            dry_run: false,
        };

        let queue = TaskQueue::new();
        let producer = queue.producer();
        let outcome = planner.plan(&src, &dst, &producer);

        assert_eq!(outcome.files_enqueued, 0);
    }

    #[test]
    fn directory_promoted_to_complete_when_fully_processed() {
        let dir = tempdir().unwrap();
        let (src, dst) = setup(dir.path());
        fs::write(src.join("a.txt"), b"A").unwrap();

        let matcher = ExcludeMatcher::new(&[]);
        let checkpoint = CheckpointStore::load_or_new(dir.path().join("cp.json"), "job1");
        checkpoint.mark_processed("a.txt".to_string());
        let journal = Mutex::new(Journal::new("job1", dst.clone(), dir.path().join("vault")));
        let stats = Stats::default();
        let cancel = CancelToken::new();

        let planner = Planner {
            matcher: &matcher,
            checkpoint: &checkpoint,
            journal: &journal,
            stats: &stats,
            cancel: &cancel,
            dry_run: false,
        };

        let queue = TaskQueue::new();
        let producer = queue.producer();
        let outcome = planner.plan(&src, &dst, &producer);

        assert_eq!(outcome.files_enqueued, 0);
        assert!(checkpoint.is_directory_completed(""));
    }
}
