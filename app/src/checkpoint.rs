//! Checkpoint store (spec.md §4.4, §3 Checkpoint): per-job resume state
//! persisted between runs. Updated by workers under a mutex, batched to
//! disk every ~100 completions and at stage boundaries.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::state_io;

/// The on-disk processed-files list is truncated to the most recent N
/// entries for size control (spec.md §3 invariant iii); the counter still
/// reflects the true total. The completed-directories set is the
/// authoritative resume signal — stale processed-file entries beyond this
/// cap are harmless because same-file detection re-skips them.
const MAX_RECENT_PROCESSED: usize = 1_000;

/// Trigger a checkpoint save every this many successful file completions.
pub const SAVE_EVERY_N_COMPLETIONS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Incomplete,
    Complete,
}

/// Resume state for one job (spec.md §3 Checkpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_name: String,
    processed_files: VecDeque<String>,
    completed_directories: HashSet<String>,
    pub total_processed: u64,
    pub status: CheckpointStatus,
}

impl Checkpoint {
    pub fn empty(job_name: impl Into<String>) -> Self {
        Checkpoint {
            job_name: job_name.into(),
            processed_files: VecDeque::new(),
            completed_directories: HashSet::new(),
            total_processed: 0,
            status: CheckpointStatus::Incomplete,
        }
    }

    pub fn is_processed(&self, relpath: &str) -> bool {
        self.processed_files.iter().any(|p| p == relpath)
    }

    pub fn is_directory_completed(&self, relpath: &str) -> bool {
        self.completed_directories.contains(relpath)
    }

    /// Record a successfully processed file. Truncates the recent-entries
    /// list while keeping the true total in `total_processed`.
    pub fn mark_processed(&mut self, relpath: String) {
        self.processed_files.push_back(relpath);
        while self.processed_files.len() > MAX_RECENT_PROCESSED {
            self.processed_files.pop_front();
        }
        self.total_processed += 1;
    }

    /// Promote a directory to completed — every non-excluded file under it
    /// is either in `processed_files` or excluded (spec.md §3 invariant i).
    /// Completed directories are pruned from traversal entirely on resume.
    pub fn mark_directory_completed(&mut self, relpath: String) {
        self.completed_directories.insert(relpath);
    }

    /// Mark the whole job complete. Per invariant (ii), both sets are
    /// logically empty on next load once complete — a fresh run starting
    /// from a complete checkpoint has nothing to skip.
    pub fn mark_complete(&mut self) {
        self.status = CheckpointStatus::Complete;
        self.processed_files.clear();
        self.completed_directories.clear();
    }

    /// Reset to a fresh incomplete checkpoint for a new run, e.g. when a
    /// prior run completed and this is the next reconciliation pass.
    pub fn reset_for_new_run(&mut self) {
        self.status = CheckpointStatus::Incomplete;
        self.processed_files.clear();
        self.completed_directories.clear();
        self.total_processed = 0;
    }
}

/// Mutex-guarded checkpoint with batched persistence, shared between the
/// planner (reader of completed-directories) and workers (writers) per
/// spec.md §5's mutex graph.
pub struct CheckpointStore {
    path: PathBuf,
    inner: Mutex<Checkpoint>,
    since_last_save: AtomicU64,
}

impl CheckpointStore {
    /// Load an existing checkpoint for `job_name` at `path`, or start fresh.
    /// A corrupt/unreadable file is quarantined with a `.corrupt.<ts>`
    /// suffix and treated as absent (spec.md §4.4) — this is load-bearing
    /// crash safety, never let a partial checkpoint block progress.
    pub fn load_or_new(path: PathBuf, job_name: &str) -> Self {
        let checkpoint = match state_io::load_json::<Checkpoint>(&path) {
            Ok(cp) => cp,
            Err(e) => {
                if path.exists() {
                    tracing::warn!(?path, error = %e, "checkpoint unreadable; quarantining and starting fresh");
                    let _ = state_io::quarantine_corrupt(&path);
                }
                Checkpoint::empty(job_name)
            }
        };
        CheckpointStore {
            path,
            inner: Mutex::new(checkpoint),
            since_last_save: AtomicU64::new(0),
        }
    }

    pub fn is_processed(&self, relpath: &str) -> bool {
        self.inner.lock().unwrap().is_processed(relpath)
    }

    pub fn is_directory_completed(&self, relpath: &str) -> bool {
        self.inner.lock().unwrap().is_directory_completed(relpath)
    }

    pub fn mark_directory_completed(&self, relpath: String) {
        self.inner.lock().unwrap().mark_directory_completed(relpath);
    }

    /// Record a completion and save every [`SAVE_EVERY_N_COMPLETIONS`]
    /// completions.
    pub fn mark_processed(&self, relpath: String) {
        {
            let mut guard = self.inner.lock().unwrap();
            guard.mark_processed(relpath);
        }
        let count = self.since_last_save.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= SAVE_EVERY_N_COMPLETIONS {
            self.since_last_save.store(0, Ordering::Relaxed);
            if let Err(e) = self.save() {
                tracing::warn!(error = %e, "checkpoint batched save failed; will retry at next boundary");
            }
        }
    }

    /// Force a save at a stage boundary, regardless of batching counter.
    pub fn save_at_boundary(&self) {
        self.since_last_save.store(0, Ordering::Relaxed);
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "checkpoint stage-boundary save failed");
        }
    }

    pub fn mark_complete(&self) {
        self.inner.lock().unwrap().mark_complete();
        self.save_at_boundary();
    }

    pub fn save(&self) -> std::io::Result<()> {
        let guard = self.inner.lock().unwrap();
        state_io::save_json(&self.path, &*guard)
    }

    pub fn snapshot(&self) -> Checkpoint {
        self.inner.lock().unwrap().clone()
    }
}
