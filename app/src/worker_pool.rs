//! Copy worker pool (spec.md §4.7, §5): a bounded producer/consumer fed by
//! the planner and drained by N worker threads. Generalizes the teacher's
//! `runner::job_queue` (mpsc + worker threads + shared `Mutex` state) from a
//! single dummy-progress loop into the real copy/skip/journal pipeline.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::cancel::{CancelToken, ProgressThrottle};
use crate::checkpoint::CheckpointStore;
use crate::copier;
use crate::journal::{Journal, JournalAction, JournalOp};
use crate::safety_net;
use crate::stats::Stats;

/// Queue capacity (spec.md §4.7: "bounded FIFO queue (capacity ≈ 10,000)").
pub const QUEUE_CAPACITY: usize = 10_000;

/// Dequeue poll interval; doubles as the cancel-check cadence (spec.md §5).
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// One unit of copy work enqueued by the planner.
#[derive(Debug, Clone)]
pub struct CopyTask {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub relative_path: String,
}

/// Choose a worker thread count from CPU count and expected file count
/// (spec.md §4.7), clamped to `[4, 64]`.
pub fn choose_thread_count(cpu_count: usize, expected_files: usize) -> usize {
    let multiplier = if expected_files <= 10_000 {
        2
    } else if expected_files <= 100_000 {
        3
    } else {
        4
    };
    (cpu_count * multiplier).clamp(4, 64)
}

/// Shared handles every worker thread needs. Cheap to clone (all fields are
/// `Arc`/`Clone` already).
#[derive(Clone)]
pub struct WorkerContext {
    pub journal: Arc<Mutex<Journal>>,
    pub stats: Arc<Stats>,
    pub checkpoint: Arc<CheckpointStore>,
    pub dst_root: PathBuf,
    pub vault_root: PathBuf,
    pub verify: bool,
    pub cancel: CancelToken,
    /// Simulate only: tally what create/replace/skip would happen, touch
    /// nothing on disk and leave the checkpoint/journal untouched.
    pub dry_run: bool,
}

/// A bounded task queue plus the producer handle the planner uses to
/// enqueue work. Producer blocks on enqueue when the queue is full — the
/// natural back-pressure spec.md §5 describes.
pub struct TaskQueue {
    sender: SyncSender<CopyTask>,
    receiver: Arc<Mutex<Receiver<CopyTask>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::sync_channel(QUEUE_CAPACITY);
        TaskQueue {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    pub fn producer(&self) -> SyncSender<CopyTask> {
        self.sender.clone()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Same-file detection: size equality and integer-truncated mtime equality
/// (spec.md §4.2 glossary, §4.8 "defining performance choice: content
/// hashing is opt-in, not default").
fn is_same_file(src: &std::path::Path, dst: &std::path::Path) -> bool {
    let (src_meta, dst_meta) = match (std::fs::metadata(src), std::fs::metadata(dst)) {
        (Ok(s), Ok(d)) => (s, d),
        _ => return false,
    };
    if src_meta.len() != dst_meta.len() {
        return false;
    }
    let src_time = filetime::FileTime::from_last_modification_time(&src_meta).unix_seconds();
    let dst_time = filetime::FileTime::from_last_modification_time(&dst_meta).unix_seconds();
    src_time == dst_time
}

/// Run the bounded worker pool to drain `queue`, spawning `thread_count`
/// workers. Blocks until the producer side has dropped and every queued
/// task has been drained (or cancellation caused an early drain).
pub fn run(
    queue: TaskQueue,
    thread_count: usize,
    ctx: WorkerContext,
    progress: Arc<ProgressThrottle>,
) {
    // Drop our own producer handle; the planner owns the real one. Holding
    // no extra sender keeps `recv` able to observe channel closure once the
    // planner finishes.
    drop(queue.sender);

    let handles: Vec<_> = (0..thread_count.max(1))
        .map(|_| {
            let receiver = Arc::clone(&queue.receiver);
            let ctx = ctx.clone();
            let progress = Arc::clone(&progress);
            thread::spawn(move || worker_loop(receiver, ctx, progress))
        })
        .collect();

    for h in handles {
        let _ = h.join();
    }
}

fn worker_loop(
    receiver: Arc<Mutex<Receiver<CopyTask>>>,
    ctx: WorkerContext,
    progress: Arc<ProgressThrottle>,
) {
    let mut processed: u64 = 0;
    loop {
        if ctx.cancel.is_cancelled() {
            drain_remaining(&receiver);
            return;
        }

        let task = {
            let rx = receiver.lock().unwrap();
            rx.recv_timeout(DEQUEUE_TIMEOUT)
        };

        let task = match task {
            Ok(t) => t,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };

        if ctx.cancel.is_cancelled() {
            drain_remaining(&receiver);
            return;
        }

        process_task(&task, &ctx);
        processed += 1;
        progress.tick(processed);
    }
}

/// Drain remaining queue entries without processing them, to unblock the
/// producer (spec.md §5 "workers drain remaining queue entries ... and
/// exit").
fn drain_remaining(receiver: &Arc<Mutex<Receiver<CopyTask>>>) {
    let rx = receiver.lock().unwrap();
    while rx.try_recv().is_ok() {}
}

fn process_task(task: &CopyTask, ctx: &WorkerContext) {
    let dst_exists = task.dst.exists();

    if dst_exists && is_same_file(&task.src, &task.dst) {
        ctx.stats.inc_skipped_same();
        if !ctx.dry_run {
            ctx.checkpoint.mark_processed(task.relative_path.clone());
        }
        return;
    }

    if ctx.dry_run {
        if dst_exists {
            ctx.stats.inc_replaced_files();
        } else {
            ctx.stats.inc_created_files();
        }
        return;
    }

    if dst_exists {
        replace_existing(task, ctx);
    } else {
        create_new(task, ctx);
    }
}

fn create_new(task: &CopyTask, ctx: &WorkerContext) {
    match copier::copy_with_retries(&task.src, &task.dst, ctx.verify, 3) {
        Ok(()) => {
            {
                let mut journal = ctx.journal.lock().unwrap();
                journal.push(JournalOp {
                    action: JournalAction::CreateFile,
                    target: task.dst.clone(),
                    backup: None,
                });
            }
            ctx.stats.inc_created_files();
            ctx.checkpoint.mark_processed(task.relative_path.clone());
        }
        Err(e) => {
            tracing::warn!(src = ?task.src, dst = ?task.dst, error = %e, "copy failed after retries; skipping file");
            ctx.stats.inc_copy_failed();
        }
    }
}

fn replace_existing(task: &CopyTask, ctx: &WorkerContext) {
    // Capture the pre-image before overwriting. Safe without a lock: the
    // planner enqueues each destination path exactly once, so no two
    // workers ever contend on the same `task.dst` (spec.md §5).
    let backup = match safety_net::move_into_vault(&task.dst, &ctx.vault_root, &ctx.dst_root) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(dst = ?task.dst, error = %e, "failed to capture pre-image; skipping replace");
            ctx.stats.inc_copy_failed();
            return;
        }
    };

    match copier::copy_with_retries(&task.src, &task.dst, ctx.verify, 3) {
        Ok(()) => {
            {
                let mut journal = ctx.journal.lock().unwrap();
                journal.push(JournalOp {
                    action: JournalAction::ReplaceFile,
                    target: task.dst.clone(),
                    backup: Some(backup),
                });
            }
            ctx.stats.inc_replaced_files();
            ctx.checkpoint.mark_processed(task.relative_path.clone());
        }
        Err(e) => {
            tracing::warn!(src = ?task.src, dst = ?task.dst, error = %e, "copy failed after retries; restoring pre-image");
            // Restore the displaced original so the run continues with the
            // destination unchanged, per "failure to copy a single file is
            // never fatal" (spec.md §4.2).
            if let Err(restore_err) = std::fs::rename(&backup, &task.dst) {
                tracing::warn!(dst = ?task.dst, error = %restore_err, "failed to restore pre-image after copy failure");
            }
            ctx.stats.inc_copy_failed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn make_ctx(dst_root: &std::path::Path, verify: bool) -> WorkerContext {
        WorkerContext {
            journal: Arc::new(Mutex::new(Journal::new(
                "job1",
                dst_root.to_path_buf(),
                dst_root.join(".Rollback/job1_ts"),
            ))),
            stats: Arc::new(Stats::default()),
            checkpoint: Arc::new(CheckpointStore::load_or_new(
                dst_root.join("checkpoint.json"),
                "job1",
            )),
            dst_root: dst_root.to_path_buf(),
            vault_root: dst_root.join(".Rollback/job1_ts"),
            verify,
            cancel: CancelToken::new(),
            dry_run: false,
        }
    }

    #[test]
    fn thread_count_respects_clamp_and_scale() {
        assert_eq!(choose_thread_count(2, 100), 4);
        assert_eq!(choose_thread_count(4, 5_000), 8);
        assert_eq!(choose_thread_count(4, 50_000), 12);
        assert_eq!(choose_thread_count(4, 500_000), 16);
        assert_eq!(choose_thread_count(100, 5), 64);
    }

    #[test]
    fn create_new_task_produces_journal_entry_and_stats() {
        let dir = tempdir().unwrap();
        let dst_root = dir.path().join("dst");
        std::fs::create_dir_all(&dst_root).unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"hello").unwrap();

        let ctx = make_ctx(&dst_root, false);
        let task = CopyTask {
            src: src.clone(),
            dst: dst_root.join("a.txt"),
            relative_path: "a.txt".to_string(),
        };

        process_task(&task, &ctx);

        assert_eq!(ctx.stats.snapshot().created_files, 1);
        assert!(ctx.checkpoint.is_processed("a.txt"));
        assert_eq!(ctx.journal.lock().unwrap().ops.len(), 1);
    }

    #[test]
    fn replace_task_captures_pre_image_in_vault() {
        let dir = tempdir().unwrap();
        let dst_root = dir.path().join("dst");
        std::fs::create_dir_all(&dst_root).unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"NEW").unwrap();
        let dst = dst_root.join("a.txt");
        std::fs::write(&dst, b"OLD").unwrap();
        // Ensure mtimes differ so same-file detection doesn't short-circuit.
        let old_time = filetime::FileTime::from_unix_time(1_000_000, 0);
        filetime::set_file_mtime(&dst, old_time).unwrap();

        let ctx = make_ctx(&dst_root, false);
        let task = CopyTask {
            src,
            dst: dst.clone(),
            relative_path: "a.txt".to_string(),
        };

        process_task(&task, &ctx);

        assert_eq!(std::fs::read(&dst).unwrap(), b"NEW");
        assert_eq!(ctx.stats.snapshot().replaced_files, 1);
        let journal = ctx.journal.lock().unwrap();
        assert_eq!(journal.ops.len(), 1);
        let backup = journal.ops[0].backup.clone().unwrap();
        assert_eq!(std::fs::read(&backup).unwrap(), b"OLD");
    }

    #[test]
    fn same_file_is_skipped_without_copy() {
        let dir = tempdir().unwrap();
        let dst_root = dir.path().join("dst");
        std::fs::create_dir_all(&dst_root).unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"same").unwrap();
        let dst = dst_root.join("a.txt");
        std::fs::write(&dst, b"same").unwrap();
        let t = filetime::FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&src, t).unwrap();
        filetime::set_file_mtime(&dst, t).unwrap();

        let ctx = make_ctx(&dst_root, false);
        let task = CopyTask {
            src,
            dst,
            relative_path: "a.txt".to_string(),
        };
        process_task(&task, &ctx);

        assert_eq!(ctx.stats.snapshot().skipped_same, 1);
        assert_eq!(ctx.journal.lock().unwrap().ops.len(), 0);
    }
}
