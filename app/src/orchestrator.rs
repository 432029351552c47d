//! Stage orchestrator (spec.md §4.10): drives one job through
//! SCAN -> COPY -> CLEANUP -> SNAPSHOT, recording stage timing, handling
//! cancellation and rollback-on-fatal-error.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::cancel::{CancelToken, ProgressSink, ProgressThrottle};
use crate::checkpoint::CheckpointStore;
use crate::cleanup;
use crate::config::BackupJob;
use crate::error::{Error, Result};
use crate::journal::{self, Journal, JournalStatus};
use crate::matcher::ExcludeMatcher;
use crate::planner::{self, Planner};
use crate::safety_net;
use crate::snapshot::{self, Summary};
use crate::state_io;
use crate::state_paths::{self, StateLayout};
use crate::stats::Stats;
use crate::worker_pool::{self, TaskQueue, WorkerContext};

/// Named stage of a run, with start/end timestamps (spec.md §4.10 "Stage").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: &'static str,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    CancelledBefore,
    Failed,
}

/// Terminal result of one orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub job_name: String,
    pub timestamp: String,
    pub stages: Vec<Stage>,
    pub journal_status: JournalStatus,
    pub stats: crate::stats::StatsSnapshot,
}

fn now_ts() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f").to_string()
}

/// Run `job` once: SCAN, COPY, CLEANUP, SNAPSHOT in order, honoring
/// `cancel`. `progress` receives percent-complete updates during COPY.
pub fn run_job(
    job: &BackupJob,
    layout: &StateLayout,
    cancel: CancelToken,
    progress: ProgressSink,
) -> Result<RunReport> {
    let timestamp = now_ts();
    let matcher = ExcludeMatcher::new(&job.exclude);

    let vault_root = safety_net::rollback_vault_root(&job.destination, &job.name, &timestamp);
    let safetynet_root =
        safety_net::safetynet_date_root(&job.destination, chrono::Utc::now().date_naive());

    let journal = Arc::new(Mutex::new(Journal::new(
        job.name.clone(),
        job.destination.clone(),
        vault_root.clone(),
    )));
    let journal_path = layout.journal_path(&job.config_group, &job.name, &timestamp);

    let checkpoint = Arc::new(CheckpointStore::load_or_new(
        layout.checkpoint_path(&job.config_group, &job.name),
        &job.name,
    ));
    let stats = Arc::new(Stats::default());

    let mut stages = Vec::new();

    // --- SCAN + COPY -----------------------------------------------------
    let scan_started = now_ts();
    if cancel.is_cancelled() {
        stages.push(Stage {
            name: "scan",
            started_at: scan_started,
            finished_at: Some(now_ts()),
            outcome: StageOutcome::CancelledBefore,
        });
        return finish_cancelled(job, &timestamp, journal, &journal_path, checkpoint, stats, stages);
    }

    let expected_files = planner::estimate_file_count(&job.source, &matcher);
    let thread_count = worker_pool::choose_thread_count(num_cpus_heuristic(), expected_files);

    let queue = TaskQueue::new();
    let producer = queue.producer();
    let throttle = Arc::new(ProgressThrottle::new(progress, expected_files as u64));

    let worker_ctx = WorkerContext {
        journal: Arc::clone(&journal),
        stats: Arc::clone(&stats),
        checkpoint: Arc::clone(&checkpoint),
        dst_root: job.destination.clone(),
        vault_root: vault_root.clone(),
        verify: job.verify,
        cancel: cancel.clone(),
        dry_run: job.dry_run,
    };

    let planner_handle = {
        let matcher = ExcludeMatcher::new(&job.exclude);
        let checkpoint = Arc::clone(&checkpoint);
        let journal = Arc::clone(&journal);
        let stats = Arc::clone(&stats);
        let cancel = cancel.clone();
        let source = job.source.clone();
        let destination = job.destination.clone();
        let dry_run = job.dry_run;
        std::thread::spawn(move || {
            let planner = Planner {
                matcher: &matcher,
                checkpoint: &checkpoint,
                journal: &journal,
                stats: &stats,
                cancel: &cancel,
                dry_run,
            };
            planner.plan(&source, &destination, &producer)
        })
    };

    worker_pool::run(queue, thread_count, worker_ctx, throttle);

    let plan_outcome = planner_handle.join();
    let _plan_outcome = match plan_outcome {
        Ok(outcome) => outcome,
        Err(_) => {
            stages.push(Stage {
                name: "scan_copy",
                started_at: scan_started,
                finished_at: Some(now_ts()),
                outcome: StageOutcome::Failed,
            });
            return finish_rolled_back(
                job,
                &timestamp,
                journal,
                &journal_path,
                checkpoint,
                stats,
                stages,
                "planner thread panicked",
            );
        }
    };

    if !job.dry_run {
        checkpoint.save_at_boundary();
    }

    stages.push(Stage {
        name: "scan_copy",
        started_at: scan_started,
        finished_at: Some(now_ts()),
        outcome: if cancel.is_cancelled() {
            StageOutcome::CancelledBefore
        } else {
            StageOutcome::Completed
        },
    });

    if cancel.is_cancelled() {
        return finish_cancelled(job, &timestamp, journal, &journal_path, checkpoint, stats, stages);
    }

    // --- CLEANUP -----------------------------------------------------------
    let cleanup_started = now_ts();
    cleanup::run(
        job.mode,
        &job.source,
        &job.destination,
        &vault_root,
        &safetynet_root,
        &matcher,
        &journal,
        &stats,
        job.dry_run,
    );
    stages.push(Stage {
        name: "cleanup",
        started_at: cleanup_started,
        finished_at: Some(now_ts()),
        outcome: StageOutcome::Completed,
    });

    // --- SNAPSHOT ------------------------------------------------------
    // Skipped for a dry run: the destination was never touched, so a
    // manifest of it carries no information about this run.
    let snapshot_started = now_ts();
    if !job.dry_run {
        let snap = snapshot::build_snapshot(
            &job.name,
            &timestamp,
            &job.destination,
            crate::state_paths::META_DIR_NAME,
            &matcher,
            job.verify,
        );
        let snapshot_path = layout.snapshot_path(&job.config_group, &job.name, &timestamp);
        let snapshot_meta_path = state_paths::mirror_under_meta(&job.destination, &snapshot_path, "snapshots");
        if state_io::save_json_mirrored(&snapshot_path, &snapshot_meta_path, &snap).is_ok() {
            let index_path = layout.snapshot_index_path(&job.config_group, &job.name);
            let index_meta_path = state_paths::mirror_under_meta(&job.destination, &index_path, "snapshots");
            let mut index: crate::snapshot::SnapshotIndex =
                state_io::load_json(&index_path).unwrap_or_else(|_| crate::snapshot::SnapshotIndex {
                    job_name: job.name.clone(),
                    snapshots: Vec::new(),
                });
            index.record(&snapshot_path);
            let _ = state_io::save_json_mirrored(&index_path, &index_meta_path, &index);
        }
    }

    let final_status = if job.dry_run { JournalStatus::DryRun } else { JournalStatus::Success };

    let summary = Summary {
        job_name: job.name.clone(),
        timestamp: timestamp.clone(),
        mode: job.mode.to_string(),
        status: if job.dry_run { "dry_run".to_string() } else { "success".to_string() },
        stats: stats.snapshot(),
    };
    if !job.dry_run {
        let summary_path = layout.summary_path(&job.config_group, &job.name, &timestamp);
        let summary_meta_path = state_paths::mirror_under_meta(&job.destination, &summary_path, "summaries");
        let _ = state_io::save_json_mirrored(&summary_path, &summary_meta_path, &summary);
    }

    stages.push(Stage {
        name: "snapshot",
        started_at: snapshot_started,
        finished_at: Some(now_ts()),
        outcome: StageOutcome::Completed,
    });

    if !job.dry_run {
        let mut j = journal.lock().unwrap();
        j.set_status(final_status);
        let journal_meta_path = state_paths::mirror_under_meta(&job.destination, &journal_path, "journals");
        let _ = state_io::save_json_mirrored(&journal_path, &journal_meta_path, &*j);
        checkpoint.mark_complete();
    }

    Ok(RunReport {
        job_name: job.name.clone(),
        timestamp,
        stages,
        journal_status: final_status,
        stats: stats.snapshot(),
    })
}

/// Cancellation path: mark the journal cancelled, persist the checkpoint so
/// resume can pick up later, and return without attempting rollback
/// (spec.md §4.10 "orderly stop, not an error").
fn finish_cancelled(
    job: &BackupJob,
    timestamp: &str,
    journal: Arc<Mutex<Journal>>,
    journal_path: &PathBuf,
    checkpoint: Arc<CheckpointStore>,
    stats: Arc<Stats>,
    mut stages: Vec<Stage>,
) -> Result<RunReport> {
    {
        let mut j = journal.lock().unwrap();
        j.set_status(JournalStatus::Cancelled);
        if !job.dry_run {
            let meta_path = state_paths::mirror_under_meta(&job.destination, journal_path, "journals");
            let _ = state_io::save_json_mirrored(journal_path, &meta_path, &*j);
        }
    }
    if !job.dry_run {
        checkpoint.save_at_boundary();
    }

    for stage in stages.iter_mut() {
        if stage.finished_at.is_none() {
            stage.finished_at = Some(now_ts());
        }
    }

    Ok(RunReport {
        job_name: job.name.clone(),
        timestamp: timestamp.to_string(),
        stages,
        journal_status: JournalStatus::Cancelled,
        stats: stats.snapshot(),
    })
}

/// Fatal-stage path (spec.md §4.10, §7 kind 5): persist the journal as
/// committed so far, replay it in reverse, and record whether the rollback
/// itself succeeded — never propagate the triggering failure as an `Err`,
/// since a fatal stage is a terminal run outcome, not a caller-handleable
/// error.
fn finish_rolled_back(
    job: &BackupJob,
    timestamp: &str,
    journal: Arc<Mutex<Journal>>,
    journal_path: &PathBuf,
    checkpoint: Arc<CheckpointStore>,
    stats: Arc<Stats>,
    mut stages: Vec<Stage>,
    reason: &str,
) -> Result<RunReport> {
    let journal_meta_path = state_paths::mirror_under_meta(&job.destination, journal_path, "journals");

    let snapshot_for_replay = {
        let j = journal.lock().unwrap();
        if !job.dry_run {
            let _ = state_io::save_json_mirrored(journal_path, &journal_meta_path, &*j);
        }
        j.clone()
    };

    let report = journal::replay_reverse(&snapshot_for_replay);
    let final_status = if report.is_clean() {
        JournalStatus::RolledBack
    } else {
        JournalStatus::RollbackFailed
    };

    {
        let mut j = journal.lock().unwrap();
        j.status = final_status;
        if !job.dry_run {
            let _ = state_io::save_json_mirrored(journal_path, &journal_meta_path, &j);
        }
    }
    if !job.dry_run {
        checkpoint.save_at_boundary();
    }

    tracing::error!(
        job = %job.name,
        reason,
        applied = report.applied,
        failures = report.failures.len(),
        "stage failed fatally; rolled back"
    );

    for stage in stages.iter_mut() {
        if stage.finished_at.is_none() {
            stage.finished_at = Some(now_ts());
        }
    }

    Ok(RunReport {
        job_name: job.name.clone(),
        timestamp: timestamp.to_string(),
        stages,
        journal_status: final_status,
        stats: stats.snapshot(),
    })
}

/// Roll back a previously-persisted journal: replay its ops in reverse and
/// persist the resulting terminal status (spec.md §4.3, §7).
pub fn rollback_journal(journal_path: &PathBuf) -> Result<journal::ReplayReport> {
    let mut j = Journal::load(journal_path).map_err(|e| Error::io(journal_path.clone(), e))?;
    let report = journal::replay_reverse(&j);

    if report.is_clean() {
        j.status = JournalStatus::RolledBack;
    } else {
        j.status = JournalStatus::RollbackFailed;
    }

    let meta_path = state_paths::mirror_under_meta(&j.destination_root, journal_path, "journals");
    state_io::save_json_mirrored(journal_path, &meta_path, &j).map_err(|e| Error::io(journal_path.clone(), e))?;

    if !report.is_clean() {
        return Err(Error::RollbackFailed {
            applied: report.applied,
            total: report.total(),
            message: format!("{} ops failed to replay", report.failures.len()),
        });
    }

    Ok(report)
}

fn num_cpus_heuristic() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use tempfile::tempdir;

    fn make_job(dir: &std::path::Path, mode: Mode) -> BackupJob {
        BackupJob {
            name: "job1".to_string(),
            source: dir.join("src"),
            destination: dir.join("dst"),
            mode,
            exclude: vec![],
            safety_net_days: 30,
            verify: false,
            config_group: "default".to_string(),
            dry_run: false,
        }
    }

    #[test]
    fn clone_run_copies_files_and_marks_checkpoint_complete() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.txt"), b"hello").unwrap();
        std::fs::create_dir_all(dir.path().join("dst")).unwrap();

        let job = make_job(dir.path(), Mode::Clone);
        let layout = StateLayout::new(dir.path().join("state"));
        let cancel = CancelToken::new();
        let sink: ProgressSink = Arc::new(|_, _, _| {});

        let report = run_job(&job, &layout, cancel, sink).unwrap();

        assert_eq!(report.journal_status, JournalStatus::Success);
        assert!(dir.path().join("dst/a.txt").exists());
        assert_eq!(report.stats.created_files, 1);

        let checkpoint = CheckpointStore::load_or_new(
            layout.checkpoint_path("default", "job1"),
            "job1",
        );
        assert_eq!(checkpoint.snapshot().status, crate::checkpoint::CheckpointStatus::Complete);
    }

    #[test]
    fn clone_run_quarantines_destination_only_file() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("dst")).unwrap();
        std::fs::write(dir.path().join("dst/stale.txt"), b"old").unwrap();

        let job = make_job(dir.path(), Mode::Clone);
        let layout = StateLayout::new(dir.path().join("state"));
        let cancel = CancelToken::new();
        let sink: ProgressSink = Arc::new(|_, _, _| {});

        run_job(&job, &layout, cancel, sink).unwrap();

        assert!(!dir.path().join("dst/stale.txt").exists());
    }

    #[test]
    fn sync_run_never_deletes_destination_only_file() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("dst")).unwrap();
        std::fs::write(dir.path().join("dst/keep.txt"), b"old").unwrap();

        let job = make_job(dir.path(), Mode::Sync);
        let layout = StateLayout::new(dir.path().join("state"));
        let cancel = CancelToken::new();
        let sink: ProgressSink = Arc::new(|_, _, _| {});

        run_job(&job, &layout, cancel, sink).unwrap();

        assert!(dir.path().join("dst/keep.txt").exists());
    }

    #[test]
    fn pre_cancelled_run_marks_journal_cancelled_without_copying() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.txt"), b"hello").unwrap();
        std::fs::create_dir_all(dir.path().join("dst")).unwrap();

        let job = make_job(dir.path(), Mode::Clone);
        let layout = StateLayout::new(dir.path().join("state"));
        let cancel = CancelToken::new();
        cancel.cancel();
        let sink: ProgressSink = Arc::new(|_, _, _| {});

        let report = run_job(&job, &layout, cancel, sink).unwrap();

        assert_eq!(report.journal_status, JournalStatus::Cancelled);
        assert!(!dir.path().join("dst/a.txt").exists());
    }

    #[test]
    fn rollback_restores_replaced_file_and_marks_rolled_back() {
        let dir = tempdir().unwrap();
        let dst = dir.path().join("dst");
        let vault = dst.join(".Rollback/job1_ts");
        std::fs::create_dir_all(&dst).unwrap();
        std::fs::create_dir_all(&vault).unwrap();

        let target = dst.join("a.txt");
        let backup = vault.join("a.txt");
        std::fs::write(&target, b"NEW").unwrap();
        std::fs::write(&backup, b"OLD").unwrap();

        let mut j = Journal::new("job1", dst.clone(), vault.clone());
        j.push(crate::journal::JournalOp {
            action: crate::journal::JournalAction::ReplaceFile,
            target: target.clone(),
            backup: Some(backup.clone()),
        });
        let journal_path = dir.path().join("journal.json");
        j.save(&journal_path).unwrap();

        let report = rollback_journal(&journal_path).unwrap();
        assert!(report.is_clean());
        assert_eq!(std::fs::read(&target).unwrap(), b"OLD");

        let reloaded = Journal::load(&journal_path).unwrap();
        assert_eq!(reloaded.status, JournalStatus::RolledBack);
    }
}
