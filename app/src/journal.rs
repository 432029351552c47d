//! Journal store (spec.md §4.3): an append-only, ordered log of mutations
//! that permits reverse replay.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::state_io;

/// One undoable mutation (spec.md §3 JournalOp). Created only after the
/// underlying filesystem mutation is known to have succeeded; never mutated
/// afterward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalOp {
    pub action: JournalAction,
    /// Absolute target path the mutation applied to.
    pub target: PathBuf,
    /// Absolute path of a pre-image/restore source, present only when
    /// reversal requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

/// The kind of mutation a [`JournalOp`] records.
///
/// Only four actions are recognized by the replayer. Unknown strings parsed
/// from a journal written by a newer version of this format are preserved
/// verbatim (round-tripped faithfully) but skipped with a warning during
/// replay — forward compatibility is deliberately narrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalAction {
    CreateFile,
    ReplaceFile,
    DeleteFile,
    CreateDir,
    Unknown(String),
}

impl JournalAction {
    fn as_str(&self) -> &str {
        match self {
            JournalAction::CreateFile => "create_file",
            JournalAction::ReplaceFile => "replace_file",
            JournalAction::DeleteFile => "delete_file",
            JournalAction::CreateDir => "create_dir",
            JournalAction::Unknown(s) => s,
        }
    }
}

impl Serialize for JournalAction {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JournalAction {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(match raw.as_str() {
            "create_file" => JournalAction::CreateFile,
            "replace_file" => JournalAction::ReplaceFile,
            "delete_file" => JournalAction::DeleteFile,
            "create_dir" => JournalAction::CreateDir,
            _ => JournalAction::Unknown(raw),
        })
    }
}

impl fmt::Display for JournalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal/transitional status of a [`Journal`]. Transitions monotonically:
/// `Pending -> {Success | Cancelled | RolledBack | RollbackFailed | DryRun}`.
///
/// `DryRun` is not part of spec.md's original state machine — it's the
/// terminal status of a simulated run that performed no mutations, so there
/// is nothing to roll back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStatus {
    Pending,
    Success,
    Cancelled,
    RolledBack,
    RollbackFailed,
    DryRun,
}

/// Ordered sequence of [`JournalOp`]s plus header (spec.md §3 Journal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    pub job_name: String,
    pub timestamp: String,
    pub destination_root: PathBuf,
    pub rollback_vault_root: PathBuf,
    pub status: JournalStatus,
    pub ops: Vec<JournalOp>,
}

impl Journal {
    pub fn new(job_name: impl Into<String>, destination_root: PathBuf, rollback_vault_root: PathBuf) -> Self {
        Journal {
            job_name: job_name.into(),
            timestamp: chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f").to_string(),
            destination_root,
            rollback_vault_root,
            status: JournalStatus::Pending,
            ops: Vec::new(),
        }
    }

    /// Append an op. Ops must be appended in the order the mutations were
    /// committed (spec.md §3 invariant a); callers hold the journal mutex
    /// for the duration of filesystem-mutation-then-append (spec.md §5).
    pub fn push(&mut self, op: JournalOp) {
        self.ops.push(op);
    }

    /// Transition status; panics on a non-monotonic transition since that
    /// indicates an orchestrator bug, not a recoverable runtime condition.
    pub fn set_status(&mut self, status: JournalStatus) {
        assert_eq!(
            self.status,
            JournalStatus::Pending,
            "journal status must transition out of Pending exactly once"
        );
        self.status = status;
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        state_io::save_json(path, self)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        state_io::load_json(path)
    }
}

/// Outcome of replaying a journal in reverse order.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub applied: usize,
    pub skipped_unknown: usize,
    pub failures: Vec<(JournalOp, String)>,
}

impl ReplayReport {
    pub fn total(&self) -> usize {
        self.applied + self.skipped_unknown + self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Replay `journal`'s ops in reverse order, undoing each mutation.
///
/// Per-op failures are caught and accumulated rather than aborting the
/// replay (spec.md §7: "Rollback itself catches per-op exceptions and
/// continues, accumulating success/failure counts").
pub fn replay_reverse(journal: &Journal) -> ReplayReport {
    let mut report = ReplayReport::default();

    for op in journal.ops.iter().rev() {
        match &op.action {
            JournalAction::CreateFile | JournalAction::CreateDir => {
                // Undo a creation by removing what was created. A directory
                // deleted here may be non-empty if later ops created files
                // inside it; those are undone first since we walk in reverse.
                let result = if op.target.is_dir() {
                    std::fs::remove_dir_all(&op.target)
                } else {
                    std::fs::remove_file(&op.target)
                };
                if result.is_ok() || !op.target.exists() {
                    report.applied += 1;
                } else if let Err(e) = result {
                    report.failures.push((op.clone(), e.to_string()));
                }
            }
            JournalAction::ReplaceFile => match &op.backup {
                Some(backup) => match restore_from_backup(backup, &op.target) {
                    Ok(()) => report.applied += 1,
                    Err(e) => report.failures.push((op.clone(), e.to_string())),
                },
                None => report
                    .failures
                    .push((op.clone(), "replace_file op missing backup".to_string())),
            },
            JournalAction::DeleteFile => match &op.backup {
                Some(backup) => match restore_from_backup(backup, &op.target) {
                    Ok(()) => report.applied += 1,
                    Err(e) => report.failures.push((op.clone(), e.to_string())),
                },
                None => {
                    // Empty-directory removals are recorded with no backup
                    // and are irreversible by design (spec.md §9 open
                    // question); this is not a failure, just unreversed.
                    tracing::warn!(target = ?op.target, "delete_file op has no backup; cannot restore");
                    report.skipped_unknown += 1;
                }
            },
            JournalAction::Unknown(action) => {
                tracing::warn!(%action, target = ?op.target, "unrecognized journal action; skipping during replay");
                report.skipped_unknown += 1;
            }
        }
    }

    report
}

fn restore_from_backup(backup: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(backup, target).is_ok() {
        return Ok(());
    }
    std::fs::copy(backup, target)?;
    std::fs::remove_file(backup)
}
