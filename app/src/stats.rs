//! Run statistics (spec.md §3 Stats).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Plain counters snapshot, serialized into the run summary artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub created_files: u64,
    pub replaced_files: u64,
    pub deleted_files: u64,
    pub safetynet_files: u64,
    pub created_dirs: u64,
    pub skipped_same: u64,
    pub skipped_excluded: u64,
    pub copy_failed: u64,
}

/// Atomic counters shared across worker threads without a mutex — each
/// field is independently incremented, so callers needing a consistent
/// combined view should use [`Stats::snapshot`] which is only a point-in-time
/// read (the run is still live, but no single field can tear).
#[derive(Debug, Default)]
pub struct Stats {
    created_files: AtomicU64,
    replaced_files: AtomicU64,
    deleted_files: AtomicU64,
    safetynet_files: AtomicU64,
    created_dirs: AtomicU64,
    skipped_same: AtomicU64,
    skipped_excluded: AtomicU64,
    copy_failed: AtomicU64,
}

macro_rules! counter_ops {
    ($field:ident, $inc:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl Stats {
    counter_ops!(created_files, inc_created_files);
    counter_ops!(replaced_files, inc_replaced_files);
    counter_ops!(deleted_files, inc_deleted_files);
    counter_ops!(safetynet_files, inc_safetynet_files);
    counter_ops!(created_dirs, inc_created_dirs);
    counter_ops!(skipped_same, inc_skipped_same);
    counter_ops!(skipped_excluded, inc_skipped_excluded);
    counter_ops!(copy_failed, inc_copy_failed);

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            created_files: self.created_files.load(Ordering::Relaxed),
            replaced_files: self.replaced_files.load(Ordering::Relaxed),
            deleted_files: self.deleted_files.load(Ordering::Relaxed),
            safetynet_files: self.safetynet_files.load(Ordering::Relaxed),
            created_dirs: self.created_dirs.load(Ordering::Relaxed),
            skipped_same: self.skipped_same.load(Ordering::Relaxed),
            skipped_excluded: self.skipped_excluded.load(Ordering::Relaxed),
            copy_failed: self.copy_failed.load(Ordering::Relaxed),
        }
    }
}
