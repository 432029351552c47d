//! On-disk state layout (spec.md §6 "On-disk state layout (produced)").

use std::path::{Path, PathBuf};

use directories_next::ProjectDirs;

/// Name of the reserved meta subtree mirrored on the destination.
pub const META_DIR_NAME: &str = ".reconcile-meta";

/// Resolves every state-file path the engine produces, rooted at
/// `state_root` and grouped by `config_group`/`job_name` as spec.md §6
/// prescribes.
#[derive(Debug, Clone)]
pub struct StateLayout {
    state_root: PathBuf,
}

impl StateLayout {
    pub fn new(state_root: PathBuf) -> Self {
        StateLayout { state_root }
    }

    /// Default state root: the platform-appropriate local data directory,
    /// mirroring how the teacher's `panic_hook` locates its crash-report
    /// directory via `directories_next::ProjectDirs`.
    pub fn default_root() -> PathBuf {
        ProjectDirs::from("net", "reconcile", "reconcile")
            .map(|p| p.data_local_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".reconcile-state"))
    }

    fn group_dir(&self, config_group: &str) -> PathBuf {
        self.state_root.join(config_group)
    }

    pub fn journal_path(&self, config_group: &str, job_name: &str, timestamp: &str) -> PathBuf {
        self.group_dir(config_group)
            .join("journals")
            .join(format!("journal_{job_name}_{timestamp}.json"))
    }

    pub fn checkpoint_path(&self, config_group: &str, job_name: &str) -> PathBuf {
        self.group_dir(config_group)
            .join("checkpoints")
            .join(format!("checkpoint_{job_name}.json"))
    }

    pub fn snapshot_path(&self, config_group: &str, job_name: &str, timestamp: &str) -> PathBuf {
        self.group_dir(config_group)
            .join("snapshots")
            .join(job_name)
            .join(format!("snapshot_{timestamp}.json"))
    }

    pub fn snapshot_index_path(&self, config_group: &str, job_name: &str) -> PathBuf {
        self.group_dir(config_group)
            .join("snapshots")
            .join(job_name)
            .join("index.json")
    }

    pub fn summary_path(&self, config_group: &str, job_name: &str, timestamp: &str) -> PathBuf {
        self.group_dir(config_group)
            .join("summaries")
            .join(format!("summary_{job_name}_{timestamp}.json"))
    }
}

/// The mirrored destination-side meta directory for a job.
pub fn meta_dir(destination_root: &Path) -> PathBuf {
    destination_root.join(META_DIR_NAME)
}

/// Destination-side mirror of a state-root path, grouped by `kind`
/// ("journals", "snapshots", "summaries") under the reserved meta subtree
/// (spec.md §4.3/§4.6/§6: "two copies are maintained"). Keeps the same file
/// name as the state-root original so the two copies are trivially paired.
pub fn mirror_under_meta(destination_root: &Path, state_path: &Path, kind: &str) -> PathBuf {
    meta_dir(destination_root)
        .join(kind)
        .join(state_path.file_name().unwrap_or_default())
}
