use std::path::PathBuf;

/// Errors that can propagate out of the core engine.
///
/// Per-file and per-directory failures inside the worker pool and planner are
/// caught and folded into [`crate::stats::Stats`]; they never reach this
/// type. Only orchestrator-level failures (state-file corruption beyond
/// repair, a stage-fatal exception, rollback replay failure) produce an
/// `Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state file {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("stage {stage} failed: {message}")]
    StageFatal { stage: &'static str, message: String },

    #[error("rollback failed after {applied} of {total} ops replayed: {message}")]
    RollbackFailed {
        applied: usize,
        total: usize,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
