//! Job configuration: the one config-parsing surface the core owns.
//!
//! Loads a TOML mapping with a `jobs` list (spec.md §6) into typed
//! [`BackupJob`] descriptors. Richer editing surfaces (an interactive menu)
//! are out of scope here, the way `app/settings` stays a thin TOML
//! load/save pair in the teacher rather than a full settings editor.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reconciliation mode, defining how destination-only files are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Mirror source exactly; destination-only files are deleted (via the
    /// rollback vault).
    Clone,
    /// Add/update only; destination-only files are left untouched.
    Sync,
    /// Destination-only files are quarantined into a date-partitioned
    /// SafetyNet rather than deleted.
    SafetyNet,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Clone => "clone",
            Mode::Sync => "sync",
            Mode::SafetyNet => "safety_net",
        };
        f.write_str(s)
    }
}

fn default_safety_net_days() -> u32 {
    30
}

fn default_verify() -> bool {
    false
}

fn default_config_group() -> String {
    "default".to_string()
}

/// Raw per-job configuration as parsed from TOML, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub mode: Mode,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_safety_net_days")]
    pub safety_net_days: u32,
    #[serde(default = "default_verify")]
    pub verify: bool,
    #[serde(default = "default_config_group")]
    pub config_group: String,
    /// Simulate the run: plan and tally what would happen, touch nothing.
    #[serde(default)]
    pub dry_run: bool,
}

/// Top-level configuration file shape: `{ jobs = [ ... ] }`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("invalid config TOML: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let cfg = Self::from_toml_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate every job in the config (spec.md §6 validation rules).
    pub fn validate(&self) -> Result<()> {
        for job in &self.jobs {
            job.validate()?;
        }
        Ok(())
    }
}

impl JobConfig {
    /// Enforce the invariants the core assumes have already been checked:
    /// source ≠ destination, destination is not a descendant of source.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("job name must not be empty".into()));
        }
        if self.source == self.destination {
            return Err(Error::Config(format!(
                "job {}: source and destination must differ",
                self.name
            )));
        }
        if self.destination.starts_with(&self.source) {
            return Err(Error::Config(format!(
                "job {}: destination must not be a descendant of source",
                self.name
            )));
        }
        if self.safety_net_days == 0 {
            return Err(Error::Config(format!(
                "job {}: safety_net_days must be positive",
                self.name
            )));
        }
        Ok(())
    }

    /// Build the immutable [`BackupJob`] descriptor this config describes.
    pub fn into_job(self) -> BackupJob {
        BackupJob {
            name: self.name,
            source: self.source,
            destination: self.destination,
            mode: self.mode,
            exclude: self.exclude,
            safety_net_days: self.safety_net_days,
            verify: self.verify,
            config_group: self.config_group,
            dry_run: self.dry_run,
        }
    }
}

/// Immutable descriptor of one reconciliation task (spec.md §3).
///
/// Loaded at start, never mutated for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupJob {
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub mode: Mode,
    pub exclude: Vec<String>,
    pub safety_net_days: u32,
    pub verify: bool,
    pub config_group: String,
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_job() {
        let raw = r#"
            [[jobs]]
            name = "docs"
            source = "/src"
            destination = "/dst"
            mode = "clone"
        "#;
        let cfg = Config::from_toml_str(raw).unwrap();
        assert_eq!(cfg.jobs.len(), 1);
        let job = &cfg.jobs[0];
        assert_eq!(job.mode, Mode::Clone);
        assert_eq!(job.safety_net_days, 30);
        assert!(!job.verify);
        assert_eq!(job.config_group, "default");
    }

    #[test]
    fn rejects_destination_under_source() {
        let job = JobConfig {
            name: "bad".into(),
            source: PathBuf::from("/a"),
            destination: PathBuf::from("/a/b"),
            mode: Mode::Sync,
            exclude: vec![],
            safety_net_days: 30,
            verify: false,
            config_group: "default".into(),
            dry_run: false,
        };
        assert!(job.validate().is_err());
    }

    #[test]
    fn rejects_equal_source_and_destination() {
        let job = JobConfig {
            name: "bad".into(),
            source: PathBuf::from("/a"),
            destination: PathBuf::from("/a"),
            mode: Mode::Sync,
            exclude: vec![],
            safety_net_days: 30,
            verify: false,
            config_group: "default".into(),
            dry_run: false,
        };
        assert!(job.validate().is_err());
    }
}
