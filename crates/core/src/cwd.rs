// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Cuckoo working directory, threaded through construction instead of
//! living in a global.

use crate::id::{AnalysisId, TaskId};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that overrides the working directory.
pub const CWD_ENV: &str = "CUCKOO_CWD";

#[derive(Debug, Error)]
pub enum CwdError {
    #[error("working directory {} does not exist (run `cuckoo createcwd`)", .0.display())]
    Missing(PathBuf),
    #[error("working directory {path} is missing {field} (not a cuckoo cwd?)", path = .0.display(), field = .1)]
    NotACwd(PathBuf, &'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolved working-directory context: every path the orchestrator touches
/// derives from here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuckooCwd {
    root: PathBuf,
}

impl CuckooCwd {
    /// Resolve from an explicit flag, then `$CUCKOO_CWD`, then `./`.
    ///
    /// Fails unless the directory exists and contains `conf/`.
    pub fn resolve(flag: Option<PathBuf>) -> Result<Self, CwdError> {
        let root = match flag {
            Some(path) => path,
            None => match std::env::var_os(CWD_ENV) {
                Some(env) => PathBuf::from(env),
                None => std::env::current_dir()?,
            },
        };
        if !root.is_dir() {
            return Err(CwdError::Missing(root));
        }
        if !root.join("conf").is_dir() {
            return Err(CwdError::NotACwd(root, "conf/"));
        }
        Ok(Self { root })
    }

    /// Wrap an existing directory without the `conf/` check (used by
    /// `createcwd` and tests).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the full on-disk tree for a fresh working directory.
    pub fn create_tree(&self) -> Result<(), CwdError> {
        for dir in [
            self.conf_dir(),
            self.conf_dir().join("machineries"),
            self.analyses_dir(),
            self.binaries_dir(),
            self.untracked_dir(),
            self.operational_dir(),
            self.logs_dir(),
            self.monitor_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.root.join("conf")
    }

    pub fn conf_file(&self, name: &str) -> PathBuf {
        self.conf_dir().join(name)
    }

    pub fn machinery_conf(&self, machinery: &str) -> PathBuf {
        self.conf_dir().join("machineries").join(format!("{machinery}.toml"))
    }

    fn storage_dir(&self) -> PathBuf {
        self.root.join("storage")
    }

    pub fn analyses_dir(&self) -> PathBuf {
        self.storage_dir().join("analyses")
    }

    /// `storage/analyses/YYYYMMDD/<id>/`
    pub fn analysis_dir(&self, id: &AnalysisId) -> PathBuf {
        self.analyses_dir().join(id.date_segment()).join(id.as_str())
    }

    /// `storage/analyses/YYYYMMDD/<analysis>/<task_id>/`
    pub fn task_dir(&self, id: &TaskId) -> PathBuf {
        self.analysis_dir(&id.analysis_id()).join(id.as_str())
    }

    pub fn binaries_dir(&self) -> PathBuf {
        self.storage_dir().join("binaries")
    }

    pub fn untracked_dir(&self) -> PathBuf {
        self.storage_dir().join("untracked")
    }

    /// Touch-file sentinel marking a submitted-but-untracked analysis.
    pub fn untracked_marker(&self, id: &AnalysisId) -> PathBuf {
        self.untracked_dir().join(id.as_str())
    }

    pub fn operational_dir(&self) -> PathBuf {
        self.root.join("operational")
    }

    /// State store snapshot.
    pub fn state_db_path(&self) -> PathBuf {
        self.operational_dir().join("taskqueue.db")
    }

    /// State store write-ahead log.
    pub fn state_wal_path(&self) -> PathBuf {
        self.operational_dir().join("taskqueue.wal")
    }

    pub fn rooter_socket(&self) -> PathBuf {
        self.operational_dir().join("rooter.sock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.operational_dir().join("cuckoo.pid")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir().join("cuckoo.log")
    }

    /// Unpacked monitor/stager payloads delivered to guests.
    pub fn monitor_dir(&self) -> PathBuf {
        self.root.join("monitor")
    }
}

#[cfg(test)]
#[path = "cwd_tests.rs"]
mod tests;
