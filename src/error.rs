use std::borrow::Cow;
use std::fmt;
#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("Configuration error:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Version cache error:\n{0}")]
    Cache(#[from] CacheError),

    #[error("Error while cleaning the output tree:\n{0}")]
    Clean(#[from] CleanError),

    #[error("Error while building the site.\n{0}")]
    Build(#[from] BuildFailure),

    #[error("Duplicate task '{0}'")]
    DuplicateTask(String),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse config file '{path}'.\n{source}")]
    Parse {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Couldn't read version cache '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Version cache '{path}' is corrupt: {reason}")]
    Corrupt { path: Utf8PathBuf, reason: String },

    #[error("Couldn't write version cache '{path}'.\n{source}")]
    Write {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
#[error("Couldn't remove '{path}'.\n{source}")]
pub struct CleanError {
    pub path: String,
    pub source: std::io::Error,
}

/// A single file failed a single transformation stage.
#[derive(Debug, Error)]
#[error("Stage '{stage}' failed on '{file}': {source}")]
pub struct TransformError {
    pub stage: Cow<'static, str>,
    pub file: Utf8PathBuf,
    pub source: anyhow::Error,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Task panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A fatal failure attributed to a named task.
#[derive(Debug, Error)]
#[error("Task '{task}':\n{error}")]
pub struct TaskFailure {
    pub task: String,
    pub error: TaskError,
}

/// Every fatal failure of a run, together with whatever had completed before
/// the run stopped.
#[derive(Debug)]
pub struct BuildFailure {
    pub failures: Vec<TaskFailure>,
    pub report: crate::engine::Report,
}

impl BuildFailure {
    /// Name of the first task that failed.
    pub fn task(&self) -> Option<&str> {
        self.failures.first().map(|failure| failure.task.as_str())
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildFailure {}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),
}
