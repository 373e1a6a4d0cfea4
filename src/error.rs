use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// An external program that ran but did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub program: String,
    pub code: Option<i32>,
    pub stderr: String,
}

impl CommandFailure {
    pub fn new(program: impl Into<String>, code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            code,
            stderr: stderr.into(),
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "`{}` exited with status {}", self.program, code)?,
            None => write!(f, "`{}` was terminated by a signal", self.program)?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {}", stderr)?;
        }
        Ok(())
    }
}

impl std::error::Error for CommandFailure {}

/// What went wrong while undoing a half-finished operation.
///
/// Empty when everything was put back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rollback {
    pub problems: Vec<String>,
}

impl Rollback {
    pub fn note(&mut self, problem: impl Into<String>) {
        self.problems.push(problem.into());
    }

    pub fn is_complete(&self) -> bool {
        self.problems.is_empty()
    }
}

impl fmt::Display for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_complete() {
            f.write_str("rolled back")
        } else {
            write!(f, "rollback incomplete: {}", self.problems.join("; "))
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid mount specification: {0}")]
    InvalidMountSpec(String),

    #[error("invalid share name {0:?}")]
    InvalidShareName(String),

    #[error("mount path {} already exists", .0.display())]
    PathAlreadyInUse(PathBuf),

    #[error("{} is already a mount point", .0.display())]
    AlreadyMounted(PathBuf),

    #[error("mount of {} failed: {source}", .path.display())]
    MountFailed {
        path: PathBuf,
        #[source]
        source: CommandFailure,
    },

    #[error("exporting share '{share}' for {} failed ({rollback}): {source}", .path.display())]
    ExportFailed {
        share: String,
        path: PathBuf,
        rollback: Rollback,
        #[source]
        source: Box<Error>,
    },

    #[error("unmount of share '{share}' at {path} failed ({rollback}): {source}")]
    UnmountFailed {
        share: String,
        path: String,
        rollback: Rollback,
        #[source]
        source: CommandFailure,
    },

    #[error("share '{0}' not found")]
    NotFound(String),

    #[error("share '{0}' already exists")]
    DuplicateShare(String),

    #[error("configuration written but SMB service reload failed ({stage}): {source}")]
    ReloadFailed {
        stage: &'static str,
        #[source]
        source: CommandFailure,
    },

    #[error("timed out waiting for lock on {}", .0.display())]
    Lock(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
