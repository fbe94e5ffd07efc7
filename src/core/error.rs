use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

use crate::core::pipeline::Stage;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied an unusable value. Raised before anything is touched.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// The binary manifest is too short or its header points outside the buffer.
    #[error("malformed binary XML: {0}")]
    Format(String),

    #[error("entry `{name}` not found in `{}`", archive.display())]
    EntryNotFound { archive: PathBuf, name: String },

    #[error("zip error on `{}`", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to launch `{}`", tool.display())]
    ToolSpawn {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external build tool ran but reported failure.
    #[error("`{}` exited with {status}{}", tool.display(), format_stderr(stderr))]
    Tool {
        tool: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[error("config `{}`: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("I/O error on `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} failed")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
}

fn format_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn archive(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.into(),
            source,
        }
    }

    /// Tags an error with the pipeline stage it escaped from.
    pub fn at(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The stage a pipeline error escaped from, if it was tagged with one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Strips stage tags and returns the underlying cause.
    pub fn root(&self) -> &Error {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation(_))
    }
}
