use std::path::PathBuf;

use thiserror::Error;

/// Failures while decoding a run document or moving data in and out of it.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("no run document on stdin")]
    EmptyInput,

    #[error("run document has no `input` section matching the model parameters: {0}")]
    MissingInput(String),

    #[error("run document does not name an input file `{0}`")]
    MissingFile(String),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Stdio(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RunError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RunError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type RunResult<T> = Result<T, RunError>;
