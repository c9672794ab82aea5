use serde_json::Value;
use thiserror::Error;

use crate::mi::output::ResultClass;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("GDB error: {0}")]
    GDBError(String),

    #[error("GDB returned {class:?}: {results}")]
    UnexpectedResult { class: ResultClass, results: Value },

    #[error("GDB terminated")]
    GDBQuit,

    #[error("GDB exit timed out")]
    GDBTimeout,

    #[error("cannot parse MI record: {0}")]
    ParseError(String),

    #[error("{0} stream already claimed")]
    StreamClaimed(&'static str),

    #[error("compilation failed:\n{0}")]
    CompilationFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("pty error: {0}")]
    PtyError(#[from] nix::Error),

    #[error("Parse int error: {0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("Parse Json error: {0}")]
    ParseJsonError(#[from] serde_json::Error),
}

/// Application result type
pub type AppResult<T> = Result<T, AppError>;
