/// Error types for the decl compiler
///
/// These are host failures only. Problems in the analyzed file are
/// collected as [`crate::diagnostics::Diagnostic`] records instead.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Front end failure in {file}: {source}")]
    FrontEnd {
        file: PathBuf,
        #[source]
        source: decl_parser::ParseError,
    },

    #[error("Failed to write declarations to {path}: {source}")]
    Emit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Formatting error: {0}")]
    Fmt(#[from] std::fmt::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompileError {
    pub fn front_end(file: impl Into<PathBuf>, source: decl_parser::ParseError) -> Self {
        CompileError::FrontEnd {
            file: file.into(),
            source,
        }
    }
}
