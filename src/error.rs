//! Error types for sc-gen

use thiserror::Error;

/// Result type for sc-gen operations
pub type ScResult<T> = Result<T, ScError>;

/// Errors that can abort the translation pipeline.
///
/// Recoverable findings (per-line parse errors, verifier findings) are
/// reported through [`crate::diag::Diagnostics`]; the variants here are the
/// hard stops that end a run.
#[derive(Error, Debug)]
pub enum ScError {
    /// The source contained syntax errors; details are in the diagnostics
    /// sink. Raised only after every line has been tried.
    #[error("{file}: {errors} parse error(s)")]
    Parse { file: String, errors: usize },

    /// AST accepted but semantically malformed (unknown state-declaration
    /// keyword, duplicate parallel edge). Aborts on first occurrence.
    #[error("{file}:{line}: {message}")]
    Shape {
        file: String,
        line: u32,
        message: String,
    },

    /// The verifier found structural errors; details are in the diagnostics
    /// sink.
    #[error("state machine {name} is malformed: {errors} structural error(s)")]
    Structural { name: String, errors: usize },

    /// The backend cannot render an input.
    #[error("backend {backend}: {message}")]
    Emit {
        backend: &'static str,
        message: String,
    },

    /// The output selector matched no registered backend.
    #[error("unknown output selector: {0} (expected cpp or hpp)")]
    UnknownSelector(String),

    /// Input file not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
