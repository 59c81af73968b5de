//! User-facing diagnostics.
//!
//! The parser and the verifier report findings through a [`Diagnostics`]
//! sink instead of failing fast, so a single run surfaces everything that is
//! wrong with a statechart. Each diagnostic renders as
//! `<file>:<line>:<col>: <severity>: <message>`, the format the CLI streams
//! to stderr.

use std::fmt;

/// Diagnostic severity. Errors abort the pipeline after their stage
/// completes; warnings are forwarded into the generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single finding with its source position (1-based line and column).
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.file, self.line, self.col, self.severity, self.message
        )
    }
}

/// Ordered collection of findings for one pipeline run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warning(&mut self, file: &str, line: u32, col: u32, message: impl Into<String>) {
        self.push(Severity::Warning, file, line, col, message);
    }

    pub fn error(&mut self, file: &str, line: u32, col: u32, message: impl Into<String>) {
        self.push(Severity::Error, file, line, col, message);
    }

    pub fn push(
        &mut self,
        severity: Severity,
        file: &str,
        line: u32,
        col: u32,
        message: impl Into<String>,
    ) {
        self.items.push(Diagnostic {
            severity,
            file: file.to_string(),
            line,
            col,
            message: message.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.items
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.items
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Warning messages only, in report order. The emitter forwards these
    /// into the generated artifact as `#warning` lines.
    #[must_use]
    pub fn warning_messages(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .map(|d| d.message.clone())
            .collect()
    }

    /// Stream every diagnostic to stderr.
    pub fn eprint_all(&self) {
        for d in &self.items {
            eprintln!("{d}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_rendering() {
        let d = Diagnostic {
            severity: Severity::Error,
            file: "motor.plantuml".to_string(),
            line: 7,
            col: 12,
            message: "unterminated guard".to_string(),
        };
        assert_eq!(
            d.to_string(),
            "motor.plantuml:7:12: error: unterminated guard"
        );
    }

    #[test]
    fn test_sink_counts() {
        let mut diags = Diagnostics::new();
        diags.warning("f", 1, 1, "w1");
        diags.error("f", 2, 1, "e1");
        diags.warning("f", 3, 1, "w2");
        assert_eq!(diags.warning_count(), 2);
        assert_eq!(diags.error_count(), 1);
        assert!(diags.has_errors());
        assert_eq!(diags.warning_messages(), vec!["w1", "w2"]);
    }

    #[test]
    fn test_empty_sink() {
        let diags = Diagnostics::new();
        assert!(!diags.has_errors());
        assert_eq!(diags.iter().count(), 0);
    }
}
