//! Code-generation backend interface.
//!
//! This module defines the trait every target-language backend implements.
//! Upstream stages never know which language they feed: the emitter hands a
//! frozen machine and its scenario suite to whichever backend the registry
//! resolved from the CLI selector.

use crate::error::{ScError, ScResult};
use crate::machine::Machine;
use crate::scenario::Scenario;

/// Whether the primary artifact is a translation unit or a header-only form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Source,
    Header,
}

/// The main trait for code-generation backends.
pub trait CodegenBackend {
    /// Backend name for logging and error messages.
    fn name(&self) -> &'static str;

    /// Map a CLI selector to the output kind, or `None` when the selector
    /// belongs to another backend.
    fn output_kind(&self, selector: &str) -> Option<OutputKind>;

    /// File name of the primary artifact for a machine name.
    fn machine_file_name(&self, machine: &str, kind: OutputKind) -> String;

    /// File name of the test artifact for a machine name.
    fn test_file_name(&self, machine: &str) -> String;

    /// Escape a source name into a target-language identifier. The escape
    /// must be invertible per machine; reserved words the backend refuses to
    /// escape are an [`ScError::Emit`].
    fn escape_ident(&self, raw: &str) -> ScResult<String>;

    /// Render a source name as a target-language string literal.
    fn string_literal(&self, raw: &str) -> String;

    /// Render the primary artifact.
    fn render_machine(
        &self,
        machine: &Machine,
        kind: OutputKind,
        warnings: &[String],
    ) -> ScResult<String>;

    /// Render the test artifact.
    fn render_tests(
        &self,
        machine: &Machine,
        scenarios: &[Scenario],
        kind: OutputKind,
    ) -> ScResult<String>;
}

/// Registry of available backends. One C++ backend ships; more can be
/// registered without touching the upstream stages.
pub struct BackendRegistry {
    backends: Vec<Box<dyn CodegenBackend>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(super::cpp::CppBackend));
        registry
    }
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { backends: Vec::new() }
    }

    pub fn register(&mut self, backend: Box<dyn CodegenBackend>) {
        self.backends.push(backend);
    }

    /// Resolve a CLI selector to a backend and its output kind.
    pub fn select(&self, selector: &str) -> ScResult<(&dyn CodegenBackend, OutputKind)> {
        for backend in &self.backends {
            if let Some(kind) = backend.output_kind(selector) {
                return Ok((backend.as_ref(), kind));
            }
        }
        Err(ScError::UnknownSelector(selector.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_selects_cpp() {
        let registry = BackendRegistry::default();
        let (backend, kind) = registry.select("cpp").unwrap();
        assert_eq!(backend.name(), "cpp");
        assert_eq!(kind, OutputKind::Source);
        let (_, kind) = registry.select("hpp").unwrap();
        assert_eq!(kind, OutputKind::Header);
    }

    #[test]
    fn test_unknown_selector() {
        let registry = BackendRegistry::default();
        assert!(matches!(
            registry.select("java"),
            Err(ScError::UnknownSelector(_))
        ));
    }

    #[test]
    fn test_empty_registry_rejects_everything() {
        let registry = BackendRegistry::new();
        assert!(registry.select("cpp").is_err());
    }
}
