//! Artifact emission.
//!
//! Thin orchestration above the backends: resolve names, render the primary
//! and test artifacts, and hand back artifact records the caller can write
//! to disk.

pub mod backend;
pub mod cpp;

pub use backend::{BackendRegistry, CodegenBackend, OutputKind};

use crate::error::ScResult;
use crate::machine::Machine;
use crate::scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The state-machine source.
    Machine,
    /// The synthesized test suite.
    Tests,
}

/// One emitted file: a name relative to the output directory and its
/// contents.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub kind: ArtifactKind,
    pub contents: String,
}

/// Render both artifacts for a verified machine.
pub fn emit(
    backend: &dyn CodegenBackend,
    kind: OutputKind,
    machine: &Machine,
    scenarios: &[Scenario],
    warnings: &[String],
) -> ScResult<Vec<Artifact>> {
    let primary = backend.render_machine(machine, kind, warnings)?;
    let tests = backend.render_tests(machine, scenarios, kind)?;
    tracing::info!(
        backend = backend.name(),
        "emitted {} and {}",
        backend.machine_file_name(&machine.name, kind),
        backend.test_file_name(&machine.name)
    );
    Ok(vec![
        Artifact {
            file_name: backend.machine_file_name(&machine.name, kind),
            kind: ArtifactKind::Machine,
            contents: primary,
        },
        Artifact {
            file_name: backend.test_file_name(&machine.name),
            kind: ArtifactKind::Tests,
            contents: tests,
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostics;
    use crate::machine;
    use crate::parser;
    use crate::scenario;

    #[test]
    fn test_emit_produces_both_artifacts() {
        let mut diags = Diagnostics::new();
        let decls = parser::parse(
            "motor.plantuml",
            "@startuml\n[*] --> Idle\nIdle --> Idle : tick\n@enduml\n",
            &mut diags,
        )
        .unwrap();
        let m = machine::build("Motor", &decls, "motor.plantuml").unwrap();
        let scenarios = scenario::synthesize(&m);
        let registry = BackendRegistry::default();
        let (backend, kind) = registry.select("hpp").unwrap();
        let artifacts = emit(backend, kind, &m, &scenarios, &[]).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].file_name, "Motor.hpp");
        assert_eq!(artifacts[0].kind, ArtifactKind::Machine);
        assert_eq!(artifacts[1].file_name, "MotorTests.cpp");
        assert_eq!(artifacts[1].kind, ArtifactKind::Tests);
    }
}
