//! sc-gen: PlantUML statechart to C++ state-machine translator.
//!
//! The pipeline turns a textual statechart into a standalone, table-driven
//! state machine plus an executable test suite:
//!
//! 1. **Parse**: line-oriented grammar into an AST of declarations.
//! 2. **Build**: fold the AST into a typed directed multigraph.
//! 3. **Verify**: structural checks (initial state, reachability,
//!    completion cycles, determinism, identifiers).
//! 4. **Synthesize**: a deterministic suite of reset/cycle/path scenarios.
//! 5. **Emit**: primary and test artifacts through a target-language
//!    backend.
//!
//! # Example
//!
//! ```
//! use sc_gen::{diag::Diagnostics, translate_source};
//!
//! let source = "@startuml\n\
//!               [*] --> Idle\n\
//!               Idle --> Busy : start\n\
//!               Busy --> Idle : stop\n\
//!               @enduml\n";
//! let mut diags = Diagnostics::new();
//! let translation =
//!     translate_source("demo.plantuml", source, "Demo", "hpp", &mut diags).unwrap();
//! assert_eq!(translation.artifacts[0].file_name, "Demo.hpp");
//! ```

pub mod diag;
pub mod emit;
pub mod error;
pub mod machine;
pub mod parser;
pub mod scenario;
pub mod verify;

use std::path::Path;

use diag::Diagnostics;
use emit::{Artifact, BackendRegistry};
pub use error::{ScError, ScResult};

/// Result of a successful pipeline run.
#[derive(Debug)]
pub struct Translation {
    /// Name of the generated machine type.
    pub machine_name: String,
    /// Primary artifact first, test artifact second.
    pub artifacts: Vec<Artifact>,
    pub state_count: usize,
    pub transition_count: usize,
    pub scenario_count: usize,
}

/// Derive the machine name from an input path: capitalized stem, optionally
/// prefixed.
#[must_use]
pub fn machine_name_for(path: &Path, prefix: Option<&str>) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut chars = stem.chars();
    let capitalized = match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    };
    format!("{}{capitalized}", prefix.unwrap_or(""))
}

/// Run the whole pipeline over a source buffer. Diagnostics stream into
/// `diags`; any parse or structural error aborts with the matching
/// [`ScError`] after its stage finished sweeping.
pub fn translate_source(
    file: &str,
    source: &str,
    machine_name: &str,
    selector: &str,
    diags: &mut Diagnostics,
) -> ScResult<Translation> {
    let registry = BackendRegistry::default();
    let (backend, kind) = registry.select(selector)?;

    tracing::info!("parsing {file}");
    let decls = parser::parse(file, source, diags)?;

    let m = machine::build(machine_name, &decls, file)?;

    tracing::info!("verifying {machine_name}");
    verify::verify(&m, file, diags);
    if diags.has_errors() {
        return Err(ScError::Structural {
            name: machine_name.to_string(),
            errors: diags.error_count(),
        });
    }

    let scenarios = scenario::synthesize(&m);
    let artifacts = emit::emit(backend, kind, &m, &scenarios, &diags.warning_messages())?;

    Ok(Translation {
        machine_name: machine_name.to_string(),
        state_count: m.state_count(),
        transition_count: m.transition_count(),
        scenario_count: scenarios.len(),
        artifacts,
    })
}

/// File wrapper around [`translate_source`].
pub fn translate_file(
    path: &Path,
    selector: &str,
    prefix: Option<&str>,
    diags: &mut Diagnostics,
) -> ScResult<Translation> {
    if !path.is_file() {
        return Err(ScError::FileNotFound(path.display().to_string()));
    }
    let source = std::fs::read_to_string(path)?;
    let file = path.display().to_string();
    let machine_name = machine_name_for(path, prefix);
    translate_source(&file, &source, &machine_name, selector, diags)
}

/// Write every artifact into `out_dir`.
pub fn write_artifacts(translation: &Translation, out_dir: &Path) -> ScResult<()> {
    std::fs::create_dir_all(out_dir)?;
    for artifact in &translation.artifacts {
        let path = out_dir.join(&artifact.file_name);
        std::fs::write(&path, &artifact.contents)?;
        tracing::info!("wrote {}", path.display());
    }
    Ok(())
}
