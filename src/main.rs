//! sc-gen CLI.
//!
//! Translate a PlantUML statechart into a table-driven C++ state machine
//! and a generated test suite.

use std::path::PathBuf;

use clap::Parser;

use sc_gen::diag::Diagnostics;

#[derive(Parser)]
#[command(name = "sc-gen")]
#[command(version = "0.1.0")]
#[command(about = "Generate table-driven C++ state machines from PlantUML statecharts")]
#[command(long_about = "
sc-gen parses a PlantUML state diagram, verifies the machine is well formed
(initial state, reachability, no unguarded completion cycles, deterministic
dispatch), then emits a standalone C++ state machine together with a test
suite replaying the cycles and paths of the chart.
")]
struct Cli {
    /// PlantUML statechart to translate
    input: PathBuf,

    /// Output selector: cpp (translation unit) or hpp (header-only)
    #[arg(value_name = "cpp|hpp")]
    output: String,

    /// Optional name prefix for the generated machine type and files
    prefix: Option<String>,

    /// Directory receiving the generated artifacts
    #[arg(long, value_name = "DIR", default_value = ".")]
    out_dir: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut diags = Diagnostics::new();
    let result = sc_gen::translate_file(&cli.input, &cli.output, cli.prefix.as_deref(), &mut diags);
    diags.eprint_all();

    match result {
        Ok(translation) => {
            sc_gen::write_artifacts(&translation, &cli.out_dir)?;
            println!(
                "{}: {} state(s), {} transition(s), {} scenario(s)",
                translation.machine_name,
                translation.state_count,
                translation.transition_count,
                translation.scenario_count
            );
            for artifact in &translation.artifacts {
                println!("  {}", cli.out_dir.join(&artifact.file_name).display());
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
