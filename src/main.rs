use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

mod import;
mod input;
mod process;
mod utilities;
mod write;

/// Compiles source meshes into a game-ready model file.
#[derive(Parser)]
#[command(name = "mesh-wrench", version)]
struct Cli {
    /// Path to the compile script.
    script: PathBuf,

    /// Directory the output model is written into, instead of the script's directory.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    let contents = std::fs::read_to_string(&cli.script).with_context(|| format!("could not read script \"{}\"", cli.script.display()))?;
    let params = input::parse_script(&contents).context("could not parse the compile script")?;

    let script_dir = cli.script.parent().unwrap_or_else(|| std::path::Path::new("."));
    let output_dir = cli.output.as_deref().unwrap_or(script_dir);

    let mut output_path = output_dir.join(&params.model_filename);
    output_path.set_extension(write::MODEL_EXTENSION);

    info!("Compiling \"{}\".", cli.script.display());

    let session = process::load_session(params, script_dir)?;
    let compiled = process::process(session, &process::GreedyStripifier)?;
    let bytes = write::write_model(&compiled);

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("could not create \"{}\"", parent.display()))?;
    }
    std::fs::write(&output_path, &bytes).with_context(|| format!("could not write \"{}\"", output_path.display()))?;

    info!(
        "Wrote \"{}\": {} bytes, {} models in {} body groups ({} lods), {} bones, {} materials, {} ik chains in {:.2?}.",
        output_path.display(),
        bytes.len(),
        compiled.models.len(),
        compiled.body_groups.len(),
        compiled.lod_params.len(),
        compiled.bones.len(),
        compiled.materials.len(),
        compiled.ik_chains.len(),
        start.elapsed()
    );

    Ok(())
}
