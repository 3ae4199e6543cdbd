use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::blueprint::Blueprint;
use crate::error::CompileError;
use crate::layout::Lowering;

mod ast;
mod blueprint;
mod decompose;
mod error;
mod expr;
mod layout;
mod optimizer;
mod parser;
mod primitives;
mod scope;
mod stream;

/// Compile a combilogica script into a blueprint string.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Script to compile
    #[arg(short, long, required_unless_present = "decode")]
    script: Option<PathBuf>,

    /// List the entities of an existing blueprint string instead of compiling
    #[arg(long, conflicts_with = "script")]
    decode: Option<PathBuf>,

    /// Log the parsed program and the entity listing
    #[arg(short, long)]
    debug: bool,

    /// Blueprint label
    #[arg(short, long)]
    label: Option<String>,
}

fn read_file(path: &Path) -> error::Result<String> {
    fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn compile(source: &str, label: Option<&str>) -> error::Result<String> {
    let script = parser::parse(source)?;
    debug!("parsed program = {}", serde_json::to_string_pretty(&script)?);

    let Lowering {
        mut blueprint,
        outputs,
    } = layout::lower(&script);
    if blueprint.is_empty() {
        warn!("script produced no entities");
    }
    debug!(?outputs, "top-level outputs");
    blueprint.center();
    if let Some(label) = label {
        blueprint.set_label(label);
    }
    debug!("entities:\n{}", blueprint);
    blueprint.encode()
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = &args.decode {
        let blueprint = Blueprint::decode(read_file(path)?.trim())?;
        print!("{}", blueprint);
        return Ok(());
    }
    let Some(path) = &args.script else {
        anyhow::bail!("--script is required");
    };
    let source = read_file(path)?;
    println!("{}", compile(&source, args.label.as_deref())?);
    Ok(())
}
