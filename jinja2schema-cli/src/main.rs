use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use jinja2schema_core::{infer_with, to_schema, to_schema_string, Config, NullLoader};

/// Infers the structural shape of the context a Jinja-like template
/// expects, and prints it as a JSON Schema document.
#[derive(Parser)]
#[command(name = "jinja2schema", version, about)]
struct Args {
    /// Template source file, or `-` for stdin.
    template: PathBuf,

    /// Optional JSON/TOML-shaped config overriding the defaults (§6).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit the schema as a single compact line instead of pretty-printed.
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let source = read_source(&args.template)
        .with_context(|| format!("reading template {}", args.template.display()))?;

    let config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<Config>(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => Config::default(),
    };

    let context =
        infer_with(&source, &config, &NullLoader).context("inferring template context shape")?;

    if args.compact {
        println!("{}", to_schema_string(&context, &config));
    } else {
        println!("{}", serde_json::to_string_pretty(&to_schema(&context, &config))?);
    }

    Ok(())
}

fn read_source(path: &PathBuf) -> Result<String> {
    if path.to_str() == Some("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}
