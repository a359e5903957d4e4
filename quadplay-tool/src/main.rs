mod commands;
mod config;
mod error;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{DialectChoice, load_config, resolve};
use crate::error::QpError;

#[derive(Parser)]
#[command(name = "qp")]
#[command(about = "Tools for quadplay BetterJSON and WorkJSON documents", long_about = None)]
struct Cli {
    /// Dialect: better or work
    #[arg(long, global = true)]
    dialect: Option<DialectChoice>,

    /// Spaces per indentation level, 0 for compact output
    #[arg(long, global = true)]
    indent: Option<usize>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rewrite a document as strict JSON
    Normalize {
        /// Input file, or - for standard input
        file: PathBuf,
    },
    /// Re-print a document in its dialect
    Format {
        /// Input file, or - for standard input
        file: PathBuf,

        /// Sort object keys recursively
        #[arg(long)]
        sort_keys: bool,

        /// Rewrite the file instead of printing
        #[arg(short, long)]
        in_place: bool,
    },
    /// Parse documents and report the first error in each
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Encode a document in the graph wire format
    Pack { file: PathBuf },
    /// Decode the graph wire format back into a document
    Unpack { file: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config();
    let (dialect, indent) = resolve(&config, cli.dialect, cli.indent);

    match cli.command {
        Command::Normalize { file } => {
            let text = commands::read_input(&file)?;
            println!("{}", commands::normalize(&text, dialect, indent)?);
        }
        Command::Format {
            file,
            sort_keys,
            in_place,
        } => {
            if in_place && is_stdin(&file) {
                return Err(QpError::InPlaceStdin.into());
            }
            let text = commands::read_input(&file)?;
            let out = commands::format(&text, dialect, indent, sort_keys)?;
            if in_place {
                std::fs::write(&file, out + "\n")?;
            } else {
                println!("{out}");
            }
        }
        Command::Check { files } => {
            let mut failed = 0;
            for file in &files {
                if let Err(err) = commands::check(file, dialect) {
                    eprintln!("{err}");
                    failed += 1;
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} files failed to parse", files.len());
            }
        }
        Command::Pack { file } => {
            let text = commands::read_input(&file)?;
            println!("{}", commands::pack(&text, dialect)?);
        }
        Command::Unpack { file } => {
            let text = commands::read_input(&file)?;
            println!("{}", commands::unpack(&text, dialect, indent)?);
        }
    }

    Ok(())
}

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == "-"
}
