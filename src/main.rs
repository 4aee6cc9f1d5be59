use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;
use sqlite_analyzer::sqlite::analyzer::{AnalyzerOptions, StorageAnalyzer};
use sqlite_analyzer::sqlite::core::header::FileHeader;
use sqlite_analyzer::sqlite::source::{ByteSource, FileSource};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    run(args)
}

pub fn run(args: cli::Args) -> Result<()> {
    let source = FileSource::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    info!("Opened {}", args.file.display());

    match args.command {
        cli::Command::Header => {
            // Shown even when the signature is wrong, so corrupt files can be inspected.
            let bytes = source
                .read_at(0, FileHeader::HEADER_SIZE)
                .context("File is too short to hold a database header")?;
            let header = FileHeader::inspect(&bytes)?;
            println!("{}", header);
        }
        cli::Command::Tables => {
            let catalog = StorageAnalyzer::new(&source)
                .catalog()
                .context("Failed to read the schema table")?;
            let names = catalog
                .iter()
                .map(|entry| format!("{} {}", entry.kind, entry.name))
                .join("\n");
            println!("{}", names);
        }
        cli::Command::Analyze { jobs } => {
            let analyzer = StorageAnalyzer::with_options(&source, AnalyzerOptions { jobs });
            let report = analyzer
                .analyze()
                .with_context(|| format!("Failed to analyze {}", args.file.display()))?;
            print!("{}", report);
        }
    }
    Ok(())
}
