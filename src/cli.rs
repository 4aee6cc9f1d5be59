use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspect the header and page usage of an SQLite database file
#[derive(Debug, Parser)]
#[command(name = "sqlite-analyzer", version)]
pub struct Args {
    /// Path to the database file
    pub file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the decoded 100-byte database header
    Header,
    /// List the objects defined in the schema table
    Tables,
    /// Count the pages used by every table and index
    Analyze {
        /// Number of threads walking b-trees
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_analyze_with_jobs() {
        let args =
            Args::try_parse_from(["sqlite-analyzer", "app.db", "analyze", "--jobs", "4"]).unwrap();
        assert_eq!(args.file, PathBuf::from("app.db"));
        assert!(matches!(args.command, Command::Analyze { jobs: 4 }));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Args::try_parse_from(["sqlite-analyzer", "app.db"]).is_err());
    }
}
