//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "arsenal")]
#[command(author, version, about = "Security tool arsenal manager and scan orchestrator")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List registered tools with their computed state
    List,
    /// Install one tool
    Install {
        /// Tool identifier
        id: String,
    },
    /// Install every registered tool
    InstallAll,
    /// Update one installed tool
    Update {
        /// Tool identifier
        id: String,
    },
    /// Update every installed tool
    UpdateAll,
    /// Report tools with updates available
    Check,
    /// Run an AI-driven scan session against a target
    Scan {
        /// Target URL, hostname, or IP
        target: String,

        /// Maximum number of tool invocations
        #[arg(long)]
        budget: Option<usize>,

        /// Reasoning model override
        #[arg(long)]
        model: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_parse() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_scan_with_budget() {
        let args = Args::parse_from(["arsenal", "scan", "example.com", "--budget", "5"]);
        match args.command {
            Command::Scan { target, budget, model } => {
                assert_eq!(target, "example.com");
                assert_eq!(budget, Some(5));
                assert!(model.is_none());
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn test_install_requires_id() {
        assert!(Args::try_parse_from(["arsenal", "install"]).is_err());
        assert!(Args::try_parse_from(["arsenal", "install", "nuclei"]).is_ok());
    }
}
