// src/cli/mod.rs — CLI definition (clap derive)

pub mod progress;
pub mod report;
pub mod run;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kaizen", about = "Budget-gated PDCA improvement loop", version)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Suppress progress output
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run PDCA cycles over a design
    Run {
        /// Design JSON ({frontend: {pages}, backend: {endpoints}})
        #[arg(long)]
        design: String,

        /// Number of cycles (overrides [cycle].cycles)
        #[arg(long)]
        cycles: Option<u32>,

        /// Where to write the run state (default: state dir/run-state.json)
        #[arg(long)]
        state: Option<String>,

        /// Use the offline worker instead of [worker].endpoint
        #[arg(long)]
        dry_run: bool,

        /// Keep going when no defects remain without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the ledger report and metrics of a saved run
    Report {
        /// Run state file (default: state dir/run-state.json)
        #[arg(long)]
        state: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "kaizen", "run", "--design", "d.json", "--cycles", "2", "--dry-run", "-y",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                design,
                cycles,
                dry_run,
                yes,
                state,
            } => {
                assert_eq!(design, "d.json");
                assert_eq!(cycles, Some(2));
                assert!(dry_run);
                assert!(yes);
                assert!(state.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_report_with_global_config() {
        let cli = Cli::try_parse_from(["kaizen", "report", "--state", "s.json", "--config", "c.toml"])
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some("c.toml"));
        assert!(matches!(cli.command, Commands::Report { state: Some(ref s) } if s == "s.json"));
    }

    #[test]
    fn test_run_requires_design() {
        assert!(Cli::try_parse_from(["kaizen", "run"]).is_err());
    }
}
