use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tally_alloc::Strategy;

#[derive(Parser)]
#[command(
    name = "tally",
    about = "tally: unique ID allocation over conditional writes",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Allocator configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay a concurrency scenario against a fresh in-memory store
    Scenario(ScenarioArgs),
    /// Hammer one counter from many tasks and verify the claims
    Stress(StressArgs),
    /// Print the effective allocator configuration
    Config,
}

#[derive(Args)]
pub struct ScenarioArgs {
    /// Scenario name, or `all`
    #[arg(default_value = "all")]
    pub name: String,
}

#[derive(Args)]
pub struct StressArgs {
    /// Overrides the configured strategy
    #[arg(short, long)]
    pub strategy: Option<Strategy>,
    #[arg(short, long, default_value = "8")]
    pub workers: usize,
    /// Allocations per worker
    #[arg(short = 'n', long, default_value = "100")]
    pub allocations: usize,
    /// Simulated store round-trip latency
    #[arg(long, default_value = "0")]
    pub latency_ms: u64,
    /// Initial counter value (0 for atomic-add, 1 otherwise)
    #[arg(long, allow_negative_numbers = true)]
    pub initial: Option<i64>,
    /// Overrides the configured retry budget
    #[arg(long)]
    pub max_retries: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scenario() {
        let cli = Cli::try_parse_from(["tally", "scenario", "optimistic-locking"]).unwrap();
        if let Command::Scenario(args) = cli.command {
            assert_eq!(args.name, "optimistic-locking");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_scenario_defaults_to_all() {
        let cli = Cli::try_parse_from(["tally", "scenario"]).unwrap();
        if let Command::Scenario(args) = cli.command {
            assert_eq!(args.name, "all");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_stress() {
        let cli = Cli::try_parse_from([
            "tally",
            "stress",
            "--strategy",
            "cas-put",
            "-w",
            "4",
            "-n",
            "25",
            "--latency-ms",
            "2",
        ])
        .unwrap();
        if let Command::Stress(args) = cli.command {
            assert_eq!(args.strategy, Some(Strategy::CasPut));
            assert_eq!(args.workers, 4);
            assert_eq!(args.allocations, 25);
            assert_eq!(args.latency_ms, 2);
            assert!(args.initial.is_none());
            assert!(args.max_retries.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_stress_rejects_unknown_strategy() {
        assert!(Cli::try_parse_from(["tally", "stress", "--strategy", "pessimistic"]).is_err());
    }

    #[test]
    fn parse_stress_negative_initial() {
        let cli = Cli::try_parse_from(["tally", "stress", "--initial", "-5"]).unwrap();
        if let Command::Stress(args) = cli.command {
            assert_eq!(args.initial, Some(-5));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from([
            "tally",
            "--verbose",
            "--format",
            "json",
            "--config",
            "tally.toml",
            "config",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("tally.toml")));
        assert!(matches!(cli.command, Command::Config));
    }
}
