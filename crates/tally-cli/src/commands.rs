use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tally_alloc::AllocatorConfig;
use tally_store::InMemoryStore;

use crate::cli::*;
use crate::config;
use crate::scenarios::{self, Scenario, ScenarioReport};
use crate::stress::{self, StressPlan, StressReport};

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = config::load(cli.config.as_deref())?;
    match cli.command {
        Command::Scenario(args) => cmd_scenario(args, &config, cli.format).await,
        Command::Stress(args) => cmd_stress(args, config, cli.format).await,
        Command::Config => cmd_config(&config, cli.format),
    }
}

async fn cmd_scenario(
    args: ScenarioArgs,
    config: &AllocatorConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let mut reports = Vec::new();
    for scenario in Scenario::select(&args.name)? {
        let report = scenarios::run(scenario, &store, config).await?;
        if format == OutputFormat::Text {
            print_scenario(&report);
        }
        reports.push(report);
    }

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    let failed = reports.iter().filter(|r| !r.passed()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} scenarios failed", reports.len());
    }
    if format == OutputFormat::Text {
        println!("{} {} scenarios passed", "✓".green().bold(), reports.len());
    }
    Ok(())
}

fn print_scenario(report: &ScenarioReport) {
    let status = if report.passed() {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!(
        "{} {} ({})",
        status,
        report.scenario.name().bold(),
        report.strategy.name().cyan()
    );
    println!("  Table: {}", report.table.dimmed());
    for claim in &report.claims {
        println!(
            "  {} claimed {} in {} attempt(s)",
            claim.by,
            claim.token.to_string().yellow(),
            claim.attempts
        );
    }
    println!("  Counter: {}", report.counter.to_string().bold());
    for check in &report.checks {
        let mark = if check.passed {
            "✓".green()
        } else {
            "✗".red()
        };
        println!("    {} {}", mark, check.description);
    }
}

async fn cmd_stress(
    args: StressArgs,
    mut config: AllocatorConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    if let Some(max_retries) = args.max_retries {
        config.retry = config.retry.with_max_retries(max_retries);
    }
    let report = stress::run(StressPlan {
        config,
        workers: args.workers,
        allocations: args.allocations,
        latency: Duration::from_millis(args.latency_ms),
        initial: args.initial,
    })
    .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_stress(&report),
    }
    if !report.passed() {
        anyhow::bail!("stress verification failed");
    }
    Ok(())
}

fn print_stress(report: &StressReport) {
    let verdict = |ok: bool| if ok { "ok".green() } else { "FAILED".red().bold() };
    println!(
        "Stress: {} workers x {} allocations ({})",
        report.workers.to_string().bold(),
        report.allocations_per_worker.to_string().bold(),
        report.strategy.name().cyan()
    );
    println!(
        "  Claimed: {} ({} unique) {}",
        report.claimed,
        report.unique,
        verdict(report.tokens_unique())
    );
    println!(
        "  Records missing: {} {}",
        report.records_missing,
        verdict(report.records_missing == 0)
    );
    println!(
        "  Counter: {} -> {} {}",
        report.counter_start,
        report.counter_end,
        verdict(report.counter_consistent())
    );
    println!(
        "  Attempts: {} total, {} conflicts, worst {}",
        report.total_attempts,
        report.conflicts(),
        report.max_attempts
    );
    println!("  Elapsed: {} ms", report.elapsed_ms);
}

fn cmd_config(config: &AllocatorConfig, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", config::render(config)?),
    }
    Ok(())
}
