//! Linkage CLI
//!
//! Command-line interface for:
//! - Running a link-discovery configuration end to end (`run`)
//! - Checking a configuration without scoring anything (`validate`)
//! - Showing the execution plan the configuration produces (`plan`)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use linkage_dsl::parse_metric_v1;
use linkage_engine::{
    run_link_spec, validate, ExecuteOptions, MeasureRegistry, PlanContext, ResourceStore,
    StrategyRegistry, ValidationError,
};
use linkage_ingest::load_collection;
use tracing_subscriber::EnvFilter;

mod config;
mod output;

use config::RunConfig;

#[derive(Parser)]
#[command(name = "linkage")]
#[command(author, version, about = "Declarative link discovery between resource collections")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a configuration and write the accepted / review link files.
    Run {
        /// Configuration file (JSON).
        config: PathBuf,
    },
    /// Check a configuration: expression, strategies, and schema.
    Validate {
        config: PathBuf,
    },
    /// Print the execution plan for a configuration as JSON.
    Plan {
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => cmd_run(&config),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Plan { config } => cmd_plan(&config),
    }
}

fn load_stores(config: &RunConfig) -> Result<(ResourceStore, ResourceStore)> {
    let source = load_collection(&config.source).context("loading source collection")?;
    let target = load_collection(&config.target).context("loading target collection")?;
    Ok((source, target))
}

fn execute_options(config: &RunConfig) -> ExecuteOptions {
    ExecuteOptions {
        acceptance_threshold: config.retention_threshold(),
        granularity: config.granularity,
        rewriter: config.rewriter.clone(),
        planner: config.planner.clone(),
        engine: config.engine.clone(),
        and_combiner: config.and_combiner,
        timeout: config.timeout_secs.map(Duration::from_secs),
        cancel: None,
    }
}

fn cmd_run(config_path: &PathBuf) -> Result<()> {
    let config = RunConfig::load(config_path)?;
    let (source, target) = load_stores(&config)?;

    let result = match run_link_spec(&config.metric, &source, &target, &execute_options(&config))
    {
        Ok(result) => result,
        Err(err) if err.is_cancellation() => {
            eprintln!("{} {err}", "stopped:".red().bold());
            return Err(anyhow!(err).context("run did not complete"));
        }
        Err(err) => return Err(anyhow!(err).context("run failed")),
    };

    let accepted = output::write_band(
        &config.acceptance.file,
        &result.mapping,
        &source,
        &target,
        &config.acceptance.relation,
        config.acceptance.threshold,
        None,
    )?;
    eprintln!(
        "{} {} accepted links -> {}",
        "wrote".green().bold(),
        accepted,
        config.acceptance.file.display().to_string().bold()
    );

    if let Some(verification) = &config.verification {
        let review = output::write_band(
            &verification.file,
            &result.mapping,
            &source,
            &target,
            &verification.relation,
            verification.threshold,
            Some(config.acceptance.threshold),
        )?;
        eprintln!(
            "{} {} review links -> {}",
            "wrote".green().bold(),
            review,
            verification.file.display().to_string().bold()
        );
    }

    let meta = &result.metadata;
    eprintln!(
        "{} {} x {} resources, {} links (rewrite {} us, plan {} us, execute {} us)",
        "ok".green().bold(),
        meta.source_size,
        meta.target_size,
        meta.link_count,
        meta.rewrite_micros,
        meta.plan_micros,
        meta.execute_micros,
    );
    if meta.warnings.count > 0 {
        eprintln!(
            "{} {} data-quality warnings; first {}:",
            "info:".yellow().bold(),
            meta.warnings.count,
            meta.warnings.samples.len()
        );
        for sample in &meta.warnings.samples {
            eprintln!("  - {sample}");
        }
    }
    Ok(())
}

fn cmd_validate(config_path: &PathBuf) -> Result<()> {
    let config = RunConfig::load(config_path)?;

    let strategies = StrategyRegistry::global();
    strategies.rewriter(&config.rewriter)?;
    strategies.planner(&config.planner)?;
    strategies.engine(&config.engine)?;

    let expr = parse_metric_v1(&config.metric).map_err(ValidationError::from)?;
    let threshold = expr.threshold().max(config.retention_threshold());
    let expr = expr.with_threshold(threshold);

    let (source, target) = load_stores(&config)?;
    let source_stats = source.stats();
    let target_stats = target.stats();
    validate(
        &expr,
        &PlanContext {
            registry: MeasureRegistry::global(),
            source: &source_stats,
            target: &target_stats,
        },
    )?;

    eprintln!(
        "{} {} x {} resources, expression {}",
        "ok".green().bold(),
        source.resource_count(),
        target.resource_count(),
        expr.to_string().bold()
    );
    Ok(())
}

fn cmd_plan(config_path: &PathBuf) -> Result<()> {
    let config = RunConfig::load(config_path)?;
    let (source, target) = load_stores(&config)?;

    let strategies = StrategyRegistry::global();
    let rewriter = strategies.rewriter(&config.rewriter)?;
    let planner = strategies.planner(&config.planner)?;

    let expr = parse_metric_v1(&config.metric).map_err(ValidationError::from)?;
    let threshold = expr.threshold().max(config.retention_threshold());
    let expr = expr.with_threshold(threshold);

    let source_stats = source.stats();
    let target_stats = target.stats();
    let ctx = PlanContext {
        registry: MeasureRegistry::global(),
        source: &source_stats,
        target: &target_stats,
    };
    validate(&expr, &ctx)?;

    let plan = planner.plan(&rewriter.rewrite(&expr, &ctx), &ctx);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
