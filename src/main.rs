use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use eksplan::config::StackConfig;
use eksplan::provision::{DryRunClient, Resource};
use eksplan::stack::{self, StackOutputs};
use eksplan::{template, CancelToken, Executor, RunOptions, RunReport, RunSummary};

mod cli;

use crate::cli::{Command, EksplanArgs};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // -------- Parse CLI arguments --------
    let args = EksplanArgs::parse();

    // -------- Logging Setup --------
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = load_config(&args)?;

    // -------- Branch based on command --------
    match args.command {
        Command::Run => {
            tracing::info!("Provisioning stack '{}'...", config.cluster_name);
            run(&args, config).await
        }
        Command::Plan => {
            tracing::info!("Planning stack '{}'...", config.cluster_name);
            plan(&args, &config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(args: &EksplanArgs) -> Result<StackConfig> {
    let mut config = StackConfig::load(&args.file)?;
    if let Some(out_dir) = &args.out_dir {
        config.out_dir = out_dir.clone();
    }
    if let Some(cluster_name) = &args.cluster_name {
        config.cluster_name = cluster_name.clone();
    }
    config.validate()?;
    Ok(config)
}

fn client_for(config: &StackConfig) -> DryRunClient {
    DryRunClient::new(&config.account_id, &config.region)
        .with_latency(Duration::from_millis(config.dry_run.latency_ms))
        .with_faults(config.dry_run.faults.clone())
}

fn executor_for(config: &StackConfig) -> Result<Executor<Resource>> {
    let mut exec = Executor::new().with_defaults(config.task_defaults);
    stack::compose(&mut exec, config, Arc::new(client_for(config)))?;
    Ok(exec)
}

/// Print the task graph: counts and one valid order.
fn plan(args: &EksplanArgs, config: &StackConfig) -> Result<()> {
    let exec = executor_for(config)?;
    let graph = exec.plan()?;

    println!("Stack file      : {}", args.file.display());
    print!("{}", graph.render_plan());
    Ok(())
}

async fn run(args: &EksplanArgs, config: StackConfig) -> Result<ExitCode> {
    template::prepare_out_dir(&config.out_dir)?;
    let exec = executor_for(&config)?;

    // Ctrl-C skips everything that has not started; in-flight tasks finish.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received - waiting for in-flight tasks");
                cancel.cancel();
            }
        });
    }

    let mut options = RunOptions::default().with_cancel(cancel);
    options.max_concurrency = args.concurrency_limit();

    let report = exec.run(options).await?;
    let outputs = StackOutputs::from_report(&report);

    print_statuses(&report);
    if let Some(name) = &outputs.cluster_name {
        println!("\ncluster    : {name}");
    }
    if let Some(pipeline) = &outputs.pipeline {
        println!("pipeline   : {pipeline}");
    }

    if let Some(path) = &args.report {
        write_report(path, &report, &outputs)?;
    }

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_statuses(report: &RunReport<Resource>) {
    println!("\nFinal task statuses:");
    for id in report.succeeded.keys() {
        println!("  {id} : SUCCESS");
    }
    for (id, failure) in &report.failed {
        println!("  {id} : FAILED -> {failure:#}");
    }
    for (id, reason) in &report.skipped {
        println!("  {id} : SKIPPED -> {reason}");
    }
}

#[derive(Serialize)]
struct ReportFile<'a> {
    summary: RunSummary,
    outputs: &'a StackOutputs,
}

fn write_report(
    path: &std::path::Path,
    report: &RunReport<Resource>,
    outputs: &StackOutputs,
) -> Result<()> {
    let file = ReportFile {
        summary: report.summary(),
        outputs,
    };
    let text = serde_json::to_string_pretty(&file)?;
    fs::write(path, text).with_context(|| format!("writing report {}", path.display()))
}
