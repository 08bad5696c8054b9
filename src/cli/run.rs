use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use tokio::sync::mpsc;
use tracing::info;

use super::format::{format_duration, parse_json_arg};
use super::progress::RunProgress;
use crate::cache::MemoryCache;
use crate::cli::commands::RunArgs;
use crate::config;
use crate::errors::SandflowError;
use crate::pipeline::{PipelineExecutor, RunPhase, RunReport, RunRequest, StepState};
use crate::registry::Registry;
use crate::sandbox::SourceDescriptor;

pub async fn handle_run(args: RunArgs, quiet: bool) -> Result<(), SandflowError> {
    if args.run_id.is_some() && args.sources.len() > 1 {
        return Err(SandflowError::Config("--run-id needs exactly one source".into()));
    }

    let file = config::parse_config(&PathBuf::from(&args.config)).await?;
    let mut registry = Registry::with_builtins();
    file.register_skills(&mut registry);
    let pipeline = file.build(&registry)?;

    let mut sandbox_config = file.sandbox.clone();
    if let Some(dir) = &args.sandbox_dir {
        sandbox_config = sandbox_config.with_base_path(dir);
    }

    let mut executor = PipelineExecutor::new(pipeline)?
        .with_sandbox_config(sandbox_config)
        .with_cache(Arc::new(MemoryCache::new()))
        .with_skipped_annotation(args.mark_skipped);
    if let Some(dir) = &args.output {
        executor = executor.with_audit_dir(dir);
    }

    let progress = if quiet || args.json {
        None
    } else {
        let (tx, mut rx) = mpsc::unbounded_channel();
        executor = executor.with_event_channel(tx);
        Some(tokio::spawn(async move {
            let mut progress = RunProgress::new();
            while let Some(event) = rx.recv().await {
                progress.handle_event(&event);
            }
        }))
    };

    let input = args.input.as_deref().map(parse_json_arg);
    let requests: Vec<RunRequest> = args
        .sources
        .iter()
        .map(|text| {
            let source = if text == "-" { SourceDescriptor::Empty } else { SourceDescriptor::parse(text) };
            let mut request = RunRequest::new(source);
            if let Some(ref input) = input {
                request = request.with_input(input.clone());
            }
            if let Some(ref run_id) = args.run_id {
                request = request.with_run_id(run_id.clone());
            }
            request
        })
        .collect();

    info!(pipeline = %executor.config().name, runs = requests.len(), "Dispatching runs");
    let outcomes = executor.run_many(requests).await;
    // Closes the event channel so the progress task drains and exits.
    drop(executor);
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    let mut reports = Vec::new();
    let mut first_error = None;
    for (source, outcome) in args.sources.iter().zip(outcomes) {
        match outcome {
            Ok(report) => reports.push(report),
            Err(e) => {
                if !args.json {
                    eprintln!("{} {}: {}", style("✗").red(), source, e);
                }
                first_error.get_or_insert(e);
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else if !quiet {
        for report in &reports {
            print_report(report);
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    let failed: usize = reports.iter().map(|r| r.summary.failed).sum();
    if failed > 0 {
        return Err(SandflowError::StepExecution(format!("{} step(s) failed", failed)));
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let phase = match report.phase {
        RunPhase::Completed => style(report.phase.to_string()).green(),
        RunPhase::Aborted => style(report.phase.to_string()).yellow(),
        _ => style(report.phase.to_string()).red(),
    };
    println!(
        "\n{} {} {} {} in {}",
        style("▶").cyan().bold(),
        style(&report.pipeline).bold(),
        style(&report.run_id).dim(),
        phase,
        format_duration(report.duration_ms),
    );
    if let Some(ref revision) = report.revision {
        println!("  {} {}", style("revision").dim(), revision);
    }
    if let Some(ref step) = report.stopped_after {
        println!("  {} {}", style("stopped after").yellow(), step);
    }

    for (name, result) in report.results.iter() {
        let record = report.steps.get(name).cloned().unwrap_or_default();
        let marker = match result.state() {
            StepState::Completed => style("✓").green(),
            StepState::Failed => style("✗").red(),
            _ => style("-").dim(),
        };
        let mut line = format!(
            "  {} {:<24} {:<10} {:>8}",
            marker,
            name,
            result.state().to_string(),
            format_duration(record.duration_ms)
        );
        if record.cached {
            line.push_str(" (cached)");
        } else if record.attempts > 1 {
            line.push_str(&format!(" ({} attempts)", record.attempts));
        }
        println!("{}", line);
        if let Some(err) = result.error() {
            println!("      {}", style(err).red().dim());
        }
    }

    let summary = &report.summary;
    println!(
        "  {} completed, {} failed, {} skipped, {} cached of {} steps",
        summary.completed, summary.failed, summary.skipped, summary.cache_hits, summary.total_steps
    );
}
