//! `memweave run`: batch reconciliation over a dataset file.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use memweave_core::reconcile::orchestrator::Orchestrator;
use memweave_core::reconcile::persist::ProgressStore;
use memweave_core::reconcile::session::Reconciler;
use memweave_infra::factory::build_components;
use memweave_infra::io::dataset::load_units;
use memweave_infra::io::progress::JsonProgressFile;
use memweave_infra::io::results::JsonlResultSink;
use memweave_types::run::{ReconcileMode, RunSummary, UnitResult};

use crate::state::AppState;

pub struct RunArgs<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub progress: &'a Path,
    pub workers: Option<usize>,
    pub mode: Option<ReconcileMode>,
    pub limit: Option<usize>,
}

pub async fn run_pipeline(
    state: &mut AppState,
    args: RunArgs<'_>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    if let Some(workers) = args.workers {
        state.config.pipeline.workers = workers;
    }
    if let Some(mode) = args.mode {
        state.config.pipeline.mode = mode;
    }

    let mut units = load_units(args.input)
        .await
        .with_context(|| format!("Failed to load dataset {}", args.input.display()))?;
    if let Some(limit) = args.limit {
        units.truncate(limit);
    }

    let progress = JsonProgressFile::new(args.progress);
    let snapshot = progress
        .load()
        .await
        .with_context(|| format!("Failed to read progress file {}", args.progress.display()))?;
    let pending = units
        .iter()
        .filter(|u| !snapshot.contains(&u.unit_id))
        .count();

    let components = build_components(&state.config, &state.secrets).await?;
    let settings = &state.config.pipeline;
    let reconciler = Reconciler::new(
        components.judgment,
        components.embedder,
        components.store,
        settings,
    );

    let bar = if json || quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(pending as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.cyan} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}",
                )?
                .progress_chars("=> "),
        );
        bar
    };

    let observer_bar = bar.clone();
    let orchestrator = Orchestrator::new(Arc::new(reconciler))
        .with_workers(settings.effective_workers())
        .with_observer(Arc::new(move |result: &UnitResult| {
            observer_bar.set_message(result.unit_id.clone());
            observer_bar.inc(1);
        }));

    tracing::info!(
        units = units.len(),
        pending,
        workers = orchestrator.workers(),
        mode = %settings.mode,
        config = %state.config_path.display(),
        "starting run"
    );

    let mut sink = JsonlResultSink::open(args.output)
        .await
        .with_context(|| format!("Failed to open {}", args.output.display()))?;
    let started = Instant::now();
    let summary = orchestrator.run(units, &progress, &mut sink).await?;
    bar.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?);
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    println!();
    println!(
        "  {} Reconciled {} unit{} in {:.1}s",
        style("✓").green().bold(),
        style(summary.results.len()).bold(),
        if summary.results.len() == 1 { "" } else { "s" },
        started.elapsed().as_secs_f64()
    );
    if !summary.skipped_units.is_empty() {
        println!(
            "  {} {} already processed, skipped",
            style("i").blue().bold(),
            summary.skipped_units.len()
        );
    }
    let degraded = degraded_count(&summary);
    if degraded > 0 {
        println!(
            "  {} {} unit{} degraded (see logs)",
            style("!").yellow().bold(),
            degraded,
            if degraded == 1 { "" } else { "s" }
        );
    }
    println!();
    println!("{}", summary_table(&summary));
    println!();
    println!("  Results appended to {}", style(args.output.display()).dim());
    println!();

    Ok(())
}

fn degraded_count(summary: &RunSummary) -> usize {
    summary.results.iter().filter(|r| r.degraded).count()
}

fn summary_json(summary: &RunSummary) -> serde_json::Value {
    serde_json::json!({
        "processed": summary.results.len(),
        "skipped": summary.skipped_units.len(),
        "degraded": degraded_count(summary),
        "operation_counts": summary.totals,
    })
}

fn summary_table(summary: &RunSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Action").fg(Color::White),
        Cell::new("Count").fg(Color::White),
    ]);

    let totals = summary.totals;
    for (label, count, color) in [
        ("ADD", totals.add, Color::Green),
        ("UPDATE", totals.update, Color::Cyan),
        ("DELETE", totals.delete, Color::Red),
        ("NONE", totals.none, Color::DarkGrey),
    ] {
        table.add_row(vec![Cell::new(label).fg(color), Cell::new(count)]);
    }
    table
}
