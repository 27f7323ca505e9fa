//! Command handlers.

use crate::commands::{ExecArgs, LintArgs};
use crate::config::CliConfig;
use crate::exec::Orchestrator;
use crate::resolve::resolve;
use anyhow::Context;
use console::style;
use kestrel_core::{Axis, Metadata};
use kestrel_frontend::{Linter, Template, matrix, yaml};
use kestrel_runner::ConsoleSink;
use std::sync::Arc;

/// Execute a pipeline locally.
pub async fn exec(args: ExecArgs) -> anyhow::Result<()> {
    let config = CliConfig::load().context("Failed to load configuration")?;
    let mut settings = args.settings;
    config.apply(&mut settings);

    Orchestrator::new(settings, Arc::new(ConsoleSink))
        .run_all(&args.file)
        .await?;

    println!("{} Pipeline completed", style("✓").green());
    Ok(())
}

/// Lint every axis of a pipeline definition.
pub fn lint(args: &LintArgs) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.path)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;

    let mut axes = matrix::parse(&raw)?;
    if axes.is_empty() {
        axes.push(Axis::new());
    }

    let linter = Linter::new().with_trusted(args.trusted);
    for (index, axis) in axes.iter().enumerate() {
        let mut metadata = Metadata::default();
        metadata.job.matrix = axis.clone();
        let resolved = resolve(metadata, &[])?;

        let text = Template::parse(&raw)?.execute_map(&resolved.environ);
        let config = yaml::parse_str(&text)?;
        linter
            .lint(&config)
            .with_context(|| format!("Axis {} ({}) is invalid", index + 1, axis))?;

        println!(
            "{} Axis {} {} ({} steps)",
            style("✓").green(),
            index + 1,
            style(axis).dim(),
            config.pipeline.len()
        );
    }

    println!(
        "{} {} is valid",
        style("✓").green(),
        style(args.path.display()).bold()
    );
    Ok(())
}
