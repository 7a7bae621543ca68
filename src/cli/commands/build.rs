//! Build command implementation
//!
//! Implements `usbforge --create` and `usbforge --update`: runs the build
//! pipeline against a guestfish server and reports the outcome.

use anyhow::{bail, Result};

use crate::cli::output::{create_spinner, status, OutputConfig};
use crate::core::orchestrator::{BuildReport, Orchestrator};
use crate::core::plan::{BuildPlan, PlanRequest};
use crate::core::session::StageStatus;
use crate::error::BuildError;
use crate::infra::guestfish::GuestfishService;

/// Execute the build command
pub async fn execute(request: PlanRequest) -> Result<()> {
    let output = OutputConfig::current();
    let plan = BuildPlan::from_request(request).map_err(BuildError::from)?;

    let spinner = output
        .show_progress()
        .then(|| create_spinner(&format!("Building {}", plan.image_path.display())));

    let mut orchestrator = Orchestrator::new(plan);
    if let Some(pb) = spinner.clone() {
        orchestrator = orchestrator.with_observer(move |state| pb.set_message(format!("{state}...")));
    }

    let result =
        tokio::task::spawn_blocking(move || orchestrator.run(GuestfishService::start)).await?;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let report = result?;

    print_report(&report, output)?;

    let failures = report.warnings.iter().filter(|w| w.is_failure()).count();
    if failures > 0 {
        bail!("{failures} copy or edit operation(s) failed");
    }
    Ok(())
}

fn print_report(report: &BuildReport, output: OutputConfig) -> Result<()> {
    if output.json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if output.quiet {
        return Ok(());
    }

    if output.verbose > 0 {
        for record in &report.stages {
            let mark = match record.status {
                StageStatus::Completed => status::SUCCESS,
                StageStatus::Skipped => status::INFO,
            };
            println!("  {mark} {}", record.stage);
        }
    }
    if !report.warnings.is_empty() {
        println!("{} {} warning(s)", status::WARNING, report.warnings.len());
    }
    if let Some(label) = &report.label {
        println!("{} Volume label: {}", status::INFO, label.label);
    }
    println!(
        "{} {} ({} copies, {} edits)",
        status::SUCCESS,
        report.image_path.display(),
        report.copies_applied,
        report.edits_applied
    );
    Ok(())
}
