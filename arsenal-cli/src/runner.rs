//! Command execution: maps each subcommand onto the core library and an
//! exit code

use std::process::ExitCode;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use arsenal_core::config::ArsenalConfig;
use arsenal_core::invoke::InvocationAdapter;
use arsenal_core::reason::AnthropicReasoner;
use arsenal_core::registry;
use arsenal_core::scan::{Orchestrator, ScanSession, SessionStatus};
use arsenal_core::update::{ApplyMode, BatchReport, UpdateEngine};

pub async fn list(config: &ArsenalConfig) -> Result<ExitCode> {
    let engine = UpdateEngine::new(config.tools.clone());
    println!("{:<18} {:<10} {}", "TOOL", "CATEGORY", "STATE");
    for (desc, state) in engine.check_all().await {
        println!("{:<18} {:<10} {}", desc.id, desc.category.to_string(), state);
    }
    // Informational: a tool in an error state does not fail the command
    Ok(ExitCode::SUCCESS)
}

pub async fn install(config: &ArsenalConfig, id: &str) -> Result<ExitCode> {
    let engine = UpdateEngine::new(config.tools.clone());
    let result = engine.apply(id, ApplyMode::Install).await?;
    if result.success {
        println!("{}: {}", result.id, result.new_state);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "{}: install failed: {}",
            result.id,
            result.error.as_deref().unwrap_or("unknown error")
        );
        Ok(ExitCode::FAILURE)
    }
}

pub async fn install_all(config: &ArsenalConfig) -> Result<ExitCode> {
    let engine = UpdateEngine::new(config.tools.clone());
    let report = engine.install_all().await;
    print_report("install", &report);
    Ok(batch_exit(&report))
}

pub async fn update(config: &ArsenalConfig, id: &str) -> Result<ExitCode> {
    let engine = UpdateEngine::new(config.tools.clone());
    let result = engine.apply(id, ApplyMode::Update).await?;
    if result.success {
        println!("{}: {}", result.id, result.new_state);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "{}: update failed: {}",
            result.id,
            result.error.as_deref().unwrap_or("unknown error")
        );
        Ok(ExitCode::FAILURE)
    }
}

pub async fn update_all(config: &ArsenalConfig) -> Result<ExitCode> {
    let engine = UpdateEngine::new(config.tools.clone());
    let report = engine.update_all().await;
    print_report("update", &report);
    Ok(batch_exit(&report))
}

pub async fn check(config: &ArsenalConfig) -> Result<ExitCode> {
    let engine = UpdateEngine::new(config.tools.clone());
    let mut stale = 0usize;
    for (desc, state) in engine.check_all().await {
        if let arsenal_core::update::ToolState::UpdateAvailable { latest } = &state {
            println!("{}: update available ({latest})", desc.id);
            stale += 1;
        }
    }
    if stale == 0 {
        println!("all installed tools are current");
    }
    // Informational only
    Ok(ExitCode::SUCCESS)
}

pub async fn scan(
    config: &ArsenalConfig,
    target: &str,
    budget: Option<usize>,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let budget = budget.unwrap_or(config.scan.step_budget);

    // A missing credential degrades to a clean abort, not a crash
    let reasoner = match AnthropicReasoner::new(&config.provider) {
        Ok(reasoner) => reasoner,
        Err(err) => {
            eprintln!("scan aborted: reasoning service unavailable: {err}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let adapter = InvocationAdapter::new(config);
    let orchestrator = Orchestrator::new(&reasoner, &adapter);

    info!(target, budget, "starting scan session");
    let session = orchestrator.run(target, budget, cancel).await;
    print_session(&session);

    match session.status {
        SessionStatus::Completed => Ok(ExitCode::SUCCESS),
        SessionStatus::Aborted(reason) => {
            eprintln!("scan aborted: {reason}");
            Ok(ExitCode::FAILURE)
        }
        SessionStatus::Running => unreachable!("orchestrator returns terminal sessions"),
    }
}

fn print_report(verb: &str, report: &BatchReport) {
    for result in &report.results {
        if result.success {
            println!(
                "{}: {} ({:.1}s)",
                result.id,
                result.new_state,
                result.duration.as_secs_f64()
            );
        }
    }
    for (id, reason) in &report.skipped {
        println!("{id}: skipped ({reason})");
    }
    let failures: Vec<_> = report.failures().collect();
    if failures.is_empty() {
        println!("{verb}: {} tools ok", report.results.len());
    } else {
        eprintln!("{verb}: {} tools failed:", failures.len());
        for failure in failures {
            eprintln!(
                "  {}: {}",
                failure.id,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

fn batch_exit(report: &BatchReport) -> ExitCode {
    if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_session(session: &ScanSession) {
    for step in &session.transcript {
        println!("--- step {} ---", step.index);
        println!("thought: {}", step.thought);
        if let Some(action) = &step.action {
            println!("action: {}", action.tool);
        }
        if let Some(obs) = &step.observation {
            if let Some(error) = &obs.error {
                println!("observation: error: {error}");
            } else if obs.timed_out {
                println!("observation: timed out");
            } else {
                println!("observation: exit code {}", obs.exit_code);
            }
            for finding in &obs.findings {
                println!("  finding: {finding}");
            }
        }
    }
    let findings = session.findings();
    println!();
    println!(
        "session {}: {} steps, {} findings",
        match session.status {
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted(_) => "aborted",
            SessionStatus::Running => "running",
        },
        session.transcript.len(),
        findings.len()
    );
    for finding in findings {
        println!("  {finding}");
    }
}

/// Validate a tool id up front so typos get a catalog instead of a stack of
/// engine errors
pub fn require_known_tool(id: &str) -> Result<()> {
    if registry::describe(id).is_err() {
        let known = registry::all()
            .iter()
            .map(|desc| desc.id)
            .collect::<Vec<_>>()
            .join(", ");
        anyhow::bail!("unknown tool '{id}'; known tools: {known}");
    }
    Ok(())
}
