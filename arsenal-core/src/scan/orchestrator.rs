//! The sequential scan loop
//!
//! Each iteration asks the reasoning service for a Thought and Action given
//! the full transcript, runs the action through the invocation adapter, and
//! appends the observation. Strictly sequential within a session because
//! every action depends on every prior observation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::invoke::{InvocationAdapter, Observation};
use crate::reason::{ActionSpec, Decision, ReasoningRequest, ReasoningService};
use crate::registry::{self, RunSpec};

use super::session::{AbortReason, ScanSession, StepDecision};

/// Consecutive fatal observations before the loop gives up on the environment
const FATAL_STREAK_LIMIT: usize = 3;

/// Seam between the loop and actual process execution, so the loop is
/// testable with a scripted invoker.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        id: &str,
        target: &str,
        params: &BTreeMap<String, String>,
    ) -> Observation;

    /// Whether the tool is known, runnable, and installed
    fn is_available(&self, id: &str) -> bool;
}

#[async_trait]
impl ToolInvoker for InvocationAdapter {
    async fn invoke(
        &self,
        id: &str,
        target: &str,
        params: &BTreeMap<String, String>,
    ) -> Observation {
        InvocationAdapter::invoke(self, id, target, params).await
    }

    fn is_available(&self, id: &str) -> bool {
        let Ok(desc) = registry::describe(id) else {
            return false;
        };
        let tools_dir = self.tools_dir();
        match desc.run {
            RunSpec::Script { file, .. } => desc.install_dir(tools_dir).join(file).is_file(),
            RunSpec::NseScript { script } => desc.install_dir(tools_dir).join(script).is_file(),
            RunSpec::Binary { .. } => desc.resolve_binary(tools_dir).is_some(),
            RunSpec::NotRunnable => false,
        }
    }
}

/// Drives one scan session to a terminal state
pub struct Orchestrator<'a> {
    reasoner: &'a dyn ReasoningService,
    invoker: &'a dyn ToolInvoker,
}

impl<'a> Orchestrator<'a> {
    pub fn new(reasoner: &'a dyn ReasoningService, invoker: &'a dyn ToolInvoker) -> Self {
        Self { reasoner, invoker }
    }

    /// Run the loop until stop, budget exhaustion, a fatal-failure streak,
    /// reasoning unavailability, or cancellation. Per-action failures are
    /// transcript content, never an early return.
    pub async fn run(
        &self,
        target: &str,
        budget: usize,
        cancel: CancellationToken,
    ) -> ScanSession {
        let mut session = ScanSession::new(target, budget);
        let mut fatal_streak = 0usize;

        loop {
            if session.remaining_budget() == 0 {
                info!(target, steps = session.transcript.len(), "budget exhausted");
                session.abort(AbortReason::BudgetExceeded);
                break;
            }

            let request = ReasoningRequest {
                target: session.target.clone(),
                history: session.history_for_prompt(),
                remaining_budget: session.remaining_budget(),
            };
            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    session.abort(AbortReason::Cancelled);
                    break;
                }
                result = self.reasoner.next_step(&request) => match result {
                    Ok(decision) => decision,
                    Err(err) => {
                        warn!(target, "reasoning service failed: {err}");
                        session.abort(AbortReason::ReasoningUnavailable);
                        break;
                    }
                },
            };

            match decision {
                Decision::Stop { thought } => {
                    info!(target, "reasoning service signaled stop");
                    session.push_step(thought, None, None, StepDecision::Stop);
                    session.complete();
                    break;
                }
                Decision::Act { thought, action } => {
                    let observation = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            session.abort(AbortReason::Cancelled);
                            break;
                        }
                        obs = self.execute(&action, &session.target) => obs,
                    };

                    if observation.is_fatal() {
                        fatal_streak += 1;
                    } else {
                        fatal_streak = 0;
                    }
                    let aborting = fatal_streak >= FATAL_STREAK_LIMIT;
                    let decision = if aborting {
                        StepDecision::Abort
                    } else {
                        StepDecision::Continue
                    };
                    session.push_step(thought, Some(action), Some(observation), decision);

                    if aborting {
                        warn!(target, "{FATAL_STREAK_LIMIT} consecutive tool failures");
                        session.abort(AbortReason::ToolFailureStreak);
                        break;
                    }
                }
            }
        }

        session
    }

    /// A proposed action that names an unknown or uninstalled tool becomes a
    /// synthetic error observation; the loop continues and the next reasoning
    /// step can choose differently.
    async fn execute(&self, action: &ActionSpec, target: &str) -> Observation {
        if !self.invoker.is_available(&action.tool) {
            return Observation::synthetic(
                &action.tool,
                format!("tool {} is unknown or not installed", action.tool),
            );
        }
        self.invoker
            .invoke(&action.tool, target, &action.parameters)
            .await
    }
}
