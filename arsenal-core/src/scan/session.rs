//! Scan session state: the append-only transcript and its status machine

use serde::Serialize;

use crate::invoke::Observation;
use crate::reason::ActionSpec;

/// Why a session aborted instead of completing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    BudgetExceeded,
    ReasoningUnavailable,
    ToolFailureStreak,
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::BudgetExceeded => write!(f, "step budget exceeded"),
            AbortReason::ReasoningUnavailable => write!(f, "reasoning service unavailable"),
            AbortReason::ToolFailureStreak => write!(f, "consecutive tool failures"),
            AbortReason::Cancelled => write!(f, "cancelled by operator"),
        }
    }
}

/// Loop outcome recorded on each step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDecision {
    Continue,
    Stop,
    Abort,
}

/// One Thought, Action, Observation triple. A final stop step carries no
/// action or observation.
#[derive(Debug, Clone, Serialize)]
pub struct ReactStep {
    pub index: usize,
    pub thought: String,
    pub action: Option<ActionSpec>,
    pub observation: Option<Observation>,
    pub decision: StepDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Aborted(AbortReason),
}

/// One scan against one target. Mutated only by the orchestrator; terminal
/// once status leaves `Running`.
#[derive(Debug, Serialize)]
pub struct ScanSession {
    pub target: String,
    pub transcript: Vec<ReactStep>,
    pub budget: usize,
    pub status: SessionStatus,
}

impl ScanSession {
    pub fn new(target: impl Into<String>, budget: usize) -> Self {
        Self {
            target: target.into(),
            transcript: Vec::new(),
            budget,
            status: SessionStatus::Running,
        }
    }

    /// Action steps still allowed (stop steps do not consume budget)
    pub fn remaining_budget(&self) -> usize {
        self.budget.saturating_sub(self.action_steps())
    }

    fn action_steps(&self) -> usize {
        self.transcript
            .iter()
            .filter(|step| step.action.is_some())
            .count()
    }

    /// Append with the next index; indices are gap-free by construction
    pub(crate) fn push_step(
        &mut self,
        thought: String,
        action: Option<ActionSpec>,
        observation: Option<Observation>,
        decision: StepDecision,
    ) {
        let index = self.transcript.len();
        self.transcript.push(ReactStep {
            index,
            thought,
            action,
            observation,
            decision,
        });
    }

    pub(crate) fn complete(&mut self) {
        self.status = SessionStatus::Completed;
    }

    pub(crate) fn abort(&mut self, reason: AbortReason) {
        self.status = SessionStatus::Aborted(reason);
    }

    /// All parsed findings across the transcript, in step order
    pub fn findings(&self) -> Vec<&str> {
        self.transcript
            .iter()
            .filter_map(|step| step.observation.as_ref())
            .flat_map(|obs| obs.findings.iter().map(String::as_str))
            .collect()
    }

    /// Render prior steps as reasoning context. Truncated captures get an
    /// explicit marker here so the model knows output was cut.
    pub fn history_for_prompt(&self) -> String {
        let mut rendered = String::new();
        for step in &self.transcript {
            rendered.push_str(&format!("Step {}\nThought: {}\n", step.index, step.thought));
            if let Some(action) = &step.action {
                rendered.push_str(&format!("Action: {}", action.tool));
                for (flag, value) in &action.parameters {
                    rendered.push_str(&format!(" {flag} {value}"));
                }
                rendered.push('\n');
            }
            if let Some(obs) = &step.observation {
                rendered.push_str(&render_observation(obs));
            }
            rendered.push('\n');
        }
        rendered
    }
}

fn render_observation(obs: &Observation) -> String {
    let mut out = String::new();
    if let Some(error) = &obs.error {
        out.push_str(&format!("Observation: error: {error}\n"));
        return out;
    }
    if obs.timed_out {
        out.push_str("Observation: timed out\n");
        return out;
    }
    out.push_str(&format!("Observation: exit code {}\n", obs.exit_code));
    if !obs.findings.is_empty() {
        out.push_str("Findings:\n");
        for finding in &obs.findings {
            out.push_str(&format!("  {finding}\n"));
        }
    }
    if !obs.stdout.is_empty() {
        out.push_str("Output:\n");
        out.push_str(&obs.stdout);
        if !obs.stdout.ends_with('\n') {
            out.push('\n');
        }
    }
    if !obs.stderr.is_empty() && obs.exit_code != 0 {
        out.push_str("Stderr:\n");
        out.push_str(&obs.stderr);
        if !obs.stderr.ends_with('\n') {
            out.push('\n');
        }
    }
    if obs.truncated {
        out.push_str("[output truncated]\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ok_observation(findings: Vec<&str>) -> Observation {
        Observation {
            tool: "subfinder".to_string(),
            command: "subfinder -d example.com".to_string(),
            exit_code: 0,
            stdout: "a.example.com\n".to_string(),
            stderr: String::new(),
            findings: findings.into_iter().map(String::from).collect(),
            truncated: false,
            timed_out: false,
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    fn act(tool: &str) -> ActionSpec {
        ActionSpec {
            tool: tool.to_string(),
            parameters: BTreeMap::new(),
        }
    }

    #[test]
    fn test_budget_counts_action_steps_only() {
        let mut session = ScanSession::new("example.com", 3);
        assert_eq!(session.remaining_budget(), 3);
        session.push_step(
            "t".to_string(),
            Some(act("subfinder")),
            Some(ok_observation(vec![])),
            StepDecision::Continue,
        );
        assert_eq!(session.remaining_budget(), 2);
        session.push_step("done".to_string(), None, None, StepDecision::Stop);
        assert_eq!(session.remaining_budget(), 2);
    }

    #[test]
    fn test_indices_are_gap_free() {
        let mut session = ScanSession::new("example.com", 5);
        for _ in 0..4 {
            session.push_step(
                "t".to_string(),
                Some(act("httpx")),
                Some(ok_observation(vec![])),
                StepDecision::Continue,
            );
        }
        let indices: Vec<usize> = session.transcript.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_findings_aggregate_in_order() {
        let mut session = ScanSession::new("example.com", 5);
        session.push_step(
            "t".to_string(),
            Some(act("subfinder")),
            Some(ok_observation(vec!["a.example.com"])),
            StepDecision::Continue,
        );
        session.push_step(
            "t".to_string(),
            Some(act("nuclei")),
            Some(ok_observation(vec!["[high] cve-x (http)"])),
            StepDecision::Continue,
        );
        assert_eq!(
            session.findings(),
            vec!["a.example.com", "[high] cve-x (http)"]
        );
    }

    #[test]
    fn test_history_marks_truncation() {
        let mut session = ScanSession::new("example.com", 5);
        let mut obs = ok_observation(vec![]);
        obs.truncated = true;
        session.push_step(
            "t".to_string(),
            Some(act("httpx")),
            Some(obs),
            StepDecision::Continue,
        );
        assert!(session.history_for_prompt().contains("[output truncated]"));
    }

    #[test]
    fn test_history_renders_errors_compactly() {
        let mut session = ScanSession::new("example.com", 5);
        session.push_step(
            "t".to_string(),
            Some(act("ghost")),
            Some(Observation::synthetic("ghost", "unknown tool: ghost")),
            StepDecision::Continue,
        );
        let history = session.history_for_prompt();
        assert!(history.contains("error: unknown tool: ghost"));
        assert!(!history.contains("exit code"));
    }
}
