//! Reasoning service trait definitions

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A proposed tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub tool: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// What the reasoning service wants the loop to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Run a tool, then come back with its observation
    Act { thought: String, action: ActionSpec },
    /// The goal is judged satisfied or no further useful action exists
    Stop { thought: String },
}

impl Decision {
    pub fn thought(&self) -> &str {
        match self {
            Decision::Act { thought, .. } | Decision::Stop { thought } => thought,
        }
    }
}

/// One reasoning query: everything the service needs to propose the next step
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub target: String,
    /// Rendered transcript of prior steps, empty on the first query
    pub history: String,
    pub remaining_budget: usize,
}

/// Narrow seam between the scan loop and any concrete model provider.
/// Implementations own their retries; an `Err` from `next_step` means the
/// service is irrecoverably unavailable and the session should abort.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn next_step(&self, request: &ReasoningRequest) -> Result<Decision>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_thought_accessor() {
        let act = Decision::Act {
            thought: "probe for subdomains".to_string(),
            action: ActionSpec {
                tool: "subfinder".to_string(),
                parameters: BTreeMap::new(),
            },
        };
        assert_eq!(act.thought(), "probe for subdomains");

        let stop = Decision::Stop {
            thought: "coverage is sufficient".to_string(),
        };
        assert_eq!(stop.thought(), "coverage is sufficient");
    }
}
