//! Prompt construction and decision parsing for the scan loop

use serde::Deserialize;

use crate::registry;
use crate::{Error, Result};

use super::{ActionSpec, Decision};

/// System prompt: role, tool catalog, and the strict reply format
pub fn system_prompt() -> String {
    let catalog = registry::all()
        .iter()
        .filter(|desc| desc.is_runnable())
        .map(|desc| {
            let flags = if desc.allowed_flags.is_empty() {
                "none".to_string()
            } else {
                desc.allowed_flags.join(", ")
            };
            format!(
                "- {} ({}): {} [flags: {}]",
                desc.id, desc.category, desc.description, flags
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a penetration-testing assistant driving one security tool at a time \
against an authorized target. At each step, reason about what the prior tool output \
revealed and pick the single most informative next invocation, or stop when further \
runs would add nothing.\n\n\
Available tools:\n{catalog}\n\n\
Reply with exactly one JSON object and nothing else.\n\
To run a tool:\n\
{{\"thought\": \"<why this tool now>\", \"action\": {{\"tool\": \"<id>\", \"parameters\": {{\"<flag>\": \"<value>\"}}}}}}\n\
To finish:\n\
{{\"thought\": \"<why the scan is done>\", \"action\": \"stop\"}}\n\n\
Parameters are optional and restricted to each tool's listed flags. \
Never invent tool identifiers."
    )
}

/// User prompt for one reasoning query
pub fn user_prompt(target: &str, history: &str, remaining_budget: usize) -> String {
    if history.is_empty() {
        format!(
            "Target: {target}\nRemaining steps: {remaining_budget}\n\n\
No tools have run yet. Choose the first action."
        )
    } else {
        format!(
            "Target: {target}\nRemaining steps: {remaining_budget}\n\n\
Transcript so far:\n{history}\n\
Choose the next action, or stop."
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAction {
    Stop(String),
    Tool(ActionSpec),
}

#[derive(Deserialize)]
struct RawDecision {
    thought: String,
    action: RawAction,
}

/// Parse the model's reply into a [`Decision`]. Tolerates prose around the
/// JSON object but not a malformed or missing one.
pub fn parse_decision(reply: &str) -> Result<Decision> {
    let json = extract_json_object(reply).ok_or_else(|| {
        Error::Reasoning(format!(
            "reply contains no JSON decision: {}",
            excerpt(reply)
        ))
    })?;
    let raw: RawDecision = serde_json::from_str(json)
        .map_err(|e| Error::Reasoning(format!("malformed decision ({e}): {}", excerpt(json))))?;
    match raw.action {
        RawAction::Stop(word) if word.eq_ignore_ascii_case("stop") => Ok(Decision::Stop {
            thought: raw.thought,
        }),
        RawAction::Stop(word) => Err(Error::Reasoning(format!(
            "unrecognized action keyword: {word}"
        ))),
        RawAction::Tool(action) => Ok(Decision::Act {
            thought: raw.thought,
            action,
        }),
    }
}

/// Find the first balanced top-level JSON object in free text
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= 120 {
        trimmed.to_string()
    } else {
        let mut end = 120;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}
