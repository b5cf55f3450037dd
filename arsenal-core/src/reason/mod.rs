//! Reasoning service: the seam between the scan loop and a model provider

pub mod anthropic;
pub mod prompts;
pub mod traits;

pub use anthropic::AnthropicReasoner;
pub use traits::{ActionSpec, Decision, ReasoningRequest, ReasoningService};
