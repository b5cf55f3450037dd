//! Scan sessions and the orchestration loop that drives them

pub mod orchestrator;
pub mod session;

pub use orchestrator::{Orchestrator, ToolInvoker};
pub use session::{AbortReason, ReactStep, ScanSession, SessionStatus, StepDecision};
