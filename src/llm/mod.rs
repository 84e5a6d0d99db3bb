//! C2: the live bidirectional LLM session (§4.2) and its pure
//! per-message processing rules.

pub mod rules;
pub mod session;

pub use rules::{apply_rules, RuleOutcome, ServerEvent, ToolCallEvent};
pub use session::{fetch_system_instruction, LlmSession};
