//! C6: Tool Dispatcher.
//!
//! Per SPEC_FULL.md §4.6.1 / §9's explicit redesign flag, tools are a
//! table mapping name → (schema, handler) rather than a `match` over
//! `call.name` (contrast the teacher's old `execute_tool_inner`, which
//! this deliberately does not imitate). New tools register by
//! appending one `ToolSpec`; the LLM's tool-declaration payload is
//! derived from the table by mapping over it.

pub mod aldar;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ToolHandler =
    Box<dyn Fn(Value, Arc<ToolContext>) -> BoxFuture<'static, Value> + Send + Sync>;

/// A declared tool: its wire name, its JSON-schema parameter shape (as
/// sent to the LLM in the session's tool declarations), and the
/// handler invoked when the LLM calls it.
pub struct ToolSpec {
    pub name: &'static str,
    pub parameters_schema: Value,
    pub handler: ToolHandler,
}

/// Shared context every tool handler runs with.
pub struct ToolContext {
    pub http: reqwest::Client,
    pub aldar_base_api_url: String,
    pub tool_timeout: Duration,
}

/// The full set of declared tools, built once at startup.
pub struct ToolTable {
    specs: Vec<ToolSpec>,
}

impl ToolTable {
    pub fn new() -> Self {
        Self {
            specs: aldar::tool_specs(),
        }
    }

    /// The tool declarations to hand to the LLM session at construction.
    pub fn declarations(&self) -> Vec<Value> {
        self.specs
            .iter()
            .map(|spec| {
                serde_json::json!({
                    "name": spec.name,
                    "parameters": spec.parameters_schema,
                })
            })
            .collect()
    }

    /// Dispatch a non-`transfer_to_human_operator` tool call. The
    /// session loop (§4.2 rule 2) intercepts `transfer_to_human_operator`
    /// before reaching this function, since its effect is call-lifecycle
    /// control rather than a request/response the LLM protocol carries.
    pub async fn dispatch(&self, name: &str, arguments: Value, ctx: Arc<ToolContext>) -> Value {
        match self.specs.iter().find(|s| s.name == name) {
            Some(spec) => (spec.handler)(arguments, ctx).await,
            None => serde_json::json!({ "error": format!("unknown tool: {name}") }),
        }
    }
}

impl Default for ToolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_cover_all_five_tools() {
        let table = ToolTable::new();
        let names: Vec<&str> = table.specs.iter().map(|s| s.name).collect();
        for expected in [
            "get_exchange_rate",
            "get_branch_details",
            "calculate_exchange",
            "get_transaction_status",
            "transfer_to_human_operator",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }

    #[tokio::test]
    async fn dispatch_of_unknown_tool_returns_error_object_not_panic() {
        let table = ToolTable::new();
        let ctx = Arc::new(ToolContext {
            http: reqwest::Client::new(),
            aldar_base_api_url: "http://localhost".to_string(),
            tool_timeout: Duration::from_secs(1),
        });
        let result = table
            .dispatch("does_not_exist", serde_json::json!({}), ctx)
            .await;
        assert!(result.get("error").is_some());
    }
}
