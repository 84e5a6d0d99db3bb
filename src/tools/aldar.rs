//! Tool handlers backed by the Aldar Exchange HTTP API.
//!
//! Endpoint paths and query-parameter mappings are grounded on
//! `original_source/ws-app.py::_call_aldar_api` (the `get_exchange_rate`,
//! `get_branch_details`, and `calculate_exchange` mappings come directly
//! from that function; `get_transaction_status`'s endpoint is named
//! only in the distilled specification, not in the retrieved source).

use std::sync::Arc;

use serde_json::{json, Value};

use super::{BoxFuture, ToolContext, ToolSpec};

/// Perform a bounded-timeout GET against the Aldar base URL and return
/// either the parsed JSON body or an `{error}` object — per §4.6, HTTP
/// failures never propagate into the session loop as an error.
async fn aldar_get(ctx: &ToolContext, path: &str, query: &[(&str, String)]) -> Value {
    let url = format!("{}{}", ctx.aldar_base_api_url, path);
    let result = ctx
        .http
        .get(&url)
        .query(query)
        .timeout(ctx.tool_timeout)
        .send()
        .await;

    match result {
        Ok(resp) => match resp.error_for_status() {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(body) => body,
                Err(e) => json!({ "error": format!("invalid response body: {e}") }),
            },
            Err(e) => json!({ "error": format!("API call failed: {e}") }),
        },
        Err(e) => json!({ "error": format!("API call failed: {e}") }),
    }
}

fn get_exchange_rate(args: Value, ctx: Arc<ToolContext>) -> BoxFuture<'static, Value> {
    Box::pin(async move {
        let rate_type = args
            .get("rate_type")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        aldar_get(
            &ctx,
            "/api/User/GetRate",
            &[("type", rate_type.to_string())],
        )
        .await
    })
}

fn get_branch_details(_args: Value, ctx: Arc<ToolContext>) -> BoxFuture<'static, Value> {
    Box::pin(async move {
        let body = aldar_get(&ctx, "/api/User/GetBranchesDetails", &[]).await;
        // The LLM protocol requires an object response; wrap the bare
        // list as {branches, total_count} (spec's locked form — see
        // DESIGN.md Open Question 2).
        match body {
            Value::Array(branches) => {
                let total_count = branches.len();
                json!({ "branches": branches, "total_count": total_count })
            }
            // Already an object (e.g. an {error} from aldar_get) — pass through.
            other => other,
        }
    })
}

fn calculate_exchange(args: Value, ctx: Arc<ToolContext>) -> BoxFuture<'static, Value> {
    Box::pin(async move {
        let transaction_type = args
            .get("transaction_type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let currency_code = args
            .get("currency_code")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let local_amount = args.get("local_amount").and_then(Value::as_f64).unwrap_or(0.0);
        let foreign_amount = args
            .get("foreign_amount")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        aldar_get(
            &ctx,
            "/api/User/GetRate",
            &[
                ("type", transaction_type),
                ("curcode", currency_code),
                ("lcyamount", local_amount.to_string()),
                ("fcyamount", foreign_amount.to_string()),
            ],
        )
        .await
    })
}

fn get_transaction_status(args: Value, ctx: Arc<ToolContext>) -> BoxFuture<'static, Value> {
    Box::pin(async move {
        let tran_ref_no = args
            .get("transaction_ref_no")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        aldar_get(
            &ctx,
            "/api/User/GetTransactionDetails",
            &[("tranRefNo", tran_ref_no)],
        )
        .await
    })
}

/// `transfer_to_human_operator` carries no HTTP call: the session loop
/// (§4.2 rule 2) intercepts this name before reaching the dispatcher
/// and performs the registry-level terminal-phase transition directly.
/// This handler exists only so the tool appears in the declared schema
/// table and is never actually invoked through `ToolTable::dispatch`.
fn transfer_to_human_operator(_args: Value, _ctx: Arc<ToolContext>) -> BoxFuture<'static, Value> {
    Box::pin(async move { json!({ "status": "transfer_requested" }) })
}

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "get_exchange_rate",
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "rate_type": {
                        "type": "integer",
                        "description": "The rate type code (e.g., 1 for standard rate)"
                    }
                },
                "required": ["rate_type"]
            }),
            handler: Box::new(get_exchange_rate),
        },
        ToolSpec {
            name: "get_branch_details",
            parameters_schema: json!({
                "type": "object",
                "properties": {}
            }),
            handler: Box::new(get_branch_details),
        },
        ToolSpec {
            name: "calculate_exchange",
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "transaction_type": { "type": "string", "enum": ["tt", "BUY", "SELL"] },
                    "currency_code": { "type": "string" },
                    "local_amount": { "type": "number" },
                    "foreign_amount": { "type": "number" }
                },
                "required": ["transaction_type", "currency_code", "local_amount", "foreign_amount"]
            }),
            handler: Box::new(calculate_exchange),
        },
        ToolSpec {
            name: "get_transaction_status",
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "transaction_ref_no": { "type": "string" }
                },
                "required": ["transaction_ref_no"]
            }),
            handler: Box::new(get_transaction_status),
        },
        ToolSpec {
            name: "transfer_to_human_operator",
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string" }
                },
                "required": ["reason"]
            }),
            handler: Box::new(transfer_to_human_operator),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ctx_with_base(base: String) -> Arc<ToolContext> {
        Arc::new(ToolContext {
            http: reqwest::Client::new(),
            aldar_base_api_url: base,
            tool_timeout: Duration::from_millis(200),
        })
    }

    #[tokio::test]
    async fn unreachable_backend_surfaces_as_error_object_not_panic() {
        let ctx = ctx_with_base("http://127.0.0.1:0".to_string());
        let result = get_exchange_rate(json!({"rate_type": 1}), ctx).await;
        assert!(result.get("error").is_some());
    }

    #[test]
    fn tool_specs_has_five_entries_with_expected_names() {
        let specs = tool_specs();
        assert_eq!(specs.len(), 5);
        assert_eq!(specs[1].name, "get_branch_details");
    }
}
