//! JSON-RPC 2.0 wire types and the stdio serve loop.
//!
//! MCP messages arrive one per line on stdin; responses leave one per line
//! on stdout. Requests without an `id` are notifications and get no
//! response. All logging goes to stderr — stdout belongs to the protocol.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::dispatch::McpDispatcher;
use super::{resources, tools};
use crate::error::ScoutError;
use crate::AppContext;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;
/// MCP resource errors (unknown URI, nothing cached) use -32002.
const RESOURCE_NOT_FOUND: i32 = -32002;

// ─── Server loop ──────────────────────────────────────────────────────────────

/// Serve MCP over stdio until EOF or a shutdown signal.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        protocol = MCP_PROTOCOL_VERSION,
        "MCP server listening on stdio"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received — stopping MCP server");
                break;
            }

            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed — stopping MCP server");
                        break;
                    }
                    Err(e) => {
                        warn!(err = %e, "stdin read error");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                if let Some(response) = dispatch_line(&line, &ctx).await {
                    stdout.write_all(response.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
            }
        }
    }

    info!("MCP server stopped");
    Ok(())
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C; elsewhere Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

// ─── Dispatch ─────────────────────────────────────────────────────────────────

/// Handle one wire message. Returns `None` for notifications (no `id`).
pub async fn dispatch_line(text: &str, ctx: &Arc<AppContext>) -> Option<String> {
    let req: RpcRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(_) => {
            return Some(error_response(Value::Null, PARSE_ERROR, "Parse error"));
        }
    };

    if req.jsonrpc != "2.0" {
        return Some(error_response(
            req.id.unwrap_or(Value::Null),
            INVALID_REQUEST,
            "Invalid Request",
        ));
    }

    let params = req.params.unwrap_or(Value::Null);
    debug!(method = %req.method, "rpc dispatch");

    let Some(id) = req.id else {
        handle_notification(&req.method);
        return None;
    };

    match handle_method(&req.method, params, ctx).await {
        Ok(result) => {
            let resp = RpcResponse {
                jsonrpc: "2.0",
                id,
                result: Some(result),
                error: None,
            };
            Some(serde_json::to_string(&resp).unwrap_or_default())
        }
        Err(e) => Some(error_response(id, e.code, &e.message)),
    }
}

fn handle_notification(method: &str) {
    match method {
        "notifications/initialized" => debug!("client initialized"),
        "notifications/cancelled" => debug!("client cancelled a request"),
        other => debug!(method = other, "ignoring notification"),
    }
}

async fn handle_method(
    method: &str,
    params: Value,
    ctx: &Arc<AppContext>,
) -> Result<Value, RpcError> {
    match method {
        "initialize" => Ok(handle_initialize()),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(tools::handle_tools_list()),
        "tools/call" => handle_tools_call(params, ctx).await,
        "resources/list" => Ok(json!({ "resources": resources::list_resources() })),
        "resources/read" => {
            let uri = params
                .get("uri")
                .and_then(Value::as_str)
                .ok_or_else(|| RpcError {
                    code: INVALID_PARAMS,
                    message: "missing required field 'uri'".into(),
                })?;
            resources::read_resource(ctx, uri)
                .await
                .map_err(rpc_error_from)
        }
        _ => Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
        }),
    }
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": {},
            "resources": {},
        },
        "serverInfo": {
            "name": "scoutd",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

async fn handle_tools_call(params: Value, ctx: &Arc<AppContext>) -> Result<Value, RpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError {
            code: INVALID_PARAMS,
            message: "missing required field 'name'".into(),
        })?;
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let dispatcher = McpDispatcher::new(Arc::clone(ctx));
    let envelope = dispatcher
        .dispatch(name, arguments)
        .await
        .map_err(rpc_error_from)?;

    let text = serde_json::to_string_pretty(&envelope.to_value()).unwrap_or_default();
    Ok(json!({
        "content": [{ "type": "text", "text": text }],
        "isError": !envelope.ok,
    }))
}

fn rpc_error_from(e: ScoutError) -> RpcError {
    let code = match &e {
        ScoutError::InvalidArgument(_) => INVALID_PARAMS,
        ScoutError::NotFound(_) => RESOURCE_NOT_FOUND,
        ScoutError::Upstream { .. } => INTERNAL_ERROR,
        ScoutError::Internal(_) => INTERNAL_ERROR,
    };
    RpcError {
        code,
        message: e.to_string(),
    }
}

fn error_response(id: Value, code: i32, message: &str) -> String {
    let resp = RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(RpcError {
            code,
            message: message.to_string(),
        }),
    };
    serde_json::to_string(&resp).unwrap_or_default()
}
