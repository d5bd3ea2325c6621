/// MCP `tools/list` handler — exposes the scoutd triage operations as MCP
/// tool definitions.
///
/// Each tool definition follows the JSON Schema convention for
/// `inputSchema`. Agents call `tools/list` to discover the operations, then
/// invoke them via `tools/call` (dispatched by `mcp::dispatch`).
///
/// Tool implementation submodules:
/// - `papers` — fetch_emails, classify_papers, get_paper_details
/// - `pipeline` — send_notifications, run_pipeline
pub mod papers;
pub mod pipeline;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ScoutError;

// ─── Tool definition type ─────────────────────────────────────────────────────

/// A single MCP tool definition, as returned in `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl McpToolDef {
    fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

// ─── Tool catalogue ───────────────────────────────────────────────────────────

/// Returns all scoutd tools available via MCP.
///
/// Defined as a function (not a static) because `serde_json::json!` produces
/// a non-`const` `Value`. The list is small and cheap to allocate.
pub fn scout_tools() -> Vec<McpToolDef> {
    vec![
        // ── fetch_emails ──────────────────────────────────────────────────────
        McpToolDef::new(
            "fetch_emails",
            "Fetch Scholar alert emails from the configured mailbox into the snapshot cache.",
            json!({
                "type": "object",
                "properties": {
                    "force_refresh": {
                        "type": "boolean",
                        "description": "Refresh even when the cached snapshot is still fresh.",
                        "default": false
                    }
                },
                "additionalProperties": false
            }),
        ),
        // ── classify_papers ───────────────────────────────────────────────────
        McpToolDef::new(
            "classify_papers",
            "Extract papers from the cached alert emails and classify them against the configured research topics.",
            json!({
                "type": "object",
                "properties": {
                    "fetch_first": {
                        "type": "boolean",
                        "description": "Run a (non-forced) fetch before classifying.",
                        "default": false
                    }
                },
                "additionalProperties": false
            }),
        ),
        // ── send_notifications ────────────────────────────────────────────────
        McpToolDef::new(
            "send_notifications",
            "Send Slack notifications for the cached classified papers.",
            json!({
                "type": "object",
                "properties": {
                    "weekly_update": {
                        "type": "boolean",
                        "description": "Send per-channel weekly digests instead of individual notifications.",
                        "default": false
                    }
                },
                "additionalProperties": false
            }),
        ),
        // ── run_pipeline ──────────────────────────────────────────────────────
        McpToolDef::new(
            "run_pipeline",
            "Run the full workflow: fetch emails, classify papers, send notifications, then optionally delete old emails.",
            json!({
                "type": "object",
                "properties": {
                    "weekly_update": {
                        "type": "boolean",
                        "description": "Send weekly digests instead of individual notifications.",
                        "default": true
                    },
                    "delete_old_emails": {
                        "type": "boolean",
                        "description": "Delete old alert emails after the notify stage.",
                        "default": true
                    }
                },
                "additionalProperties": false
            }),
        ),
        // ── get_paper_details ─────────────────────────────────────────────────
        McpToolDef::new(
            "get_paper_details",
            "Get one classified paper's full record by 0-based index or case-insensitive title match. Supply exactly one selector.",
            json!({
                "type": "object",
                "properties": {
                    "index": {
                        "type": "integer",
                        "description": "0-based position in the classified paper list."
                    },
                    "title": {
                        "type": "string",
                        "description": "Title to search for (case-insensitive substring)."
                    }
                },
                "additionalProperties": false
            }),
        ),
    ]
}

// ─── tools/list handler ───────────────────────────────────────────────────────

/// Handle an MCP `tools/list` request.
pub fn handle_tools_list() -> Value {
    json!({ "tools": scout_tools() })
}

// ─── Shared argument helpers ──────────────────────────────────────────────────

pub(super) fn bool_arg(args: &Value, key: &str, default: bool) -> Result<bool, ScoutError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ScoutError::invalid(format!(
            "'{key}' must be a boolean, got {other}"
        ))),
    }
}

pub(super) fn opt_index(args: &Value, key: &str) -> Result<Option<usize>, ScoutError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| {
                ScoutError::invalid(format!("'{key}' must be a non-negative integer, got {value}"))
            }),
    }
}

pub(super) fn opt_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, ScoutError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(ScoutError::invalid(format!(
            "'{key}' must be a string, got {other}"
        ))),
    }
}
