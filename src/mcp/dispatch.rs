/// MCP `tools/call` dispatcher — routes tool invocations to internal handlers.
///
/// Tool names parse into [`ToolKind`], a closed enum matched exhaustively,
/// so adding an operation without wiring its handler is a compile error
/// rather than a silent `unknown tool` at run time.
///
/// Every tool resolves to a uniform [`Envelope`] — `{ok, data | errorKind,
/// message}` — and no collaborator error ever escapes unwrapped: execution
/// failures are classified into the taxonomy and embedded in the envelope,
/// while an unknown tool name is the caller's protocol error and surfaces
/// as a JSON-RPC error instead.
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::tools;
use crate::error::ScoutError;
use crate::AppContext;

// ─── Tool kinds ───────────────────────────────────────────────────────────────

/// The closed set of mutating operations exposed over `tools/call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    FetchEmails,
    ClassifyPapers,
    SendNotifications,
    RunPipeline,
    GetPaperDetails,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::FetchEmails,
        ToolKind::ClassifyPapers,
        ToolKind::SendNotifications,
        ToolKind::RunPipeline,
        ToolKind::GetPaperDetails,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::FetchEmails => "fetch_emails",
            ToolKind::ClassifyPapers => "classify_papers",
            ToolKind::SendNotifications => "send_notifications",
            ToolKind::RunPipeline => "run_pipeline",
            ToolKind::GetPaperDetails => "get_paper_details",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

// ─── Response envelope ────────────────────────────────────────────────────────

/// Uniform action response: `{ok, data | errorKind, message}`.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub ok: bool,
    pub error_kind: Option<&'static str>,
    pub message: String,
    pub data: Option<Value>,
}

impl Envelope {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            ok: true,
            error_kind: None,
            message: message.into(),
            data: Some(data),
        }
    }

    /// A failed (or partially failed) action that still carries result data.
    pub fn fail(kind: &'static str, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            ok: false,
            error_kind: Some(kind),
            message: message.into(),
            data,
        }
    }

    pub fn from_error(err: &ScoutError) -> Self {
        Self::fail(err.kind(), err.to_string(), None)
    }

    pub fn to_value(&self) -> Value {
        let mut out = json!({
            "ok": self.ok,
            "message": self.message,
        });
        if let Some(kind) = self.error_kind {
            out["errorKind"] = json!(kind);
        }
        if let Some(data) = &self.data {
            out["data"] = data.clone();
        }
        out
    }
}

// ─── Dispatcher ───────────────────────────────────────────────────────────────

pub struct McpDispatcher {
    ctx: Arc<AppContext>,
}

impl McpDispatcher {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Dispatch a `tools/call` invocation.
    ///
    /// `tool_name` — the `name` field from the `tools/call` params.
    /// `arguments` — the `arguments` object (may be `Null`).
    ///
    /// Returns `Err` only for an unknown tool name (a protocol error the
    /// transport maps to `invalid params`); every execution outcome,
    /// including failures, arrives as an [`Envelope`].
    pub async fn dispatch(&self, tool_name: &str, arguments: Value) -> Result<Envelope, ScoutError> {
        let Some(kind) = ToolKind::from_name(tool_name) else {
            warn!(tool = tool_name, "unknown tool");
            return Err(ScoutError::invalid(format!("unknown tool: {tool_name}")));
        };

        let result = match kind {
            ToolKind::FetchEmails => tools::papers::fetch_emails(&self.ctx, arguments).await,
            ToolKind::ClassifyPapers => tools::papers::classify_papers(&self.ctx, arguments).await,
            ToolKind::GetPaperDetails => {
                tools::papers::get_paper_details(&self.ctx, arguments).await
            }
            ToolKind::SendNotifications => {
                tools::pipeline::send_notifications(&self.ctx, arguments).await
            }
            ToolKind::RunPipeline => tools::pipeline::run_pipeline(&self.ctx, arguments).await,
        };

        let envelope = match result {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(tool = tool_name, kind = e.kind(), err = %e, "tool failed");
                Envelope::from_error(&e)
            }
        };

        info!(tool = tool_name, ok = envelope.ok, "tool executed");
        Ok(envelope)
    }
}
