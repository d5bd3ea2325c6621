//! Model Context Protocol (MCP) server surface for `scoutd`.
//!
//! External agents drive the triage workflow through MCP instead of a fixed
//! script: read-only lookups are resources, mutating operations are tools.
//!
//! ## Protocol version
//! MCP 2024-11-05, JSON-RPC 2.0 over stdio (one message per line; logs go
//! to stderr so stdout stays clean for the wire).
//!
//! ## Submodules
//!
//! | Module | Role |
//! |--------|------|
//! | `transport` | JSON-RPC wire types, stdio serve loop, lifecycle handlers |
//! | `tools` | `tools/list` response — the 5 scoutd tool definitions |
//! | `dispatch` | `tools/call` dispatcher — routes to `tools::papers` / `tools::pipeline` |
//! | `resources` | `resources/list` + `resources/read` — cached mail, papers, topic config |

pub mod dispatch;
pub mod resources;
pub mod tools;
pub mod transport;

// ─── Flat re-exports ──────────────────────────────────────────────────────────

pub use dispatch::{Envelope, McpDispatcher, ToolKind};

pub use resources::{list_resources, read_resource, ResourceDescriptor};

pub use tools::{handle_tools_list, scout_tools, McpToolDef};

pub use transport::{dispatch_line, run, MCP_PROTOCOL_VERSION};
