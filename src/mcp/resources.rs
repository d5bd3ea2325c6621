//! MCP `resources/list` and `resources/read` — the read-only query surface.
//!
//! | URI | Content |
//! |-----|---------|
//! | `scout://emails/list` | Metadata of the cached alert emails |
//! | `scout://papers/recent` | Classified papers with matched topics |
//! | `scout://topics/config` | The configured research topics |
//!
//! Reads consult the cache only. A read triggers a refresh through the
//! coordinator **only when the entry is absent** — never when it is merely
//! stale, so queries stay cheap and staleness is resolved by the next
//! mutating call.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::error::ScoutError;
use crate::AppContext;

const ABSTRACT_LISTING_CHARS: usize = 200;

// ─── Resource descriptor ──────────────────────────────────────────────────────

/// A single MCP resource exposed by `scoutd`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceDescriptor {
    /// MCP-spec URI (e.g. `scout://emails/list`).
    pub uri: String,
    /// Human-readable name for this resource.
    pub name: String,
    /// One-sentence description.
    pub description: String,
    /// MIME type of the content returned by `read_resource`.
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

fn descriptor(uri: &str, name: &str, description: &str) -> ResourceDescriptor {
    ResourceDescriptor {
        uri: uri.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        mime_type: "application/json".to_string(),
    }
}

// ─── Resource listing ─────────────────────────────────────────────────────────

/// Return all resources `scoutd` exposes. The list is static — the three
/// collections cover the whole cached state.
pub fn list_resources() -> Vec<ResourceDescriptor> {
    vec![
        descriptor(
            "scout://emails/list",
            "Scholar Alert Emails",
            "Metadata of the alert emails in the current mail snapshot",
        ),
        descriptor(
            "scout://papers/recent",
            "Recent Papers",
            "Recently classified research papers with their matched topics",
        ),
        descriptor(
            "scout://topics/config",
            "Research Topics Configuration",
            "The research topics, keywords, and Slack routing being tracked",
        ),
    ]
}

// ─── Resource reading ─────────────────────────────────────────────────────────

/// Read the content of a single resource by URI.
pub async fn read_resource(ctx: &Arc<AppContext>, uri: &str) -> Result<Value, ScoutError> {
    debug!(uri = uri, "resources/read");
    match uri {
        "scout://emails/list" => read_emails(ctx).await,
        "scout://papers/recent" => read_papers(ctx).await,
        "scout://topics/config" => Ok(read_topics(ctx)),
        _ => Err(ScoutError::not_found(format!("unknown resource URI: {uri}"))),
    }
}

async fn read_emails(ctx: &Arc<AppContext>) -> Result<Value, ScoutError> {
    // Absent-only trigger: a missing snapshot is fetched, a stale one is
    // served as-is.
    let entry = match ctx.cache.mail().await {
        Some(entry) => entry,
        None => {
            ctx.pipeline.fetch(false).await?;
            ctx.cache
                .mail()
                .await
                .ok_or_else(|| ScoutError::Internal("fetch succeeded but cache is empty".into()))?
        }
    };

    let emails: Vec<Value> = entry
        .value
        .messages
        .iter()
        .enumerate()
        .map(|(index, msg)| {
            json!({
                "index": index,
                "id": msg.id,
                "subject": msg.subject,
                "from": msg.sender,
                "date": msg.received_at,
            })
        })
        .collect();

    let body = json!({
        "emails": emails,
        "count": emails.len(),
        "generation": entry.value.generation,
        "lastUpdated": entry.captured_at.to_rfc3339(),
    });
    Ok(text_contents("scout://emails/list", &body))
}

async fn read_papers(ctx: &Arc<AppContext>) -> Result<Value, ScoutError> {
    let entry = match ctx.cache.papers().await {
        Some(entry) => Some(entry),
        None => match ctx.pipeline.classify(false).await {
            Ok(_) => ctx.cache.papers().await,
            // Nothing fetched yet — an empty listing, not an error, matches
            // what a caller polling before the first pipeline run expects.
            Err(ScoutError::NotFound(_)) => None,
            Err(e) => return Err(e),
        },
    };

    let (papers, generation, last_updated) = match &entry {
        Some(entry) => {
            let papers: Vec<Value> = entry
                .value
                .papers
                .iter()
                .map(|classified| {
                    let p = &classified.paper;
                    json!({
                        "title": p.title,
                        "authors": p.authors,
                        "abstract": preview(&p.abstract_text),
                        "venue": p.venue,
                        "url": p.url,
                        "topics": classified.topics,
                    })
                })
                .collect();
            (
                papers,
                Some(entry.value.generation),
                Some(entry.captured_at.to_rfc3339()),
            )
        }
        None => (Vec::new(), None, None),
    };

    let body = json!({
        "papers": papers,
        "count": papers.len(),
        "generation": generation,
        "lastUpdated": last_updated,
    });
    Ok(text_contents("scout://papers/recent", &body))
}

fn read_topics(ctx: &Arc<AppContext>) -> Value {
    let topics: Vec<Value> = ctx
        .config
        .topics
        .iter()
        .map(|topic| {
            json!({
                "name": topic.name,
                "description": topic.description,
                "keywords": topic.keywords,
                "slackUsers": topic.slack_users,
                "slackChannel": topic.slack_channel,
            })
        })
        .collect();

    let body = json!({
        "topics": topics,
        "count": topics.len(),
    });
    text_contents("scout://topics/config", &body)
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn text_contents(uri: &str, body: &Value) -> Value {
    json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/json",
            "text": serde_json::to_string_pretty(body).unwrap_or_default(),
        }]
    })
}

fn preview(text: &str) -> String {
    if text.chars().count() <= ABSTRACT_LISTING_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(ABSTRACT_LISTING_CHARS).collect();
        format!("{cut}...")
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_covers_three_static_resources() {
        let resources = list_resources();
        assert_eq!(resources.len(), 3);
        assert!(resources.iter().all(|r| r.mime_type == "application/json"));
        assert!(resources.iter().any(|r| r.uri == "scout://topics/config"));
    }

    #[test]
    fn text_contents_shape() {
        let v = text_contents("scout://topics/config", &json!({"count": 0}));
        let contents = v["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["uri"], "scout://topics/config");
        assert_eq!(contents[0]["mimeType"], "application/json");
        assert!(contents[0]["text"].as_str().unwrap().contains("count"));
    }

    #[test]
    fn preview_truncates_long_abstracts() {
        let long = "x".repeat(400);
        let short = preview(&long);
        assert_eq!(short.chars().count(), ABSTRACT_LISTING_CHARS + 3);
        assert!(short.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }
}
