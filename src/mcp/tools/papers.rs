/// MCP tool handlers for the mail/paper operations: fetch_emails,
/// classify_papers, and get_paper_details. The pipeline-level tools live in
/// `tools/pipeline.rs`.
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{bool_arg, opt_index, opt_str};
use crate::error::ScoutError;
use crate::mcp::dispatch::Envelope;
use crate::AppContext;

// ─── fetch_emails ─────────────────────────────────────────────────────────────

/// Optional: `force_refresh` (default false).
///
/// Returns the snapshot summary; the full metadata list is available via
/// the `scout://emails/list` resource.
pub async fn fetch_emails(ctx: &AppContext, args: Value) -> Result<Envelope, ScoutError> {
    let force_refresh = bool_arg(&args, "force_refresh", false)?;

    let snapshot = ctx.pipeline.fetch(force_refresh).await?;
    Ok(Envelope::ok(
        format!(
            "{} alert emails in snapshot (generation {})",
            snapshot.messages.len(),
            snapshot.generation
        ),
        json!({
            "count": snapshot.messages.len(),
            "generation": snapshot.generation,
            "fetchedAt": snapshot.fetched_at.to_rfc3339(),
        }),
    ))
}

// ─── classify_papers ──────────────────────────────────────────────────────────

/// Optional: `fetch_first` (default false).
///
/// Returns the per-topic breakdown. Classification is idempotent per
/// snapshot generation — calling this again without a new fetch reuses the
/// cached set.
pub async fn classify_papers(ctx: &AppContext, args: Value) -> Result<Envelope, ScoutError> {
    let fetch_first = bool_arg(&args, "fetch_first", false)?;

    let set = ctx.pipeline.classify(fetch_first).await?;

    let mut by_topic = Map::new();
    for classified in &set.papers {
        for topic in &classified.topics {
            let count = by_topic.entry(topic.clone()).or_insert(json!(0));
            *count = json!(count.as_u64().unwrap_or(0) + 1);
        }
    }
    let matched = set
        .papers
        .iter()
        .filter(|p| !p.topics.is_empty())
        .count();
    debug!(
        papers = set.papers.len(),
        matched,
        topics = by_topic.len(),
        "classification summary"
    );

    Ok(Envelope::ok(
        format!(
            "classified {} papers, {} matched at least one topic (generation {})",
            set.papers.len(),
            matched,
            set.generation
        ),
        json!({
            "count": set.papers.len(),
            "matched": matched,
            "generation": set.generation,
            "classifiedAt": set.classified_at.to_rfc3339(),
            "byTopic": Value::Object(by_topic),
        }),
    ))
}

// ─── get_paper_details ────────────────────────────────────────────────────────

/// Exactly one of `index` (0-based) or `title` (case-insensitive substring).
pub async fn get_paper_details(ctx: &AppContext, args: Value) -> Result<Envelope, ScoutError> {
    let index = opt_index(&args, "index")?;
    let title = opt_str(&args, "title")?;

    let entry = ctx.cache.papers().await.ok_or_else(|| {
        ScoutError::not_found("no classified papers cached — run classify_papers first")
    })?;
    let paper = entry.value.find(index, title)?;

    let data = serde_json::to_value(paper)
        .map_err(|e| ScoutError::Internal(format!("serialize paper: {e}")))?;
    Ok(Envelope::ok(paper.paper.title.clone(), data))
}
