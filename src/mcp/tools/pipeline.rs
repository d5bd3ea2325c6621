/// MCP tool handlers for notification and full-pipeline operations.
use serde_json::Value;

use super::bool_arg;
use crate::error::ScoutError;
use crate::mcp::dispatch::Envelope;
use crate::models::RunOutcome;
use crate::AppContext;

// ─── send_notifications ───────────────────────────────────────────────────────

/// Optional: `weekly_update` (default false).
///
/// Notifies over the cached classified set. One failed channel does not
/// abort the others: a mixed outcome comes back as `PartialFailure` with
/// the full report attached, so the caller sees which channels succeeded.
pub async fn send_notifications(ctx: &AppContext, args: Value) -> Result<Envelope, ScoutError> {
    let weekly_update = bool_arg(&args, "weekly_update", false)?;

    let entry = ctx.cache.papers().await.ok_or_else(|| {
        ScoutError::not_found("no classified papers cached — run classify_papers first")
    })?;
    let report = ctx.pipeline.notify(weekly_update, &entry.value).await;

    let message = format!(
        "notified {} papers across {} channels ({} failures)",
        report.papers_notified,
        report.channels_notified.len(),
        report.failures.len()
    );
    let data = serde_json::to_value(&report)
        .map_err(|e| ScoutError::Internal(format!("serialize report: {e}")))?;

    if report.failures.is_empty() {
        Ok(Envelope::ok(message, data))
    } else if report.channels_notified.is_empty() {
        Ok(Envelope::fail("UpstreamUnavailable", message, Some(data)))
    } else {
        Ok(Envelope::fail("PartialFailure", message, Some(data)))
    }
}

// ─── run_pipeline ─────────────────────────────────────────────────────────────

/// Optional: `weekly_update` (default true), `delete_old_emails` (default
/// true).
///
/// Runs fetch → classify → notify → delete and reports per-stage results.
/// Stage failures never surface as a bare error — the run report always
/// comes back, with `errorKind` distinguishing a partial run from one where
/// nothing succeeded.
pub async fn run_pipeline(ctx: &AppContext, args: Value) -> Result<Envelope, ScoutError> {
    let weekly_update = bool_arg(&args, "weekly_update", true)?;
    let delete_old_emails = bool_arg(&args, "delete_old_emails", true)?;

    let run = ctx.pipeline.run_pipeline(weekly_update, delete_old_emails).await;

    let message = format!(
        "fetched {}, classified {}, notified {}, deleted {} ({} stage errors)",
        run.fetched,
        run.classified,
        run.notified,
        run.deleted,
        run.errors.len()
    );
    let outcome = run.outcome();
    let data = serde_json::to_value(&run)
        .map_err(|e| ScoutError::Internal(format!("serialize run: {e}")))?;

    Ok(match outcome {
        RunOutcome::Complete => Envelope::ok(message, data),
        RunOutcome::Partial => Envelope::fail("PartialFailure", message, Some(data)),
        RunOutcome::Failed => Envelope::fail("UpstreamUnavailable", message, Some(data)),
    })
}
