//! Core data model: mail snapshots, classified papers, and run reports.
//!
//! Snapshots and classified sets are immutable once captured — a refresh
//! replaces the whole value in the cache, it never mutates in place. The
//! `generation` counter ties a [`ClassifiedSet`] to the [`MailSnapshot`] it
//! was derived from and keys idempotent classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ScoutError, Stage};

// ─── Mail ─────────────────────────────────────────────────────────────────────

/// One Scholar alert email fetched from the mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    /// Message-ID header when present, otherwise the IMAP sequence number.
    pub id: String,
    pub subject: String,
    pub sender: String,
    /// RFC 3339 receive timestamp.
    pub received_at: String,
    /// Raw text/html part. Carried for the classifier; never serialized to
    /// the query surface.
    #[serde(skip_serializing, default)]
    pub html: String,
}

/// An immutable snapshot of the alert mailbox, replaced whole on refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailSnapshot {
    /// Monotonically increasing fetch counter. A [`ClassifiedSet`] carrying
    /// the same generation was derived from exactly this snapshot.
    pub generation: u64,
    pub fetched_at: DateTime<Utc>,
    pub messages: Vec<MailMessage>,
}

// ─── Papers ───────────────────────────────────────────────────────────────────

/// A research paper extracted from an alert email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub venue: String,
    #[serde(default)]
    pub url: String,
}

/// A paper together with the configured topic names it matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedPaper {
    #[serde(flatten)]
    pub paper: Paper,
    pub topics: Vec<String>,
}

/// The classified paper set derived from one mail snapshot generation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedSet {
    pub generation: u64,
    pub classified_at: DateTime<Utc>,
    pub papers: Vec<ClassifiedPaper>,
}

impl ClassifiedSet {
    /// Look up one paper by 0-based index or case-insensitive title
    /// substring. Exactly one selector must be supplied.
    pub fn find(
        &self,
        index: Option<usize>,
        title: Option<&str>,
    ) -> Result<&ClassifiedPaper, ScoutError> {
        match (index, title) {
            (Some(_), Some(_)) => Err(ScoutError::invalid(
                "supply either 'index' or 'title', not both",
            )),
            (None, None) => Err(ScoutError::invalid(
                "supply one of 'index' or 'title'",
            )),
            (Some(i), None) => self.papers.get(i).ok_or_else(|| {
                ScoutError::not_found(format!(
                    "paper index {} out of range ({} cached)",
                    i,
                    self.papers.len()
                ))
            }),
            (None, Some(t)) => {
                let needle = t.to_lowercase();
                self.papers
                    .iter()
                    .find(|p| p.paper.title.to_lowercase().contains(&needle))
                    .ok_or_else(|| {
                        ScoutError::not_found(format!("no paper title matches '{t}'"))
                    })
            }
        }
    }
}

// ─── Reports ──────────────────────────────────────────────────────────────────

/// A notification send that failed for one channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelFailure {
    pub channel: String,
    pub message: String,
}

/// Outcome of one notification fan-out. A failure on one channel does not
/// abort the others — partial success is the normal case.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyReport {
    /// Channels that received at least one message, in send order.
    pub channels_notified: Vec<String>,
    /// Distinct papers included in at least one successful send.
    pub papers_notified: usize,
    pub failures: Vec<ChannelFailure>,
}

impl NotifyReport {
    pub fn record_channel(&mut self, channel: &str) {
        if !self.channels_notified.iter().any(|c| c == channel) {
            self.channels_notified.push(channel.to_string());
        }
    }
}

/// One failed stage inside a pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

/// How far a pipeline run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every stage that ran succeeded.
    Complete,
    /// Some stages succeeded, some failed.
    Partial,
    /// Nothing succeeded — the first stage already failed.
    Failed,
}

/// Transient per-invocation report for the full pipeline. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub run_id: String,
    pub fetched: usize,
    pub classified: usize,
    pub notified: usize,
    pub deleted: usize,
    pub errors: Vec<StageError>,
}

impl PipelineRun {
    pub fn new(run_id: String) -> Self {
        Self {
            run_id,
            fetched: 0,
            classified: 0,
            notified: 0,
            deleted: 0,
            errors: Vec::new(),
        }
    }

    pub fn record_error(&mut self, stage: Stage, err: impl std::fmt::Display) {
        self.errors.push(StageError {
            stage,
            message: err.to_string(),
        });
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.errors.is_empty() {
            RunOutcome::Complete
        } else if self.fetched == 0 {
            RunOutcome::Failed
        } else {
            RunOutcome::Partial
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> ClassifiedSet {
        let titles = [
            "Speculative Decoding at Scale",
            "Efficient Inference for Large Language Models",
            "A Survey of Retrieval-Augmented Generation",
        ];
        ClassifiedSet {
            generation: 1,
            classified_at: Utc::now(),
            papers: titles
                .iter()
                .map(|t| ClassifiedPaper {
                    paper: Paper {
                        title: t.to_string(),
                        authors: vec!["A. Author".into()],
                        abstract_text: String::new(),
                        venue: String::new(),
                        url: String::new(),
                    },
                    topics: vec!["LLM Inference".into()],
                })
                .collect(),
        }
    }

    #[test]
    fn find_by_index_is_zero_based() {
        let set = sample_set();
        let paper = set.find(Some(1), None).unwrap();
        assert_eq!(
            paper.paper.title,
            "Efficient Inference for Large Language Models"
        );
    }

    #[test]
    fn find_by_title_is_case_insensitive_substring() {
        let set = sample_set();
        let paper = set.find(None, Some("efficient inference")).unwrap();
        assert_eq!(
            paper.paper.title,
            "Efficient Inference for Large Language Models"
        );
    }

    #[test]
    fn find_rejects_neither_selector() {
        let set = sample_set();
        let err = set.find(None, None).unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[test]
    fn find_rejects_both_selectors() {
        let set = sample_set();
        let err = set.find(Some(0), Some("survey")).unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[test]
    fn find_out_of_range_is_not_found() {
        let set = sample_set();
        let err = set.find(Some(3), None).unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[test]
    fn outcome_classification() {
        let mut run = PipelineRun::new("r1".into());
        assert_eq!(run.outcome(), RunOutcome::Complete); // no errors recorded
        run.record_error(Stage::Fetch, "offline");
        assert_eq!(run.outcome(), RunOutcome::Failed); // first stage already failed
        run.fetched = 4;
        assert_eq!(run.outcome(), RunOutcome::Partial);
    }

    #[test]
    fn mail_html_not_serialized() {
        let msg = MailMessage {
            id: "1".into(),
            subject: "s".into(),
            sender: "f".into(),
            received_at: "2026-01-01T00:00:00Z".into(),
            html: "<h3>secret</h3>".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("receivedAt"));
    }
}
