//! Notification collaborator: Slack delivery for classified papers.
//!
//! [`Notifier`] is the seam the pipeline coordinator consumes. The
//! production implementation posts through the Slack Web API; each call
//! covers one channel so the coordinator can keep going when a single
//! channel fails.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ResearchTopic, SlackConfig};
use crate::models::ClassifiedPaper;

const ABSTRACT_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("slack api error: {0}")]
    Api(String),
}

/// A weekly digest section: one topic and the titles matched for it.
#[derive(Debug, Clone)]
pub struct DigestSection {
    pub topic: String,
    pub titles: Vec<String>,
}

/// Delivers notifications, one channel per call.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce the papers matched for one topic in one channel, mentioning
    /// the topic's configured users.
    async fn send_topic_matches(
        &self,
        channel: &str,
        topic: &ResearchTopic,
        papers: &[&ClassifiedPaper],
    ) -> Result<(), NotifyError>;

    /// Post the weekly digest for one channel. `sections` may be empty —
    /// the channel still gets a "nothing this week" note.
    async fn send_weekly_update(
        &self,
        channel: &str,
        sections: &[DigestSection],
    ) -> Result<(), NotifyError>;
}

// ─── Slack implementation ─────────────────────────────────────────────────────

pub struct SlackNotifier {
    http: reqwest::Client,
    config: SlackConfig,
}

#[derive(Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: String,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<(), NotifyError> {
        let url = format!(
            "{}/chat.postMessage",
            self.config.api_base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_token)
            .json(&serde_json::json!({
                "channel": channel,
                "text": text,
                "unfurl_links": true,
            }))
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Http(format!("status {status}")));
        }
        // Slack reports failures in-body with HTTP 200.
        let body: SlackResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Api(e.to_string()))?;
        if !body.ok {
            return Err(NotifyError::Api(body.error));
        }
        debug!(channel = %channel, "slack message posted");
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send_topic_matches(
        &self,
        channel: &str,
        topic: &ResearchTopic,
        papers: &[&ClassifiedPaper],
    ) -> Result<(), NotifyError> {
        for paper in papers {
            let text = format_match(topic, paper);
            self.post_message(channel, &text).await?;
        }
        info!(
            channel = %channel,
            topic = %topic.name,
            papers = papers.len(),
            "topic notifications sent"
        );
        Ok(())
    }

    async fn send_weekly_update(
        &self,
        channel: &str,
        sections: &[DigestSection],
    ) -> Result<(), NotifyError> {
        let text = format_weekly(channel, sections);
        self.post_message(channel, &text).await?;
        info!(channel = %channel, sections = sections.len(), "weekly digest sent");
        Ok(())
    }
}

// ─── Message formatting ───────────────────────────────────────────────────────

fn format_match(topic: &ResearchTopic, paper: &ClassifiedPaper) -> String {
    let mentions = topic.slack_users.join(" ");
    let p = &paper.paper;
    let mut text = String::new();
    if !mentions.is_empty() {
        text.push_str(&mentions);
        text.push('\n');
    }
    text.push_str(&format!(
        "New paper matching topic: {}\n\
         Title: {}\n\
         Authors: {}\n\
         Venue: {}\n\
         URL: {}\n\
         Abstract: {}",
        topic.name,
        p.title,
        p.authors.join(", "),
        p.venue,
        p.url,
        truncate_chars(&p.abstract_text, ABSTRACT_PREVIEW_CHARS),
    ));
    text
}

fn format_weekly(channel: &str, sections: &[DigestSection]) -> String {
    if sections.is_empty() {
        return format!(
            "*Weekly paper digest*\nNo relevant papers were found for {channel} this week."
        );
    }
    let body = sections
        .iter()
        .map(|section| {
            let titles = section
                .titles
                .iter()
                .map(|t| format!("• {t}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("*{}*:\n{}", section.topic, titles)
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "*Weekly paper digest*\nHere are the relevant papers for {channel} this week:\n\n{body}"
    )
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Paper;

    fn topic() -> ResearchTopic {
        ResearchTopic {
            name: "LLM Inference".into(),
            description: String::new(),
            keywords: vec![],
            slack_users: vec!["<@U1>".into(), "<@U2>".into()],
            slack_channel: Some("#ml-papers".into()),
        }
    }

    fn classified(abstract_text: &str) -> ClassifiedPaper {
        ClassifiedPaper {
            paper: Paper {
                title: "Efficient Inference".into(),
                authors: vec!["A Lovelace".into(), "C Babbage".into()],
                abstract_text: abstract_text.into(),
                venue: "arXiv preprint".into(),
                url: "https://arxiv.org/abs/2601.01234".into(),
            },
            topics: vec!["LLM Inference".into()],
        }
    }

    #[test]
    fn match_message_mentions_users_first() {
        let text = format_match(&topic(), &classified("short abstract"));
        assert!(text.starts_with("<@U1> <@U2>\n"));
        assert!(text.contains("New paper matching topic: LLM Inference"));
        assert!(text.contains("Authors: A Lovelace, C Babbage"));
        assert!(text.ends_with("Abstract: short abstract"));
    }

    #[test]
    fn long_abstracts_truncate_on_char_boundary() {
        let long = "é".repeat(600);
        let text = format_match(&topic(), &classified(&long));
        let abstract_part = text.rsplit("Abstract: ").next().unwrap();
        assert_eq!(abstract_part.chars().count(), ABSTRACT_PREVIEW_CHARS + 1); // + ellipsis
        assert!(abstract_part.ends_with('…'));
    }

    #[test]
    fn weekly_digest_lists_sections() {
        let sections = vec![DigestSection {
            topic: "Retrieval".into(),
            titles: vec!["Paper A".into(), "Paper B".into()],
        }];
        let text = format_weekly("#papers", &sections);
        assert!(text.contains("*Retrieval*:"));
        assert!(text.contains("• Paper A"));
        assert!(text.contains("• Paper B"));
    }

    #[test]
    fn weekly_digest_without_sections_says_so() {
        let text = format_weekly("#papers", &[]);
        assert!(text.contains("No relevant papers"));
        assert!(text.contains("#papers"));
    }
}
