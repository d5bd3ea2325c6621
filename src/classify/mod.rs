//! Classification collaborator: paper extraction + LLM topic matching.
//!
//! [`Classifier`] is the seam the pipeline coordinator consumes; the
//! production implementation talks to an OpenAI-compatible chat-completions
//! endpoint (Perplexity). Papers are classified in fixed-size chunks to
//! bound request size, and the model's JSON is parsed defensively — code
//! fences and trailing commas appear in practice.

pub mod extract;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ClassifierConfig, ResearchTopic};
use crate::models::{ClassifiedPaper, MailSnapshot, Paper};

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed response: {0}")]
    BadResponse(String),
}

/// Turns a mail snapshot into classified papers.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        snapshot: &MailSnapshot,
        topics: &[ResearchTopic],
    ) -> Result<Vec<ClassifiedPaper>, ClassifyError>;
}

// ─── Perplexity implementation ────────────────────────────────────────────────

pub struct PerplexityClassifier {
    http: reqwest::Client,
    config: ClassifierConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// One classification record the model returns per paper.
#[derive(Debug, Deserialize)]
struct RawClassification {
    title: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    venue: String,
    #[serde(default)]
    relevant_topics: Vec<String>,
}

impl PerplexityClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn classify_chunk(
        &self,
        chunk: &[Paper],
        topics: &[ResearchTopic],
    ) -> Result<Vec<ClassifiedPaper>, ClassifyError> {
        let prompt = build_prompt(chunk, topics);
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let mut delay = Duration::from_millis(500);
        let mut last_err = ClassifyError::Http("no attempt made".into());
        for attempt in 0..self.config.max_retries.max(1) {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            match self.request_once(&body).await {
                Ok(content) => {
                    let records = parse_classifications(&content)?;
                    return Ok(merge_classifications(chunk, records, topics));
                }
                // Auth and quota problems will not fix themselves mid-loop.
                Err(e @ ClassifyError::Api { status: 401, .. })
                | Err(e @ ClassifyError::Api { status: 403, .. }) => return Err(e),
                Err(e) => {
                    warn!(attempt, err = %e, "classification request failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn request_once(&self, body: &Value) -> Result<String, ClassifyError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ClassifyError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::BadResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ClassifyError::BadResponse("empty completion".into()))
    }
}

#[async_trait]
impl Classifier for PerplexityClassifier {
    async fn classify(
        &self,
        snapshot: &MailSnapshot,
        topics: &[ResearchTopic],
    ) -> Result<Vec<ClassifiedPaper>, ClassifyError> {
        let papers = extract::extract_papers(&snapshot.messages);
        info!(
            generation = snapshot.generation,
            papers = papers.len(),
            "classifying extracted papers"
        );
        if papers.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_size = self.config.batch_size.max(1);
        let mut classified = Vec::with_capacity(papers.len());
        let mut failed_chunks = 0usize;
        for chunk in papers.chunks(chunk_size) {
            match self.classify_chunk(chunk, topics).await {
                Ok(mut records) => classified.append(&mut records),
                Err(ClassifyError::BadResponse(msg)) => {
                    // One garbled completion should not sink the whole set.
                    warn!(err = %msg, papers = chunk.len(), "skipping unparseable chunk");
                    failed_chunks += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if classified.is_empty() && failed_chunks > 0 {
            return Err(ClassifyError::BadResponse(format!(
                "all {failed_chunks} chunks unparseable"
            )));
        }
        Ok(classified)
    }
}

// ─── Prompt & response handling ───────────────────────────────────────────────

fn build_prompt(papers: &[Paper], topics: &[ResearchTopic]) -> String {
    use std::fmt::Write as _;

    let topic_list = topics
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    let mut paper_list = String::new();
    for (i, paper) in papers.iter().enumerate() {
        let _ = write!(
            paper_list,
            "\nPaper {n}:\nTitle: {title}\nAuthors: {authors}\nAbstract: {abstract_text}\n",
            n = i + 1,
            title = paper.title,
            authors = paper.authors.join(", "),
            abstract_text = paper.abstract_text,
        );
    }

    format!(
        "Below are {count} papers from a Google Scholar alert. For EACH paper, \
         extract metadata and classify it against the topic list.\n\
         {papers}\n\
         Return a JSON array with exactly {count} objects, one per paper, in \
         the same order. Each object must have ALL of these fields:\n\
         {{\n\
           \"title\": \"the paper title\",\n\
           \"authors\": [\"list\", \"of\", \"authors\"],\n\
           \"venue\": \"use these rules:\n\
             - 'arXiv preprint' if the author line mentions arXiv\n\
             - 'Patent Application' if the author line mentions Patent\n\
             - the text between the dash and the year for published papers\n\
             - 'NOT-FOUND' otherwise\",\n\
           \"relevant_topics\": []\n\
         }}\n\
         For relevant_topics choose ONLY from this list — never invent topics:\n\
         {topics}\n\
         Leave relevant_topics empty when nothing matches. Return valid JSON \
         only, no commentary.",
        count = papers.len(),
        papers = paper_list,
        topics = topic_list,
    )
}

static CODE_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());
static TRAILING_COMMA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());

fn parse_classifications(content: &str) -> Result<Vec<RawClassification>, ClassifyError> {
    let inner = CODE_FENCE_RE
        .captures(content)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| content.to_string());
    let cleaned = TRAILING_COMMA_RE.replace_all(inner.trim(), "$1");

    // Either an array, or a bare object when the chunk held one paper.
    serde_json::from_str::<Vec<RawClassification>>(&cleaned)
        .or_else(|_| {
            serde_json::from_str::<RawClassification>(&cleaned).map(|single| vec![single])
        })
        .map_err(|e| ClassifyError::BadResponse(e.to_string()))
}

/// Pair model output with the extracted papers and keep only topic names
/// that actually exist in the configuration.
fn merge_classifications(
    chunk: &[Paper],
    records: Vec<RawClassification>,
    topics: &[ResearchTopic],
) -> Vec<ClassifiedPaper> {
    let mut out = Vec::with_capacity(chunk.len());
    for (i, paper) in chunk.iter().enumerate() {
        let record = records
            .iter()
            .find(|r| r.title.eq_ignore_ascii_case(&paper.title))
            .or_else(|| records.get(i));
        let Some(record) = record else {
            debug!(title = %paper.title, "model returned no record for paper");
            continue;
        };

        let matched: Vec<String> = topics
            .iter()
            .filter(|topic| {
                record
                    .relevant_topics
                    .iter()
                    .any(|name| name.trim().eq_ignore_ascii_case(&topic.name))
            })
            .map(|topic| topic.name.clone())
            .collect();

        out.push(ClassifiedPaper {
            paper: Paper {
                title: paper.title.clone(),
                authors: if record.authors.is_empty() {
                    paper.authors.clone()
                } else {
                    record.authors.clone()
                },
                abstract_text: paper.abstract_text.clone(),
                venue: record.venue.clone(),
                url: paper.url.clone(),
            },
            topics: matched,
        });
    }
    out
}
