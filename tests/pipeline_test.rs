//! Integration tests for the pipeline coordinator and snapshot cache.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use scoutd::classify::{Classifier, ClassifyError};
use scoutd::config::{AppConfig, ResearchTopic};
use scoutd::mail::{MailError, MailStore, SearchCriteria};
use scoutd::models::{ClassifiedPaper, ClassifiedSet, MailMessage, MailSnapshot, Paper};
use scoutd::notify::{DigestSection, Notifier, NotifyError};
use scoutd::AppContext;

// ── Mock collaborators ───────────────────────────────────────────────────────

struct MockMailStore {
    calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail: AtomicBool,
    delay: Duration,
    message_count: usize,
}

impl MockMailStore {
    fn new(message_count: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: Duration::ZERO,
            message_count,
        })
    }

    fn with_delay(message_count: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay,
            message_count,
        })
    }
}

#[async_trait]
impl MailStore for MockMailStore {
    async fn search(&self, _criteria: &SearchCriteria) -> Result<Vec<MailMessage>, MailError> {
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Connect("mock mailbox offline".into()));
        }
        Ok((0..self.message_count)
            .map(|i| MailMessage {
                id: format!("msg-{i}"),
                subject: format!("new articles {i}"),
                sender: "scholaralerts-noreply@google.com".into(),
                received_at: "2026-08-03T10:00:00+00:00".into(),
                html: String::new(),
            })
            .collect())
    }

    async fn delete_older_than(&self, _days: u32) -> Result<usize, MailError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(2)
    }
}

struct MockClassifier {
    calls: AtomicUsize,
    fail: AtomicBool,
    output: Vec<ClassifiedPaper>,
}

impl MockClassifier {
    fn new(output: Vec<ClassifiedPaper>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            output,
        })
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(
        &self,
        _snapshot: &MailSnapshot,
        _topics: &[ResearchTopic],
    ) -> Result<Vec<ClassifiedPaper>, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClassifyError::Api {
                status: 429,
                message: "mock quota exceeded".into(),
            });
        }
        Ok(self.output.clone())
    }
}

#[derive(Default)]
struct MockNotifier {
    sent: Mutex<Vec<(String, String, usize)>>,
    fail_channels: HashSet<String>,
}

impl MockNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing_on(channel: &str) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_channels: HashSet::from([channel.to_string()]),
        })
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_topic_matches(
        &self,
        channel: &str,
        topic: &ResearchTopic,
        papers: &[&ClassifiedPaper],
    ) -> Result<(), NotifyError> {
        if self.fail_channels.contains(channel) {
            return Err(NotifyError::Api("channel_not_found".into()));
        }
        self.sent
            .lock()
            .await
            .push((channel.to_string(), topic.name.clone(), papers.len()));
        Ok(())
    }

    async fn send_weekly_update(
        &self,
        channel: &str,
        sections: &[DigestSection],
    ) -> Result<(), NotifyError> {
        if self.fail_channels.contains(channel) {
            return Err(NotifyError::Api("channel_not_found".into()));
        }
        self.sent
            .lock()
            .await
            .push((channel.to_string(), "weekly".into(), sections.len()));
        Ok(())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.slack.default_channel = "#papers".into();
    config.topics = vec![
        ResearchTopic {
            name: "LLM Inference".into(),
            description: "Serving and inference optimization".into(),
            keywords: vec!["inference".into()],
            slack_users: vec!["<@U1>".into()],
            slack_channel: Some("#llm".into()),
        },
        ResearchTopic {
            name: "Retrieval".into(),
            description: "RAG and search".into(),
            keywords: vec![],
            slack_users: vec![],
            slack_channel: Some("#rag".into()),
        },
    ];
    config
}

fn classified(title: &str, topics: &[&str]) -> ClassifiedPaper {
    ClassifiedPaper {
        paper: Paper {
            title: title.into(),
            authors: vec!["A. Author".into()],
            abstract_text: "abs".into(),
            venue: "arXiv preprint".into(),
            url: String::new(),
        },
        topics: topics.iter().map(|t| t.to_string()).collect(),
    }
}

fn context(
    config: AppConfig,
    mail: &Arc<MockMailStore>,
    classifier: &Arc<MockClassifier>,
    notifier: &Arc<MockNotifier>,
) -> AppContext {
    AppContext::with_collaborators(
        config,
        Arc::clone(mail) as Arc<dyn MailStore>,
        Arc::clone(classifier) as Arc<dyn Classifier>,
        Arc::clone(notifier) as Arc<dyn Notifier>,
    )
}

// ── Single-flight ────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_forced_fetches_collapse_into_one_search() {
    let mail = MockMailStore::with_delay(3, Duration::from_millis(50));
    let classifier = MockClassifier::new(vec![]);
    let notifier = MockNotifier::new();
    let ctx = context(test_config(), &mail, &classifier, &notifier);

    let (a, b) = tokio::join!(ctx.pipeline.fetch(true), ctx.pipeline.fetch(true));
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(mail.calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.generation, b.generation);
    assert_eq!(a.messages.len(), 3);
}

#[tokio::test]
async fn sequential_forced_fetches_each_hit_upstream() {
    let mail = MockMailStore::new(1);
    let classifier = MockClassifier::new(vec![]);
    let notifier = MockNotifier::new();
    let ctx = context(test_config(), &mail, &classifier, &notifier);

    let first = ctx.pipeline.fetch(true).await.unwrap();
    let second = ctx.pipeline.fetch(true).await.unwrap();

    assert_eq!(mail.calls.load(Ordering::SeqCst), 2);
    assert!(second.generation > first.generation);
}

// ── Staleness ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_cache_serves_fetch_without_upstream_call() {
    let mail = MockMailStore::new(2);
    let classifier = MockClassifier::new(vec![]);
    let notifier = MockNotifier::new();
    let ctx = context(test_config(), &mail, &classifier, &notifier);

    ctx.pipeline.fetch(false).await.unwrap();
    ctx.pipeline.fetch(false).await.unwrap();
    assert_eq!(mail.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_cache_triggers_refresh_on_unforced_fetch() {
    let mail = MockMailStore::new(2);
    let classifier = MockClassifier::new(vec![]);
    let notifier = MockNotifier::new();
    let ctx = context(test_config(), &mail, &classifier, &notifier);

    // Plant an entry captured 301s ago — just past the 300s TTL.
    let snapshot = MailSnapshot {
        generation: 7,
        fetched_at: Utc::now(),
        messages: vec![],
    };
    ctx.cache
        .put_mail(snapshot, Utc::now() - ChronoDuration::seconds(301))
        .await;
    ctx.pipeline.fetch(false).await.unwrap();
    assert_eq!(mail.calls.load(Ordering::SeqCst), 1);

    // 299s old is still fresh — no upstream call.
    let snapshot = MailSnapshot {
        generation: 8,
        fetched_at: Utc::now(),
        messages: vec![],
    };
    ctx.cache
        .put_mail(snapshot, Utc::now() - ChronoDuration::seconds(299))
        .await;
    ctx.pipeline.fetch(false).await.unwrap();
    assert_eq!(mail.calls.load(Ordering::SeqCst), 1);
}

// ── Idempotent classification ────────────────────────────────────────────────

#[tokio::test]
async fn classification_runs_once_per_snapshot_generation() {
    let mail = MockMailStore::new(2);
    let classifier = MockClassifier::new(vec![classified("P", &["LLM Inference"])]);
    let notifier = MockNotifier::new();
    let ctx = context(test_config(), &mail, &classifier, &notifier);

    ctx.pipeline.fetch(true).await.unwrap();
    ctx.pipeline.classify(false).await.unwrap();
    ctx.pipeline.classify(false).await.unwrap();
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    // A new generation invalidates the set.
    ctx.pipeline.fetch(true).await.unwrap();
    let set = ctx.pipeline.classify(false).await.unwrap();
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
    assert_eq!(set.generation, 2);
}

#[tokio::test]
async fn classify_without_snapshot_is_not_found() {
    let mail = MockMailStore::new(0);
    let classifier = MockClassifier::new(vec![]);
    let notifier = MockNotifier::new();
    let ctx = context(test_config(), &mail, &classifier, &notifier);

    let err = ctx.pipeline.classify(false).await.unwrap_err();
    assert_eq!(err.kind(), "NotFound");
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
}

// ── Failure preserves cache ──────────────────────────────────────────────────

#[tokio::test]
async fn failed_refresh_keeps_previous_snapshot_queryable() {
    let mail = MockMailStore::new(3);
    let classifier = MockClassifier::new(vec![]);
    let notifier = MockNotifier::new();
    let ctx = context(test_config(), &mail, &classifier, &notifier);

    let first = ctx.pipeline.fetch(true).await.unwrap();
    mail.fail.store(true, Ordering::SeqCst);

    let err = ctx.pipeline.fetch(true).await.unwrap_err();
    assert_eq!(err.kind(), "UpstreamUnavailable");

    // Stale-but-available: the old snapshot is still served.
    let entry = ctx.cache.mail().await.expect("previous snapshot retained");
    assert_eq!(entry.value.generation, first.generation);
    assert_eq!(entry.value.messages.len(), 3);
}

// ── Partial notify ───────────────────────────────────────────────────────────

#[tokio::test]
async fn one_failed_channel_does_not_abort_the_others() {
    let mail = MockMailStore::new(1);
    let classifier = MockClassifier::new(vec![
        classified("Paper A", &["LLM Inference"]),
        classified("Paper B", &["Retrieval"]),
    ]);
    let notifier = MockNotifier::failing_on("#llm");
    let ctx = context(test_config(), &mail, &classifier, &notifier);

    ctx.pipeline.fetch(true).await.unwrap();
    let set = ctx.pipeline.classify(false).await.unwrap();
    let report = ctx.pipeline.notify(false, &set).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].channel, "#llm");
    assert_eq!(report.channels_notified, vec!["#rag".to_string()]);
    assert_eq!(report.papers_notified, 1);

    let sent = notifier.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "#rag");
    assert_eq!(sent[0].1, "Retrieval");
}

#[tokio::test]
async fn topic_without_own_channel_uses_default() {
    let mut config = test_config();
    config.topics[1].slack_channel = None;
    let mail = MockMailStore::new(1);
    let classifier = MockClassifier::new(vec![classified("Paper B", &["Retrieval"])]);
    let notifier = MockNotifier::new();
    let ctx = context(config, &mail, &classifier, &notifier);

    ctx.pipeline.fetch(true).await.unwrap();
    let set = ctx.pipeline.classify(false).await.unwrap();
    let report = ctx.pipeline.notify(false, &set).await;

    assert_eq!(report.channels_notified, vec!["#papers".to_string()]);
}

#[tokio::test]
async fn weekly_update_routes_by_channel_topics() {
    let mut config = test_config();
    config
        .slack
        .channel_topics
        .insert("ml-papers".into(), vec!["LLM Inference".into()]);
    let mail = MockMailStore::new(1);
    let classifier = MockClassifier::new(vec![
        classified("Paper A", &["LLM Inference"]),
        classified("Paper B", &["Retrieval"]),
    ]);
    let notifier = MockNotifier::new();
    let ctx = context(config, &mail, &classifier, &notifier);

    ctx.pipeline.fetch(true).await.unwrap();
    let set = ctx.pipeline.classify(false).await.unwrap();
    let report = ctx.pipeline.notify(true, &set).await;

    assert_eq!(report.channels_notified, vec!["ml-papers".to_string()]);
    assert_eq!(report.papers_notified, 1); // only the LLM Inference paper

    let sent = notifier.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], ("ml-papers".to_string(), "weekly".to_string(), 1));
}

// ── Pipeline ordering ────────────────────────────────────────────────────────

#[tokio::test]
async fn classify_failure_aborts_notify_but_keeps_fetch_result() {
    let mail = MockMailStore::new(3);
    let classifier = MockClassifier::new(vec![]);
    classifier.fail.store(true, Ordering::SeqCst);
    let notifier = MockNotifier::new();
    let ctx = context(test_config(), &mail, &classifier, &notifier);

    let run = ctx.pipeline.run_pipeline(false, true).await;

    assert_eq!(run.fetched, 3);
    assert_eq!(run.classified, 0);
    assert_eq!(run.notified, 0);
    assert!(notifier.sent.lock().await.is_empty());
    assert!(run
        .errors
        .iter()
        .any(|e| e.stage == scoutd::error::Stage::Classify));
    // Default policy: deletion is independent of the notify outcome.
    assert_eq!(mail.delete_calls.load(Ordering::SeqCst), 1);
    assert_eq!(run.deleted, 2);
}

#[tokio::test]
async fn clean_run_reports_every_stage() {
    let mail = MockMailStore::new(2);
    let classifier = MockClassifier::new(vec![classified("Paper A", &["LLM Inference"])]);
    let notifier = MockNotifier::new();
    let ctx = context(test_config(), &mail, &classifier, &notifier);

    let run = ctx.pipeline.run_pipeline(false, true).await;

    assert!(run.errors.is_empty());
    assert_eq!(run.fetched, 2);
    assert_eq!(run.classified, 1);
    assert_eq!(run.notified, 1);
    assert_eq!(run.deleted, 2);
}

#[tokio::test]
async fn delete_can_be_gated_on_clean_notify() {
    let mut config = test_config();
    config.pipeline.delete_requires_notify = true;
    let mail = MockMailStore::new(1);
    let classifier = MockClassifier::new(vec![
        classified("Paper A", &["LLM Inference"]),
        classified("Paper B", &["Retrieval"]),
    ]);
    let notifier = MockNotifier::failing_on("#llm");
    let ctx = context(config, &mail, &classifier, &notifier);

    let run = ctx.pipeline.run_pipeline(false, true).await;

    assert_eq!(mail.delete_calls.load(Ordering::SeqCst), 0);
    assert_eq!(run.deleted, 0);
    assert!(!run.errors.is_empty());
}

#[tokio::test]
async fn delete_skipped_when_not_requested() {
    let mail = MockMailStore::new(1);
    let classifier = MockClassifier::new(vec![]);
    let notifier = MockNotifier::new();
    let ctx = context(test_config(), &mail, &classifier, &notifier);

    let run = ctx.pipeline.run_pipeline(false, false).await;

    assert_eq!(mail.delete_calls.load(Ordering::SeqCst), 0);
    assert_eq!(run.deleted, 0);
    assert!(run.errors.is_empty());
}

// ── Timeouts ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn slow_upstream_surfaces_timeout_and_preserves_cache() {
    let mut config = test_config();
    config.pipeline.stage_timeout_secs = 1;
    let mail = MockMailStore::with_delay(1, Duration::from_millis(1500));
    let classifier = MockClassifier::new(vec![]);
    let notifier = MockNotifier::new();
    let ctx = context(config, &mail, &classifier, &notifier);

    // Plant a fresh snapshot, then force a refresh that times out.
    let snapshot = MailSnapshot {
        generation: 1,
        fetched_at: Utc::now(),
        messages: vec![],
    };
    ctx.cache.put_mail(snapshot, Utc::now()).await;

    let err = ctx.pipeline.fetch(true).await.unwrap_err();
    assert_eq!(err.kind(), "UpstreamUnavailable");
    assert!(err.to_string().contains("timed out"));
    assert_eq!(ctx.cache.mail().await.unwrap().value.generation, 1);
}

// ── Detail lookup against the cached set ─────────────────────────────────────

#[tokio::test]
async fn detail_lookup_over_cached_set() {
    let set = ClassifiedSet {
        generation: 1,
        classified_at: Utc::now(),
        papers: vec![
            classified("First", &[]),
            classified("Efficient Inference for Large Language Models", &["LLM Inference"]),
            classified("Third", &[]),
        ],
    };

    assert!(set
        .find(Some(1), None)
        .unwrap()
        .paper
        .title
        .starts_with("Efficient"));
    assert!(set
        .find(None, Some("efficient inference"))
        .unwrap()
        .paper
        .title
        .starts_with("Efficient"));
    assert_eq!(set.find(None, None).unwrap_err().kind(), "InvalidArgument");
}
