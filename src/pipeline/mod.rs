//! Pipeline coordinator — runs fetch → classify → notify (→ delete) and owns
//! the single-flight guarantee.
//!
//! # Flight rules
//!
//! ```text
//! fetch:    cache fresh ──────────────► reuse (no upstream call)
//!           stale/forced ─► flight lock ─► re-check ─► MailStore.search
//! classify: same generation cached ───► reuse (no classifier call)
//!           new generation ─► flight lock ─► re-check ─► Classifier.classify
//! ```
//!
//! Only one fetch-or-classify cycle executes at a time system-wide: a second
//! concurrent caller waits on the flight lock, then re-checks the cache and
//! reuses the first caller's result instead of issuing a duplicate upstream
//! call. Notify never takes a flight lock — it does not mutate cache state,
//! so independent runs may notify concurrently.
//!
//! A failed refresh leaves the previous cache entry intact: stale-but-
//! available, never silently empty.

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::SnapshotCache;
use crate::classify::Classifier;
use crate::config::{AppConfig, ResearchTopic};
use crate::error::{ScoutError, Stage};
use crate::mail::{MailStore, SearchCriteria};
use crate::models::{
    ChannelFailure, ClassifiedSet, MailSnapshot, NotifyReport, PipelineRun,
};
use crate::notify::{DigestSection, Notifier};

/// Tunables lifted out of [`AppConfig`] at construction.
#[derive(Debug, Clone)]
pub struct PipelinePolicy {
    pub mail_ttl: chrono::Duration,
    pub delete_after_days: u32,
    /// Gate deletion on a failure-free notify stage. Off by default —
    /// deletion follows the notify attempt regardless of its outcome.
    pub delete_requires_notify: bool,
    pub stage_timeout: std::time::Duration,
}

impl From<&AppConfig> for PipelinePolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            mail_ttl: config.mail_ttl(),
            delete_after_days: config.pipeline.delete_after_days,
            delete_requires_notify: config.pipeline.delete_requires_notify,
            stage_timeout: config.stage_timeout(),
        }
    }
}

pub struct PipelineCoordinator {
    mail: Arc<dyn MailStore>,
    classifier: Arc<dyn Classifier>,
    notifier: Arc<dyn Notifier>,
    cache: Arc<SnapshotCache>,
    criteria: SearchCriteria,
    topics: Vec<ResearchTopic>,
    default_channel: String,
    /// Weekly digest routing: channel → topic names.
    channel_topics: Vec<(String, Vec<String>)>,
    policy: PipelinePolicy,
    generation: AtomicU64,
    fetch_flight: Mutex<()>,
    classify_flight: Mutex<()>,
}

impl PipelineCoordinator {
    pub fn new(
        config: &AppConfig,
        mail: Arc<dyn MailStore>,
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn Notifier>,
        cache: Arc<SnapshotCache>,
    ) -> Self {
        let mut channel_topics: Vec<(String, Vec<String>)> = config
            .slack
            .channel_topics
            .iter()
            .map(|(channel, topics)| (channel.clone(), topics.clone()))
            .collect();
        channel_topics.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            mail,
            classifier,
            notifier,
            cache,
            criteria: SearchCriteria::from(&config.search),
            topics: config.topics.clone(),
            default_channel: config.slack.default_channel.clone(),
            channel_topics,
            policy: PipelinePolicy::from(config),
            generation: AtomicU64::new(0),
            fetch_flight: Mutex::new(()),
            classify_flight: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &PipelinePolicy {
        &self.policy
    }

    // ─── fetch ────────────────────────────────────────────────────────────────

    /// Return the cached mail snapshot, refreshing from the mail store when
    /// it is stale, absent, or `force_refresh` is set.
    pub async fn fetch(&self, force_refresh: bool) -> Result<Arc<MailSnapshot>, ScoutError> {
        if !force_refresh {
            if let Some(entry) = self.cache.mail().await {
                if !entry.is_stale(self.policy.mail_ttl, Utc::now()) {
                    debug!(
                        generation = entry.value.generation,
                        "mail cache fresh — skipping fetch"
                    );
                    return Ok(entry.value);
                }
            }
        }

        // Remember which generation (if any) was visible before waiting, so
        // a refresh completed by a concurrent caller can be detected and
        // reused instead of repeated.
        let observed = self.cache.mail().await.map(|e| e.value.generation);
        let _flight = self.fetch_flight.lock().await;

        if let Some(entry) = self.cache.mail().await {
            let refreshed_while_waiting = Some(entry.value.generation) != observed;
            let fresh = !entry.is_stale(self.policy.mail_ttl, Utc::now());
            if fresh && (refreshed_while_waiting || !force_refresh) {
                debug!(
                    generation = entry.value.generation,
                    "reusing snapshot refreshed by concurrent caller"
                );
                return Ok(entry.value);
            }
        }

        let messages = match timeout(self.policy.stage_timeout, self.mail.search(&self.criteria))
            .await
        {
            Err(_) => {
                warn!("mail search timed out — previous snapshot left intact");
                return Err(ScoutError::upstream(Stage::Fetch, "mail search timed out"));
            }
            Ok(Err(e)) => {
                warn!(err = %e, "mail search failed — previous snapshot left intact");
                return Err(ScoutError::upstream(Stage::Fetch, e));
            }
            Ok(Ok(messages)) => messages,
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = MailSnapshot {
            generation,
            fetched_at: Utc::now(),
            messages,
        };
        let snapshot = self.cache.put_mail(snapshot, Utc::now()).await;
        info!(
            generation,
            messages = snapshot.messages.len(),
            "mail snapshot refreshed"
        );
        Ok(snapshot)
    }

    // ─── classify ─────────────────────────────────────────────────────────────

    /// Classify the cached snapshot. Idempotent per snapshot generation:
    /// repeated calls against an unchanged snapshot reuse the cached set
    /// without re-invoking the classifier.
    pub async fn classify(&self, fetch_first: bool) -> Result<Arc<ClassifiedSet>, ScoutError> {
        if fetch_first {
            self.fetch(false).await?;
        }

        let snapshot = self
            .cache
            .mail()
            .await
            .ok_or_else(|| {
                ScoutError::not_found("no mail snapshot cached — run fetch_emails first")
            })?
            .value;

        if let Some(entry) = self.cache.papers().await {
            if entry.value.generation == snapshot.generation {
                debug!(
                    generation = snapshot.generation,
                    "classified set current for this generation — skipping classifier"
                );
                return Ok(entry.value);
            }
        }

        let _flight = self.classify_flight.lock().await;
        if let Some(entry) = self.cache.papers().await {
            if entry.value.generation == snapshot.generation {
                debug!(
                    generation = snapshot.generation,
                    "reusing set classified by concurrent caller"
                );
                return Ok(entry.value);
            }
        }

        let papers = match timeout(
            self.policy.stage_timeout,
            self.classifier.classify(&snapshot, &self.topics),
        )
        .await
        {
            Err(_) => {
                return Err(ScoutError::upstream(
                    Stage::Classify,
                    "classification timed out",
                ))
            }
            Ok(Err(e)) => return Err(ScoutError::upstream(Stage::Classify, e)),
            Ok(Ok(papers)) => papers,
        };

        let set = ClassifiedSet {
            generation: snapshot.generation,
            classified_at: Utc::now(),
            papers,
        };
        let set = self.cache.put_papers(set, Utc::now()).await;
        info!(
            generation = set.generation,
            papers = set.papers.len(),
            "classified set refreshed"
        );
        Ok(set)
    }

    // ─── notify ───────────────────────────────────────────────────────────────

    /// Fan notifications out over the scope's matched topics. One failed
    /// channel never aborts the rest; the report carries every failure.
    pub async fn notify(&self, weekly_update: bool, scope: &ClassifiedSet) -> NotifyReport {
        if weekly_update {
            self.notify_weekly(scope).await
        } else {
            self.notify_matches(scope).await
        }
    }

    async fn notify_matches(&self, scope: &ClassifiedSet) -> NotifyReport {
        let mut report = NotifyReport::default();

        // Group paper indices by (channel, topic) so each pair gets exactly
        // one send. BTreeMap keeps the send order deterministic.
        let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
        for (i, classified) in scope.papers.iter().enumerate() {
            for topic_name in &classified.topics {
                let Some(topic) = self.topic_by_name(topic_name) else {
                    warn!(topic = %topic_name, "matched topic missing from configuration");
                    continue;
                };
                let channel = topic
                    .slack_channel
                    .clone()
                    .unwrap_or_else(|| self.default_channel.clone());
                groups
                    .entry((channel, topic.name.clone()))
                    .or_default()
                    .push(i);
            }
        }

        let mut notified_papers: HashSet<usize> = HashSet::new();
        for ((channel, topic_name), indices) in &groups {
            let Some(topic) = self.topic_by_name(topic_name) else {
                continue;
            };
            let papers: Vec<&_> = indices.iter().map(|&i| &scope.papers[i]).collect();
            let send = self.notifier.send_topic_matches(channel, topic, &papers);
            match timeout(self.policy.stage_timeout, send).await {
                Ok(Ok(())) => {
                    report.record_channel(channel);
                    notified_papers.extend(indices.iter().copied());
                }
                Ok(Err(e)) => {
                    warn!(channel = %channel, topic = %topic_name, err = %e, "notify failed");
                    report.failures.push(ChannelFailure {
                        channel: channel.clone(),
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(channel = %channel, topic = %topic_name, "notify timed out");
                    report.failures.push(ChannelFailure {
                        channel: channel.clone(),
                        message: "send timed out".into(),
                    });
                }
            }
        }
        report.papers_notified = notified_papers.len();
        report
    }

    async fn notify_weekly(&self, scope: &ClassifiedSet) -> NotifyReport {
        let mut report = NotifyReport::default();
        let mut notified_titles: HashSet<&str> = HashSet::new();

        for (channel, topic_names) in &self.channel_topics {
            let sections: Vec<DigestSection> = topic_names
                .iter()
                .filter_map(|name| {
                    let titles: Vec<String> = scope
                        .papers
                        .iter()
                        .filter(|p| p.topics.iter().any(|t| t == name))
                        .map(|p| p.paper.title.clone())
                        .collect();
                    (!titles.is_empty()).then(|| DigestSection {
                        topic: name.clone(),
                        titles,
                    })
                })
                .collect();

            let send = self.notifier.send_weekly_update(channel, &sections);
            match timeout(self.policy.stage_timeout, send).await {
                Ok(Ok(())) => {
                    report.record_channel(channel);
                    for section in &sections {
                        for paper in scope.papers.iter().filter(|p| {
                            p.topics.iter().any(|t| *t == section.topic)
                        }) {
                            notified_titles.insert(paper.paper.title.as_str());
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(channel = %channel, err = %e, "weekly digest failed");
                    report.failures.push(ChannelFailure {
                        channel: channel.clone(),
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    report.failures.push(ChannelFailure {
                        channel: channel.clone(),
                        message: "send timed out".into(),
                    });
                }
            }
        }
        report.papers_notified = notified_titles.len();
        report
    }

    fn topic_by_name(&self, name: &str) -> Option<&ResearchTopic> {
        self.topics
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    // ─── full pipeline ────────────────────────────────────────────────────────

    /// Run fetch → classify → notify → (optional) delete in strict order.
    ///
    /// Every stage failure is recorded in the run report; a stage only runs
    /// when its hard dependency succeeded (fetch failure aborts classify,
    /// classify failure aborts notify). Deletion runs after the notify
    /// attempt — never before, so source messages survive a failed
    /// classification — and is additionally gated on a failure-free notify
    /// stage when `delete_requires_notify` is set.
    pub async fn run_pipeline(
        &self,
        weekly_update: bool,
        delete_old_emails: bool,
    ) -> PipelineRun {
        let mut run = PipelineRun::new(Uuid::new_v4().to_string());
        info!(
            run_id = %run.run_id,
            weekly_update,
            delete_old_emails,
            "pipeline run started"
        );

        let snapshot = match self.fetch(true).await {
            Ok(snapshot) => {
                run.fetched = snapshot.messages.len();
                Some(snapshot)
            }
            Err(e) => {
                run.record_error(Stage::Fetch, &e);
                None
            }
        };

        let set = match snapshot {
            Some(_) => match self.classify(false).await {
                Ok(set) => {
                    run.classified = set.papers.len();
                    Some(set)
                }
                Err(e) => {
                    run.record_error(Stage::Classify, &e);
                    None
                }
            },
            None => None,
        };

        let mut notify_clean = false;
        if let Some(set) = &set {
            let report = self.notify(weekly_update, set).await;
            run.notified = report.papers_notified;
            notify_clean = report.failures.is_empty();
            for failure in report.failures {
                run.record_error(
                    Stage::Notify,
                    format!("{}: {}", failure.channel, failure.message),
                );
            }
        }

        if delete_old_emails {
            if self.policy.delete_requires_notify && !notify_clean {
                info!(
                    run_id = %run.run_id,
                    "deletion skipped — notify stage did not complete cleanly"
                );
            } else {
                match timeout(
                    self.policy.stage_timeout,
                    self.mail.delete_older_than(self.policy.delete_after_days),
                )
                .await
                {
                    Ok(Ok(count)) => run.deleted = count,
                    Ok(Err(e)) => run.record_error(Stage::Delete, e),
                    Err(_) => run.record_error(Stage::Delete, "deletion timed out"),
                }
            }
        }

        info!(
            run_id = %run.run_id,
            fetched = run.fetched,
            classified = run.classified,
            notified = run.notified,
            deleted = run.deleted,
            errors = run.errors.len(),
            "pipeline run finished"
        );
        run
    }
}
