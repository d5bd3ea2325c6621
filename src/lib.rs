pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod mail;
pub mod mcp;
pub mod models;
pub mod notify;
pub mod pipeline;

use std::sync::Arc;

use cache::SnapshotCache;
use classify::{Classifier, PerplexityClassifier};
use config::AppConfig;
use mail::{ImapMailStore, MailStore};
use notify::{Notifier, SlackNotifier};
use pipeline::PipelineCoordinator;

/// Shared application state passed to every protocol handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub cache: Arc<SnapshotCache>,
    pub pipeline: Arc<PipelineCoordinator>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    /// Wire up the production collaborators (IMAP, Perplexity, Slack).
    pub fn new(config: AppConfig) -> Self {
        let mail = Arc::new(ImapMailStore::new(config.mail.clone()));
        let classifier = Arc::new(PerplexityClassifier::new(config.classifier.clone()));
        let notifier = Arc::new(SlackNotifier::new(config.slack.clone()));
        Self::with_collaborators(config, mail, classifier, notifier)
    }

    /// Wire up with explicit collaborators. This is the seam integration
    /// tests use to substitute mocks for the upstream services.
    pub fn with_collaborators(
        config: AppConfig,
        mail: Arc<dyn MailStore>,
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cache = Arc::new(SnapshotCache::new());
        let pipeline = Arc::new(PipelineCoordinator::new(
            &config,
            mail,
            classifier,
            notifier,
            Arc::clone(&cache),
        ));
        Self {
            config: Arc::new(config),
            cache,
            pipeline,
            started_at: std::time::Instant::now(),
        }
    }
}
