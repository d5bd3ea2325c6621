use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_FOLDER: &str = "INBOX";
const DEFAULT_ALERT_SENDER: &str = "scholaralerts-noreply@google.com";
const DEFAULT_WINDOW_DAYS: u32 = 7;
const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";
const DEFAULT_CLASSIFIER_API_URL: &str = "https://api.perplexity.ai";
const DEFAULT_CLASSIFIER_MODEL: &str = "sonar-pro";
const DEFAULT_BATCH_SIZE: usize = 8;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MAIL_TTL_SECS: u64 = 300;
const DEFAULT_DELETE_AFTER_DAYS: u32 = 30;
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 120;

// ─── MailConfig ───────────────────────────────────────────────────────────────

/// IMAP mailbox connection (`[mail]` in scoutd.toml).
///
/// `password` normally arrives via `${SCOUTD_IMAP_PASSWORD}` substitution or
/// the env override — keep secrets out of the file itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub folder: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_IMAP_HOST.to_string(),
            port: DEFAULT_IMAP_PORT,
            username: String::new(),
            password: String::new(),
            folder: DEFAULT_FOLDER.to_string(),
        }
    }
}

// ─── SearchConfig ─────────────────────────────────────────────────────────────

/// Alert search criteria (`[search]` in scoutd.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Sender address the alert search filters on.
    pub sender: String,
    /// Subject fragments; a fetched message must contain one of these when
    /// the list is non-empty.
    pub subjects: Vec<String>,
    /// How many days back the IMAP SINCE criterion reaches.
    pub window_days: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            sender: DEFAULT_ALERT_SENDER.to_string(),
            subjects: Vec::new(),
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

// ─── SlackConfig ──────────────────────────────────────────────────────────────

/// Slack notifier configuration (`[slack]` in scoutd.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SlackConfig {
    pub api_token: String,
    /// Channel used when a topic has no `slack_channel` of its own.
    pub default_channel: String,
    /// Weekly digest routing: channel name → topic names it receives.
    pub channel_topics: HashMap<String, Vec<String>>,
    /// Override for tests; the Slack Web API base otherwise.
    pub api_base_url: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            default_channel: String::new(),
            channel_topics: HashMap::new(),
            api_base_url: DEFAULT_SLACK_API_URL.to_string(),
        }
    }
}

// ─── ClassifierConfig ─────────────────────────────────────────────────────────

/// LLM classifier configuration (`[classifier]` in scoutd.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub api_key: String,
    pub model: String,
    /// OpenAI-compatible chat-completions base URL.
    pub api_base_url: String,
    /// Papers per classification request. Bounds request size and memory.
    pub batch_size: usize,
    /// Attempts per chunk before the stage gives up.
    pub max_retries: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_CLASSIFIER_MODEL.to_string(),
            api_base_url: DEFAULT_CLASSIFIER_API_URL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

// ─── CacheConfig / PipelineConfig ─────────────────────────────────────────────

/// Cache staleness tuning (`[cache]` in scoutd.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds before a cached mail snapshot counts as stale. Papers have
    /// no TTL — they are replaced only by a new classification.
    pub mail_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mail_ttl_secs: DEFAULT_MAIL_TTL_SECS,
        }
    }
}

/// Full-pipeline policy (`[pipeline]` in scoutd.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Messages older than this many days are removed by the deletion stage.
    pub delete_after_days: u32,
    /// When true, the deletion stage runs only after a failure-free notify
    /// stage. Default false: deletion follows the notify attempt regardless
    /// of its outcome.
    pub delete_requires_notify: bool,
    /// Per-stage upstream timeout in seconds.
    pub stage_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            delete_after_days: DEFAULT_DELETE_AFTER_DAYS,
            delete_requires_notify: false,
            stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
        }
    }
}

// ─── ResearchTopic ────────────────────────────────────────────────────────────

/// One tracked research topic (`[[topics]]` in scoutd.toml). Loaded once at
/// startup, read-only for the life of the process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResearchTopic {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub slack_users: Vec<String>,
    /// Falls back to `slack.default_channel` when absent.
    #[serde(default)]
    pub slack_channel: Option<String>,
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// `scoutd.toml`, fully layered. Priority: env var > TOML > built-in default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mail: MailConfig,
    pub search: SearchConfig,
    pub slack: SlackConfig,
    pub classifier: ClassifierConfig,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub topics: Vec<ResearchTopic>,
    /// Log level filter string, e.g. "debug", "info,scoutd=trace".
    pub log: String,
    /// "pretty" (default) | "json" (structured for log aggregators).
    pub log_format: String,
}

static ENV_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Substitute `${VAR}` references with environment values before TOML
/// parsing. Unknown variables are left verbatim so a missing secret fails
/// loudly at connect time rather than silently emptying a field.
fn expand_env(raw: &str) -> String {
    ENV_VAR_RE
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

impl AppConfig {
    /// Load from a TOML file, apply `${VAR}` substitution and env-var
    /// overrides for secrets.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&expand_env(&raw))
            .map_err(|e| anyhow::anyhow!("cannot parse config {}: {e}", path.display()))?;
        config.apply_env_overrides();
        config.validate();
        Ok(config)
    }

    /// Secret overrides — these always win over file contents.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = non_empty_env("SCOUTD_IMAP_PASSWORD") {
            self.mail.password = v;
        }
        if let Some(v) = non_empty_env("SCOUTD_SLACK_TOKEN") {
            self.slack.api_token = v;
        }
        if let Some(v) = non_empty_env("SCOUTD_CLASSIFIER_API_KEY") {
            self.classifier.api_key = v;
        }
    }

    /// Warn about configurations that will fail at run time. Startup still
    /// proceeds — read-only queries work without any upstream credentials.
    fn validate(&self) {
        if self.topics.is_empty() {
            warn!("no [[topics]] configured — classification will match nothing");
        }
        if self.mail.username.is_empty() {
            warn!("mail.username is empty — fetch will fail until configured");
        }
        let mut seen = std::collections::HashSet::new();
        for topic in &self.topics {
            if !seen.insert(topic.name.to_lowercase()) {
                warn!(topic = %topic.name, "duplicate topic name in config");
            }
        }
    }

    pub fn mail_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache.mail_ttl_secs as i64)
    }

    pub fn stage_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pipeline.stage_timeout_secs)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
