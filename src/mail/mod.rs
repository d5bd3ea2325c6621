//! Mailbox collaborator: the seam between the pipeline coordinator and the
//! alert mailbox.
//!
//! The coordinator only ever talks to [`MailStore`]; the production IMAP
//! implementation lives in [`imap`](self::imap), and tests substitute mocks.

pub mod imap;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::SearchConfig;
use crate::models::MailMessage;

pub use self::imap::ImapMailStore;

/// What a mailbox search filters on. Built once from config.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    pub sender: String,
    pub subjects: Vec<String>,
    pub window_days: u32,
}

impl From<&SearchConfig> for SearchCriteria {
    fn from(config: &SearchConfig) -> Self {
        Self {
            sender: config.sender.clone(),
            subjects: config.subjects.clone(),
            window_days: config.window_days,
        }
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("task failed: {0}")]
    Task(String),
}

/// Read/delete access to the alert mailbox.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Search for alert messages matching `criteria` and fetch their
    /// content. Returns newest-first message order as the server reports it.
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<MailMessage>, MailError>;

    /// Delete messages older than `days` days. Returns the number removed.
    async fn delete_older_than(&self, days: u32) -> Result<usize, MailError>;
}
