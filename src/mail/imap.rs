//! IMAP-backed [`MailStore`].
//!
//! The `imap` crate drives a blocking TLS session, so every operation runs
//! inside `spawn_blocking` and opens its own short-lived session — the
//! coordinator never holds a connection across await points.

use chrono::{TimeZone, Utc};
use imap::Session;
use mailparse::MailHeaderMap;
use native_tls::{TlsConnector, TlsStream};
use std::collections::BTreeSet;
use std::net::TcpStream;
use tracing::{debug, info, warn};

use super::{MailError, MailStore, SearchCriteria};
use crate::config::MailConfig;
use crate::models::MailMessage;

type TlsSession = Session<TlsStream<TcpStream>>;

pub struct ImapMailStore {
    config: MailConfig,
}

impl ImapMailStore {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl MailStore for ImapMailStore {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<MailMessage>, MailError> {
        let config = self.config.clone();
        let criteria = criteria.clone();
        tokio::task::spawn_blocking(move || search_blocking(&config, &criteria))
            .await
            .map_err(|e| MailError::Task(e.to_string()))?
    }

    async fn delete_older_than(&self, days: u32) -> Result<usize, MailError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || delete_blocking(&config, days))
            .await
            .map_err(|e| MailError::Task(e.to_string()))?
    }
}

// ─── Blocking session plumbing ────────────────────────────────────────────────

fn connect(config: &MailConfig) -> Result<TlsSession, MailError> {
    let tls = TlsConnector::builder()
        .build()
        .map_err(|e| MailError::Connect(e.to_string()))?;
    debug!(host = %config.host, user = %config.username, "connecting to IMAP server");
    let client = imap::connect(
        (config.host.as_str(), config.port),
        config.host.as_str(),
        &tls,
    )
    .map_err(|e| MailError::Connect(e.to_string()))?;
    client
        .login(&config.username, &config.password)
        .map_err(|(e, _)| MailError::Auth(e.to_string()))
}

/// Folder names with spaces must be quoted on the wire.
fn quote_folder(folder: &str) -> String {
    if folder.contains(' ') && !folder.starts_with('"') {
        format!("\"{folder}\"")
    } else {
        folder.to_string()
    }
}

fn since_date(days_back: u32) -> String {
    (Utc::now() - chrono::Duration::days(i64::from(days_back)))
        .format("%d-%b-%Y")
        .to_string()
}

fn search_blocking(
    config: &MailConfig,
    criteria: &SearchCriteria,
) -> Result<Vec<MailMessage>, MailError> {
    let mut session = connect(config)?;
    let result = search_in_session(&mut session, config, criteria);
    let _ = session.logout();
    result
}

fn search_in_session(
    session: &mut TlsSession,
    config: &MailConfig,
    criteria: &SearchCriteria,
) -> Result<Vec<MailMessage>, MailError> {
    session
        .select(quote_folder(&config.folder))
        .map_err(|e| MailError::Protocol(format!("select {}: {e}", config.folder)))?;

    let base = format!(
        "FROM \"{}\" SINCE \"{}\"",
        criteria.sender,
        since_date(criteria.window_days)
    );
    debug!(query = %base, "IMAP search");
    let mut seqs: BTreeSet<u32> = session
        .search(&base)
        .map_err(|e| MailError::Protocol(format!("search: {e}")))?
        .into_iter()
        .collect();

    // Sender-only search can miss forwarded alerts; fall back to per-subject
    // queries the way the alert filter is configured.
    if seqs.is_empty() {
        for subject in &criteria.subjects {
            let query = format!("{base} SUBJECT \"{subject}\"");
            debug!(query = %query, "IMAP fallback search");
            match session.search(&query) {
                Ok(found) => seqs.extend(found),
                Err(e) => warn!(subject = %subject, err = %e, "subject search failed"),
            }
        }
    }

    info!(count = seqs.len(), "IMAP search matched messages");
    if seqs.is_empty() {
        return Ok(Vec::new());
    }

    let seq_set = seqs
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let fetches = session
        .fetch(seq_set, "RFC822")
        .map_err(|e| MailError::Protocol(format!("fetch: {e}")))?;

    let mut messages = Vec::new();
    for fetch in fetches.iter() {
        let Some(body) = fetch.body() else {
            warn!(seq = fetch.message, "fetch returned no body");
            continue;
        };
        match parse_message(body, fetch.message) {
            Some(msg) => {
                if subject_matches(&msg.subject, &criteria.subjects) {
                    messages.push(msg);
                }
            }
            None => warn!(seq = fetch.message, "unparseable message skipped"),
        }
    }
    Ok(messages)
}

fn delete_blocking(config: &MailConfig, days: u32) -> Result<usize, MailError> {
    let mut session = connect(config)?;
    let result = delete_in_session(&mut session, config, days);
    let _ = session.logout();
    result
}

fn delete_in_session(
    session: &mut TlsSession,
    config: &MailConfig,
    days: u32,
) -> Result<usize, MailError> {
    session
        .select(quote_folder(&config.folder))
        .map_err(|e| MailError::Protocol(format!("select {}: {e}", config.folder)))?;

    let query = format!("BEFORE \"{}\"", since_date(days));
    let seqs = session
        .search(&query)
        .map_err(|e| MailError::Protocol(format!("search: {e}")))?;
    if seqs.is_empty() {
        return Ok(0);
    }

    let seq_set = seqs
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    session
        .store(&seq_set, "+FLAGS (\\Deleted)")
        .map_err(|e| MailError::Protocol(format!("store: {e}")))?;
    session
        .expunge()
        .map_err(|e| MailError::Protocol(format!("expunge: {e}")))?;

    info!(count = seqs.len(), days, "expunged old alert messages");
    Ok(seqs.len())
}

// ─── Message parsing ──────────────────────────────────────────────────────────

fn parse_message(raw: &[u8], seq: u32) -> Option<MailMessage> {
    let parsed = mailparse::parse_mail(raw).ok()?;
    let headers = &parsed.headers;

    let subject = headers.get_first_value("Subject").unwrap_or_default();
    let sender = headers.get_first_value("From").unwrap_or_default();
    let id = headers
        .get_first_value("Message-ID")
        .unwrap_or_else(|| seq.to_string());

    let received_at = headers
        .get_first_value("Date")
        .map(|raw_date| match mailparse::dateparse(&raw_date) {
            Ok(epoch) => Utc
                .timestamp_opt(epoch, 0)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or(raw_date),
            Err(_) => raw_date,
        })
        .unwrap_or_default();

    let html = find_html_part(&parsed)
        .or_else(|| parsed.get_body().ok())
        .unwrap_or_default();

    Some(MailMessage {
        id,
        subject,
        sender,
        received_at,
        html,
    })
}

fn find_html_part(part: &mailparse::ParsedMail<'_>) -> Option<String> {
    if part.ctype.mimetype.eq_ignore_ascii_case("text/html") {
        return part.get_body().ok();
    }
    part.subparts.iter().find_map(find_html_part)
}

fn subject_matches(subject: &str, wanted: &[String]) -> bool {
    wanted.is_empty() || wanted.iter().any(|w| subject.contains(w.as_str()))
}
