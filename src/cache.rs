//! Fixed-key snapshot cache for expensive upstream results.
//!
//! Holds exactly two entries — the last mail snapshot and the last
//! classified paper set. Not an LRU: size is bounded by construction, not
//! by policy. Reads clone an `Arc` out and never block on I/O; writes
//! replace the whole entry atomically, so a reader sees either the old or
//! the new `(value, captured_at)` pair in full, never a mix.
//!
//! Staleness is `now - captured_at > ttl`, with `now` passed in by the
//! caller so tests can probe the boundary without sleeping. An absent entry
//! is always stale. Mail expires by TTL; papers are invalidated only by a
//! new classification (generation change), never by time.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{ClassifiedSet, MailSnapshot};

/// A cached value together with its capture timestamp. The two fields are
/// set in the same write, so no reader can observe one without the other.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub value: Arc<T>,
    pub captured_at: DateTime<Utc>,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            captured_at: self.captured_at,
        }
    }
}

impl<T> CacheEntry<T> {
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.captured_at > ttl
    }
}

#[derive(Default)]
struct CacheInner {
    mail: Option<CacheEntry<MailSnapshot>>,
    papers: Option<CacheEntry<ClassifiedSet>>,
}

/// Shared snapshot cache. Cheaply cloneable via `Arc` at the call sites;
/// all mutation goes through the `put_*` atomic replaces.
#[derive(Default)]
pub struct SnapshotCache {
    inner: RwLock<CacheInner>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mail entry, if any. Never performs I/O.
    pub async fn mail(&self) -> Option<CacheEntry<MailSnapshot>> {
        self.inner.read().await.mail.clone()
    }

    /// Current classified-paper entry, if any. Never performs I/O.
    pub async fn papers(&self) -> Option<CacheEntry<ClassifiedSet>> {
        self.inner.read().await.papers.clone()
    }

    /// Replace the mail entry. `captured_at` is stored with the value in
    /// one write.
    pub async fn put_mail(
        &self,
        snapshot: MailSnapshot,
        captured_at: DateTime<Utc>,
    ) -> Arc<MailSnapshot> {
        let value = Arc::new(snapshot);
        let mut inner = self.inner.write().await;
        inner.mail = Some(CacheEntry {
            value: Arc::clone(&value),
            captured_at,
        });
        value
    }

    /// Replace the classified-paper entry.
    pub async fn put_papers(
        &self,
        set: ClassifiedSet,
        captured_at: DateTime<Utc>,
    ) -> Arc<ClassifiedSet> {
        let value = Arc::new(set);
        let mut inner = self.inner.write().await;
        inner.papers = Some(CacheEntry {
            value: Arc::clone(&value),
            captured_at,
        });
        value
    }

    /// True when the mail entry is absent or older than `ttl` at `now`.
    pub async fn mail_is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match &self.inner.read().await.mail {
            Some(entry) => entry.is_stale(ttl, now),
            None => true,
        }
    }
}
