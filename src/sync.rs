//! Per-feed synchronization engine.
//!
//! One cycle per feed is a linear sequence: fetch all sources, parse,
//! diff against the stored episode set, merge, commit. Individual source
//! failures (network, HTTP, malformed XML) are logged and skipped without
//! aborting the cycle for sibling sources; the merge and the persistence
//! write happen once, at the end, as a single atomic commit. A cycle that
//! finds nothing new performs no write at all, so re-running against
//! byte-identical upstream content is idempotent.

use chrono::{DateTime, FixedOffset};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::feed::{
    fetch_source, parse_document, parse_rss_date, Episode, FetchError, ParseError, ParsedDocument,
};
use crate::storage::{Database, StoreError};

/// Feeds synchronized in parallel during a full pass.
const MAX_CONCURRENT_FEEDS: usize = 4;
/// Sources fetched in parallel within one feed.
const MAX_CONCURRENT_SOURCES: usize = 4;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("feed {0:?} is not configured")]
    UnknownFeed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a single source contributed nothing this cycle.
#[derive(Debug, Error)]
enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Result of one feed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// New episodes were merged and committed.
    Updated,
    /// Every source was already fully known; nothing was written.
    Unchanged,
    /// A cycle for this feed was still running; this one was dropped.
    Skipped,
}

/// Outcome of one feed within a full sync pass.
pub struct SyncResult {
    pub feed: String,
    pub outcome: Result<SyncOutcome, SyncError>,
}

/// Drives sync cycles over all configured feeds.
///
/// Distinct feeds own disjoint sources and storage keys and may sync in
/// parallel; a single feed is guarded by its own lock because a cycle
/// reads then writes the aggregate without a compare-and-swap.
pub struct SyncEngine {
    db: Database,
    client: reqwest::Client,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(db: Database, client: reqwest::Client) -> Self {
        Self {
            db,
            client,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one cycle for every configured feed, bounded-parallel.
    /// Per-feed errors are logged, never propagated: one feed's failure
    /// must not disturb its siblings or the scheduler.
    pub async fn sync_all(&self) -> Vec<SyncResult> {
        let names = match self.db.feed_names().await {
            Ok(names) => names,
            Err(error) => {
                tracing::error!(error = %error, "could not list feeds, skipping pass");
                return Vec::new();
            }
        };

        let results: Vec<SyncResult> = stream::iter(names)
            .map(|name| async move {
                let outcome = self.sync_feed(&name).await;
                if let Err(error) = &outcome {
                    tracing::error!(feed = %name, error = %error, "sync cycle failed");
                }
                SyncResult {
                    feed: name,
                    outcome,
                }
            })
            .buffer_unordered(MAX_CONCURRENT_FEEDS)
            .collect()
            .await;

        let updated = results
            .iter()
            .filter(|r| matches!(r.outcome, Ok(SyncOutcome::Updated)))
            .count();
        tracing::info!(feeds = results.len(), updated, "sync pass complete");
        results
    }

    /// Run one sync cycle for a single feed.
    ///
    /// Returns [`SyncOutcome::Updated`] when new episodes were committed,
    /// [`SyncOutcome::Unchanged`] when the feed was already up to date,
    /// and [`SyncOutcome::Skipped`] when a cycle for this feed was still
    /// in flight.
    pub async fn sync_feed(&self, name: &str) -> Result<SyncOutcome, SyncError> {
        let lock = self.lock_for(name).await;
        let Ok(_guard) = lock.try_lock() else {
            tracing::debug!(feed = %name, "previous cycle still running, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let Some(mut feed) = self.db.load_feed(name).await? else {
            return Err(SyncError::UnknownFeed(name.to_string()));
        };
        tracing::info!(feed = %name, sources = feed.sources.len(), "checking for updates");

        // Fetch and parse every source; read-only, so sources may run in
        // parallel. `buffered` keeps source order, which makes the
        // in-batch dedup below deterministic.
        let documents: Vec<(String, Result<ParsedDocument, SourceError>)> =
            stream::iter(feed.sources.clone())
                .map(|source| {
                    let client = self.client.clone();
                    async move {
                        let result = poll_source(&client, &source.url).await;
                        (source.url, result)
                    }
                })
                .buffered(MAX_CONCURRENT_SOURCES)
                .collect()
                .await;

        // Diff against the full current identity set; candidates and the
        // observed source lastBuildDate accumulate across all sources so
        // the feed is committed at most once per cycle.
        let known = feed.episode_keys();
        let mut candidates: Vec<Episode> = Vec::new();
        let mut observed_build_date: Option<DateTime<FixedOffset>> = None;

        for (url, result) in documents {
            let document = match result {
                Ok(document) => document,
                Err(error) => {
                    tracing::warn!(feed = %name, source = %url, error = %error, "source skipped this cycle");
                    continue;
                }
            };

            if let Some(raw) = document.channel.last_build_date.as_deref() {
                match parse_rss_date(raw) {
                    Ok(date) => {
                        observed_build_date =
                            Some(observed_build_date.map_or(date, |current| current.max(date)));
                    }
                    Err(error) => {
                        tracing::debug!(source = %url, error = %error, "ignoring unparsable lastBuildDate");
                    }
                }
            }

            candidates.extend(
                document
                    .episodes
                    .into_iter()
                    .filter(|episode| !known.contains(&episode.key())),
            );
        }

        if candidates.is_empty() {
            tracing::info!(feed = %name, "feed is up to date");
            return Ok(SyncOutcome::Unchanged);
        }

        let added = feed.merge(candidates, observed_build_date);
        self.db.save_feed(&feed).await?;
        tracing::info!(feed = %name, added, "new episodes added");
        Ok(SyncOutcome::Updated)
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(name.to_string()).or_default().clone()
    }
}

async fn poll_source(
    client: &reqwest::Client,
    url: &str,
) -> Result<ParsedDocument, SourceError> {
    let body = fetch_source(client, url).await?;
    Ok(parse_document(&body)?)
}
