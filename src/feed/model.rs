use chrono::{DateTime, FixedOffset};
use std::collections::HashSet;

/// Media-file descriptor attached to an episode.
///
/// Some hosts transiently omit the `<enclosure>` tag; such episodes carry
/// an all-empty placeholder instead of being dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclosure {
    pub length: String,
    /// The `type` attribute on the wire (MIME type of the media file).
    pub mime_type: String,
    pub url: String,
}

impl Enclosure {
    pub fn is_empty(&self) -> bool {
        self.length.is_empty() && self.mime_type.is_empty() && self.url.is_empty()
    }
}

/// One podcast item as parsed from an upstream source.
///
/// Episodes are immutable after creation: the merge step only ever adds
/// episodes whose identity is new, it never rewrites a stored one.
#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    pub title: String,
    pub enclosure: Enclosure,
    pub link: String,
    /// `None` when the source omitted `pubDate` or the date was unparsable.
    pub published: Option<DateTime<FixedOffset>>,
    pub description: String,
    pub duration: String,
    pub image: String,
    pub author: String,
}

impl Episode {
    /// The natural deduplication key. Upstream feeds provide no durable
    /// cross-poll episode ID, so `(title, link)` is the only identity
    /// available.
    pub fn key(&self) -> EpisodeKey {
        EpisodeKey::new(&self.title, &self.link)
    }
}

/// `(title, link)` identity, compared byte-for-byte after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EpisodeKey {
    title: String,
    link: String,
}

impl EpisodeKey {
    pub fn new(title: &str, link: &str) -> Self {
        Self {
            title: title.trim().to_string(),
            link: link.trim().to_string(),
        }
    }
}

/// One upstream RSS URL contributing episodes to a feed. Fixed by
/// configuration; the sync engine never adds or removes sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub url: String,
}

/// The aggregator's merged, de-duplicated view over one or more sources.
///
/// Invariants maintained by [`Feed::merge`]:
/// - no two episodes share a `(title, link)` key
/// - `episodes` is sorted by `published` descending (unknown dates last)
/// - `last_build_date` is non-decreasing and never behind the newest
///   episode or any observed source `lastBuildDate`
#[derive(Debug, Clone)]
pub struct Feed {
    pub name: String,
    pub title: String,
    pub link: String,
    pub language: String,
    pub description: String,
    pub image: String,
    pub sources: Vec<Source>,
    pub last_build_date: Option<DateTime<FixedOffset>>,
    pub episodes: Vec<Episode>,
}

impl Feed {
    /// Identity set over the full current episode collection. Candidate
    /// selection must diff against this, never against a scan-order
    /// prefix, because sources may return their whole back-catalog in
    /// arbitrary order on every poll.
    pub fn episode_keys(&self) -> HashSet<EpisodeKey> {
        self.episodes.iter().map(Episode::key).collect()
    }

    /// Re-establish the descending `published` order. Episodes without a
    /// date sort last; ties keep insertion order.
    pub fn sort_episodes(&mut self) {
        self.episodes.sort_by(|a, b| b.published.cmp(&a.published));
    }

    /// Merge a batch of candidate episodes accumulated over one sync
    /// cycle. The batch is deduplicated against the current episode set
    /// and within itself (two sources may mirror the same episode), the
    /// collection is re-sorted, and `last_build_date` advances to the
    /// max of its previous value, the newest added episode, and the
    /// per-cycle max source `lastBuildDate`.
    ///
    /// Returns the number of episodes actually added.
    pub fn merge(
        &mut self,
        candidates: Vec<Episode>,
        observed_build_date: Option<DateTime<FixedOffset>>,
    ) -> usize {
        let mut known = self.episode_keys();
        let mut added = 0;
        let mut newest_added: Option<DateTime<FixedOffset>> = None;

        for episode in candidates {
            if !known.insert(episode.key()) {
                continue;
            }
            newest_added = max_date(newest_added, episode.published);
            self.episodes.push(episode);
            added += 1;
        }

        if added > 0 {
            self.last_build_date = max_date(
                max_date(self.last_build_date, newest_added),
                observed_build_date,
            );
            self.sort_episodes();
        }
        added
    }
}

fn max_date(
    a: Option<DateTime<FixedOffset>>,
    b: Option<DateTime<FixedOffset>>,
) -> Option<DateTime<FixedOffset>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
