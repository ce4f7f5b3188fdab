//! RSS date handling.
//!
//! Podcast hosts commonly stamp `pubDate`/`lastBuildDate` with US zone
//! abbreviations (`EST`, `PDT`, ...) that the strict RFC-822 grammar does
//! not accept. [`normalize_timezone`] rewrites the trailing zone token to
//! its numeric offset before the string is parsed, so otherwise-valid
//! feeds are not rejected.

use chrono::{DateTime, FixedOffset};
use std::borrow::Cow;
use thiserror::Error;

/// RFC-822 date with a numeric offset, e.g. `Thu, 11 Apr 2019 15:37:31 -0500`.
const RSS_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Zone abbreviations observed in the wild mapped to numeric offsets.
const ZONE_OFFSETS: &[(&str, &str)] = &[("EST", "-0500"), ("PDT", "-0700"), ("PST", "-0800")];

#[derive(Debug, Error)]
#[error("unrecognized RSS date {input:?}")]
pub struct DateFormatError {
    input: String,
    #[source]
    source: chrono::ParseError,
}

/// Rewrite a trailing non-numeric zone abbreviation to its numeric offset.
///
/// Only the last whitespace-delimited token is inspected; strings that
/// already carry a numeric offset (or an unknown abbreviation) are
/// returned unchanged apart from trimming.
pub fn normalize_timezone(raw: &str) -> Cow<'_, str> {
    let trimmed = raw.trim();
    if let Some((head, zone)) = trimmed.rsplit_once(' ') {
        if let Some((_, offset)) = ZONE_OFFSETS.iter().find(|(abbr, _)| *abbr == zone) {
            return Cow::Owned(format!("{head} {offset}"));
        }
    }
    Cow::Borrowed(trimmed)
}

/// Parse an RSS date string into an offset-aware timestamp.
///
/// The string is passed through [`normalize_timezone`] first. Callers
/// treat a [`DateFormatError`] as "date unknown", never as a fatal
/// condition for the episode or the sync cycle.
pub fn parse_rss_date(raw: &str) -> Result<DateTime<FixedOffset>, DateFormatError> {
    let normalized = normalize_timezone(raw);
    DateTime::parse_from_str(&normalized, RSS_DATE_FORMAT).map_err(|source| DateFormatError {
        input: raw.to_string(),
        source,
    })
}

/// Format a timestamp back into the RFC-822-with-numeric-offset form used
/// on the output wire format.
pub fn format_rss_date(date: &DateTime<FixedOffset>) -> String {
    date.format(RSS_DATE_FORMAT).to_string()
}
