//! Feed domain: data model, upstream document parsing, and fetching.
//!
//! The pipeline for one source is fetch → parse → date-normalize, all
//! read-only with respect to shared state; the [`crate::sync`] engine
//! diffs the result against the stored feed and commits the merge.
//!
//! - [`model`] - `Feed`/`Episode` aggregate, `(title, link)` identity,
//!   merge semantics
//! - [`parser`] - RSS document → episode records + channel metadata
//! - [`datetime`] - zone-abbreviation normalization and RFC-822 dates
//! - [`fetcher`] - time-boxed, size-capped HTTP retrieval

pub mod datetime;
mod fetcher;
mod model;
mod parser;

pub use datetime::{format_rss_date, normalize_timezone, parse_rss_date, DateFormatError};
pub use fetcher::{fetch_source, FetchError};
pub use model::{Enclosure, Episode, EpisodeKey, Feed, Source};
pub use parser::{parse_document, ChannelMeta, ParseError, ParsedDocument};
