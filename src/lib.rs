//! podmerge: aggregates episodes from multiple upstream podcast RSS
//! sources into one merged, de-duplicated feed per configured show, and
//! republishes the result as RSS 2.0.

pub mod config;
pub mod feed;
pub mod rss;
pub mod server;
pub mod storage;
pub mod sync;
