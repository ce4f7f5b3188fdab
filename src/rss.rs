//! RSS 2.0 output serialization.
//!
//! The near-mechanical inverse of the parser, but a compatibility
//! surface: downstream podcast clients consume this document, so element
//! names, namespaces, and ordering must stay exactly as emitted here.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;

use crate::feed::{format_rss_date, Episode, Feed};

const ITUNES_NS: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";
const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
/// Channel-level itunes author identifying this aggregator.
const CHANNEL_AUTHOR: &str = "podmerge";

#[derive(Debug, Error)]
pub enum RssError {
    #[error("failed to write RSS XML: {0}")]
    Write(#[from] std::io::Error),
    #[error("rendered RSS is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Render a merged feed as RSS 2.0 with the `atom` and `itunes`
/// namespaces. `image_url` is the externally-resolved channel image;
/// episodes are emitted in stored order (descending by `published`).
pub fn render_rss(feed: &Feed, image_url: &str) -> Result<String, RssError> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("xmlns:atom", ATOM_NS));
    rss.push_attribute(("xmlns:itunes", ITUNES_NS));
    rss.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &feed.title)?;
    text_element(&mut writer, "link", &feed.link)?;
    text_element(&mut writer, "itunes:explicit", "no")?;
    text_element(&mut writer, "description", &feed.description)?;
    let build_date = feed
        .last_build_date
        .as_ref()
        .map(format_rss_date)
        .unwrap_or_default();
    text_element(&mut writer, "last_build_date", &build_date)?;

    writer.write_event(Event::Start(BytesStart::new("image")))?;
    text_element(&mut writer, "url", image_url)?;
    writer.write_event(Event::End(BytesEnd::new("image")))?;

    let mut itunes_image = BytesStart::new("itunes:image");
    itunes_image.push_attribute(("href", image_url));
    writer.write_event(Event::Empty(itunes_image))?;
    text_element(&mut writer, "itunes:author", CHANNEL_AUTHOR)?;

    for episode in &feed.episodes {
        write_item(&mut writer, episode)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

fn write_item(writer: &mut Writer<Vec<u8>>, episode: &Episode) -> Result<(), RssError> {
    writer.write_event(Event::Start(BytesStart::new("item")))?;

    text_element(writer, "title", &episode.title)?;

    let mut enclosure = BytesStart::new("enclosure");
    enclosure.push_attribute(("length", episode.enclosure.length.as_str()));
    enclosure.push_attribute(("type", episode.enclosure.mime_type.as_str()));
    enclosure.push_attribute(("url", episode.enclosure.url.as_str()));
    writer.write_event(Event::Empty(enclosure))?;

    if !episode.link.is_empty() {
        text_element(writer, "link", &episode.link)?;
    }
    // guid carries the episode link even when the link element is absent
    text_element(writer, "guid", &episode.link)?;
    if let Some(published) = &episode.published {
        text_element(writer, "pubDate", &format_rss_date(published))?;
    }
    text_element(writer, "description", &episode.description)?;
    if !episode.duration.is_empty() {
        text_element(writer, "itunes:duration", &episode.duration)?;
    }
    text_element(writer, "itunes:explicit", "no")?;

    let mut image = BytesStart::new("itunes:image");
    image.push_attribute(("href", episode.image.as_str()));
    writer.write_event(Event::Empty(image))?;

    text_element(writer, "author", &episode.author)?;

    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), RssError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
