//! Upstream RSS document parser.
//!
//! Turns one raw RSS/XML document into channel-level metadata plus an
//! ordered sequence of [`Episode`] records. Upstream documents are
//! unreliable: hosting providers disagree about which optional tags they
//! emit, so every missing field degrades to an explicit empty placeholder
//! and only malformed XML fails the parse. Channel-level fallbacks
//! (link, image, itunes author) are resolved after the whole document has
//! been read, since channel children may appear in any order.

use crate::feed::datetime::parse_rss_date;
use crate::feed::model::{Enclosure, Episode};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("document truncated inside <{0}>")]
    Truncated(String),
    #[error("no <channel> element found")]
    NotRss,
}

/// Channel-level metadata of one source document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMeta {
    pub link: String,
    /// `<image><url>` of the channel, fallback for items without their
    /// own itunes image.
    pub image: String,
    /// Channel-level `itunes:author`, preferred over item authors.
    pub author: String,
    /// Raw `lastBuildDate` text; callers run it through the date
    /// normalizer and treat failures as "unknown".
    pub last_build_date: Option<String>,
}

#[derive(Debug)]
pub struct ParsedDocument {
    pub channel: ChannelMeta,
    pub episodes: Vec<Episode>,
}

/// Item fields as found in the document, before channel fallbacks apply.
#[derive(Debug, Default)]
struct RawItem {
    title: Option<String>,
    enclosure: Option<Enclosure>,
    link: Option<String>,
    pub_date: Option<String>,
    description: Option<String>,
    duration: Option<String>,
    image: Option<String>,
    author: Option<String>,
}

/// Parse one raw RSS document.
///
/// Fails only on malformed XML or a document that is not an RSS channel;
/// missing optional fields never abort an item.
pub fn parse_document(xml: &str) -> Result<ParsedDocument, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut channel = ChannelMeta::default();
    let mut raw_items: Vec<RawItem> = Vec::new();
    let mut item: Option<RawItem> = None;
    let mut saw_channel = false;
    // Open elements we did not consume inline, for truncation reporting.
    let mut open: Vec<String> = Vec::new();
    // Stack depth of the current <item>: known item tags only count as
    // direct children, not when nested inside an extension element.
    let mut item_base = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if item.is_some() && open.len() > item_base {
                    open.push(String::from_utf8_lossy(&name).into_owned());
                } else if let Some(it) = item.as_mut() {
                    match name.as_slice() {
                        b"title" => it.title = Some(read_text(&mut reader, &e)?),
                        b"link" => it.link = Some(read_text(&mut reader, &e)?),
                        b"pubDate" => it.pub_date = Some(read_text(&mut reader, &e)?),
                        b"description" => it.description = Some(read_text(&mut reader, &e)?),
                        b"itunes:duration" => it.duration = Some(read_text(&mut reader, &e)?),
                        b"author" => it.author = Some(read_text(&mut reader, &e)?),
                        b"enclosure" => {
                            it.enclosure = Some(read_enclosure(&e)?);
                            reader.read_to_end(e.name())?;
                        }
                        b"itunes:image" => {
                            it.image = read_attribute(&e, b"href")?;
                            reader.read_to_end(e.name())?;
                        }
                        _ => open.push(String::from_utf8_lossy(&name).into_owned()),
                    }
                } else {
                    match name.as_slice() {
                        b"channel" => {
                            saw_channel = true;
                            open.push("channel".to_string());
                        }
                        b"item" => {
                            item = Some(RawItem::default());
                            open.push("item".to_string());
                            item_base = open.len();
                        }
                        b"link" => channel.link = read_text(&mut reader, &e)?,
                        b"lastBuildDate" => {
                            channel.last_build_date = Some(read_text(&mut reader, &e)?)
                        }
                        b"itunes:author" => channel.author = read_text(&mut reader, &e)?,
                        b"image" => read_channel_image(&mut reader, &mut channel)?,
                        _ => open.push(String::from_utf8_lossy(&name).into_owned()),
                    }
                }
            }
            Event::Empty(e) => {
                if let Some(it) = &mut item {
                    if open.len() == item_base {
                        match e.name().as_ref() {
                            b"enclosure" => it.enclosure = Some(read_enclosure(&e)?),
                            b"itunes:image" => it.image = read_attribute(&e, b"href")?,
                            _ => {}
                        }
                    }
                }
            }
            Event::End(e) => {
                if e.name().as_ref() == b"item" && open.len() == item_base {
                    if let Some(it) = item.take() {
                        raw_items.push(it);
                    }
                }
                open.pop();
            }
            Event::Eof => {
                if let Some(unclosed) = open.pop() {
                    return Err(ParseError::Truncated(unclosed));
                }
                break;
            }
            _ => {}
        }
    }

    if !saw_channel {
        return Err(ParseError::NotRss);
    }

    let episodes = raw_items
        .into_iter()
        .enumerate()
        .map(|(index, raw)| resolve_episode(index, raw, &channel))
        .collect();

    Ok(ParsedDocument { channel, episodes })
}

/// Apply trimming, channel fallbacks, and date normalization to one raw
/// item. Never fails: every absent field becomes its documented
/// placeholder.
fn resolve_episode(index: usize, raw: RawItem, channel: &ChannelMeta) -> Episode {
    let title = match raw.title {
        Some(title) => title.trim().to_string(),
        None => {
            tracing::warn!(item = index, "item has no <title>, keeping empty placeholder");
            String::new()
        }
    };

    let published = raw.pub_date.and_then(|text| match parse_rss_date(&text) {
        Ok(date) => Some(date),
        Err(error) => {
            tracing::warn!(item = index, error = %error, "unparsable pubDate, treating as unknown");
            None
        }
    });

    let author = if channel.author.is_empty() {
        raw.author.unwrap_or_default()
    } else {
        channel.author.clone()
    };

    Episode {
        title,
        enclosure: raw.enclosure.unwrap_or_default(),
        link: raw
            .link
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| channel.link.clone()),
        published,
        description: raw
            .description
            .map(|d| d.trim().to_string())
            .unwrap_or_default(),
        duration: raw.duration.unwrap_or_default(),
        image: raw.image.unwrap_or_else(|| channel.image.clone()),
        author,
    }
}

/// Collect the text content of the element just opened by `start`,
/// consuming through its end tag. Nested markup is skipped, text and
/// CDATA sections are concatenated.
fn read_text(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<String, ParseError> {
    let mut depth = 0usize;
    let mut out = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(t) => out.push_str(&t.unescape().map_err(quick_xml::Error::from)?),
            Event::CData(c) => out.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(ParseError::Truncated(
                    String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                ))
            }
            _ => {}
        }
    }
    Ok(out)
}

/// Capture `<image><url>` at channel level.
fn read_channel_image(
    reader: &mut Reader<&[u8]>,
    channel: &mut ChannelMeta,
) -> Result<(), ParseError> {
    let mut depth = 0usize;
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"url" && depth == 0 => {
                channel.image = read_text(reader, &e)?.trim().to_string();
            }
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Eof => return Err(ParseError::Truncated("image".to_string())),
            _ => {}
        }
    }
    Ok(())
}

fn read_enclosure(element: &BytesStart) -> Result<Enclosure, ParseError> {
    let mut enclosure = Enclosure::default();
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = attr
            .unescape_value()
            .map_err(quick_xml::Error::from)?
            .into_owned();
        match attr.key.as_ref() {
            b"length" => enclosure.length = value,
            b"type" => enclosure.mime_type = value,
            b"url" => enclosure.url = value,
            _ => {}
        }
    }
    Ok(enclosure)
}

fn read_attribute(element: &BytesStart, key: &[u8]) -> Result<Option<String>, ParseError> {
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            return Ok(Some(
                attr.unescape_value()
                    .map_err(quick_xml::Error::from)?
                    .into_owned(),
            ));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FULL_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd" xmlns:atom="http://www.w3.org/2005/Atom" version="2.0">
<channel>
  <title>The Show</title>
  <link>https://example.com/show</link>
  <lastBuildDate>Thu, 11 Apr 2019 15:37:31 EST</lastBuildDate>
  <itunes:author>Channel Author</itunes:author>
  <image><url>https://example.com/cover.jpg</url></image>
  <item>
    <title> Episode Two </title>
    <link>https://example.com/2</link>
    <pubDate>Tue, 02 Apr 2019 10:00:00 +0000</pubDate>
    <description><![CDATA[Second <b>episode</b>]]></description>
    <itunes:duration>01:02:03</itunes:duration>
    <itunes:image href="https://example.com/2.jpg"/>
    <enclosure length="123" type="audio/mpeg" url="https://cdn.example.com/2.mp3"/>
  </item>
  <item>
    <title>Episode One</title>
    <pubDate>Mon, 01 Apr 2019 10:00:00 +0000</pubDate>
    <author>Item Author</author>
  </item>
</channel>
</rss>"#;

    #[test]
    fn test_parses_channel_metadata() {
        let doc = parse_document(FULL_DOC).unwrap();
        assert_eq!(doc.channel.link, "https://example.com/show");
        assert_eq!(doc.channel.image, "https://example.com/cover.jpg");
        assert_eq!(doc.channel.author, "Channel Author");
        assert_eq!(
            doc.channel.last_build_date.as_deref(),
            Some("Thu, 11 Apr 2019 15:37:31 EST")
        );
    }

    #[test]
    fn test_episodes_in_document_order() {
        let doc = parse_document(FULL_DOC).unwrap();
        assert_eq!(doc.episodes.len(), 2);
        assert_eq!(doc.episodes[0].title, "Episode Two");
        assert_eq!(doc.episodes[1].title, "Episode One");
    }

    #[test]
    fn test_item_fields_extracted_and_trimmed() {
        let doc = parse_document(FULL_DOC).unwrap();
        let e = &doc.episodes[0];
        assert_eq!(e.title, "Episode Two");
        assert_eq!(e.link, "https://example.com/2");
        assert_eq!(e.description, "Second <b>episode</b>");
        assert_eq!(e.duration, "01:02:03");
        assert_eq!(e.image, "https://example.com/2.jpg");
        assert_eq!(e.enclosure.length, "123");
        assert_eq!(e.enclosure.mime_type, "audio/mpeg");
        assert_eq!(e.enclosure.url, "https://cdn.example.com/2.mp3");
        assert!(e.published.is_some());
    }

    #[test]
    fn test_channel_fallbacks_for_sparse_item() {
        let doc = parse_document(FULL_DOC).unwrap();
        let e = &doc.episodes[1];
        // No item link or itunes:image: channel values apply.
        assert_eq!(e.link, "https://example.com/show");
        assert_eq!(e.image, "https://example.com/cover.jpg");
        // Channel itunes:author wins over the item-level author tag.
        assert_eq!(e.author, "Channel Author");
        // No enclosure: empty placeholder, item still retained.
        assert!(e.enclosure.is_empty());
        assert_eq!(e.description, "");
        assert_eq!(e.duration, "");
    }

    #[test]
    fn test_item_author_used_without_channel_author() {
        let xml = r#"<rss><channel>
            <item><title>t</title><author>Solo Author</author></item>
        </channel></rss>"#;
        let doc = parse_document(xml).unwrap();
        assert_eq!(doc.episodes[0].author, "Solo Author");
    }

    #[test]
    fn test_missing_title_yields_placeholder_not_error() {
        let xml = r#"<rss><channel>
            <item><link>https://x/1</link></item>
        </channel></rss>"#;
        let doc = parse_document(xml).unwrap();
        assert_eq!(doc.episodes.len(), 1);
        assert_eq!(doc.episodes[0].title, "");
        assert_eq!(doc.episodes[0].link, "https://x/1");
    }

    #[test]
    fn test_unparsable_pub_date_becomes_unknown() {
        let xml = r#"<rss><channel>
            <item><title>t</title><pubDate>sometime in spring</pubDate></item>
        </channel></rss>"#;
        let doc = parse_document(xml).unwrap();
        assert_eq!(doc.episodes[0].published, None);
    }

    #[test]
    fn test_abbreviated_zone_in_pub_date_parses() {
        let xml = r#"<rss><channel>
            <item><title>t</title><pubDate>Thu, 11 Apr 2019 15:37:31 EST</pubDate></item>
        </channel></rss>"#;
        let doc = parse_document(xml).unwrap();
        let published = doc.episodes[0].published.unwrap();
        assert_eq!(published.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_expanded_enclosure_tag_also_accepted() {
        let xml = r#"<rss><channel>
            <item><title>t</title>
            <enclosure length="9" type="audio/mpeg" url="https://x/a.mp3"></enclosure>
            </item>
        </channel></rss>"#;
        let doc = parse_document(xml).unwrap();
        assert_eq!(doc.episodes[0].enclosure.url, "https://x/a.mp3");
    }

    #[test]
    fn test_nested_extension_tags_do_not_override_item_fields() {
        let xml = r#"<rss><channel>
            <item>
                <title>Real Title</title>
                <enclosure length="9" type="audio/mpeg" url="https://x/a.mp3"/>
                <media:group>
                    <title>Nested Title</title>
                    <enclosure length="0" type="" url=""/>
                    <itunes:image href="https://x/nested.jpg"/>
                </media:group>
            </item>
        </channel></rss>"#;
        let doc = parse_document(xml).unwrap();
        assert_eq!(doc.episodes.len(), 1);
        let e = &doc.episodes[0];
        assert_eq!(e.title, "Real Title");
        assert_eq!(e.enclosure.url, "https://x/a.mp3");
        assert_eq!(e.image, "");
    }

    #[test]
    fn test_plain_text_is_not_rss() {
        assert!(matches!(
            parse_document("this is not a feed"),
            Err(ParseError::NotRss)
        ));
    }

    #[test]
    fn test_truncated_document_fails() {
        let xml = r#"<rss><channel><item><title>t</title>"#;
        assert!(matches!(parse_document(xml), Err(ParseError::Truncated(_))));
    }

    #[test]
    fn test_empty_channel_parses_with_no_episodes() {
        let doc = parse_document("<rss><channel></channel></rss>").unwrap();
        assert!(doc.episodes.is_empty());
        assert_eq!(doc.channel.last_build_date, None);
    }

    #[test]
    fn test_entities_in_text_are_unescaped() {
        let xml = r#"<rss><channel>
            <item><title>Q &amp; A</title></item>
        </channel></rss>"#;
        let doc = parse_document(xml).unwrap();
        assert_eq!(doc.episodes[0].title, "Q & A");
    }
}
