use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::util::decode_entities;

/// Errors produced while turning a response body into a [`FetchedChannel`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// The body is not well-formed XML
    #[error("XML parse error: {0}")]
    Xml(String),

    /// Well-formed XML, but not an RSS document
    #[error("Document has no <channel> element")]
    MissingChannel,

    /// The document ended with elements still open
    #[error("Document ended inside <{0}>")]
    Truncated(String),
}

/// Channel metadata and items from one fetch. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedChannel {
    pub title: String,
    pub description: String,
    pub link: String,
    /// Items in the order the feed listed them
    pub items: Vec<FetchedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedItem {
    pub title: String,
    pub description: String,
    pub link: String,
    /// Raw `<pubDate>` text, parsed later during ingestion
    pub pub_date: String,
}

/// Parse an RSS 2.0 document.
///
/// XML escapes are resolved by the reader; HTML entities left over in
/// titles and descriptions (feeds often double-encode, `&amp;amp;`) are
/// decoded once afterwards. Decoding has to happen after XML parsing so a
/// decoded `&lt;` can never be mistaken for markup.
///
/// Prefixed elements such as `atom:link` or `content:encoded` are ignored.
pub fn parse_channel(bytes: &[u8]) -> Result<FetchedChannel, ParseError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations, only the
    // five XML builtins, so external entity tricks surface as parse errors.
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().check_end_names = true;

    let mut channel = FetchedChannel::default();
    let mut found_channel = false;
    let mut current_item: Option<FetchedItem> = None;
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"channel" {
                    found_channel = true;
                } else if name == b"item" && parent_is(&stack, b"channel") {
                    current_item = Some(FetchedItem::default());
                }
                // Markup nested inside a field (`<b>` in a description) keeps
                // adding to that field's text
                if is_field_level(&stack) {
                    text.clear();
                }
                stack.push(name);
            }
            Ok(Event::Text(e)) => {
                let unescaped = e.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e));
            }
            Ok(Event::End(_)) => {
                let Some(name) = stack.last() else {
                    return Err(ParseError::Xml("unexpected closing tag".to_string()));
                };
                let value = text.trim();
                let depth = stack.len();
                let closes_field = is_field_level(&stack[..depth - 1]);

                if depth >= 2 && stack[depth - 2] == b"channel" {
                    match name.as_slice() {
                        b"title" => channel.title = value.to_string(),
                        b"description" => channel.description = value.to_string(),
                        b"link" => channel.link = value.to_string(),
                        b"item" => {
                            if let Some(item) = current_item.take() {
                                channel.items.push(item);
                            }
                        }
                        _ => {}
                    }
                } else if depth >= 3
                    && stack[depth - 2] == b"item"
                    && stack[depth - 3] == b"channel"
                {
                    if let Some(item) = current_item.as_mut() {
                        match name.as_slice() {
                            b"title" => item.title = value.to_string(),
                            b"description" => item.description = value.to_string(),
                            b"link" => item.link = value.to_string(),
                            b"pubDate" => item.pub_date = value.to_string(),
                            _ => {}
                        }
                    }
                }

                stack.pop();
                if closes_field {
                    text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Truncated(
            String::from_utf8_lossy(open).into_owned(),
        ));
    }
    if !found_channel {
        return Err(ParseError::MissingChannel);
    }

    decode_channel_entities(&mut channel);
    Ok(channel)
}

fn parent_is(stack: &[Vec<u8>], name: &[u8]) -> bool {
    stack.last().is_some_and(|last| last.as_slice() == name)
}

/// True when an element opened under `stack` is a channel or item field
fn is_field_level(stack: &[Vec<u8>]) -> bool {
    parent_is(stack, b"channel") || parent_is(stack, b"item")
}

fn decode_channel_entities(channel: &mut FetchedChannel) {
    channel.title = decode_entities(&channel.title).into_owned();
    channel.description = decode_entities(&channel.description).into_owned();
    for item in &mut channel.items {
        item.title = decode_entities(&item.title).into_owned();
        item.description = decode_entities(&item.description).into_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
<channel>
  <title>Example Blog</title>
  <link>https://example.com/</link>
  <atom:link href="https://example.com/index.xml" rel="self" type="application/rss+xml"/>
  <description>Posts about things</description>
  <item>
    <title>First</title>
    <link>https://example.com/first</link>
    <pubDate>Mon, 02 Jan 2006 15:04:05 -0700</pubDate>
    <guid>https://example.com/first</guid>
    <description>First body</description>
  </item>
  <item>
    <title>Second</title>
    <link>https://example.com/second</link>
    <pubDate>not-a-date</pubDate>
    <description><![CDATA[<p>Second body</p>]]></description>
  </item>
</channel>
</rss>"#;

    #[test]
    fn test_parse_channel_fields() {
        let channel = parse_channel(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(channel.title, "Example Blog");
        assert_eq!(channel.link, "https://example.com/");
        assert_eq!(channel.description, "Posts about things");
        assert_eq!(channel.items.len(), 2);
    }

    #[test]
    fn test_parse_items_in_order() {
        let channel = parse_channel(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(
            channel.items[0],
            FetchedItem {
                title: "First".to_string(),
                description: "First body".to_string(),
                link: "https://example.com/first".to_string(),
                pub_date: "Mon, 02 Jan 2006 15:04:05 -0700".to_string(),
            }
        );
        assert_eq!(channel.items[1].title, "Second");
        assert_eq!(channel.items[1].pub_date, "not-a-date");
    }

    #[test]
    fn test_cdata_description() {
        let channel = parse_channel(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(channel.items[1].description, "<p>Second body</p>");
    }

    #[test]
    fn test_double_encoded_entities_decoded_once_more() {
        // XML layer turns &amp;amp; into &amp;, HTML layer turns that into &
        let xml = r#"<rss><channel>
            <title>A &amp;amp; B</title>
            <description>Tom &amp;quot;T&amp;quot; Smith</description>
            <item><title>1 &amp;lt; 2</title><description>caf&amp;eacute;</description></item>
        </channel></rss>"#;
        let channel = parse_channel(xml.as_bytes()).unwrap();
        assert_eq!(channel.title, "A & B");
        assert_eq!(channel.description, "Tom \"T\" Smith");
        assert_eq!(channel.items[0].title, "1 < 2");
        assert_eq!(channel.items[0].description, "café");
    }

    #[test]
    fn test_triple_encoded_entity_keeps_one_level() {
        let xml = r#"<rss><channel><title>A &amp;amp;amp; B</title></channel></rss>"#;
        let channel = parse_channel(xml.as_bytes()).unwrap();
        assert_eq!(channel.title, "A &amp; B");
    }

    #[test]
    fn test_links_are_not_entity_decoded() {
        let xml = r#"<rss><channel><item>
            <link>https://example.com/?a=1&amp;amp;b=2</link>
        </item></channel></rss>"#;
        let channel = parse_channel(xml.as_bytes()).unwrap();
        assert_eq!(channel.items[0].link, "https://example.com/?a=1&amp;b=2");
    }

    #[test]
    fn test_inline_markup_keeps_surrounding_text() {
        let xml = r#"<rss><channel>
            <title>Notes on <em>Rust</em></title>
            <item>
                <title>Item</title>
                <description>Hello <b>bold</b> world<br/>!</description>
                <link>https://example.com/1</link>
            </item>
        </channel></rss>"#;
        let channel = parse_channel(xml.as_bytes()).unwrap();
        assert_eq!(channel.title, "Notes on Rust");
        assert_eq!(channel.items[0].description, "Hello bold world!");
        assert_eq!(channel.items[0].title, "Item");
        assert_eq!(channel.items[0].link, "https://example.com/1");
    }

    #[test]
    fn test_empty_channel() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#;
        let channel = parse_channel(xml.as_bytes()).unwrap();
        assert!(channel.items.is_empty());
        assert_eq!(channel.title, "");
    }

    #[test]
    fn test_nested_item_title_does_not_overwrite_channel_title() {
        let xml = r#"<rss><channel>
            <title>Channel</title>
            <image><title>Logo</title><url>https://example.com/logo.png</url></image>
            <item><title>Item</title></item>
        </channel></rss>"#;
        let channel = parse_channel(xml.as_bytes()).unwrap();
        assert_eq!(channel.title, "Channel");
        assert_eq!(channel.items[0].title, "Item");
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            parse_channel(b"<rss><channel><title>x</channel></rss>"),
            Err(ParseError::Xml(_))
        ));
    }

    #[test]
    fn test_truncated_document() {
        assert!(parse_channel(b"<rss><channel><title>x</title>").is_err());
    }

    #[test]
    fn test_not_a_feed() {
        assert!(matches!(
            parse_channel(b"<html><body>hello</body></html>"),
            Err(ParseError::MissingChannel)
        ));
    }

    #[test]
    fn test_plain_text_body() {
        assert!(parse_channel(b"Service Unavailable").is_err());
    }
}
