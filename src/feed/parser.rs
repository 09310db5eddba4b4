use chrono::SecondsFormat;
use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use thiserror::Error;

/// The fetched document could not be read as RSS, Atom or JSON Feed.
#[derive(Debug, Error)]
#[error("Malformed feed: {0}")]
pub struct ParseError(#[from] parser::ParseFeedError);

/// Channel-level metadata plus raw entries of one fetched document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub items: Vec<RawEntry>,
}

/// One entry as the source wrote it, before normalization.
///
/// Every field is optional: which ones are present depends on the feed
/// dialect. `iso_date` is an RFC 3339 string so that the synthetic dedup key
/// can be built from it verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    /// Source-provided unique id (`<guid>`, `<id>`, JSON Feed `id`)
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub iso_date: Option<String>,
    /// Display name of the writer (`dc:creator`, Atom author name)
    pub creator: Option<String>,
    /// RSS `<author>`, usually an email address
    pub author: Option<String>,
    /// Short text snippet; may still carry markup
    pub content_snippet: Option<String>,
    /// Full content (`content:encoded`, Atom `<content>`)
    pub content_encoded: Option<String>,
    /// Generic content, typically the RSS `<description>` HTML
    pub content: Option<String>,
}

/// Parse a syndication document into metadata and raw entries.
///
/// Missing entry ids stay missing: the dedup key is derived later with its
/// own fallback order, so the parser must not invent one.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)?;

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content),
        description: feed.description.map(|d| d.content),
        items: feed.entries.into_iter().map(raw_entry).collect(),
    })
}

fn raw_entry(entry: Entry) -> RawEntry {
    let link = select_link(&entry.links);
    let iso_date = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true));
    let creator = entry
        .authors
        .iter()
        .map(|p| p.name.trim())
        .find(|n| !n.is_empty())
        .map(str::to_owned);
    let author = entry.authors.iter().find_map(|p| p.email.clone());
    let description = entry.summary.map(|s| s.content);
    let content_encoded = entry.content.and_then(|c| c.body);

    RawEntry {
        guid: Some(entry.id).filter(|id| !id.is_empty()),
        link,
        title: entry.title.map(|t| t.content),
        iso_date,
        creator,
        author,
        content_snippet: description.clone().or_else(|| content_encoded.clone()),
        content_encoded,
        content: description,
    }
}

/// Prefer the `alternate` link (or one without a rel), else the first link.
fn select_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
        .filter(|href| !href.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/"
     xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>X News</title>
    <link>https://x.example.com</link>
    <description>&lt;p&gt;All the &lt;b&gt;news&lt;/b&gt;&lt;/p&gt;</description>
    <item>
      <guid>a1</guid>
      <title>Hello</title>
      <link>https://x.example.com/hello</link>
      <pubDate>Mon, 01 Jan 2024 12:00:00 GMT</pubDate>
      <dc:creator>Ada Lovelace</dc:creator>
      <description>&lt;p&gt;Short &lt;i&gt;intro&lt;/i&gt;&lt;/p&gt;</description>
      <content:encoded><![CDATA[<p>Full body</p>]]></content:encoded>
    </item>
    <item>
      <title>No id here</title>
      <link>https://x.example.com/no-id</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <id>urn:uuid:feed</id>
  <updated>2024-02-01T00:00:00Z</updated>
  <entry>
    <id>urn:uuid:entry-1</id>
    <title>Atom entry</title>
    <link rel="self" href="https://a.example.com/self"/>
    <link rel="alternate" href="https://a.example.com/entry-1"/>
    <updated>2024-02-01T08:30:00Z</updated>
    <author><name>Grace</name></author>
    <content type="html">&lt;p&gt;Atom body&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_channel_metadata() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("X News"));
        assert!(parsed.description.as_deref().unwrap().contains("news"));
        assert_eq!(parsed.items.len(), 2);
    }

    #[test]
    fn test_parse_rss_item_fields() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        let item = &parsed.items[0];
        assert_eq!(item.guid.as_deref(), Some("a1"));
        assert_eq!(item.title.as_deref(), Some("Hello"));
        assert_eq!(item.link.as_deref(), Some("https://x.example.com/hello"));
        assert_eq!(item.iso_date.as_deref(), Some("2024-01-01T12:00:00.000Z"));
        assert_eq!(item.creator.as_deref(), Some("Ada Lovelace"));
        assert_eq!(item.content_encoded.as_deref(), Some("<p>Full body</p>"));
        assert!(item.content_snippet.as_deref().unwrap().contains("intro"));
    }

    #[test]
    fn test_parse_rss_missing_id_stays_missing() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        let item = &parsed.items[1];
        assert_eq!(item.guid, None);
        assert_eq!(item.iso_date, None);
        assert_eq!(item.link.as_deref(), Some("https://x.example.com/no-id"));
    }

    #[test]
    fn test_parse_atom_prefers_alternate_link() {
        let parsed = parse_feed(ATOM.as_bytes()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Atom Feed"));
        let entry = &parsed.items[0];
        assert_eq!(entry.guid.as_deref(), Some("urn:uuid:entry-1"));
        assert_eq!(entry.link.as_deref(), Some("https://a.example.com/entry-1"));
        assert_eq!(entry.creator.as_deref(), Some("Grace"));
        assert_eq!(entry.iso_date.as_deref(), Some("2024-02-01T08:30:00.000Z"));
        assert!(entry.content_encoded.as_deref().unwrap().contains("Atom body"));
    }

    #[test]
    fn test_parse_empty_channel() {
        let parsed =
            parse_feed(br#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#)
                .unwrap();
        assert!(parsed.items.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_feed(b"<not valid xml").is_err());
        assert!(parse_feed(b"").is_err());
    }

    #[test]
    fn test_select_link_fallbacks() {
        let link = |href: &str, rel: Option<&str>| Link {
            href: href.to_string(),
            rel: rel.map(str::to_string),
            media_type: None,
            href_lang: None,
            title: None,
            length: None,
        };
        assert_eq!(select_link(&[]), None);
        assert_eq!(
            select_link(&[link("https://self", Some("self"))]).as_deref(),
            Some("https://self")
        );
        assert_eq!(
            select_link(&[link("https://self", Some("self")), link("https://alt", None)])
                .as_deref(),
            Some("https://alt")
        );
    }
}
