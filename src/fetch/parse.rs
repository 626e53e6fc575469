// src/fetch/parse.rs
// Tolerant RSS 2.0 / Atom parsing into normalized items. A feed that fails
// to parse yields an error with zero items; zero entries is a normal result.

use chrono::DateTime;
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use super::NormalizedItem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFeedError(pub String);

impl std::fmt::Display for ParseFeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "feed parse failed: {}", self.0)
    }
}

// ---- RSS 2.0 ----

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// `<guid isPermaLink="...">` carries an attribute, so it cannot map to a
/// bare String.
#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

// ---- Atom ----

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<Text>,
    id: Option<String>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<Text>,
    content: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Atom text constructs may carry a `type` attribute.
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

impl Text {
    fn into_value(self) -> Option<String> {
        self.value
    }
}

// ---- helpers ----

/// RSS dates; tolerates the obsolete zone names ("GMT") feeds still emit.
fn parse_rfc2822_to_unix(ts: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(ts.trim())
        .ok()
        .map(|dt| dt.timestamp())
}

/// Atom dates.
fn parse_rfc3339_to_unix(ts: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|dt| dt.timestamp())
}

/// Normalize text: decode entities, strip tags, collapse whitespace, cap.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// Named entities that frequently leak into "XML" feeds and break parsers.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

/// Local name of the document's root element, if the prolog is well-formed.
fn root_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.name();
                let local = name.local_name();
                return Some(String::from_utf8_lossy(local.as_ref()).to_string());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn rss_items(rss: Rss, source_id: &str) -> Vec<NormalizedItem> {
    rss.channel
        .item
        .into_iter()
        .filter_map(|it| {
            let link = it
                .link
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .or_else(|| it.guid.and_then(|g| g.value).map(|v| v.trim().to_string()))
                .unwrap_or_default();
            if link.is_empty() {
                return None;
            }
            Some(NormalizedItem {
                source_id: source_id.to_string(),
                link,
                title: normalize_text(it.title.as_deref().unwrap_or("(untitled)")),
                published_at: it.pub_date.as_deref().and_then(parse_rfc2822_to_unix),
                summary: normalize_text(it.description.as_deref().unwrap_or_default()),
            })
        })
        .collect()
}

fn atom_items(feed: AtomFeed, source_id: &str) -> Vec<NormalizedItem> {
    feed.entry
        .into_iter()
        .filter_map(|en| {
            let link = en
                .link
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
                .or(en.link.first())
                .and_then(|l| l.href.clone())
                .or(en.id)
                .unwrap_or_default()
                .trim()
                .to_string();
            if link.is_empty() {
                return None;
            }
            let published = en
                .published
                .as_deref()
                .and_then(parse_rfc3339_to_unix)
                .or_else(|| en.updated.as_deref().and_then(parse_rfc3339_to_unix));
            let summary = en
                .summary
                .and_then(Text::into_value)
                .or_else(|| en.content.and_then(Text::into_value))
                .unwrap_or_default();
            Some(NormalizedItem {
                source_id: source_id.to_string(),
                link,
                title: normalize_text(
                    en.title
                        .and_then(Text::into_value)
                        .as_deref()
                        .unwrap_or("(untitled)"),
                ),
                published_at: published,
                summary: normalize_text(&summary),
            })
        })
        .collect()
}

/// Parse a retrieved feed body. Dispatches on the root element so a non-feed
/// document (e.g. an HTML error page) is a parse error, not an empty feed.
pub fn parse_feed(xml: &str, source_id: &str) -> Result<Vec<NormalizedItem>, ParseFeedError> {
    let xml = scrub_html_entities_for_xml(xml);
    match root_element(&xml).as_deref() {
        Some("rss") => {
            let rss: Rss =
                from_str(&xml).map_err(|e| ParseFeedError(format!("rss: {e}")))?;
            Ok(rss_items(rss, source_id))
        }
        Some("feed") => {
            let feed: AtomFeed =
                from_str(&xml).map_err(|e| ParseFeedError(format!("atom: {e}")))?;
            Ok(atom_items(feed, source_id))
        }
        Some(other) => Err(ParseFeedError(format!("unsupported root element <{other}>"))),
        None => Err(ParseFeedError("no root element".to_string())),
    }
}
