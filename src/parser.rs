//! Turns raw feed bytes into a document tagged with its discovered format.

use serde::{Deserialize, Deserializer};

use crate::db::FeedFormat;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("empty document")]
    Empty,

    #[error("malformed RSS document: {0}")]
    Rss(#[source] rss::Error),

    #[error("malformed Atom document: {0}")]
    Atom(#[source] atom_syndication::Error),

    #[error("malformed JSON feed: {0}")]
    Json(#[from] serde_json::Error),
}

/// A JSON Feed document (https://jsonfeed.org).
///
/// Fields of the wrong JSON type read as absent, and `items` entries that
/// are not objects are dropped, so one bad value never loses the feed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonFeed {
    #[serde(default, deserialize_with = "string_only")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "string_only")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "string_only")]
    pub home_page_url: Option<String>,
    #[serde(default, deserialize_with = "string_only")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "object_items")]
    pub items: Option<Vec<JsonFeedItem>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonFeedItem {
    /// Some publishers emit numeric ids, so any scalar is accepted.
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "string_only")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "string_only")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "string_only")]
    pub external_url: Option<String>,
    #[serde(default, deserialize_with = "string_only")]
    pub content_html: Option<String>,
    #[serde(default, deserialize_with = "string_only")]
    pub content_text: Option<String>,
}

fn scalar_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn string_only<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    })
}

fn object_items<'de, D>(deserializer: D) -> Result<Option<Vec<JsonFeedItem>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(serde_json::Value::Array(values)) = Option::<serde_json::Value>::deserialize(deserializer)?
    else {
        return Ok(None);
    };

    Ok(Some(
        values
            .into_iter()
            .filter(serde_json::Value::is_object)
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect(),
    ))
}

#[derive(Debug, Clone)]
pub enum ParsedFeed {
    Rss(rss::Channel),
    Atom(atom_syndication::Feed),
    Json(JsonFeed),
    /// Well-formed, but not a syndication format we know.
    Unrecognized,
}

/// Channel-level fields shared by all formats.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMetadata {
    pub title: Option<String>,
    pub site_url: Option<String>,
    pub description: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl ParsedFeed {
    pub fn format(&self) -> Option<FeedFormat> {
        match self {
            ParsedFeed::Rss(_) => Some(FeedFormat::Rss),
            ParsedFeed::Atom(_) => Some(FeedFormat::Atom),
            ParsedFeed::Json(_) => Some(FeedFormat::Json),
            ParsedFeed::Unrecognized => None,
        }
    }

    pub fn metadata(&self) -> FeedMetadata {
        match self {
            ParsedFeed::Rss(channel) => FeedMetadata {
                title: non_empty(channel.title()),
                site_url: non_empty(channel.link()),
                description: non_empty(channel.description()),
            },
            ParsedFeed::Atom(feed) => FeedMetadata {
                title: non_empty(feed.title().as_str()),
                site_url: feed
                    .links()
                    .iter()
                    .find(|link| link.rel() == "alternate")
                    .and_then(|link| non_empty(link.href())),
                description: feed.subtitle().and_then(|s| non_empty(s.as_str())),
            },
            ParsedFeed::Json(feed) => FeedMetadata {
                title: feed.title.as_deref().and_then(non_empty),
                site_url: feed.home_page_url.as_deref().and_then(non_empty),
                description: feed.description.as_deref().and_then(non_empty),
            },
            ParsedFeed::Unrecognized => FeedMetadata::default(),
        }
    }
}

/// Classifies and parses a fetched document.
///
/// JSON is recognised by its leading `{`. Anything else is treated as XML
/// and tried as RSS, then Atom; a document whose root element is neither is
/// `Unrecognized` rather than an error.
pub fn parse_document(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let body = trim_start(bytes);
    if body.is_empty() {
        return Err(ParseError::Empty);
    }

    if body[0] == b'{' {
        let feed: JsonFeed = serde_json::from_slice(body)?;
        if feed.version.is_none() && feed.items.is_none() {
            return Ok(ParsedFeed::Unrecognized);
        }
        return Ok(ParsedFeed::Json(feed));
    }

    match rss::Channel::read_from(body) {
        Ok(channel) => Ok(ParsedFeed::Rss(channel)),
        Err(rss::Error::InvalidStartTag) => match atom_syndication::Feed::read_from(body) {
            Ok(feed) => Ok(ParsedFeed::Atom(feed)),
            Err(atom_syndication::Error::InvalidStartTag) => Ok(ParsedFeed::Unrecognized),
            Err(e) => Err(ParseError::Atom(e)),
        },
        Err(e) => Err(ParseError::Rss(e)),
    }
}

fn trim_start(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}
