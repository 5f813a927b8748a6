//! Maps every supported syndication format onto one item shape.

use serde::Serialize;

use crate::parser::{JsonFeedItem, ParsedFeed};

pub const DEFAULT_TITLE: &str = "No title";

/// A feed item reduced to the fields an entry is created from. Missing
/// values are empty strings, never absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedItem {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub content: String,
}

/// Normalizes the items of a parsed document in document order.
/// Unrecognized documents yield no items.
pub fn normalize(feed: &ParsedFeed) -> Vec<NormalizedItem> {
    match feed {
        ParsedFeed::Rss(channel) => channel.items().iter().map(normalize_rss_item).collect(),
        ParsedFeed::Json(feed) => feed
            .items
            .iter()
            .flatten()
            .map(normalize_json_item)
            .collect(),
        ParsedFeed::Atom(feed) => feed.entries().iter().map(normalize_atom_entry).collect(),
        ParsedFeed::Unrecognized => Vec::new(),
    }
}

fn title_or_default(title: Option<&str>) -> String {
    match title {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => DEFAULT_TITLE.to_string(),
    }
}

/// `content` comes from `<content:encoded>` only; `<description>` is a
/// summary and is not used.
fn normalize_rss_item(item: &rss::Item) -> NormalizedItem {
    NormalizedItem {
        guid: item.guid().map(|g| g.value().to_string()).unwrap_or_default(),
        title: title_or_default(item.title()),
        link: item.link().unwrap_or_default().to_string(),
        content: item.content().unwrap_or_default().to_string(),
    }
}

fn normalize_json_item(item: &JsonFeedItem) -> NormalizedItem {
    NormalizedItem {
        guid: item.id.clone().unwrap_or_default(),
        title: title_or_default(item.title.as_deref()),
        link: item.external_url.clone().unwrap_or_default(),
        content: item.content_html.clone().unwrap_or_default(),
    }
}

fn normalize_atom_entry(entry: &atom_syndication::Entry) -> NormalizedItem {
    NormalizedItem {
        guid: entry.id().to_string(),
        title: title_or_default(Some(entry.title().as_str())),
        link: entry
            .links()
            .first()
            .map(|l| l.href().to_string())
            .unwrap_or_default(),
        content: entry
            .content()
            .and_then(|c| c.value())
            .unwrap_or_default()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_document, JsonFeed};

    fn normalize_str(doc: &str) -> Vec<NormalizedItem> {
        normalize(&parse_document(doc.as_bytes()).unwrap())
    }

    mod rss_tests {
        use super::*;

        #[test]
        fn test_full_item() {
            let items = normalize_str(
                r#"<?xml version="1.0"?>
                <rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
                    <channel>
                        <title>Feed</title>
                        <link>https://x</link>
                        <description>d</description>
                        <item>
                            <guid>g1</guid>
                            <title>T</title>
                            <link>https://x</link>
                            <description>Summary only</description>
                            <content:encoded><![CDATA[C]]></content:encoded>
                        </item>
                    </channel>
                </rss>"#,
            );

            assert_eq!(
                items,
                vec![NormalizedItem {
                    guid: "g1".to_string(),
                    title: "T".to_string(),
                    link: "https://x".to_string(),
                    content: "C".to_string(),
                }]
            );
        }

        #[test]
        fn test_missing_fields_default() {
            let items = normalize_str(
                r#"<rss version="2.0">
                    <channel>
                        <title>Feed</title>
                        <link>https://x</link>
                        <description>d</description>
                        <item><description>Only a description</description></item>
                    </channel>
                </rss>"#,
            );

            assert_eq!(items.len(), 1);
            assert_eq!(items[0].guid, "");
            assert_eq!(items[0].title, DEFAULT_TITLE);
            assert_eq!(items[0].link, "");
            assert_eq!(items[0].content, "");
        }

        #[test]
        fn test_empty_title_uses_default() {
            let items = normalize_str(
                r#"<rss version="2.0">
                    <channel>
                        <title>Feed</title>
                        <link>https://x</link>
                        <description>d</description>
                        <item><title></title><guid>g</guid></item>
                    </channel>
                </rss>"#,
            );

            assert_eq!(items[0].title, DEFAULT_TITLE);
        }

        #[test]
        fn test_document_order_is_kept() {
            let items = normalize_str(
                r#"<rss version="2.0">
                    <channel>
                        <title>Feed</title>
                        <link>https://x</link>
                        <description>d</description>
                        <item><guid>a</guid></item>
                        <item><guid>b</guid></item>
                        <item><guid>c</guid></item>
                    </channel>
                </rss>"#,
            );

            let guids: Vec<_> = items.iter().map(|i| i.guid.as_str()).collect();
            assert_eq!(guids, ["a", "b", "c"]);
        }
    }

    mod json_tests {
        use super::*;

        #[test]
        fn test_full_item() {
            let items = normalize_str(
                r#"{
                    "version": "https://jsonfeed.org/version/1.1",
                    "items": [{
                        "id": "j1",
                        "title": "Json Title",
                        "url": "https://site/permalink",
                        "external_url": "https://elsewhere/article",
                        "content_html": "<p>Body</p>",
                        "content_text": "Body"
                    }]
                }"#,
            );

            assert_eq!(
                items,
                vec![NormalizedItem {
                    guid: "j1".to_string(),
                    title: "Json Title".to_string(),
                    link: "https://elsewhere/article".to_string(),
                    content: "<p>Body</p>".to_string(),
                }]
            );
        }

        #[test]
        fn test_wrongly_typed_fields_keep_the_rest_of_the_feed() {
            let items = normalize_str(
                r#"{
                    "version": "1",
                    "items": [
                        null,
                        "stray",
                        {"id": "a", "title": 5, "content_html": {"html": "x"}, "external_url": ["u"]},
                        {"id": "b", "title": "ok", "external_url": "https://b"}
                    ]
                }"#,
            );

            assert_eq!(
                items,
                vec![
                    NormalizedItem {
                        guid: "a".to_string(),
                        title: DEFAULT_TITLE.to_string(),
                        link: String::new(),
                        content: String::new(),
                    },
                    NormalizedItem {
                        guid: "b".to_string(),
                        title: "ok".to_string(),
                        link: "https://b".to_string(),
                        content: String::new(),
                    },
                ]
            );
        }

        #[test]
        fn test_missing_fields_default() {
            let items = normalize_str(r#"{"version": "1", "items": [{}]}"#);

            assert_eq!(
                items,
                vec![NormalizedItem {
                    guid: String::new(),
                    title: DEFAULT_TITLE.to_string(),
                    link: String::new(),
                    content: String::new(),
                }]
            );
        }

        #[test]
        fn test_missing_items_yields_nothing() {
            let feed = ParsedFeed::Json(JsonFeed {
                version: Some("https://jsonfeed.org/version/1".to_string()),
                ..Default::default()
            });
            assert!(normalize(&feed).is_empty());
        }
    }

    mod atom_tests {
        use super::*;

        #[test]
        fn test_full_entry() {
            let items = normalize_str(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <feed xmlns="http://www.w3.org/2005/Atom">
                    <title>Blog</title>
                    <id>urn:blog</id>
                    <updated>2024-01-02T00:00:00Z</updated>
                    <entry>
                        <title>Atom Title</title>
                        <id>urn:post:1</id>
                        <updated>2024-01-01T00:00:00Z</updated>
                        <link href="https://blog/post-1"/>
                        <link rel="replies" href="https://blog/post-1#comments"/>
                        <content type="html">Hello</content>
                    </entry>
                </feed>"#,
            );

            assert_eq!(
                items,
                vec![NormalizedItem {
                    guid: "urn:post:1".to_string(),
                    title: "Atom Title".to_string(),
                    link: "https://blog/post-1".to_string(),
                    content: "Hello".to_string(),
                }]
            );
        }

        #[test]
        fn test_missing_fields_default() {
            let items = normalize_str(
                r#"<feed xmlns="http://www.w3.org/2005/Atom">
                    <title>Blog</title>
                    <id>urn:blog</id>
                    <updated>2024-01-02T00:00:00Z</updated>
                    <entry>
                        <updated>2024-01-01T00:00:00Z</updated>
                    </entry>
                </feed>"#,
            );

            assert_eq!(items.len(), 1);
            assert_eq!(items[0].guid, "");
            assert_eq!(items[0].title, DEFAULT_TITLE);
            assert_eq!(items[0].link, "");
            assert_eq!(items[0].content, "");
        }
    }

    #[test]
    fn test_unrecognized_yields_nothing() {
        assert!(normalize(&ParsedFeed::Unrecognized).is_empty());
    }
}
