//! arXiv Atom feed parser.
//!
//! The export API answers with an Atom document; each `<entry>` carries:
//! - `<id>`: `http://arxiv.org/abs/<arxiv-id>`
//! - `<title>`: the paper title, hard-wrapped
//! - `<summary>`: the abstract, hard-wrapped

use paperscout_shared::{Document, PaperScoutError, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Patterns (compiled once)
// ---------------------------------------------------------------------------

/// Captures the identifier after `/abs/` in an entry id URL.
static ABS_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/abs/(.+)$").expect("abs id regex"));

/// Runs of whitespace, including the feed's hard line wraps.
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

static ENTRY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("entry").expect("entry selector"));
static ID_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("id").expect("id selector"));
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector"));
static SUMMARY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("summary").expect("summary selector"));

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse an arXiv Atom feed into documents, in feed order.
///
/// Entries without an id are skipped. A body with no `<feed>` root is an error.
pub(crate) fn parse_feed(body: &str) -> Result<Vec<Document>> {
    if !body.contains("<feed") {
        return Err(PaperScoutError::parse("response is not an Atom feed"));
    }

    let doc = Html::parse_document(body);
    let mut documents = Vec::new();

    for entry in doc.select(&ENTRY_SEL) {
        let Some(url) = child_text(&entry, &ID_SEL) else {
            tracing::debug!("skipping feed entry without id");
            continue;
        };
        let id = ABS_ID_RE
            .captures(&url)
            .map(|caps| caps[1].to_string())
            .unwrap_or_else(|| url.clone());

        documents.push(Document {
            id,
            title: child_text(&entry, &TITLE_SEL).unwrap_or_default(),
            url,
            content: child_text(&entry, &SUMMARY_SEL).unwrap_or_default(),
            evaluation: None,
        });
    }

    Ok(documents)
}

/// Whitespace-normalized text of the first matching descendant.
fn child_text(entry: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    let el = entry.select(selector).next()?;
    let raw: String = el.text().collect();
    let text = WS_RE.replace_all(raw.trim(), " ").into_owned();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixture_feed() {
        let body = std::fs::read_to_string("../../../fixtures/arxiv/feed.xml")
            .expect("read feed fixture");
        let docs = parse_feed(&body).expect("parse feed");

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "2312.00752v2");
        assert_eq!(
            docs[0].title,
            "Mamba: Linear-Time Sequence Modeling with Selective State Spaces"
        );
        assert_eq!(docs[0].url, "http://arxiv.org/abs/2312.00752v2");
        assert!(docs[0].content.starts_with("Foundation models, now powering"));
        assert!(!docs[0].content.contains('\n'));
        assert_eq!(docs[1].id, "hep-th/9901001v1");
    }

    #[test]
    fn empty_feed_has_no_documents() {
        let body = r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom"><title>ArXiv Query</title></feed>"#;
        assert!(parse_feed(body).unwrap().is_empty());
    }

    #[test]
    fn entry_without_id_is_skipped() {
        let body = r#"<feed><entry><title>No id</title></entry><entry><id>http://arxiv.org/abs/1234.5678v1</id><title>Has id</title></entry></feed>"#;
        let docs = parse_feed(body).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "1234.5678v1");
    }

    #[test]
    fn non_feed_body_is_error() {
        assert!(parse_feed("<html><body>rate limited</body></html>").is_err());
    }
}
