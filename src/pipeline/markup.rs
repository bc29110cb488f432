use crate::error::ParseError;
use crate::pipeline::encoding::decode_strict;
use crate::pipeline::fetch::{Document, DocumentKind};
use encoding_rs::UTF_8;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use scraper::{Html, Node};
use std::borrow::Cow;
use tracing::{debug, warn};
use url::Url;

static CDATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("cdata pattern"));

static SELF_CLOSING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<([A-Za-z_][A-Za-z0-9_:.-]*)((?:\s+[^<>]*?)?)\s*/>"#)
        .expect("self-closing pattern")
});

static TAG_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(/?)([A-Za-z_][A-Za-z0-9_:.-]*)").expect("tag name pattern"));

/// Prepended to every XML element name so no HTML element rules
/// (void elements, implied end tags, foster parenting) apply while parsing
const XML_NAME_PREFIX: &str = "ssx-";

/// A navigable tree built from one document.
///
/// `scraper::Html` is not `Send`; a tree lives inside one synchronous
/// extraction call and is never held across an await point.
pub struct ParsedTree {
    pub html: Html,
    /// Location of the document the tree came from
    pub source: String,
    pub url: Option<Url>,
    pub kind: DocumentKind,
}

pub trait MarkupParser: Send + Sync {
    fn parse(&self, document: &Document) -> Result<ParsedTree, ParseError>;
}

/// Tolerant parser on top of the html5ever tree builder. XML is normalised
/// into markup the HTML5 algorithm keeps intact before parsing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Html5Parser;

impl MarkupParser for Html5Parser {
    fn parse(&self, document: &Document) -> Result<ParsedTree, ParseError> {
        let text = decode(document)?;
        let markup = match document.kind {
            DocumentKind::Html => Cow::Borrowed(text.as_str()),
            DocumentKind::Xml => Cow::Owned(normalize_xml(&text)),
        };
        let mut html = Html::parse_document(&markup);
        if document.kind == DocumentKind::Xml {
            restore_xml_names(&mut html);
        }
        if !html.errors.is_empty() {
            debug!(
                "parser: repaired markup source={} issues={}",
                document.location(),
                html.errors.len()
            );
        }
        Ok(ParsedTree {
            html,
            source: document.location(),
            url: document.url.clone(),
            kind: document.kind,
        })
    }
}

/// Records parse duration and failures around any parser
pub struct MeteredParser<P: MarkupParser> {
    inner: P,
}

impl<P: MarkupParser> MeteredParser<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: MarkupParser> MarkupParser for MeteredParser<P> {
    fn parse(&self, document: &Document) -> Result<ParsedTree, ParseError> {
        let started = std::time::Instant::now();
        let result = self.inner.parse(document);
        crate::metrics::parse::duration(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            crate::metrics::parse::error();
            warn!("parser: {}", e);
        }
        result
    }
}

/// Strict decode under the detected encoding, then UTF-8
fn decode(document: &Document) -> Result<String, ParseError> {
    let mut tried = vec![document.encoding.name()];
    if let Some(text) = decode_strict(&document.bytes, document.encoding) {
        return Ok(text);
    }
    if document.encoding != UTF_8 {
        tried.push(UTF_8.name());
        if let Some(text) = decode_strict(&document.bytes, UTF_8) {
            debug!(
                "parser: {} failed for {}, decoded as UTF-8",
                document.encoding.name(),
                document.location()
            );
            return Ok(text);
        }
    }
    Err(ParseError::Undecodable {
        source_id: document.location(),
        tried: tried.join(", "),
    })
}

/// Unwrap CDATA sections into escaped text, expand `<tag/>` into
/// `<tag></tag>` and prefix every element name with [`XML_NAME_PREFIX`]
pub fn normalize_xml(text: &str) -> String {
    let unwrapped = CDATA.replace_all(text, |caps: &Captures| escape_text(&caps[1]));
    let expanded = SELF_CLOSING.replace_all(&unwrapped, "<$1$2></$1>");
    TAG_NAME
        .replace_all(&expanded, format!("<${{1}}{XML_NAME_PREFIX}${{2}}").as_str())
        .into_owned()
}

/// Strip the prefix `normalize_xml` added so selectors see the document's own names
fn restore_xml_names(html: &mut Html) {
    for node in html.tree.values_mut() {
        if let Node::Element(element) = node {
            if let Some(name) = element.name.local.strip_prefix(XML_NAME_PREFIX) {
                let name = name.to_string();
                element.name.local = name.as_str().into();
            }
        }
    }
}

fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;
    use scraper::Selector;

    fn doc(bytes: &[u8], content_type: Option<&str>) -> Document {
        Document::from_bytes(
            "test",
            None,
            bytes.to_vec(),
            content_type.map(|s| s.to_string()),
            None,
            UTF_8,
        )
    }

    #[test]
    fn test_malformed_html_is_repaired() {
        let tree = Html5Parser
            .parse(&doc(b"<ul><li>one<li>two</ul><p>unclosed", None))
            .unwrap();
        let li = Selector::parse("li").unwrap();
        let items: Vec<String> = tree
            .html
            .select(&li)
            .map(|e| e.text().collect::<String>())
            .collect();
        assert_eq!(items, vec!["one", "two"]);
    }

    #[test]
    fn test_xml_self_closing_and_cdata() {
        let xml = br#"<?xml version="1.0"?><items><item><name><![CDATA[Fish & <Chips>]]></name><flag/><price>5</price></item></items>"#;
        let tree = Html5Parser.parse(&doc(xml, Some("application/xml"))).unwrap();
        assert_eq!(tree.kind, DocumentKind::Xml);

        let name = Selector::parse("item > name").unwrap();
        let text: String = tree.html.select(&name).next().unwrap().text().collect();
        assert_eq!(text, "Fish & <Chips>");

        // <flag/> must not swallow <price>
        let price = Selector::parse("item > price").unwrap();
        assert_eq!(tree.html.select(&price).count(), 1);
    }

    #[test]
    fn test_normalize_xml_keeps_attributes() {
        assert_eq!(
            normalize_xml(r#"<img src="a/b.png" />"#),
            r#"<ssx-img src="a/b.png"></ssx-img>"#
        );
    }

    #[test]
    fn test_rss_link_keeps_its_text() {
        let rss = br#"<?xml version="1.0"?><rss><channel>
            <item><title>One</title><link>https://a.example/1</link><source url="https://a.example">A</source></item>
            <item><title>Two</title><link>https://a.example/2</link><meta>m</meta><br>b</br></item>
        </channel></rss>"#;
        let tree = Html5Parser.parse(&doc(rss, Some("application/rss+xml"))).unwrap();

        let link = Selector::parse("item > link").unwrap();
        let links: Vec<String> = tree.html.select(&link).map(|e| e.text().collect()).collect();
        assert_eq!(links, vec!["https://a.example/1", "https://a.example/2"]);

        let source = Selector::parse("item > source").unwrap();
        let element = tree.html.select(&source).next().unwrap();
        assert_eq!(element.text().collect::<String>(), "A");
        assert_eq!(element.value().attr("url"), Some("https://a.example"));

        let rest = Selector::parse("item > meta, item > br").unwrap();
        let texts: Vec<String> = tree.html.select(&rest).map(|e| e.text().collect()).collect();
        assert_eq!(texts, vec!["m", "b"]);
    }

    #[test]
    fn test_html_documents_keep_html_rules() {
        let tree = Html5Parser
            .parse(&doc(b"<p>a<link>b</p>", Some("text/html")))
            .unwrap();
        let link = Selector::parse("link").unwrap();
        let text: String = tree.html.select(&link).next().unwrap().text().collect();
        assert_eq!(text, "");
    }

    #[test]
    fn test_falls_back_to_utf8() {
        // UTF-8 euro sign is not valid EUC-JP
        let mut d = doc("prix: 5€".as_bytes(), None);
        d.encoding = encoding_rs::EUC_JP;
        let tree = Html5Parser.parse(&d);
        assert!(tree.is_ok());
    }

    #[test]
    fn test_undecodable_bytes_are_rejected() {
        let mut d = doc(&[0x3c, 0x70, 0x3e, 0xff, 0xfe, 0x3c], None);
        d.encoding = UTF_8;
        match Html5Parser.parse(&d) {
            Err(ParseError::Undecodable { tried, .. }) => assert_eq!(tried, "UTF-8"),
            Ok(_) => panic!("expected undecodable error"),
        }
    }

    #[test]
    fn test_utf16_meta_in_ascii_page_still_parses() {
        let d = doc(
            br#"<html><head><meta charset="utf-16"></head><body><p>hello</p></body></html>"#,
            None,
        );
        assert_eq!(d.encoding, UTF_8);
        let tree = Html5Parser.parse(&d).unwrap();
        let p = Selector::parse("p").unwrap();
        let texts: Vec<String> = tree.html.select(&p).map(|e| e.text().collect()).collect();
        assert_eq!(texts, vec!["hello"]);
    }

    #[test]
    fn test_windows_1252_document() {
        let bytes = b"<meta charset=\"windows-1252\"><p>caf\xe9</p>";
        let d = doc(bytes, None);
        assert_eq!(d.encoding, WINDOWS_1252);
        let tree = Html5Parser.parse(&d).unwrap();
        let p = Selector::parse("p").unwrap();
        let text: String = tree.html.select(&p).next().unwrap().text().collect();
        assert_eq!(text, "café");
    }
}
