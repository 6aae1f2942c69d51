//! Reference extraction from HTML bodies, behind a capability trait so the
//! concrete parser is an invocation-time choice.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::ParserKind;
use crate::model::RefKind;

/// One reference as found in the document, before resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRef {
    pub raw: String,
    pub kind: RefKind,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

#[derive(Debug)]
pub enum Parsed {
    /// The content type is not HTML; nothing to extract.
    NotHtml,
    Accepted {
        /// A `<base href>` value, overriding the response URL for resolution.
        base_href: Option<String>,
        /// References in document order, duplicates retained.
        refs: Vec<RawRef>,
    },
    /// The parser gave up; the page keeps its HTTP outcome and the
    /// diagnostic, with no outgoing references.
    Failed { diagnostic: String },
}

pub trait Parser: Send + Sync + 'static {
    fn parse(&self, content: &[u8], content_type: Option<&str>, types: &BTreeSet<RefKind>)
        -> Parsed;
}

pub fn parser_for(kind: ParserKind) -> Arc<dyn Parser> {
    match kind {
        ParserKind::Scraper => Arc::new(ScraperParser),
        ParserKind::Quick => Arc::new(QuickParser),
    }
}

pub fn is_html_content_type(content_type: Option<&str>) -> bool {
    let essence = match content_type {
        Some(value) => value.split(';').next().unwrap_or("").trim().to_ascii_lowercase(),
        None => return false,
    };
    essence == "text/html"
        || essence == "application/xhtml+xml"
        || essence == "application/xhtml"
}

/// html5ever-backed extractor. Tolerant of almost anything, but source
/// positions are lost in the tree build.
pub struct ScraperParser;

impl Parser for ScraperParser {
    fn parse(
        &self,
        content: &[u8],
        content_type: Option<&str>,
        types: &BTreeSet<RefKind>,
    ) -> Parsed {
        lazy_static! {
            static ref REFS: Selector = Selector::parse("a[href], img[src], link[href], script[src]")
                .expect("failed to parse statics selector");
            static ref BASE: Selector =
                Selector::parse("base[href]").expect("failed to parse statics selector");
        }

        if !is_html_content_type(content_type) {
            return Parsed::NotHtml;
        }

        let html = Html::parse_document(&String::from_utf8_lossy(content));

        let base_href = html
            .select(&BASE)
            .filter_map(|element| element.value().attr("href"))
            .map(str::to_owned)
            .next();

        let refs = html
            .select(&REFS)
            .filter_map(|element| {
                let kind = RefKind::from_tag(element.value().name())?;
                if !types.contains(&kind) {
                    return None;
                }
                let raw = element.value().attr(kind.attr()?)?;
                Some(RawRef {
                    raw: raw.to_owned(),
                    kind,
                    line: None,
                    column: None,
                })
            })
            .collect();

        Parsed::Accepted { base_href, refs }
    }
}

/// Regex tag scanner. No tree, no entity decoding, but it can tell you where
/// in the source a reference sits.
pub struct QuickParser;

impl Parser for QuickParser {
    fn parse(
        &self,
        content: &[u8],
        content_type: Option<&str>,
        types: &BTreeSet<RefKind>,
    ) -> Parsed {
        lazy_static! {
            static ref TAG: Regex =
                Regex::new(r"(?is)<\s*(a|img|link|script|base)\b[^>]*>").expect("bad tag regex");
            static ref ATTR: Regex = Regex::new(
                r#"(?is)\b(href|src)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#
            )
            .expect("bad attr regex");
        }

        if !is_html_content_type(content_type) {
            return Parsed::NotHtml;
        }

        let text = blank_comments(&String::from_utf8_lossy(content));
        let lines = LineIndex::new(&text);

        let mut base_href = None;
        let mut refs = vec![];

        for tag_match in TAG.captures_iter(&text) {
            let whole = tag_match.get(0).expect("group 0 always present");
            let name = tag_match
                .get(1)
                .expect("tag name group always present")
                .as_str()
                .to_ascii_lowercase();

            let wanted = if name == "base" {
                "href"
            } else {
                let kind = match RefKind::from_tag(&name) {
                    Some(kind) if types.contains(&kind) => kind,
                    _ => continue,
                };
                match kind.attr() {
                    Some(attr) => attr,
                    None => continue,
                }
            };

            for attr_match in ATTR.captures_iter(whole.as_str()) {
                let attr_name = attr_match
                    .get(1)
                    .expect("attr name group always present")
                    .as_str()
                    .to_ascii_lowercase();
                if attr_name != wanted {
                    continue;
                }

                let value = attr_match
                    .get(2)
                    .or_else(|| attr_match.get(3))
                    .or_else(|| attr_match.get(4));
                let value = match value {
                    Some(value) => value,
                    None => break,
                };

                if name == "base" {
                    if base_href.is_none() {
                        base_href = Some(value.as_str().to_owned());
                    }
                } else {
                    let offset = whole.start() + value.start();
                    let (line, column) = lines.locate(offset);
                    refs.push(RawRef {
                        raw: value.as_str().to_owned(),
                        // Checked right above; the loop would have continued.
                        kind: RefKind::from_tag(&name).expect("known tag name"),
                        line: Some(line),
                        column: Some(column),
                    });
                }

                break;
            }
        }

        Parsed::Accepted { base_href, refs }
    }
}

/// Blanks `<!-- … -->` spans with spaces, byte for byte, so offsets into the
/// original text stay valid.
fn blank_comments(text: &str) -> String {
    let mut bytes = text.as_bytes().to_vec();
    let mut cursor = 0;

    while let Some(open) = find(&bytes, b"<!--", cursor) {
        let close = find(&bytes, b"-->", open + 4)
            .map(|at| at + 3)
            .unwrap_or(bytes.len());
        for byte in &mut bytes[open..close] {
            *byte = b' ';
        }
        cursor = close;
    }

    String::from_utf8(bytes).expect("blanking with spaces preserves utf-8")
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|at| from + at)
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> LineIndex {
        let mut starts = vec![0];
        starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, byte)| *byte == b'\n')
                .map(|(at, _)| at + 1),
        );
        LineIndex { starts }
    }

    /// 1-based (line, column) of a byte offset.
    fn locate(&self, offset: usize) -> (u32, u32) {
        let line = self.starts.partition_point(|start| *start <= offset);
        let column = offset - self.starts[line - 1] + 1;
        (line as u32, column as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "<html><head>\n\
        <link rel=\"stylesheet\" href=\"/style.css\">\n\
        <script src=\"/app.js\"></script>\n\
        </head><body>\n\
        <a href=\"/first\">first</a>\n\
        <img src=\"/logo.png\">\n\
        <a href='/second'>second</a>\n\
        <a href=\"/first\">again</a>\n\
        </body></html>";

    fn all_types() -> BTreeSet<RefKind> {
        [RefKind::Anchor, RefKind::Image, RefKind::Stylesheet, RefKind::Script]
            .into_iter()
            .collect()
    }

    fn extract(parser: &dyn Parser, doc: &str, types: &BTreeSet<RefKind>) -> Vec<RawRef> {
        match parser.parse(doc.as_bytes(), Some("text/html"), types) {
            Parsed::Accepted { refs, .. } => refs,
            other => panic!("expected Accepted, got {:?}", other),
        }
    }

    #[test]
    fn scraper_preserves_document_order_and_duplicates() {
        let refs = extract(&ScraperParser, DOC, &all_types());
        let raws: Vec<_> = refs.iter().map(|r| r.raw.as_str()).collect();
        assert_eq!(
            raws,
            vec!["/style.css", "/app.js", "/first", "/logo.png", "/second", "/first"]
        );
    }

    #[test]
    fn quick_agrees_with_scraper_on_order() {
        let scraper = extract(&ScraperParser, DOC, &all_types());
        let quick = extract(&QuickParser, DOC, &all_types());
        let scraper_raws: Vec<_> = scraper.iter().map(|r| (&r.raw, r.kind)).collect();
        let quick_raws: Vec<_> = quick.iter().map(|r| (&r.raw, r.kind)).collect();
        assert_eq!(scraper_raws, quick_raws);
    }

    #[test]
    fn types_filter_what_gets_extracted() {
        let anchors_only: BTreeSet<_> = [RefKind::Anchor].into_iter().collect();
        let refs = extract(&ScraperParser, DOC, &anchors_only);
        assert!(refs.iter().all(|r| r.kind == RefKind::Anchor));
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn base_href_is_surfaced() {
        let doc = "<html><head><base href=\"http://cdn.example/\"></head>\
                   <body><a href=\"x\">x</a></body></html>";
        match ScraperParser.parse(doc.as_bytes(), Some("text/html"), &all_types()) {
            Parsed::Accepted { base_href, .. } => {
                assert_eq!(base_href.as_deref(), Some("http://cdn.example/"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn non_html_is_not_parsed() {
        assert!(matches!(
            ScraperParser.parse(b"%PDF-1.4", Some("application/pdf"), &all_types()),
            Parsed::NotHtml
        ));
        assert!(matches!(
            QuickParser.parse(b"{}", Some("application/json"), &all_types()),
            Parsed::NotHtml
        ));
        assert!(is_html_content_type(Some("text/html; charset=utf-8")));
        assert!(is_html_content_type(Some("application/xhtml+xml")));
        assert!(!is_html_content_type(None));
    }

    #[test]
    fn quick_reports_line_and_column() {
        let refs = extract(&QuickParser, DOC, &all_types());
        let first = refs.iter().find(|r| r.raw == "/first").unwrap();
        // `/first` sits on line 5, inside `<a href="/first">`.
        assert_eq!(first.line, Some(5));
        assert_eq!(first.column, Some(10));

        let scraper_refs = extract(&ScraperParser, DOC, &all_types());
        assert!(scraper_refs.iter().all(|r| r.line.is_none()));
    }

    #[test]
    fn quick_ignores_commented_out_references() {
        let doc = "<html><body>\n\
            <!-- <a href=\"/ghost\">gone</a> -->\n\
            <a href=\"/real\">here</a>\n\
            </body></html>";
        let refs = extract(&QuickParser, doc, &all_types());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].raw, "/real");
        assert_eq!(refs[0].line, Some(3));
    }
}
