//! Text traversal for content units
//!
//! Extracts the text nodes of a content unit in document order and maps
//! matches in the flattened, lowercased text back to node positions.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::Result;
use crate::location::NodePoint;

/// Elements whose text is never displayed
const HIDDEN_ELEMENTS: [&[u8]; 4] = [b"head", b"script", b"style", b"title"];

/// Characters of context on each side of a match
const EXCERPT_CONTEXT: usize = 50;

/// Extract all displayed text nodes from XHTML markup, in document order.
pub fn extract_text_nodes(markup: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(markup);
    reader.check_end_names(false);

    let mut nodes = Vec::new();
    let mut hidden: Vec<bool> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name();
                hidden.push(
                    HIDDEN_ELEMENTS
                        .iter()
                        .any(|h| name.as_ref().eq_ignore_ascii_case(h)),
                );
            }
            Event::End(_) => {
                hidden.pop();
            }
            Event::Text(e) if !hidden.iter().any(|h| *h) => {
                let text = e
                    .unescape_with(resolve_html_entity)
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                if !text.is_empty() {
                    nodes.push(text);
                }
            }
            Event::CData(e) if !hidden.iter().any(|h| *h) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                if !text.is_empty() {
                    nodes.push(text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(nodes)
}

fn resolve_html_entity(entity: &str) -> Option<&'static str> {
    match entity {
        "nbsp" => Some("\u{a0}"),
        "mdash" => Some("\u{2014}"),
        "ndash" => Some("\u{2013}"),
        "hellip" => Some("\u{2026}"),
        "rsquo" => Some("\u{2019}"),
        "lsquo" => Some("\u{2018}"),
        "rdquo" => Some("\u{201d}"),
        "ldquo" => Some("\u{201c}"),
        _ => None,
    }
}

/// A match inside one content unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    pub start: NodePoint,
    /// Exclusive end
    pub end: NodePoint,
    pub excerpt: String,
}

/// Where a lowercased character came from
#[derive(Debug, Clone, Copy)]
struct CharOrigin {
    node: usize,
    offset: usize,
    flat_byte: usize,
    flat_len: usize,
}

/// Flattened, lowercased view of a content unit's text
pub struct SectionText {
    /// Original text of all nodes, concatenated
    flat: String,
    lowered: String,
    /// Byte position in `lowered` of each lowercased char
    char_starts: Vec<usize>,
    origins: Vec<CharOrigin>,
}

impl SectionText {
    pub fn new(nodes: &[String]) -> Self {
        let mut flat = String::new();
        let mut lowered = String::new();
        let mut char_starts = Vec::new();
        let mut origins = Vec::new();

        for (node, text) in nodes.iter().enumerate() {
            for (offset, ch) in text.chars().enumerate() {
                let flat_byte = flat.len();
                flat.push(ch);
                for lower in ch.to_lowercase() {
                    char_starts.push(lowered.len());
                    lowered.push(lower);
                    origins.push(CharOrigin {
                        node,
                        offset,
                        flat_byte,
                        flat_len: ch.len_utf8(),
                    });
                }
            }
        }

        Self {
            flat,
            lowered,
            char_starts,
            origins,
        }
    }

    /// All non-overlapping occurrences of an already-lowercased query
    pub fn find_all(&self, lowered_query: &str) -> Vec<TextMatch> {
        if lowered_query.is_empty() {
            return Vec::new();
        }

        self.lowered
            .match_indices(lowered_query)
            .filter_map(|(byte, matched)| {
                let first = self.char_starts.binary_search(&byte).ok()?;
                let end_byte = byte + matched.len();
                let past = match self.char_starts.binary_search(&end_byte) {
                    Ok(index) => index,
                    Err(_) => self.char_starts.len(),
                };
                let start = self.origins[first];
                let last = self.origins[past.checked_sub(1)?];

                Some(TextMatch {
                    start: NodePoint {
                        node: start.node,
                        offset: start.offset,
                    },
                    end: NodePoint {
                        node: last.node,
                        offset: last.offset + 1,
                    },
                    excerpt: create_excerpt(
                        &self.flat,
                        start.flat_byte,
                        last.flat_byte + last.flat_len,
                    ),
                })
            })
            .collect()
    }
}

/// Create an excerpt around a match, trimmed to word boundaries
pub fn create_excerpt(text: &str, match_start: usize, match_end: usize) -> String {
    let start = floor_char_boundary(text, match_start.saturating_sub(EXCERPT_CONTEXT));
    let end = ceil_char_boundary(text, (match_end + EXCERPT_CONTEXT).min(text.len()));

    // Find word boundaries
    let start = if start > 0 {
        text[start..match_start]
            .find(char::is_whitespace)
            .map(|i| start + i)
            .unwrap_or(start)
    } else {
        start
    };
    let end = if end < text.len() {
        text[match_end..end]
            .rfind(char::is_whitespace)
            .map(|i| match_end + i)
            .unwrap_or(end)
    } else {
        end
    };

    let excerpt = text[start..end].split_whitespace().collect::<Vec<_>>().join(" ");

    // Add ellipsis if truncated
    let prefix = if start > 0 { "..." } else { "" };
    let suffix = if end < text.len() { "..." } else { "" };

    format!("{}{}{}", prefix, excerpt, suffix)
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_skips_head_and_scripts() {
        let markup = r#"<?xml version="1.0"?>
<html><head><title>Chapter</title><style>p { color: red }</style></head>
<body><p>Hello <em>brave</em> world</p><script>var x = 1;</script></body></html>"#;

        let nodes = extract_text_nodes(markup).unwrap();
        let text: String = nodes.concat();

        assert!(text.contains("Hello brave world"));
        assert!(!text.contains("Chapter"));
        assert!(!text.contains("color"));
        assert!(!text.contains("var x"));
        assert!(nodes.contains(&"brave".to_string()));
    }

    #[test]
    fn test_extract_resolves_entities() {
        let nodes = extract_text_nodes("<p>one&nbsp;two &amp; three&hellip;</p>").unwrap();
        assert_eq!(nodes, vec!["one\u{a0}two & three\u{2026}".to_string()]);
    }

    #[test]
    fn test_find_all_maps_back_to_nodes() {
        let nodes = vec!["A Test of ".to_string(), "TEST".to_string(), "ing".to_string()];
        let section = SectionText::new(&nodes);

        let matches = section.find_all("test");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].start, NodePoint { node: 0, offset: 2 });
        assert_eq!(matches[0].end, NodePoint { node: 0, offset: 6 });
        assert_eq!(matches[1].start, NodePoint { node: 1, offset: 0 });
        assert_eq!(matches[1].end, NodePoint { node: 1, offset: 4 });
    }

    #[test]
    fn test_find_all_spans_nodes() {
        let nodes = vec!["gree".to_string(), "n light".to_string()];
        let section = SectionText::new(&nodes);

        let matches = section.find_all("green");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start, NodePoint { node: 0, offset: 0 });
        assert_eq!(matches[0].end, NodePoint { node: 1, offset: 1 });
    }

    #[test]
    fn test_find_all_handles_multibyte_text() {
        let nodes = vec!["Ça va, ÇA VA".to_string()];
        let section = SectionText::new(&nodes);

        let matches = section.find_all("ça");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[1].start, NodePoint { node: 0, offset: 7 });
    }

    #[test]
    fn test_create_excerpt() {
        let text = "This is a test of the excerpt creation function for search results and a good deal more text.";
        let excerpt = create_excerpt(text, 10, 14);
        assert!(excerpt.contains("test"));
        assert!(excerpt.starts_with("This is"));
        assert!(excerpt.ends_with("..."));
    }
}
